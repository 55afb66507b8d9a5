//! Application configuration for atomdoc.
//!
//! User config lives at `~/.atomdoc/atomdoc.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AtomdocError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "atomdoc.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".atomdoc";

// ---------------------------------------------------------------------------
// Config structs (matching atomdoc.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// AI provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Optional per-task provider overrides.
    #[serde(default)]
    pub tasks: TaskOverrides,

    /// Atomization tuning.
    #[serde(default)]
    pub atomizer: AtomizerConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default vault output directory.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "~/atomdoc-vaults".into()
}

impl DefaultsConfig {
    /// Output directory with a leading `~/` expanded to the user's home.
    pub fn resolved_output_dir(&self) -> PathBuf {
        if let Some(rest) = self.output_dir.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.output_dir)
    }
}

/// Supported AI vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderVendor {
    Anthropic,
    OpenAi,
    Google,
}

impl ProviderVendor {
    /// Name of the env var holding the vendor's API key (never store the key itself).
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
        };
        write!(f, "{name}")
    }
}

/// `[provider]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Default vendor for all capabilities.
    #[serde(default = "default_vendor")]
    pub vendor: ProviderVendor,

    /// Model id used with the Anthropic API.
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,

    /// Model id used with the OpenAI API.
    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    /// Model id used with the Google Generative AI API.
    #[serde(default = "default_google_model")]
    pub google_model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            vendor: default_vendor(),
            anthropic_model: default_anthropic_model(),
            openai_model: default_openai_model(),
            google_model: default_google_model(),
        }
    }
}

fn default_vendor() -> ProviderVendor {
    ProviderVendor::Anthropic
}
fn default_anthropic_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_openai_model() -> String {
    "gpt-4o".into()
}
fn default_google_model() -> String {
    "gemini-1.5-pro".into()
}

impl ProviderConfig {
    /// Model id configured for a vendor.
    pub fn model_for(&self, vendor: ProviderVendor) -> &str {
        match vendor {
            ProviderVendor::Anthropic => &self.anthropic_model,
            ProviderVendor::OpenAi => &self.openai_model,
            ProviderVendor::Google => &self.google_model,
        }
    }
}

/// `[tasks]` section — per-capability vendor overrides, falling back to
/// `provider.vendor` when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<ProviderVendor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atomicity: Option<ProviderVendor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ProviderVendor>,
}

/// `[atomizer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomizerConfig {
    /// Maximum recursion depth for splitting; deeper nodes are forced atomic.
    #[serde(default = "default_max_depth")]
    pub max_recursion_depth: u32,

    /// Content shorter than this is atomic without consulting the classifier.
    #[serde(default = "default_min_split_chars")]
    pub min_split_chars: usize,

    /// Maximum concurrent external calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retry budget for failed external calls.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay between retries, doubled per attempt.
    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for AtomizerConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: default_max_depth(),
            min_split_chars: default_min_split_chars(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_depth() -> u32 {
    10
}
fn default_min_split_chars() -> usize {
    500
}
fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    500
}

/// Which capability a provider is being selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Structure,
    Atomicity,
    Summary,
}

impl AppConfig {
    /// Resolve the vendor for a task, honoring `[tasks]` overrides.
    pub fn vendor_for(&self, task: Task) -> ProviderVendor {
        let overridden = match task {
            Task::Structure => self.tasks.structure,
            Task::Atomicity => self.tasks.atomicity,
            Task::Summary => self.tasks.summary,
        };
        overridden.unwrap_or(self.provider.vendor)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.atomdoc/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AtomdocError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.atomdoc/atomdoc.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AtomdocError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| AtomdocError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AtomdocError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AtomdocError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AtomdocError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the API key env var for every vendor the config selects is set.
pub fn validate_api_keys(config: &AppConfig) -> Result<()> {
    let mut vendors = vec![config.provider.vendor];
    for task in [Task::Structure, Task::Atomicity, Task::Summary] {
        let v = config.vendor_for(task);
        if !vendors.contains(&v) {
            vendors.push(v);
        }
    }

    for vendor in vendors {
        let var_name = vendor.api_key_env();
        match std::env::var(var_name) {
            Ok(val) if !val.is_empty() => {}
            _ => {
                return Err(AtomdocError::config(format!(
                    "API key for {vendor} not found. Set the {var_name} environment variable."
                )));
            }
        }
    }

    Ok(())
}
