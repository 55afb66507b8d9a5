//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use atomdoc_core::pipeline::{self, ProcessConfig, ProcessResult, ProgressReporter};
use atomdoc_providers::Capabilities;
use atomdoc_shared::{
    AppConfig, CancelSignal, PageText, init_config, load_config, validate_api_keys,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// atomdoc — atomize mathematical texts into linked knowledge vaults.
#[derive(Parser)]
#[command(
    name = "atomdoc",
    version,
    about = "Turn long-form mathematical texts into vaults of cross-linked atomic notes.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Atomize a document into a vault of linked markdown notes.
    Process {
        /// Input file: a JSON array of pages (`[{"number": 1, "text": "…"}]`)
        /// or a plain text file treated as a single page.
        input: PathBuf,

        /// Document title hint (defaults to whatever the analysis detects).
        #[arg(short, long)]
        title: Option<String>,

        /// Output directory for the vault (defaults to the configured
        /// output_dir).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "atomdoc=info",
        1 => "atomdoc=debug",
        _ => "atomdoc=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Process { input, title, out } => {
            cmd_process(&input, title.as_deref(), out).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

async fn cmd_process(input: &PathBuf, title: Option<&str>, out: Option<PathBuf>) -> Result<()> {
    // Validate API keys before doing anything.
    let config = load_config()?;
    validate_api_keys(&config)?;

    let pages = read_pages(input)?;
    if pages.is_empty() {
        return Err(eyre!("'{}' contains no pages", input.display()));
    }

    let output_root = out.unwrap_or_else(|| config.defaults.resolved_output_dir());

    let capabilities = Capabilities::from_config(&config)?;
    let process_config = ProcessConfig {
        title_hint: title.map(String::from),
        output_root,
        atomizer: config.atomizer.clone(),
    };

    info!(
        input = %input.display(),
        pages = pages.len(),
        "processing document"
    );

    // Ctrl-C requests a clean, resumable stop.
    let cancel = CancelSignal::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ncancellation requested, finishing in-flight work...");
            ctrl_c_cancel.cancel();
        }
    });

    let reporter = CliProgress::new();
    let result =
        pipeline::process(&pages, &capabilities, &process_config, &cancel, &reporter).await?;

    // Print summary
    println!();
    if result.report.cancelled {
        println!("  Run cancelled — progress saved for resume.");
    } else {
        println!("  Vault created successfully!");
    }
    println!("  Job:      {}", result.job.id);
    println!("  Title:    {}", result.job.title);
    if let Some(path) = &result.vault_path {
        println!("  Path:     {}", path.display());
    }
    println!("  Units:    {}", result.unit_count);
    println!(
        "  Atoms:    {} filled, {} atomic, {} failed",
        result.report.counts.filled, result.report.counts.atomic, result.report.counts.failed
    );
    println!("  Warnings: {}", result.report.warnings.len());
    println!("  Time:     {:.1}s", result.elapsed.as_secs_f64());

    if !result.report.failed_nodes.is_empty() {
        println!();
        println!("  Nodes needing manual review:");
        for id in &result.report.failed_nodes {
            println!("    - {id}");
        }
    }
    if !result.report.warnings.is_empty() {
        println!();
        println!("  First warnings:");
        for warning in result.report.warnings.iter().take(5) {
            println!("    - [{:?}] {}: {}", warning.kind, warning.node, warning.message);
        }
    }
    println!();

    Ok(())
}

/// Load pages from a JSON pages file or a plain text file.
fn read_pages(input: &PathBuf) -> Result<Vec<PageText>> {
    let raw = std::fs::read_to_string(input)
        .map_err(|e| eyre!("cannot read '{}': {e}", input.display()))?;

    if input.extension().and_then(|ext| ext.to_str()) == Some("json") {
        let pages: Vec<PageText> = serde_json::from_str(&raw)
            .map_err(|e| eyre!("'{}' is not a valid pages file: {e}", input.display()))?;
        Ok(pages)
    } else {
        Ok(vec![PageText {
            number: 1,
            text: raw,
        }])
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn node_processed(&self, detail: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("[{current}/{total}] {detail}"));
    }

    fn done(&self, _result: &ProcessResult) {
        self.spinner.finish_and_clear();
    }
}
