//! Vendor selection from configuration.

use std::sync::Arc;

use atomdoc_shared::{AppConfig, AtomdocError, ProviderVendor, Result, Task};

use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::openai::OpenAiProvider;
use crate::traits::Provider;

/// Build the provider for a vendor, reading its API key from the environment.
pub fn provider_for_vendor(
    vendor: ProviderVendor,
    config: &AppConfig,
) -> Result<Arc<dyn Provider>> {
    let var_name = vendor.api_key_env();
    let api_key = std::env::var(var_name)
        .ok()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            AtomdocError::config(format!(
                "API key for {vendor} not found. Set the {var_name} environment variable."
            ))
        })?;

    let model = config.provider.model_for(vendor).to_string();

    let provider: Arc<dyn Provider> = match vendor {
        ProviderVendor::Anthropic => Arc::new(AnthropicProvider::new(api_key, model)?),
        ProviderVendor::OpenAi => Arc::new(OpenAiProvider::new(api_key, model)?),
        ProviderVendor::Google => Arc::new(GoogleProvider::new(api_key, model)?),
    };

    Ok(provider)
}

/// Build the provider for a capability task, honoring `[tasks]` overrides.
pub fn provider_for_task(task: Task, config: &AppConfig) -> Result<Arc<dyn Provider>> {
    provider_for_vendor(config.vendor_for(task), config)
}
