//! The low-level provider abstraction shared by all vendor variants.

use async_trait::async_trait;

use atomdoc_shared::Result;

/// A single text-completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Optional system instruction.
    pub system: Option<String>,
    /// The user prompt.
    pub prompt: String,
    /// Sampling temperature (0–1). Classification tasks run cold.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: 0.2,
            max_tokens: 4096,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Core provider trait — abstracts vendor LLM API communication.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Vendor name for logging.
    fn name(&self) -> &'static str;

    /// Generate a text completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_defaults() {
        let req = CompletionRequest::new("classify this");
        assert!(req.system.is_none());
        assert_eq!(req.max_tokens, 4096);

        let req = req.with_system("be terse").with_max_tokens(128);
        assert_eq!(req.system.as_deref(), Some("be terse"));
        assert_eq!(req.max_tokens, 128);
    }

    // Trait object safety check
    #[test]
    fn provider_is_object_safe() {
        fn _assert_object_safe(_: &dyn Provider) {}
    }
}
