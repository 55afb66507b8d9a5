//! Anthropic Messages API provider variant.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use atomdoc_shared::{AtomdocError, Result};

use crate::traits::{CompletionRequest, Provider};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Provider speaking the Anthropic `/v1/messages` API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// Point the provider at a different endpoint (tests, proxies).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| {
                AtomdocError::CapabilityUnavailable(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<MessageParam<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct MessageParam<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: request.system.as_deref(),
            messages: vec![MessageParam {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AtomdocError::CapabilityUnavailable(format!("anthropic: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AtomdocError::CapabilityUnavailable(format!(
                "anthropic: HTTP {status}: {}",
                &detail[..detail.len().min(200)]
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AtomdocError::parse(format!("anthropic response: {e}")))?;

        parsed
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| AtomdocError::parse("anthropic response had no text block"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn complete_parses_text_block() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "{\"is_atomic\": true}"}],
                "model": "test",
                "stop_reason": "end_turn"
            })))
            .mount(&server)
            .await;

        let provider =
            AnthropicProvider::with_base_url("test-key", "claude-test", server.uri()).unwrap();
        let out = provider
            .complete(&CompletionRequest::new("Is this atomic?"))
            .await
            .unwrap();
        assert_eq!(out, "{\"is_atomic\": true}");
    }

    #[tokio::test]
    async fn complete_maps_http_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider =
            AnthropicProvider::with_base_url("test-key", "claude-test", server.uri()).unwrap();
        let err = provider
            .complete(&CompletionRequest::new("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, AtomdocError::CapabilityUnavailable(_)));
        assert!(err.to_string().contains("529"));
    }
}
