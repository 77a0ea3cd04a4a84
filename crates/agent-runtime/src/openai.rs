//! OpenAI-compatible Provider
//!
//! Talks to any endpoint exposing `/chat/completions` and `/models` with
//! bearer-token authentication (OpenAI, Azure-style gateways, local servers).

use agent_core::{
    config::LlmSettings,
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, GenerationOptions, LlmProvider, ModelInfo, TokenUsage},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::http::{status_error, transport_error};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible LLM provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create with a custom base URL (gateways, self-hosted servers)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create from the `llm` settings section; the API key is required
    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AgentError::Config("api_key is required for the openai provider".into()))?;

        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: settings.api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        Err(status_error(status, &detail))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "no_stop_sequences")]
    stop: &'a [String],
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn no_stop_sequences(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

fn convert_messages(messages: &[Message]) -> Vec<ChatMessage<'_>> {
    messages
        .iter()
        .map(|m| ChatMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &m.content,
        })
        .collect()
}

fn convert_response(response: ChatResponse, requested_model: &str) -> Result<Completion> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::Provider("completion returned no choices".into()))?;

    Ok(Completion {
        content: choice.message.content.unwrap_or_default(),
        model: response.model.unwrap_or_else(|| requested_model.to_string()),
        usage: response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(base_url = %self.base_url, error = %e, "OpenAI health check failed");
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let body = ChatRequest {
            model: &options.model,
            messages: convert_messages(messages),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stop: &options.stop_sequences,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self.send(self.client.post(&url).json(&body)).await?;
        let parsed: ChatResponse = response.json().await.map_err(|e| transport_error(&e))?;

        convert_response(parsed, &options.model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);
        let response = self.send(self.client.get(&url)).await?;
        let list: ModelList = response.json().await.map_err(|e| transport_error(&e))?;

        Ok(list
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.id.clone(),
                id: m.id,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_requires_key() {
        let settings = LlmSettings::default();
        assert!(matches!(
            OpenAiProvider::from_settings(&settings),
            Err(AgentError::Config(_))
        ));

        let keyed = LlmSettings {
            api_key: Some("sk-test".into()),
            api_base: "https://example.com/v1/".into(),
            ..LlmSettings::default()
        };
        let provider = OpenAiProvider::from_settings(&keyed).unwrap();
        assert_eq!(provider.base_url(), "https://example.com/v1");
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![Message::system("be brief"), Message::user("hi")];
        let options = GenerationOptions::default();
        let body = ChatRequest {
            model: &options.model,
            messages: convert_messages(&messages),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stop: &options.stop_sequences,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert!(json.get("stop").is_none());
    }

    #[test]
    fn test_convert_response() {
        let raw = r#"{
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let completion = convert_response(parsed, "requested").unwrap();
        assert_eq!(completion.content, "hello");
        assert_eq!(completion.model, "gpt-4o-mini");
        assert_eq!(completion.usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn test_empty_choices_is_provider_error() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            convert_response(parsed, "m"),
            Err(AgentError::Provider(_))
        ));
    }
}
