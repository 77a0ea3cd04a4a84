//! Ollama Provider and Embedder
//!
//! Implementation of `LlmProvider` and `Embedder` for local Ollama inference.

use agent_core::{
    config::{LlmSettings, MemorySettings},
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, Embedder, GenerationOptions, LlmProvider, ModelInfo},
};
use async_trait::async_trait;
use ollama_rs::{
    Ollama,
    generation::{
        chat::{ChatMessage, ChatMessageResponse, MessageRole, request::ChatMessageRequest},
        embeddings::request::GenerateEmbeddingsRequest,
    },
    models::ModelOptions,
};

use crate::http::client_error;

/// Ollama connection configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL, scheme included
    pub host: String,

    /// Ollama port
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
        }
    }
}

impl OllamaConfig {
    /// Split a base URL such as `http://localhost:11434` into host and port
    pub fn from_base_url(base: &str) -> Result<Self> {
        let url = reqwest::Url::parse(base)
            .map_err(|e| AgentError::Config(format!("invalid Ollama URL '{base}': {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| AgentError::Config(format!("Ollama URL '{base}' has no host")))?;
        let port = url.port().unwrap_or(11434);

        Ok(Self {
            host: format!("{}://{host}", url.scheme()),
            port,
        })
    }
}

fn connect(config: &OllamaConfig) -> Ollama {
    Ollama::new(config.host.clone(), config.port)
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
        })
    }

    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            client: connect(&config),
            config,
        }
    }

    /// Create from the `llm` settings section
    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        Ok(Self::from_config(OllamaConfig::from_base_url(&settings.api_base)?))
    }

    /// Create with default localhost settings
    pub fn localhost() -> Self {
        Self::from_config(OllamaConfig::default())
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Convert agent messages to Ollama format
    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => MessageRole::System,
                    Role::User => MessageRole::User,
                    Role::Assistant => MessageRole::Assistant,
                };
                ChatMessage::new(role, m.content.clone())
            })
            .collect()
    }

    fn convert_completion(response: ChatMessageResponse, model: &str) -> Completion {
        Completion::text(model, response.message.content)
    }

    /// Build Ollama model options
    fn build_options(opts: &GenerationOptions) -> ModelOptions {
        let options = ModelOptions::default()
            .temperature(opts.temperature)
            .num_predict(i32::try_from(opts.max_tokens).unwrap_or(i32::MAX));

        if opts.stop_sequences.is_empty() {
            options
        } else {
            options.stop(opts.stop_sequences.clone())
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(host = %self.config.host, port = self.config.port, error = %e, "Ollama health check failed");
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let request = ChatMessageRequest::new(options.model.clone(), Self::convert_messages(messages))
            .options(Self::build_options(options));

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| client_error(&e))?;

        Ok(Self::convert_completion(response, &options.model))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        Ok(models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
            })
            .collect())
    }
}

/// Embeddings from an Ollama embedding model
pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    /// `dimension` must match what `model` produces; mismatches surface on
    /// the first embed call
    pub fn new(config: &OllamaConfig, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: connect(config),
            model: model.into(),
            dimension,
        }
    }

    /// Create from the `llm` and `memory` settings sections
    pub fn from_settings(llm: &LlmSettings, memory: &MemorySettings) -> Result<Self> {
        let model = memory
            .embedding_model
            .clone()
            .ok_or_else(|| AgentError::Config("memory.embedding_model is not set".into()))?;
        let config = OllamaConfig::from_base_url(&llm.api_base)?;
        Ok(Self::new(&config, model, memory.dimension))
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = GenerateEmbeddingsRequest::new(self.model.clone(), text.into());
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| AgentError::Embedding(client_error(&e).to_string()))?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Embedding(format!("model '{}' returned no embedding", self.model)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.host, "http://localhost");
        assert_eq!(config.port, 11434);
    }

    #[test]
    fn test_config_from_base_url() {
        let config = OllamaConfig::from_base_url("http://gpu-box:8080/").unwrap();
        assert_eq!(config.host, "http://gpu-box");
        assert_eq!(config.port, 8080);

        let default_port = OllamaConfig::from_base_url("http://localhost").unwrap();
        assert_eq!(default_port.port, 11434);

        assert!(matches!(
            OllamaConfig::from_base_url("not a url"),
            Err(AgentError::Config(_))
        ));
    }

    #[test]
    fn test_message_conversion() {
        let messages = vec![
            Message::system("You are helpful."),
            Message::user("Hello"),
        ];

        let converted = OllamaProvider::convert_messages(&messages);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[1].content, "Hello");
    }

    #[test]
    fn test_embedder_requires_model() {
        let err = OllamaEmbedder::from_settings(&LlmSettings::default(), &MemorySettings::default());
        assert!(matches!(err, Err(AgentError::Config(_))));
    }
}
