//! Agent Settings
//!
//! The configuration object handed to the core. Every field has a default so a
//! partially specified source (file, environment) deserializes cleanly. The core
//! never reads the process environment itself; loaders live in the binaries.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::memory::DistanceMetric;

/// Top-level settings for the agent and its collaborators
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Completion endpoint and throttling
    pub llm: LlmSettings,

    /// Reasoning loop behaviour
    pub agent: LoopSettings,

    /// Vector memory collection
    pub memory: MemorySettings,

    /// Tool discovery
    pub tools: ToolSettings,
}

/// Which completion backend to talk to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Ollama,
    /// Any OpenAI-compatible `/chat/completions` endpoint
    #[serde(rename = "openai")]
    OpenAi,
}

/// Completion endpoint settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: ProviderKind,

    /// API key (required for keyed providers)
    pub api_key: Option<String>,

    /// Base URL of the endpoint
    pub api_base: String,

    /// Default model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens per completion
    pub max_tokens: u32,

    /// Minimum seconds between two requests, shared across sessions
    pub min_request_interval_secs: f64,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Per-request timeout
    pub request_timeout_secs: u64,

    /// First backoff delay
    pub backoff_initial_ms: u64,

    /// Backoff ceiling
    pub backoff_max_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            api_key: None,
            api_base: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            temperature: 0.7,
            max_tokens: 2048,
            min_request_interval_secs: 1.0,
            max_retries: 3,
            request_timeout_secs: 120,
            backoff_initial_ms: 1000,
            backoff_max_ms: 30_000,
        }
    }
}

/// Longest accepted minimum request interval (one day)
pub const MAX_REQUEST_INTERVAL_SECS: f64 = 86_400.0;

impl LlmSettings {
    /// Out-of-range values saturate instead of panicking; `validate` rejects them
    pub fn min_request_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.min_request_interval_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// When the loop writes to memory
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryWritePolicy {
    /// Memory is read for context but never written
    Never,
    /// Only the final (input, response) interaction is stored
    #[default]
    FinalOnly,
    /// Input, every completed step and the final interaction are stored
    EveryStep,
}

/// Reasoning loop settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    /// Default step budget for `run`
    pub max_steps: usize,

    /// Memory entries injected into each prompt (0 disables retrieval)
    pub memory_top_k: usize,

    pub memory_writes: MemoryWritePolicy,

    /// Per-invocation tool timeout
    pub tool_timeout_secs: u64,

    /// System prompt sent ahead of every THINK request
    pub system_prompt: String,

    /// Ask the model for a numbered plan before the first step
    pub plan_first: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_steps: 5,
            memory_top_k: 3,
            memory_writes: MemoryWritePolicy::FinalOnly,
            tool_timeout_secs: 30,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            plan_first: false,
        }
    }
}

impl LoopSettings {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are an intelligent AI assistant. \
Analyze the situation and determine the best course of action.";

/// Vector memory settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Collection name
    pub collection: String,

    /// Embedding dimension, fixed for the collection lifetime
    pub dimension: usize,

    pub metric: DistanceMetric,

    /// Skip `add` when an entry with identical text already exists
    pub deduplicate: bool,

    /// Embedding model for remote embedders
    pub embedding_model: Option<String>,

    /// Per-call embedding timeout
    pub embedding_timeout_secs: u64,

    /// JSON file persisting the collection; unset keeps memory in process
    pub path: Option<PathBuf>,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            collection: "agent_memory".into(),
            dimension: 384,
            metric: DistanceMetric::Cosine,
            deduplicate: false,
            embedding_model: None,
            embedding_timeout_secs: 30,
            path: None,
        }
    }
}

impl MemorySettings {
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }
}

/// Tool discovery settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Directory of JSON tool manifests loaded at startup
    pub discovery_dir: Option<PathBuf>,
}

impl AgentSettings {
    /// Reject settings the core cannot run with
    pub fn validate(&self) -> Result<()> {
        let llm = &self.llm;
        if llm.provider == ProviderKind::OpenAi
            && llm.api_key.as_deref().is_none_or(|k| k.trim().is_empty())
        {
            return Err(AgentError::Config("api_key is required for the openai provider".into()));
        }
        if llm.api_base.trim().is_empty() {
            return Err(AgentError::Config("api_base must not be empty".into()));
        }
        if llm.model.trim().is_empty() {
            return Err(AgentError::Config("model must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(AgentError::Config(format!(
                "temperature {} outside 0.0..=2.0",
                llm.temperature
            )));
        }
        if !(0.0..=MAX_REQUEST_INTERVAL_SECS).contains(&llm.min_request_interval_secs) {
            return Err(AgentError::Config(format!(
                "min_request_interval_secs must be within 0..={MAX_REQUEST_INTERVAL_SECS}"
            )));
        }
        if llm.request_timeout_secs == 0 {
            return Err(AgentError::Config("request_timeout_secs must be positive".into()));
        }
        if self.agent.max_steps == 0 {
            return Err(AgentError::Config("max_steps must be positive".into()));
        }
        if self.memory.dimension == 0 {
            return Err(AgentError::Config("memory dimension must be positive".into()));
        }
        if self.memory.collection.trim().is_empty() {
            return Err(AgentError::Config("memory collection name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = AgentSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.agent.max_steps, 5);
        assert_eq!(settings.memory.dimension, 384);
        assert_eq!(settings.agent.memory_writes, MemoryWritePolicy::FinalOnly);
    }

    #[test]
    fn test_openai_requires_key() {
        let mut settings = AgentSettings::default();
        settings.llm.provider = ProviderKind::OpenAi;
        assert!(matches!(settings.validate(), Err(AgentError::Config(_))));

        settings.llm.api_key = Some("  ".into());
        assert!(settings.validate().is_err());

        settings.llm.api_key = Some("sk-test".into());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_steps_and_negative_interval() {
        let mut settings = AgentSettings::default();
        settings.agent.max_steps = 0;
        assert!(settings.validate().is_err());

        let mut settings = AgentSettings::default();
        settings.llm.min_request_interval_secs = -1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_huge_interval_is_rejected_not_panicking() {
        let mut settings = AgentSettings::default();
        for interval in [1e30, f64::INFINITY, f64::NAN] {
            settings.llm.min_request_interval_secs = interval;
            assert!(matches!(settings.validate(), Err(AgentError::Config(_))), "{interval}");
            let _ = settings.llm.min_request_interval();
        }

        settings.llm.min_request_interval_secs = 1e30;
        assert_eq!(settings.llm.min_request_interval(), Duration::MAX);
        settings.llm.min_request_interval_secs = MAX_REQUEST_INTERVAL_SECS;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: AgentSettings = serde_json::from_str(
            r#"{"llm": {"provider": "openai", "api_key": "k"}, "memory": {"metric": "euclidean"}}"#,
        )
        .unwrap();
        assert_eq!(settings.llm.provider, ProviderKind::OpenAi);
        assert_eq!(settings.llm.max_retries, 3);
        assert_eq!(settings.memory.metric, DistanceMetric::Euclidean);
        assert_eq!(settings.agent.memory_top_k, 3);
    }
}
