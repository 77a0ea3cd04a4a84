//! # agent-runtime
//!
//! Concrete backends for agent-core.
//!
//! ## Providers
//!
//! - **Ollama** (default feature): local inference and embeddings via Ollama
//! - **OpenAI-compatible**: any `/chat/completions` endpoint with a bearer key
//!
//! ## Tools
//!
//! - **Command tools**: external programs described by JSON manifests
//!
//! ## Memory
//!
//! - **JSON file store**: a memory collection that survives restarts
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::ollama::OllamaProvider;
//!
//! let provider = Arc::new(OllamaProvider::from_settings(&settings.llm)?);
//! let client = Arc::new(RateLimitedClient::from_settings(provider, &settings.llm));
//! let agent = AgentBuilder::new().client(client).build()?;
//! ```

pub mod command;
pub mod http;
pub mod openai;
pub mod store;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use command::{CommandTool, ToolManifest, discover_tools, register_discovered};
pub use openai::OpenAiProvider;
pub use store::JsonFileStore;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaEmbedder, OllamaProvider};

// Re-export core types for convenience
pub use agent_core::{
    Agent, AgentBuilder, AgentError, AgentSettings, Embedder, LlmProvider, Message, Result, Role,
    Tool, ToolRegistry,
};
