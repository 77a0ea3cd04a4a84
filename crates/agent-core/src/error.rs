//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Registration or argument validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller supplied unusable input (empty text, zero step budget)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// LLM provider rejected the request (not retryable)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Rate limited by the provider
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// An external call exceeded its timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Retry budget exhausted on the model client
    #[error("Model unavailable after {attempts} attempts: {last_error}")]
    ModelUnavailable { attempts: u32, last_error: String },

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Embedding computation or backend failure
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector dimension does not match the collection
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Run cancelled by the caller at a step boundary
    #[error("Run cancelled")]
    Cancelled,

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::ProviderUnavailable(_)
                | AgentError::RateLimited(_)
                | AgentError::Timeout(_)
                | AgentError::Io(_)
        )
    }

    /// True for errors that belong to the embedding/memory backend
    pub fn is_embedding(&self) -> bool {
        matches!(
            self,
            AgentError::Embedding(_) | AgentError::DimensionMismatch { .. }
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Validation(msg) | AgentError::InvalidInput(msg) => {
                format!("The request was rejected: {msg}")
            }
            AgentError::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            AgentError::ProviderUnavailable(_) | AgentError::ModelUnavailable { .. } => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            AgentError::Timeout(_) => "The AI service took too long to answer.".into(),
            AgentError::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            AgentError::ToolExecution(msg) => format!("Tool error: {msg}"),
            AgentError::Embedding(_) | AgentError::DimensionMismatch { .. } => {
                "The memory service is currently unavailable.".into()
            }
            AgentError::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            AgentError::Auth(_) => "Authentication failed. Please check your credentials.".into(),
            AgentError::Config(msg) => format!("The agent is misconfigured: {msg}"),
            AgentError::Cancelled => "The request was cancelled.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::RateLimited("429".into()).is_retryable());
        assert!(AgentError::Timeout("completion".into()).is_retryable());
        assert!(AgentError::ProviderUnavailable("down".into()).is_retryable());
        assert!(!AgentError::Auth("bad key".into()).is_retryable());
        assert!(!AgentError::Provider("400".into()).is_retryable());
        assert!(
            !AgentError::ModelUnavailable { attempts: 3, last_error: "x".into() }.is_retryable()
        );
    }

    #[test]
    fn test_embedding_classification() {
        assert!(AgentError::Embedding("empty".into()).is_embedding());
        assert!(AgentError::DimensionMismatch { expected: 384, actual: 3 }.is_embedding());
        assert!(!AgentError::Cancelled.is_embedding());
    }
}
