//! # agent-core
//!
//! Step-bounded tool-using agent with a provider-agnostic model client and
//! vector memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Agent                              │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────┐  │
//! │  │  Reasoning  │  │    Tool     │  │  RateLimitedClient   │  │
//! │  │    Loop     │──│  Registry   │  │  ┌────────────────┐  │  │
//! │  │ THINK/ACT/  │  └─────────────┘  │  │  LlmProvider   │  │  │
//! │  │  OBSERVE    │───────────────────│  │  (Strategy)    │  │  │
//! │  └─────────────┘                   │  └────────────────┘  │  │
//! │         │                          └──────────────────────┘  │
//! │  ┌─────────────┐  ┌─────────────┐                            │
//! │  │VectorMemory │──│  Embedder   │                            │
//! │  └─────────────┘  └─────────────┘                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` and `Embedder` traits enable swapping between Ollama,
//! OpenAI-compatible servers or test doubles without changing agent logic.

pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod message;
pub mod parser;
pub mod planner;
pub mod provider;
pub mod reasoning;
pub mod session;
pub mod testing;
pub mod tool;

pub use client::{RateLimitedClient, RetryPolicy};
pub use config::{AgentSettings, LlmSettings, LoopSettings, MemorySettings, MemoryWritePolicy, ProviderKind};
pub use error::{AgentError, Result};
pub use memory::{
    DistanceMetric, HashEmbedder, InMemoryStore, MemoryEntry, MemoryStore, Metadata, MetadataValue, ScoredEntry,
    VectorMemory,
};
pub use message::{Message, Role};
pub use parser::{parse_thought, Decision, Thought};
pub use planner::{Plan, Planner};
pub use provider::{Completion, Embedder, GenerationOptions, LlmProvider, ModelInfo};
pub use reasoning::{Agent, AgentBuilder, AgentOutcome};
pub use session::{AgentSession, LoopState, SessionId, Termination};
pub use tool::{CalculatorTool, DateTimeTool, FnTool, Tool, ToolRegistry, ToolResult};
pub use tokio_util::sync::CancellationToken;
