//! Test Doubles
//!
//! Deterministic stand-ins for the external capabilities, usable from unit
//! tests, integration tests and downstream crates.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{AgentError, Result};
use crate::message::{Message, Role};
use crate::provider::{Completion, Embedder, GenerationOptions, LlmProvider, ModelInfo};

#[derive(Default)]
struct ScriptState {
    replies: VecDeque<Result<String>>,
    calls: Vec<(Instant, Vec<Message>)>,
}

/// Provider that replays a fixed script of replies
///
/// Each call consumes the next scripted result. Once the script is empty the
/// fallback reply (if any) is returned forever, otherwise the provider reports
/// itself unavailable.
pub struct ScriptedProvider {
    state: Mutex<ScriptState>,
    fallback: Option<String>,
    latency: Duration,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                replies: replies.into(),
                calls: Vec::new(),
            }),
            fallback: None,
            latency: Duration::ZERO,
        }
    }

    /// Successful replies in order
    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// The same reply for every call
    pub fn always(reply: impl Into<String>) -> Self {
        Self::new(Vec::new()).with_fallback(reply)
    }

    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// Simulated time spent inside each call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Instant at which each call started
    pub fn call_times(&self) -> Vec<Instant> {
        self.state().calls.iter().map(|(at, _)| *at).collect()
    }

    /// User-role content of every prompt received
    pub fn prompts(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .map(|(_, messages)| {
                messages
                    .iter()
                    .filter(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let next = {
            let mut state = self.state();
            state.calls.push((Instant::now(), messages.to_vec()));
            state.replies.pop_front()
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let content = match next {
            Some(reply) => reply?,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AgentError::ProviderUnavailable("script exhausted".into()))?,
        };
        Ok(Completion::text(&options.model, content))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "scripted".into(),
            name: "scripted".into(),
        }])
    }
}

/// Embedder whose backend is always down
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(AgentError::ProviderUnavailable("embedding backend offline".into()))
    }
}
