//! Reasoning Loop
//!
//! A bounded THINK → ACT → OBSERVE state machine. Every step asks the model
//! for one decision (see [`crate::parser`]); tool decisions are executed and
//! their observation is fed into the next prompt, a respond decision ends the
//! run. When the step budget runs out the loop stops with a best-effort answer
//! instead of an error.
//!
//! Steps are strictly sequential, with at most one tool invocation each.
//! Cancellation is honoured only between steps, never during a model call.
//!
//! With `plan_first` enabled a [`Planner`] drafts a numbered plan before the
//! first step; the plan rides along in every prompt and is refined whenever a
//! tool fails.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::client::RateLimitedClient;
use crate::config::{AgentSettings, LoopSettings, MemoryWritePolicy};
use crate::error::{AgentError, Result};
use crate::memory::{Metadata, MetadataValue, VectorMemory};
use crate::message::Message;
use crate::parser::{parse_thought, Decision, Thought};
use crate::planner::{Plan, Planner};
use crate::session::{AgentSession, LoopState, ScratchpadEntry, SessionId, Termination};
use crate::tool::{ToolRegistry, ToolResult};

/// Prefix of observations produced when the model output was unusable
pub const PARSE_FAILURE_MARKER: &str = "[parse error]";

const RESPONSE_FORMAT: &str = r#"Decide the next action. Reply with exactly one JSON object and nothing else:
{"thought": "your reasoning", "action": "<tool name> or respond", "action_input": "input for the tool, or your final answer when action is respond"}"#;

/// Result of a run with its bookkeeping
#[derive(Clone, Debug, Serialize)]
pub struct AgentOutcome {
    pub session_id: SessionId,
    /// Final answer (best-effort when the budget ran out)
    pub response: String,
    /// THINK iterations performed
    pub steps: usize,
    pub termination: Termination,
    pub scratchpad: Vec<ScratchpadEntry>,
}

/// The main Agent struct
pub struct Agent {
    client: Arc<RateLimitedClient>,
    tools: Arc<ToolRegistry>,
    memory: Option<Arc<VectorMemory>>,
    config: LoopSettings,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        client: Arc<RateLimitedClient>,
        tools: Arc<ToolRegistry>,
        memory: Option<Arc<VectorMemory>>,
        config: LoopSettings,
    ) -> Self {
        Self {
            client,
            tools,
            memory,
            config,
        }
    }

    /// Create from the full settings object
    pub fn from_settings(
        client: Arc<RateLimitedClient>,
        tools: Arc<ToolRegistry>,
        memory: Option<Arc<VectorMemory>>,
        settings: &AgentSettings,
    ) -> Self {
        Self::new(client, tools, memory, settings.agent.clone())
    }

    /// Run the loop on `input` and return the final answer
    pub async fn run(&self, input: &str, max_steps: Option<usize>) -> Result<String> {
        Ok(self.run_detailed(input, max_steps).await?.response)
    }

    /// Run the loop and report how it ended
    pub async fn run_detailed(&self, input: &str, max_steps: Option<usize>) -> Result<AgentOutcome> {
        self.run_with_cancel(input, max_steps, &CancellationToken::new()).await
    }

    /// Run the loop, stopping with [`AgentError::Cancelled`] at the first step
    /// boundary after `cancel` fires
    pub async fn run_with_cancel(
        &self,
        input: &str,
        max_steps: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome> {
        if input.trim().is_empty() {
            return Err(AgentError::InvalidInput("input text must not be empty".into()));
        }
        let max_steps = max_steps.unwrap_or(self.config.max_steps);
        if max_steps == 0 {
            return Err(AgentError::InvalidInput("max_steps must be positive".into()));
        }

        let mut session = AgentSession::new(input, max_steps);
        tracing::info!(
            session = %session.id,
            max_steps,
            tools = ?self.tools.list_tools(),
            "Starting agent run"
        );

        let memories = self.recall(input).await?;
        if self.config.memory_writes == MemoryWritePolicy::EveryStep {
            self.remember(input, "user_input", &session, None).await?;
        }

        let planner = self.config.plan_first.then(|| Planner::new(self.client.clone()));
        let mut plan = match &planner {
            Some(planner) => Some(planner.create_plan(input, &memories.join("\n")).await?),
            None => None,
        };

        while !session.budget_exhausted() {
            if cancel.is_cancelled() {
                tracing::info!(session = %session.id, step = session.step(), "Run cancelled");
                return Err(AgentError::Cancelled);
            }

            let step = session.begin_step();
            let thought = self.think(&session, &memories, plan.as_ref()).await?;

            let observation = match &thought.decision {
                Decision::Respond(text) => {
                    session.finish(text.clone());
                    tracing::info!(session = %session.id, steps = step, "Agent responded");
                    if self.config.memory_writes != MemoryWritePolicy::Never {
                        let record = format!("User: {input}\nAssistant: {text}");
                        self.remember(&record, "interaction", &session, Some(step)).await?;
                    }
                    return Ok(Self::outcome(session, Termination::Responded));
                }
                Decision::UseTool { name, input: tool_input } => {
                    session.transition(LoopState::Acting);
                    let result = self.execute(name, tool_input).await;
                    session.transition(LoopState::Observing);
                    if !result.success {
                        if let (Some(planner), Some(current)) = (&planner, plan.take()) {
                            plan = Some(planner.refine_plan(&current, &result.observation()).await?);
                        }
                    }
                    result.observation()
                }
                Decision::ParseFailure { reason } => {
                    tracing::warn!(session = %session.id, step, reason = %reason, "Unparseable model output");
                    session.transition(LoopState::Observing);
                    format!("{PARSE_FAILURE_MARKER} {reason}. Reply with a single JSON object as instructed.")
                }
            };

            let entry = ScratchpadEntry {
                step,
                reasoning: thought.reasoning.clone(),
                action: thought.action().to_string(),
                action_input: thought.action_input().to_string(),
                observation,
            };
            if self.config.memory_writes == MemoryWritePolicy::EveryStep {
                self.remember(&entry.render(), "agent_action", &session, Some(step)).await?;
            }
            session.record(entry);
        }

        tracing::warn!(session = %session.id, max_steps, "Step budget exhausted without a response");
        let answer = Self::best_effort_answer(&session);
        session.finish(answer);
        Ok(Self::outcome(session, Termination::BudgetExhausted))
    }

    /// Ask the model for the next decision
    async fn think(&self, session: &AgentSession, memories: &[String], plan: Option<&Plan>) -> Result<Thought> {
        let prompt = self.build_prompt(session, memories, plan);
        let messages = [Message::system(&self.config.system_prompt), Message::user(prompt)];

        let completion = self.client.complete(&messages).await?;
        let thought = parse_thought(&completion.content, &self.tools);
        tracing::debug!(
            session = %session.id,
            step = session.step(),
            action = thought.action(),
            "Parsed thought"
        );
        Ok(thought)
    }

    /// Run one tool; never fails
    async fn execute(&self, name: &str, input: &str) -> ToolResult {
        tracing::debug!(tool = %name, "Executing tool");
        self.tools.invoke(name, input).await
    }

    fn build_prompt(&self, session: &AgentSession, memories: &[String], plan: Option<&Plan>) -> String {
        let or_none = |text: String| if text.is_empty() { "None".to_string() } else { text };
        let plan = plan
            .filter(|p| !p.is_empty())
            .map(|p| format!("Plan:\n{}\n\n", p.render()))
            .unwrap_or_default();

        format!(
            "Input: {input}\n\n\
             {plan}\
             Relevant Memories:\n{memories}\n\n\
             Available Tools:\n{tools}\n\n\
             Previous Steps:\n{scratchpad}\n\n\
             Step {step} of {max_steps}.\n\n\
             {RESPONSE_FORMAT}",
            input = session.input,
            memories = or_none(memories.join("\n")),
            tools = or_none(self.tools.describe()),
            scratchpad = or_none(session.render_scratchpad()),
            step = session.step(),
            max_steps = session.max_steps,
        )
    }

    /// Answer given when the budget runs out
    fn best_effort_answer(session: &AgentSession) -> String {
        let mut answer = format!(
            "I could not complete the request within {} step{}.",
            session.max_steps,
            if session.max_steps == 1 { "" } else { "s" }
        );
        if let Some(last) = session.last_tool_observation() {
            answer.push_str(" The last result was: ");
            answer.push_str(last);
        }
        answer
    }

    async fn recall(&self, input: &str) -> Result<Vec<String>> {
        match &self.memory {
            Some(memory) if self.config.memory_top_k > 0 => {
                let memories = memory.search(input, self.config.memory_top_k).await?;
                tracing::debug!(count = memories.len(), "Recalled memories");
                Ok(memories)
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn remember(
        &self,
        text: &str,
        kind: &str,
        session: &AgentSession,
        step: Option<usize>,
    ) -> Result<()> {
        let Some(memory) = &self.memory else {
            return Ok(());
        };

        let mut metadata = Metadata::new();
        metadata.insert("type".into(), MetadataValue::from(kind));
        metadata.insert("session".into(), MetadataValue::from(session.id.to_string()));
        if let Some(step) = step {
            metadata.insert("step".into(), MetadataValue::Integer(i64::try_from(step).unwrap_or(i64::MAX)));
        }

        memory.add(text, Some(metadata)).await?;
        Ok(())
    }

    fn outcome(session: AgentSession, termination: Termination) -> AgentOutcome {
        AgentOutcome {
            response: session.final_response().unwrap_or_default().to_string(),
            steps: session.step(),
            termination,
            session_id: session.id.clone(),
            scratchpad: session.scratchpad().to_vec(),
        }
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get configuration
    pub fn config(&self) -> &LoopSettings {
        &self.config
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    client: Option<Arc<RateLimitedClient>>,
    tools: ToolRegistry,
    memory: Option<Arc<VectorMemory>>,
    config: LoopSettings,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            client: None,
            tools: ToolRegistry::new(),
            memory: None,
            config: LoopSettings::default(),
        }
    }

    pub fn client(mut self, client: Arc<RateLimitedClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn tool<T: crate::tool::Tool + 'static>(mut self, tool: T) -> Result<Self> {
        self.tools.register_tool(tool)?;
        Ok(self)
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn memory(mut self, memory: Arc<VectorMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn config(mut self, config: LoopSettings) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn max_steps(mut self, max: usize) -> Self {
        self.config.max_steps = max;
        self
    }

    pub fn memory_top_k(mut self, k: usize) -> Self {
        self.config.memory_top_k = k;
        self
    }

    pub fn memory_writes(mut self, policy: MemoryWritePolicy) -> Self {
        self.config.memory_writes = policy;
        self
    }

    pub fn plan_first(mut self, enabled: bool) -> Self {
        self.config.plan_first = enabled;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let client = self
            .client
            .ok_or_else(|| AgentError::Config("Model client is required".into()))?;
        if self.config.max_steps == 0 {
            return Err(AgentError::Config("max_steps must be positive".into()));
        }

        Ok(Agent::new(client, Arc::new(self.tools), self.memory, self.config))
    }
}
