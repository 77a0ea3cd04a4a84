//! Agent Sessions
//!
//! The ephemeral state of one `run` call: input, step counter, scratchpad and
//! the final response. A session is created when `run` starts and dropped when
//! it returns; only what the loop writes to memory outlives it.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Loop state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Thinking,
    Acting,
    Observing,
    Done,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Thinking => write!(f, "THINKING"),
            LoopState::Acting => write!(f, "ACTING"),
            LoopState::Observing => write!(f, "OBSERVING"),
            LoopState::Done => write!(f, "DONE"),
        }
    }
}

/// One completed THINK step and what came of it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScratchpadEntry {
    /// 1-based step number
    pub step: usize,
    pub reasoning: Option<String>,
    /// Tool name, or empty when the output could not be parsed
    pub action: String,
    pub action_input: String,
    pub observation: String,
}

impl ScratchpadEntry {
    /// Text form used in prompts and memory records
    pub fn render(&self) -> String {
        let mut text = String::new();
        if let Some(reasoning) = &self.reasoning {
            let _ = writeln!(text, "Thought: {reasoning}");
        }
        if self.action.is_empty() {
            let _ = writeln!(text, "Action: (unparseable output)");
        } else {
            let _ = writeln!(text, "Action: {}", self.action);
            let _ = writeln!(text, "Action Input: {}", self.action_input);
        }
        let _ = write!(text, "Observation: {}", self.observation);
        text
    }
}

/// How a run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model chose to respond
    Responded,
    /// The step budget ran out; the response is a best-effort answer
    BudgetExhausted,
}

/// Ephemeral state of one run
#[derive(Clone, Debug)]
pub struct AgentSession {
    pub id: SessionId,
    pub input: String,
    pub max_steps: usize,
    step: usize,
    state: LoopState,
    scratchpad: Vec<ScratchpadEntry>,
    final_response: Option<String>,
}

impl AgentSession {
    pub fn new(input: impl Into<String>, max_steps: usize) -> Self {
        Self {
            id: SessionId::new(),
            input: input.into(),
            max_steps,
            step: 0,
            state: LoopState::Thinking,
            scratchpad: Vec::new(),
            final_response: None,
        }
    }

    /// THINK iterations started so far
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn scratchpad(&self) -> &[ScratchpadEntry] {
        &self.scratchpad
    }

    pub fn final_response(&self) -> Option<&str> {
        self.final_response.as_deref()
    }

    pub fn budget_exhausted(&self) -> bool {
        self.step >= self.max_steps
    }

    /// Start a THINK iteration; returns its 1-based number
    pub fn begin_step(&mut self) -> usize {
        debug_assert!(!self.budget_exhausted(), "step budget already spent");
        self.step += 1;
        self.transition(LoopState::Thinking);
        self.step
    }

    pub fn transition(&mut self, next: LoopState) {
        if self.state != next {
            tracing::debug!(session = %self.id, step = self.step, from = %self.state, to = %next, "State transition");
            self.state = next;
        }
    }

    /// Close the current step with its observation
    pub fn record(&mut self, entry: ScratchpadEntry) {
        self.scratchpad.push(entry);
    }

    pub fn finish(&mut self, response: impl Into<String>) {
        self.final_response = Some(response.into());
        self.transition(LoopState::Done);
    }

    /// Scratchpad text for the next prompt
    pub fn render_scratchpad(&self) -> String {
        self.scratchpad
            .iter()
            .map(ScratchpadEntry::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Observation of the latest step that reached a tool
    pub fn last_tool_observation(&self) -> Option<&str> {
        self.scratchpad
            .iter()
            .rev()
            .find(|e| !e.action.is_empty())
            .map(|e| e.observation.as_str())
    }
}
