//! Action Parsing
//!
//! The model answers every THINK prompt with one JSON object:
//!
//! ```text
//! {"thought": "why", "action": "<tool name> | respond", "action_input": "..."}
//! ```
//!
//! The object may sit inside a fenced code block or be surrounded by prose;
//! the longest balanced `{...}` that parses wins. `action_input` may be any
//! JSON value, non-strings are passed to tools in their JSON form. Anything
//! that does not resolve to a respond or a registered tool becomes
//! [`Decision::ParseFailure`], which the loop reports back as an observation.

use serde::Deserialize;
use serde_json::Value;

use crate::tool::{ToolRegistry, RESPOND_ACTION};

/// What the model decided to do this step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Final answer
    Respond(String),
    /// Invoke a registered tool
    UseTool { name: String, input: String },
    /// Output could not be turned into either form
    ParseFailure { reason: String },
}

/// One parsed THINK step
#[derive(Clone, Debug)]
pub struct Thought {
    /// Raw model output
    pub raw: String,
    /// The model's stated reasoning, if any
    pub reasoning: Option<String>,
    pub decision: Decision,
}

impl Thought {
    /// Tool name, `respond`, or empty for a parse failure
    pub fn action(&self) -> &str {
        match &self.decision {
            Decision::Respond(_) => RESPOND_ACTION,
            Decision::UseTool { name, .. } => name,
            Decision::ParseFailure { .. } => "",
        }
    }

    /// Tool input or final text
    pub fn action_input(&self) -> &str {
        match &self.decision {
            Decision::Respond(text) => text,
            Decision::UseTool { input, .. } => input,
            Decision::ParseFailure { .. } => "",
        }
    }
}

#[derive(Deserialize)]
struct ActionObject {
    #[serde(default, alias = "reasoning")]
    thought: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default, alias = "input")]
    action_input: Option<Value>,
}

/// Parse model output against the registered tools
pub fn parse_thought(raw: &str, tools: &ToolRegistry) -> Thought {
    let failure = |reasoning: Option<String>, reason: String| Thought {
        raw: raw.to_string(),
        reasoning,
        decision: Decision::ParseFailure { reason },
    };

    let Some(object) = extract_action_object(raw) else {
        return failure(None, "no JSON action object found".into());
    };
    let reasoning = object.thought.filter(|t| !t.trim().is_empty());

    let Some(action) = object.action.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()) else {
        return failure(reasoning, "missing \"action\" field".into());
    };
    let input = object.action_input.map(value_to_text).unwrap_or_default();

    let decision = if action.eq_ignore_ascii_case(RESPOND_ACTION) {
        if input.trim().is_empty() {
            return failure(reasoning, "\"respond\" needs a non-empty \"action_input\"".into());
        }
        Decision::Respond(input)
    } else if tools.contains(&action) {
        Decision::UseTool { name: action, input }
    } else {
        let available = tools.list_tools().join(", ");
        return failure(
            reasoning,
            format!("unknown tool '{action}' (available: {available})"),
        );
    };

    Thought {
        raw: raw.to_string(),
        reasoning,
        decision,
    }
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn extract_action_object(raw: &str) -> Option<ActionObject> {
    let mut candidates = object_candidates(raw);
    candidates.sort_by_key(|c| std::cmp::Reverse(c.len()));

    candidates
        .into_iter()
        .find_map(|candidate| serde_json::from_str::<ActionObject>(candidate).ok())
}

/// Top-level balanced `{...}` spans, ignoring braces inside JSON strings
fn object_candidates(text: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    candidates.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }

    candidates
}
