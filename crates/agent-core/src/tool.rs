//! Tool System
//!
//! Tools are named text-in/text-out capabilities. They are registered before
//! the registry is shared and invoked by the reasoning loop through
//! [`ToolRegistry::invoke`], which never fails: errors, panics and timeouts are
//! turned into an observation prefixed with [`TOOL_ERROR_MARKER`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Prefix of every observation produced by a failed invocation
pub const TOOL_ERROR_MARKER: &str = "[tool error]";

/// Action name reserved for final answers
pub const RESPOND_ACTION: &str = "respond";

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool identifier
    fn name(&self) -> &str;

    /// Human-readable description (shown to the model verbatim)
    fn description(&self) -> &str;

    /// Run the tool on a single text input
    async fn invoke(&self, input: &str) -> Result<String>;
}

type ToolFn = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Tool backed by a plain function or closure
pub struct FnTool {
    name: String,
    description: String,
    func: Arc<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, input: &str) -> Result<String> {
        (self.func)(input)
    }
}

/// Result from tool execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that was called
    pub name: String,

    /// Whether execution succeeded
    pub success: bool,

    /// Output (tool text or error description)
    pub output: String,
}

impl ToolResult {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: false,
            output: error.into(),
        }
    }

    /// Text appended to the scratchpad
    pub fn observation(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!("{TOOL_ERROR_MARKER} {}: {}", self.name, self.output)
        }
    }
}

/// Registry for available tools
///
/// Lookup is by name; enumeration follows first-registration order so prompts
/// are deterministic for an unchanged registry.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
    timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Per-invocation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a function under `name`, replacing any tool with that name
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        func: F,
    ) -> Result<()>
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        self.register_shared(Arc::new(FnTool::new(name, description, func)))
    }

    /// Register a tool implementation
    pub fn register_tool<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_shared(Arc::new(tool))
    }

    /// Register a shared tool
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        validate_name(&name)?;

        if let Some(&slot) = self.index.get(&name) {
            tracing::warn!(tool = %name, "Replacing previously registered tool");
            self.tools[slot] = tool;
        } else {
            tracing::debug!(tool = %name, "Registered tool");
            self.index.insert(name, self.tools.len());
            self.tools.push(tool);
        }
        Ok(())
    }

    /// Get a tool by name
    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| self.tools[slot].clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool names in registration order
    pub fn list_tools(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// One `name: description` line per tool, in registration order
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("{}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool; failures come back as an unsuccessful [`ToolResult`]
    pub async fn invoke(&self, name: &str, input: &str) -> ToolResult {
        let Some(tool) = self.get_tool(name) else {
            tracing::warn!(tool = %name, "Tool not found");
            return ToolResult::failure(name, AgentError::ToolNotFound(name.into()).to_string());
        };

        let call = AssertUnwindSafe(tool.invoke(input)).catch_unwind();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(Ok(output))) => {
                tracing::debug!(tool = %name, "Tool succeeded");
                ToolResult::success(name, output)
            }
            Ok(Ok(Err(e))) => {
                tracing::error!(tool = %name, error = %e, "Tool execution error");
                ToolResult::failure(name, e.to_string())
            }
            Ok(Err(panic)) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                tracing::error!(tool = %name, reason = %reason, "Tool panicked");
                ToolResult::failure(name, format!("tool panicked: {reason}"))
            }
            Err(_) => {
                tracing::error!(tool = %name, timeout_secs = self.timeout.as_secs(), "Tool timed out");
                ToolResult::failure(
                    name,
                    AgentError::Timeout(format!("tool exceeded {}s", self.timeout.as_secs_f64()))
                        .to_string(),
                )
            }
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AgentError::Validation("tool name must not be empty".into()));
    }
    if name.eq_ignore_ascii_case(RESPOND_ACTION) {
        return Err(AgentError::Validation(format!(
            "tool name '{name}' is reserved for final answers"
        )));
    }
    Ok(())
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// DateTime tool - returns current time
///
/// Input selects the format: `iso`, `unix`, anything else is human readable.
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Input: 'iso', 'unix' or 'human'"
    }

    async fn invoke(&self, input: &str) -> Result<String> {
        let now = chrono::Utc::now();

        Ok(match input.trim().to_ascii_lowercase().as_str() {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
        })
    }
}

/// Calculator tool - evaluates arithmetic expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression using + - * / % ^ and parentheses, e.g. '(2 + 3) * 4'"
    }

    async fn invoke(&self, input: &str) -> Result<String> {
        let value = evaluate_expression(input).map_err(AgentError::ToolExecution)?;
        Ok(format_number(value))
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Evaluate an arithmetic expression
///
/// Only digits, `.`, whitespace, parentheses and `+ - * / % ^` are accepted.
pub fn evaluate_expression(expr: &str) -> std::result::Result<f64, String> {
    if expr.trim().is_empty() {
        return Err("Empty expression".into());
    }
    if let Some(c) = expr
        .chars()
        .find(|c| !(c.is_ascii_digit() || c.is_whitespace() || "+-*/%^().".contains(*c)))
    {
        return Err(format!("Invalid character '{c}' in expression"));
    }

    let tokens: Vec<char> = expr.chars().collect();
    let mut parser = ExprParser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expression()?;
    if parser.peek().is_some() {
        return Err(format!("Unexpected '{}' at position {}", tokens[parser.pos], parser.pos));
    }
    if !value.is_finite() {
        return Err("Result is not a finite number".into());
    }
    Ok(value)
}

/// Nesting bound for parentheses, unary signs and `^` chains combined
const MAX_EXPRESSION_DEPTH: usize = 256;

struct ExprParser<'a> {
    tokens: &'a [char],
    pos: usize,
    depth: usize,
}

impl ExprParser<'_> {
    fn peek(&mut self) -> Option<char> {
        while self.tokens.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
        self.tokens.get(self.pos).copied()
    }

    // expression := term (('+' | '-') term)*
    fn expression(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    // term := power (('*' | '/' | '%') power)*
    fn term(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.power()?;
        while let Some(op @ ('*' | '/' | '%')) = self.peek() {
            self.pos += 1;
            let rhs = self.power()?;
            if op != '*' && rhs == 0.0 {
                return Err("Division by zero".into());
            }
            value = match op {
                '*' => value * rhs,
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    /// Run `rule` one nesting level deeper, failing past the depth bound
    fn nested(
        &mut self,
        rule: fn(&mut Self) -> std::result::Result<f64, String>,
    ) -> std::result::Result<f64, String> {
        if self.depth >= MAX_EXPRESSION_DEPTH {
            return Err("Expression nested too deeply".into());
        }
        self.depth += 1;
        let value = rule(self);
        self.depth -= 1;
        value
    }

    // power := unary ('^' power)?   (right associative)
    fn power(&mut self) -> std::result::Result<f64, String> {
        let base = self.nested(Self::unary)?;
        if self.peek() == Some('^') {
            self.pos += 1;
            let exponent = self.nested(Self::power)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> std::result::Result<f64, String> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.nested(Self::unary)?)
            }
            Some('+') => {
                self.pos += 1;
                self.nested(Self::unary)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> std::result::Result<f64, String> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.expression()?;
                if self.peek() != Some(')') {
                    return Err("Missing closing parenthesis".into());
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while self.tokens.get(self.pos).is_some_and(|c| c.is_ascii_digit() || *c == '.') {
                    self.pos += 1;
                }
                let literal: String = self.tokens[start..self.pos].iter().collect();
                literal
                    .parse::<f64>()
                    .map_err(|e| format!("Parse error in '{literal}': {e}"))
            }
            Some(c) => Err(format!("Unexpected '{c}' at position {}", self.pos)),
            None => Err("Unexpected end of expression".into()),
        }
    }
}
