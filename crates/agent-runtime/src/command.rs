//! External Command Tools
//!
//! Tools backed by a program on the host. Each tool is described by a JSON
//! manifest; a discovery directory full of manifests is scanned at startup:
//!
//! ```json
//! {
//!   "name": "word_count",
//!   "description": "Counts words in the input text",
//!   "command": "wc",
//!   "args": ["-w"],
//!   "input": "stdin"
//! }
//! ```
//!
//! With `"input": "argument"` the tool input is appended as the last argument
//! instead of being written to stdin. Stdout (trimmed) is the tool output; a
//! non-zero exit status is a tool failure carrying stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use agent_core::{
    error::{AgentError, Result},
    tool::{Tool, ToolRegistry},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// How the tool input reaches the program
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    #[default]
    Stdin,
    Argument,
}

/// On-disk description of a command tool
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub input: InputMode,
}

/// Why a manifest could not be loaded
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("manifest {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

impl From<ManifestError> for AgentError {
    fn from(err: ManifestError) -> Self {
        AgentError::Config(err.to_string())
    }
}

impl ToolManifest {
    /// Read and check one manifest file
    pub fn load(path: &Path) -> std::result::Result<Self, ManifestError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Self = serde_json::from_str(&raw).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let invalid = |reason: &str| ManifestError::Invalid {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if manifest.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if manifest.description.trim().is_empty() {
            return Err(invalid("description must not be empty"));
        }
        if manifest.command.trim().is_empty() {
            return Err(invalid("command must not be empty"));
        }
        Ok(manifest)
    }
}

/// A tool that runs an external program
#[derive(Clone, Debug)]
pub struct CommandTool {
    manifest: ToolManifest,
}

impl CommandTool {
    pub fn new(manifest: ToolManifest) -> Self {
        Self { manifest }
    }

    pub fn manifest(&self) -> &ToolManifest {
        &self.manifest
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    async fn invoke(&self, input: &str) -> Result<String> {
        let mut command = Command::new(&self.manifest.command);
        command
            .args(&self.manifest.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match self.manifest.input {
            InputMode::Argument => {
                command.arg(input).stdin(Stdio::null());
            }
            InputMode::Stdin => {
                command.stdin(Stdio::piped());
            }
        }

        let mut child = command.spawn().map_err(|e| {
            AgentError::ToolExecution(format!("failed to start '{}': {e}", self.manifest.command))
        })?;

        // Feed stdin while draining stdout/stderr so neither pipe can fill up
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(input.as_bytes()).await {
                // The program exited without reading all of its input
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
            // dropping stdin closes the pipe
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::ToolExecution(format!(
                "'{}' exited with {}: {}",
                self.manifest.command,
                output.status,
                stderr.trim()
            )));
        }

        if let Err(e) = fed {
            return Err(AgentError::ToolExecution(format!(
                "failed to write input to '{}': {e}",
                self.manifest.command
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Load every `*.json` manifest in `dir`, in file name order
///
/// Manifests that fail to load are logged and skipped. A missing directory
/// yields no tools.
pub fn discover_tools(dir: &Path) -> Vec<CommandTool> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Tool discovery directory unreadable");
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    paths
        .iter()
        .filter_map(|path| match ToolManifest::load(path) {
            Ok(manifest) => {
                tracing::debug!(tool = %manifest.name, path = %path.display(), "Discovered tool");
                Some(CommandTool::new(manifest))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping tool manifest");
                None
            }
        })
        .collect()
}

/// Discover tools in `dir` and register them; returns how many were added
pub fn register_discovered(registry: &mut ToolRegistry, dir: &Path) -> Result<usize> {
    let tools = discover_tools(dir);
    let count = tools.len();
    for tool in tools {
        registry.register_tool(tool)?;
    }
    tracing::info!(dir = %dir.display(), count, "Registered discovered tools");
    Ok(count)
}
