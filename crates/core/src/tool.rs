//! Tool trait and the Tool Dispatch Contract.
//!
//! Tools are what give the agent the ability to act: read files, search the
//! workspace, run commands. The [`ToolRegistry`] is the only boundary
//! between the loop and tool code; whatever a tool does (return an error,
//! panic, get cancelled), the registry hands back a [`ToolResult`].

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ToolError;

/// A tool definition injected into the controlling prompt so the model
/// knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input object
    pub input_schema: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub ok: bool,

    /// The output content
    pub output: String,

    /// Why the tool failed, when it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ToolResult {
    /// A successful result with the given output.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
            error: None,
            metadata: None,
        }
    }

    /// A failed result with an empty output.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: String::new(),
            error: Some(error.into()),
            metadata: None,
        }
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }
}

/// Ambient state handed to every tool call.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Cooperative cancellation for the surrounding request
    pub cancel: CancellationToken,

    /// Root directory file-system tools are scoped to
    pub workspace: PathBuf,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken, workspace: impl Into<PathBuf>) -> Self {
        Self {
            cancel,
            workspace: workspace.into(),
        }
    }
}

/// The core Tool trait.
///
/// Each tool (read_file, search_text, run_command, ...) implements this
/// trait and is registered in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for the controlling prompt.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A registry of available tools, keyed and ordered by name.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name.
    ///
    /// Never fails: an unknown name, a tool error, a panic inside the tool,
    /// or a cancelled request all come back as `ok: false`.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            let err = ToolError::NotFound(name.to_string());
            warn!(tool = %name, "Model requested an unregistered tool");
            return ToolResult::failure(format!(
                "{err}. Valid tools: {}",
                self.names().join(", ")
            ));
        };

        if ctx.cancel.is_cancelled() {
            return ToolResult::failure(ToolError::Cancelled(name.to_string()).to_string());
        }

        debug!(tool = %name, "Dispatching tool");
        match AssertUnwindSafe(tool.execute(input, ctx)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                ToolResult::failure(e.to_string())
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(tool = %name, reason = %reason, "Tool panicked");
                ToolResult::failure(
                    ToolError::ExecutionFailed {
                        tool_name: name.to_string(),
                        reason,
                    }
                    .to_string(),
                )
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    }
}
