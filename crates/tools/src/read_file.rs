//! Read file tool: file contents with an optional line range.

use async_trait::async_trait;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolContext, ToolResult};

use crate::path::{display_relative, resolve_in_workspace};
use crate::truncate_output;

pub struct ReadFileTool {
    max_output_chars: usize,
}

impl ReadFileTool {
    pub fn new(max_output_chars: usize) -> Self {
        Self { max_output_chars }
    }
}

fn line_arg(input: &serde_json::Value, key: &str) -> Result<Option<usize>, ToolError> {
    match input.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 => Ok(Some(n as usize)),
            _ => Err(ToolError::InvalidArguments(format!(
                "'{key}' must be a positive line number"
            ))),
        },
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file in the workspace. Optionally restrict to an inclusive, 1-based line range."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace root"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to return (1-based)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to return (inclusive)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let path = input["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let start_line = line_arg(&input, "start_line")?;
        let end_line = line_arg(&input, "end_line")?;

        let resolved =
            resolve_in_workspace(&ctx.workspace, path).map_err(|e| ToolError::PermissionDenied {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => content,
            Err(e) => return Ok(ToolResult::failure(format!("Failed to read file: {e}"))),
        };

        let total_lines = content.lines().count();
        let text = if start_line.is_none() && end_line.is_none() {
            content
        } else {
            let start = start_line.unwrap_or(1);
            let end = end_line.unwrap_or(total_lines).min(total_lines);
            if start > end {
                return Ok(ToolResult::failure(format!(
                    "Empty line range {start}..={end} (file has {total_lines} lines)"
                )));
            }
            content
                .lines()
                .skip(start - 1)
                .take(end - start + 1)
                .collect::<Vec<_>>()
                .join("\n")
        };

        let (output, truncated) = truncate_output(&text, self.max_output_chars);
        Ok(ToolResult::success(output)
            .with_metadata("path", display_relative(&ctx.workspace, &resolved).into())
            .with_metadata("total_lines", total_lines.into())
            .with_metadata("truncated", truncated.into()))
    }
}
