//! Search text tool: case-insensitive substring search across the workspace.
//!
//! Hidden entries, build output directories and binary files are skipped.
//! Each match is reported as `path:line: text` with the path relative to
//! the workspace root.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use stepwise_core::CancellationToken;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolContext, ToolResult};
use tracing::debug;

use crate::path::{display_relative, resolve_in_workspace};
use crate::truncate_output;

const DEFAULT_MAX_RESULTS: usize = 50;
const MAX_RESULTS_CAP: usize = 500;
const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];
/// Bytes inspected for a NUL when deciding whether a file is binary
const BINARY_PROBE_BYTES: usize = 8 * 1024;

pub struct SearchTextTool {
    max_output_chars: usize,
}

impl SearchTextTool {
    pub fn new(max_output_chars: usize) -> Self {
        Self { max_output_chars }
    }
}

struct Search {
    workspace: PathBuf,
    needle: String,
    max_results: usize,
    cancel: CancellationToken,
    matches: Vec<String>,
    files_scanned: usize,
}

impl Search {
    fn full(&self) -> bool {
        self.matches.len() >= self.max_results
    }

    fn walk(&mut self, path: &Path) {
        if self.full() || self.cancel.is_cancelled() {
            return;
        }
        if path.is_dir() {
            let Ok(read_dir) = std::fs::read_dir(path) else {
                return;
            };
            let mut children: Vec<PathBuf> = read_dir
                .filter_map(|e| e.ok())
                .filter(|e| {
                    let name = e.file_name();
                    let name = name.to_string_lossy();
                    !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_ref())
                })
                .map(|e| e.path())
                .collect();
            children.sort();
            for child in children {
                self.walk(&child);
            }
        } else if path.is_file() {
            self.scan_file(path);
        }
    }

    fn scan_file(&mut self, path: &Path) {
        let Ok(bytes) = std::fs::read(path) else {
            return;
        };
        if bytes.iter().take(BINARY_PROBE_BYTES).any(|b| *b == 0) {
            return;
        }
        let Ok(text) = String::from_utf8(bytes) else {
            return;
        };
        self.files_scanned += 1;

        let display = display_relative(&self.workspace, path);
        for (index, line) in text.lines().enumerate() {
            if line.to_lowercase().contains(&self.needle) {
                self.matches
                    .push(format!("{display}:{}: {}", index + 1, line.trim()));
                if self.full() {
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Tool for SearchTextTool {
    fn name(&self) -> &str {
        "search_text"
    }

    fn description(&self) -> &str {
        "Case-insensitive text search across workspace files. Returns 'path:line: text' for each match."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search in (default: workspace root)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of matches to return (default 50)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let query = input["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let path = input["path"].as_str().unwrap_or(".");
        let max_results = input["max_results"]
            .as_u64()
            .map(|n| (n as usize).clamp(1, MAX_RESULTS_CAP))
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let root =
            resolve_in_workspace(&ctx.workspace, path).map_err(|e| ToolError::PermissionDenied {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;
        if !root.exists() {
            return Ok(ToolResult::failure(format!("No such file or directory: {path}")));
        }

        debug!(query = %query, root = %root.display(), "Searching workspace");

        let mut search = Search {
            workspace: ctx.workspace.clone(),
            needle: query.to_lowercase(),
            max_results,
            cancel: ctx.cancel.clone(),
            matches: Vec::new(),
            files_scanned: 0,
        };
        let search = tokio::task::spawn_blocking(move || {
            search.walk(&root);
            search
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "search_text".into(),
            reason: e.to_string(),
        })?;

        if search.cancel.is_cancelled() {
            return Err(ToolError::Cancelled("search_text".into()));
        }

        let count = search.matches.len();
        let text = if count == 0 {
            format!("No matches for '{query}'")
        } else {
            search.matches.join("\n")
        };
        let (output, truncated) = truncate_output(&text, self.max_output_chars);

        Ok(ToolResult::success(output)
            .with_metadata("matches", count.into())
            .with_metadata("files_scanned", search.files_scanned.into())
            .with_metadata("limit_reached", (count >= max_results).into())
            .with_metadata("truncated", truncated.into()))
    }
}
