//! List directory tool: sorted entries of one workspace directory.

use async_trait::async_trait;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolContext, ToolResult};

use crate::path::{display_relative, resolve_in_workspace};
use crate::truncate_output;

pub struct ListDirectoryTool {
    max_output_chars: usize,
}

impl ListDirectoryTool {
    pub fn new(max_output_chars: usize) -> Self {
        Self { max_output_chars }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory. Directories are shown with a trailing '/'."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory relative to the workspace root (default: the root)"
                }
            }
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let path = input["path"].as_str().unwrap_or(".");
        let resolved =
            resolve_in_workspace(&ctx.workspace, path).map_err(|e| ToolError::PermissionDenied {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        let mut dir = match tokio::fs::read_dir(&resolved).await {
            Ok(dir) => dir,
            Err(e) => return Ok(ToolResult::failure(format!("Failed to list directory: {e}"))),
        };

        let mut entries = Vec::new();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Ok(ToolResult::failure(format!("Failed to list directory: {e}"))),
            };
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        let count = entries.len();
        let (output, truncated) = truncate_output(&entries.join("\n"), self.max_output_chars);
        Ok(ToolResult::success(output)
            .with_metadata("path", display_relative(&ctx.workspace, &resolved).into())
            .with_metadata("entries", count.into())
            .with_metadata("truncated", truncated.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::CancellationToken;

    fn setup() -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("README.md"), "# hi").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        let ctx = ToolContext::new(CancellationToken::new(), dir.path());
        (dir, ctx)
    }

    #[tokio::test]
    async fn lists_root_sorted_with_dir_suffix() {
        let (_dir, ctx) = setup();
        let result = ListDirectoryTool::new(1000)
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.output, "Cargo.toml\nREADME.md\nsrc/");
        assert_eq!(result.metadata.unwrap()["entries"], 3);
    }

    #[tokio::test]
    async fn lists_subdirectory() {
        let (_dir, ctx) = setup();
        let result = ListDirectoryTool::new(1000)
            .execute(serde_json::json!({"path": "src"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.output, "main.rs");
    }

    #[tokio::test]
    async fn missing_directory_fails() {
        let (_dir, ctx) = setup();
        let result = ListDirectoryTool::new(1000)
            .execute(serde_json::json!({"path": "nope"}), &ctx)
            .await
            .unwrap();
        assert!(!result.ok);
    }

    #[tokio::test]
    async fn escape_is_denied() {
        let (_dir, ctx) = setup();
        let result = ListDirectoryTool::new(1000)
            .execute(serde_json::json!({"path": ".."}), &ctx)
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }
}
