//! Built-in tool implementations for stepwise.
//!
//! Tools give the agent read access to the workspace and a narrow way to
//! run commands in it: read files, list directories, search text, and run
//! allowlisted commands. Every file-system path is scoped to the workspace
//! root carried by the [`ToolContext`](stepwise_core::ToolContext).

pub mod list_directory;
pub mod path;
pub mod read_file;
pub mod run_command;
pub mod search_text;

use stepwise_config::ToolsConfig;
use stepwise_core::tool::{Tool, ToolRegistry};
use tracing::warn;

/// Create a registry holding the built-in tools enabled in `config`.
pub fn registry_from_config(config: &ToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for name in &config.enabled {
        match builtin(name, config) {
            Some(tool) => registry.register(tool),
            None => warn!(tool = %name, "Ignoring unknown tool in configuration"),
        }
    }
    registry
}

fn builtin(name: &str, config: &ToolsConfig) -> Option<Box<dyn Tool>> {
    let limit = config.max_output_chars;
    let tool: Box<dyn Tool> = match name {
        "read_file" => Box::new(read_file::ReadFileTool::new(limit)),
        "list_directory" => Box::new(list_directory::ListDirectoryTool::new(limit)),
        "search_text" => Box::new(search_text::SearchTextTool::new(limit)),
        "run_command" => Box::new(run_command::RunCommandTool::new(
            config.allowed_commands.clone(),
            limit,
        )),
        _ => return None,
    };
    Some(tool)
}

/// Cap `text` at `max_chars` characters, noting how much was dropped.
///
/// Returns the (possibly shortened) text and whether it was truncated.
pub fn truncate_output(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        None => (text.to_string(), false),
        Some((cut, _)) => {
            let dropped = text[cut..].chars().count();
            (
                format!("{}\n... [truncated {dropped} more characters]", &text[..cut]),
                true,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_config::BUILTIN_TOOLS;

    #[test]
    fn default_config_registers_every_builtin() {
        let registry = registry_from_config(&ToolsConfig::default());
        assert_eq!(registry.names(), BUILTIN_TOOLS);
    }

    #[test]
    fn only_enabled_tools_are_registered() {
        let config = ToolsConfig {
            enabled: vec!["read_file".into(), "search_text".into()],
            ..ToolsConfig::default()
        };
        let registry = registry_from_config(&config);
        assert_eq!(registry.names(), ["read_file", "search_text"]);
    }

    #[test]
    fn unknown_tool_is_skipped() {
        let config = ToolsConfig {
            enabled: vec!["teleport".into()],
            ..ToolsConfig::default()
        };
        assert!(registry_from_config(&config).is_empty());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let (out, truncated) = truncate_output("héllo wörld", 5);
        assert!(truncated);
        assert!(out.starts_with("héllo\n"));
        assert!(out.contains("truncated 6 more characters"));
    }

    #[test]
    fn short_output_untouched() {
        assert_eq!(truncate_output("abc", 3), ("abc".to_string(), false));
    }
}
