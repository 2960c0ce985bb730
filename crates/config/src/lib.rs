//! Configuration loading, validation, and management for stepwise.
//!
//! Loads configuration from `~/.stepwise/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Names of the tools shipped with `stepwise-tools`.
pub const BUILTIN_TOOLS: &[&str] = &["list_directory", "read_file", "run_command", "search_text"];

/// The root configuration structure.
///
/// Maps directly to `~/.stepwise/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (the `[provider]` table may override it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model to use. When unset, the first model the provider lists is
    /// picked on first use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Model endpoint configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentSettings,

    /// Tool registry configuration
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("provider", &self.provider)
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name used in logs and progress messages
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider_name() -> String {
    "openrouter".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum loop iterations per request before a final answer is forced
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    10
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Which built-in tools to register
    #[serde(default = "default_enabled_tools")]
    pub enabled: Vec<String>,

    /// Workspace root for file-system tools (default: current directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    /// Commands `run_command` may start. Empty = deny all.
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Tool output beyond this many characters is truncated
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

fn default_enabled_tools() -> Vec<String> {
    BUILTIN_TOOLS.iter().map(|s| s.to_string()).collect()
}
fn default_allowed_commands() -> Vec<String> {
    ["ls", "cat", "head", "tail", "wc", "grep", "find", "git", "cargo", "rustc", "pwd", "echo"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_output_chars() -> usize {
    20_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_tools(),
            workspace: None,
            allowed_commands: default_allowed_commands(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

impl ToolsConfig {
    /// The workspace root, falling back to the current directory.
    pub fn workspace_root(&self) -> PathBuf {
        match &self.workspace {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.stepwise/config.toml)
    /// and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// - `STEPWISE_API_KEY`, `OPENROUTER_API_KEY`, `OPENAI_API_KEY` fill
    ///   the API key (in that order) when the file sets none
    /// - `STEPWISE_MODEL` overrides the model
    /// - `STEPWISE_BASE_URL` overrides the provider base URL
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("STEPWISE_API_KEY")
                .or_else(|| lookup("OPENROUTER_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(model) = lookup("STEPWISE_MODEL").filter(|m| !m.trim().is_empty()) {
            self.model = Some(model);
        }

        if let Some(url) = lookup("STEPWISE_BASE_URL").filter(|u| !u.trim().is_empty()) {
            self.provider.base_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".stepwise")
    }

    /// Path of the configuration file.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// A copy with every API key masked, for display.
    pub fn redacted(&self) -> Self {
        let mask = |key: &Option<String>| key.as_ref().map(|_| "***".to_string());
        let mut config = self.clone();
        config.api_key = mask(&self.api_key);
        config.provider.api_key = mask(&self.provider.api_key);
        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.tools.max_output_chars == 0 {
            return Err(ConfigError::ValidationError(
                "tools.max_output_chars must be > 0".into(),
            ));
        }

        if let Some(unknown) = self
            .tools
            .enabled
            .iter()
            .find(|name| !BUILTIN_TOOLS.contains(&name.as_str()))
        {
            return Err(ConfigError::ValidationError(format!(
                "unknown tool '{unknown}' in tools.enabled (known: {})",
                BUILTIN_TOOLS.join(", ")
            )));
        }

        Ok(())
    }

    /// The API key to send: the provider-specific one wins.
    pub fn effective_api_key(&self) -> Option<&str> {
        self.provider
            .api_key
            .as_deref()
            .or(self.api_key.as_deref())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            provider: ProviderConfig::default(),
            agent: AgentSettings::default(),
            tools: ToolsConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.provider.name, "openrouter");
        assert_eq!(config.tools.enabled.len(), BUILTIN_TOOLS.len());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig {
            model: Some("openai/gpt-4o-mini".into()),
            ..AppConfig::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.provider.base_url, config.provider.base_url);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn unknown_tool_rejected() {
        let mut config = AppConfig::default();
        config.tools.enabled.push("launch_rockets".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("launch_rockets"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert!(config.model.is_none());
    }

    #[test]
    fn load_from_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
model = "local/qwen"

[agent]
max_iterations = 4

[tools]
enabled = ["read_file", "search_text"]
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.model.as_deref(), Some("local/qwen"));
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.tools.enabled, ["read_file", "search_text"]);
        assert_eq!(config.tools.max_output_chars, 20_000);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = [unterminated").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-openai"),
            ("OPENROUTER_API_KEY", "sk-or"),
            ("STEPWISE_MODEL", "openai/gpt-4o"),
            ("STEPWISE_BASE_URL", "http://localhost:11434/v1"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("sk-or"));
        assert_eq!(config.model.as_deref(), Some("openai/gpt-4o"));
        assert_eq!(config.provider.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn file_api_key_wins_over_env() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env_overrides(|_| Some("from-env".into()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn provider_key_takes_precedence() {
        let mut config = AppConfig {
            api_key: Some("global".into()),
            ..AppConfig::default()
        };
        assert_eq!(config.effective_api_key(), Some("global"));
        config.provider.api_key = Some("scoped".into());
        assert_eq!(config.effective_api_key(), Some("scoped"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn redacted_masks_keys_for_display() {
        let mut config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        config.provider.api_key = Some("sk-provider".into());

        let shown = toml::to_string_pretty(&config.redacted()).unwrap();
        assert!(!shown.contains("sk-secret"));
        assert!(!shown.contains("sk-provider"));
        assert!(shown.contains("***"));
        assert_eq!(config.effective_api_key(), Some("sk-provider"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter.ai"));
        assert!(toml_str.contains("max_iterations = 10"));
    }
}
