//! Configuration loading and validation.
//!
//! Reads `chorus.yaml` and resolves environment variables. Config is the
//! single source of truth for the provider endpoint, the model catalog, the
//! tool server and the agent loop limits.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::errors::InferenceError;
use super::registry::{ModelDescriptor, ModelRegistry};

// ─── Constants ───────────────────────────────────────────────────────────────

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "chorus.yaml";

/// Env var holding an explicit config path.
pub const CONFIG_PATH_ENV: &str = "CHORUS_CONFIG";

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Completion provider endpoint and credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// May be empty at load time; checked before the first send.
    #[serde(default)]
    pub api_key: String,
    /// Sent as `HTTP-Referer` for provider-side attribution.
    #[serde(default)]
    pub referer: Option<String>,
    /// Sent as `X-Title`.
    #[serde(default)]
    pub app_title: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            referer: None,
            app_title: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Remote MCP tool server.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolServerConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

/// Turn-resolution limits and defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Maximum dispatch rounds per turn.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    /// Compress when the persisted message count is a multiple of this.
    #[serde(default = "default_compression_period")]
    pub compression_period: u64,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    #[serde(default)]
    pub system_prompt: String,
    /// Model used for summaries. Defaults to the first catalog model.
    #[serde(default)]
    pub summary_model: Option<String>,
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            compression_period: default_compression_period(),
            default_temperature: default_temperature(),
            system_prompt: String::new(),
            summary_model: None,
            summary_temperature: default_summary_temperature(),
        }
    }
}

/// Top-level configuration (mirrors `chorus.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct ChorusConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    pub models: Vec<ModelDescriptor>,
    /// How many leading catalog models start selected.
    #[serde(default = "default_selection")]
    pub default_selection: usize,
    #[serde(default)]
    pub tool_server: Option<ToolServerConfig>,
    #[serde(default)]
    pub agent: AgentConfig,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_call_timeout_ms() -> u64 {
    30_000
}
fn default_max_tool_iterations() -> u32 {
    5
}
fn default_compression_period() -> u64 {
    11
}
fn default_temperature() -> f32 {
    1.0
}
fn default_summary_temperature() -> f32 {
    0.3
}
fn default_selection() -> usize {
    2
}

impl ChorusConfig {
    /// Check invariants that serde cannot express.
    ///
    /// A missing API key is deliberately not checked here.
    pub fn validate(&self) -> Result<(), InferenceError> {
        self.registry()?;
        if self.agent.max_tool_iterations == 0 {
            return Err(InferenceError::ConfigError {
                reason: "agent.max_tool_iterations must be at least 1".into(),
            });
        }
        if self.agent.compression_period == 0 {
            return Err(InferenceError::ConfigError {
                reason: "agent.compression_period must be at least 1".into(),
            });
        }
        if let Some(ref id) = self.agent.summary_model {
            if !self.models.iter().any(|m| &m.id == id) {
                return Err(InferenceError::ConfigError {
                    reason: format!("agent.summary_model '{id}' is not in the model catalog"),
                });
            }
        }
        if self.provider.base_url.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "provider.base_url is empty".into(),
            });
        }
        Ok(())
    }

    /// Build the model registry from the catalog.
    pub fn registry(&self) -> Result<ModelRegistry, InferenceError> {
        ModelRegistry::new(self.models.clone())
    }

    /// The model used for summaries.
    pub fn summary_model(&self) -> Option<&ModelDescriptor> {
        match self.agent.summary_model {
            Some(ref id) => self.models.iter().find(|m| &m.id == id),
            None => self.models.first(),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate `chorus.yaml`.
///
/// Checks `CHORUS_CONFIG` first, then searches upward from `start`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, InferenceError> {
    if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_PATH_ENV} points at a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(InferenceError::ConfigError {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Load, interpolate, parse and validate the config file.
pub fn load_config(path: &Path) -> Result<ChorusConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_config(&raw)
}

/// Parse config text. Performs `${VAR}` / `${VAR:-default}` interpolation.
pub fn parse_config(raw: &str) -> Result<ChorusConfig, InferenceError> {
    let interpolated = interpolate_env_vars(raw);

    let config: ChorusConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;

    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`. Unset without default resolves to `""`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
models:
  - id: openai/gpt-4o-mini
    display_name: GPT-4o mini
    price_per_million_prompt_tokens: 0.15
    price_per_million_completion_tokens: 0.6
  - id: anthropic/claude-3-haiku
    display_name: Claude 3 Haiku
"#;

    #[test]
    fn test_defaults_applied() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.provider.base_url, DEFAULT_BASE_URL);
        assert!(config.provider.api_key.is_empty());
        assert_eq!(config.default_selection, 2);
        assert_eq!(config.agent.max_tool_iterations, 5);
        assert_eq!(config.agent.compression_period, 11);
        assert_eq!(config.agent.default_temperature, 1.0);
        assert!(config.tool_server.is_none());
        assert_eq!(
            config.summary_model().map(|m| m.id.as_str()),
            Some("openai/gpt-4o-mini")
        );
    }

    #[test]
    fn test_interpolates_api_key() {
        std::env::set_var("__TEST_CHORUS_KEY__", "sk-test");
        let yaml = format!("provider:\n  api_key: ${{__TEST_CHORUS_KEY__}}\n{MINIMAL}");
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.provider.api_key, "sk-test");
        std::env::remove_var("__TEST_CHORUS_KEY__");
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__TEST_NONEXISTENT_VAR__");
        let result = interpolate_env_vars("${__TEST_NONEXISTENT_VAR__:-/fallback/path}");
        assert_eq!(result, "/fallback/path");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with no variables";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/Documents");
        assert!(!result.starts_with('~'), "tilde should be expanded");
        assert!(result.ends_with("/Documents"));
    }

    #[test]
    fn test_rejects_zero_limits() {
        let yaml = format!("{MINIMAL}agent:\n  max_tool_iterations: 0\n");
        assert!(parse_config(&yaml).is_err());
        let yaml = format!("{MINIMAL}agent:\n  compression_period: 0\n");
        assert!(parse_config(&yaml).is_err());
    }

    #[test]
    fn test_rejects_unknown_summary_model() {
        let yaml = format!("{MINIMAL}agent:\n  summary_model: nope/none\n");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("summary_model"));
    }

    #[test]
    fn test_rejects_empty_catalog() {
        assert!(parse_config("models: []\n").is_err());
    }

    #[test]
    fn test_find_config_walks_upward() {
        std::env::remove_var(CONFIG_PATH_ENV);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), MINIMAL).unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_path(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILE_NAME));
        assert!(load_config(&found).is_ok());
    }
}
