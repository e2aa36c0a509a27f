//! Configuration management for redraft
//!
//! Settings come from three layers, later layers winning:
//! built-in defaults, `.redraft/config.toml` in the working root, and a small
//! set of environment overrides (`MAX_REVISIONS`, `MAX_REVISIONS_MESSAGE`,
//! `DEFAULT_MODEL`, `DEFAULT_TEMPERATURE`). Configuration is read once at
//! startup and handed to the orchestrator explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{RedraftError, Result};

pub const DEFAULT_MAX_REVISIONS_MESSAGE: &str =
    "MAX REVISIONS REACHED - APPROVING CURRENT VERSION";

const DEFAULT_WRITER_INSTRUCTIONS: &str = "You write replies to customer messages on behalf of \
the company. Be warm, specific to what the customer said, and concise. Never invent facts, \
offers, or policies. Reply with the response text only.";

const DEFAULT_REVIEWER_INSTRUCTIONS: &str = "You review proposed replies to customer messages. \
Check tone, accuracy, relevance to the original message, and length. Give concrete, actionable \
feedback. End with a clear verdict: say APPROVE if the reply can be sent as is, or REVISE if it \
needs another pass.";

/// Repository-level redraft configuration
///
/// Loaded from `.redraft/config.toml` in the working root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedraftConfig {
    /// Revision loop settings
    #[serde(default, rename = "loop")]
    pub loop_settings: LoopSettings,

    /// Generation model settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Role instructions
    #[serde(default)]
    pub prompts: PromptConfig,
}

/// Settings the reviewer and orchestrator are constructed with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSettings {
    /// Review that sees this many drafts forces approval
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,

    /// Log entry written when the cap forces approval
    #[serde(default = "default_max_revisions_message")]
    pub max_revisions_message: String,
}

/// Model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model alias (`opus`, `sonnet`, `haiku`) or full API model id
    #[serde(default = "default_model")]
    pub name: String,

    /// Sampling temperature, 0.0 to 1.0
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum tokens per generated reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// Role instruction text, inline or from files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_writer_instructions")]
    pub writer_instructions: String,

    #[serde(default = "default_reviewer_instructions")]
    pub reviewer_instructions: String,

    /// Overrides `writer_instructions` when set (relative to the working root)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer_instructions_path: Option<PathBuf>,

    /// Overrides `reviewer_instructions` when set (relative to the working root)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_instructions_path: Option<PathBuf>,
}

/// Resolved instruction text for the writer and reviewer roles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub writer: String,
    pub reviewer: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            writer: default_writer_instructions(),
            reviewer: default_reviewer_instructions(),
        }
    }
}

// Default value providers
fn default_max_revisions() -> u32 {
    3
}

fn default_max_revisions_message() -> String {
    DEFAULT_MAX_REVISIONS_MESSAGE.to_string()
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_temperature() -> f64 {
    0.9
}

fn default_max_tokens() -> usize {
    4096
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_writer_instructions() -> String {
    DEFAULT_WRITER_INSTRUCTIONS.to_string()
}

fn default_reviewer_instructions() -> String {
    DEFAULT_REVIEWER_INSTRUCTIONS.to_string()
}

impl RedraftConfig {
    /// Path of the config file under a working root
    pub fn path(root: &Path) -> PathBuf {
        root.join(".redraft/config.toml")
    }

    /// Load configuration from `.redraft/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = Self::path(root);

        let config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)
                .map_err(|e| RedraftError::Config(format!("Failed to parse config file: {}", e)))?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// File config plus process environment overrides
    pub fn load(root: &Path) -> Result<Self> {
        let mut config = Self::load_or_default(root)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`
    ///
    /// A present but unparsable value is an error, not a silent default.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("MAX_REVISIONS") {
            self.loop_settings.max_revisions = raw.trim().parse().map_err(|_| {
                RedraftError::Config(format!(
                    "MAX_REVISIONS must be a non-negative integer, got {:?}",
                    raw
                ))
            })?;
        }

        if let Some(message) = lookup("MAX_REVISIONS_MESSAGE") {
            self.loop_settings.max_revisions_message = message;
        }

        if let Some(model) = lookup("DEFAULT_MODEL") {
            self.model.name = model;
        }

        if let Some(raw) = lookup("DEFAULT_TEMPERATURE") {
            self.model.temperature = raw.trim().parse().map_err(|_| {
                RedraftError::Config(format!("DEFAULT_TEMPERATURE must be a number, got {:?}", raw))
            })?;
        }

        self.validate()
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err(RedraftError::Config(format!(
                "temperature must be between 0.0 and 1.0, got {}",
                self.model.temperature
            )));
        }
        if self.model.name.trim().is_empty() {
            return Err(RedraftError::Config("model name is empty".to_string()));
        }
        if self.model.max_tokens == 0 {
            return Err(RedraftError::Config("max_tokens must be positive".to_string()));
        }
        Ok(())
    }

    /// Write default configuration to `.redraft/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(".redraft");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = Self::path(root);
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| RedraftError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }
}

impl PromptConfig {
    /// Resolve instruction text, reading override files relative to `root`
    pub fn resolve(&self, root: &Path) -> Result<Prompts> {
        let writer = match &self.writer_instructions_path {
            Some(path) => read_prompt(&root.join(path))?,
            None => self.writer_instructions.clone(),
        };
        let reviewer = match &self.reviewer_instructions_path {
            Some(path) => read_prompt(&root.join(path))?,
            None => self.reviewer_instructions.clone(),
        };
        Ok(Prompts { writer, reviewer })
    }
}

fn read_prompt(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        RedraftError::Config(format!("Failed to read prompt file {}: {}", path.display(), e))
    })
}

impl Default for RedraftConfig {
    fn default() -> Self {
        Self {
            loop_settings: LoopSettings::default(),
            model: ModelConfig::default(),
            prompts: PromptConfig::default(),
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_revisions: default_max_revisions(),
            max_revisions_message: default_max_revisions_message(),
        }
    }
}

impl LoopSettings {
    pub fn with_max_revisions(mut self, max_revisions: u32) -> Self {
        self.max_revisions = max_revisions;
        self
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            writer_instructions: default_writer_instructions(),
            reviewer_instructions: default_reviewer_instructions(),
            writer_instructions_path: None,
            reviewer_instructions_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RedraftConfig::default();
        assert_eq!(config.loop_settings.max_revisions, 3);
        assert_eq!(
            config.loop_settings.max_revisions_message,
            DEFAULT_MAX_REVISIONS_MESSAGE
        );
        assert_eq!(config.model.temperature, 0.9);
        assert_eq!(config.model.name, "sonnet");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RedraftConfig::default();
        config
            .apply_env_overrides(env(&[
                ("MAX_REVISIONS", "5"),
                ("MAX_REVISIONS_MESSAGE", "cap hit"),
                ("DEFAULT_MODEL", "haiku"),
                ("DEFAULT_TEMPERATURE", "0.2"),
            ]))
            .unwrap();

        assert_eq!(config.loop_settings.max_revisions, 5);
        assert_eq!(config.loop_settings.max_revisions_message, "cap hit");
        assert_eq!(config.model.name, "haiku");
        assert!((config.model.temperature - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bad_env_override_is_error() {
        let mut config = RedraftConfig::default();
        let result = config.apply_env_overrides(env(&[("MAX_REVISIONS", "-1")]));
        assert!(matches!(result, Err(RedraftError::Config(_))));

        let result = config.apply_env_overrides(env(&[("DEFAULT_TEMPERATURE", "1.5")]));
        assert!(matches!(result, Err(RedraftError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RedraftConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, RedraftConfig::default());
    }

    #[test]
    fn test_write_default_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = RedraftConfig::write_default(dir.path()).unwrap();
        assert!(path.exists());
        let config = RedraftConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, RedraftConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".redraft")).unwrap();
        std::fs::write(
            RedraftConfig::path(dir.path()),
            "[loop]\nmax_revisions = 1\n",
        )
        .unwrap();

        let config = RedraftConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.loop_settings.max_revisions, 1);
        assert_eq!(
            config.loop_settings.max_revisions_message,
            DEFAULT_MAX_REVISIONS_MESSAGE
        );
        assert_eq!(config.model, ModelConfig::default());
    }

    #[test]
    fn test_prompt_files_override_inline_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("writer.md"), "Write like a pirate.").unwrap();

        let prompts = PromptConfig {
            writer_instructions_path: Some(PathBuf::from("writer.md")),
            ..PromptConfig::default()
        }
        .resolve(dir.path())
        .unwrap();

        assert_eq!(prompts.writer, "Write like a pirate.");
        assert_eq!(prompts.reviewer, default_reviewer_instructions());
    }

    #[test]
    fn test_missing_prompt_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = PromptConfig {
            reviewer_instructions_path: Some(PathBuf::from("nope.md")),
            ..PromptConfig::default()
        }
        .resolve(dir.path());
        assert!(matches!(result, Err(RedraftError::Config(_))));
    }
}
