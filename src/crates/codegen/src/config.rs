//! Generator configuration
//!
//! Model selection, generation parameters, continuation limits and task
//! retention. Loaded from YAML with `CODEGEN_*` environment overrides.

use crate::executor::ContinuationConfig;
use crate::{GeneratorError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Configuration for the whole generation layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Model identifier (e.g., "gpt-4o", "deepseek-chat")
    pub model: String,

    /// Temperature for generation (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Token ceiling for a single gateway call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Maximum continuation rounds per request
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,

    /// Request delta streams instead of whole messages
    #[serde(default = "default_streaming")]
    pub streaming: bool,

    /// Pause between continuation rounds, in milliseconds
    #[serde(default = "default_round_delay_ms")]
    pub round_delay_ms: u64,

    /// Watchdog timeout for non-terminal tasks, in seconds
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// How long terminal tasks are kept, in seconds
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Interval of the retention sweep, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// System prompt override for the generate workflow
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> usize {
    8192
}

fn default_max_loops() -> u32 {
    20
}

fn default_streaming() -> bool {
    true
}

fn default_round_delay_ms() -> u64 {
    50
}

fn default_task_timeout_secs() -> u64 {
    600
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self::new("gpt-4o")
    }
}

impl GeneratorConfig {
    /// Create a configuration with defaults for everything but the model
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_loops: default_max_loops(),
            streaming: default_streaming(),
            round_delay_ms: default_round_delay_ms(),
            task_timeout_secs: default_task_timeout_secs(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            system_prompt: None,
        }
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Validation runs once, after the overrides are applied.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::read_file(path.as_ref())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GeneratorError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_yaml::from_str(&content)
            .map_err(|e| GeneratorError::Config(format!("Failed to parse YAML config: {}", e)))
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CODEGEN_MODEL: Model identifier
    /// - CODEGEN_TEMPERATURE: Temperature (0.0-2.0)
    /// - CODEGEN_MAX_TOKENS: Token ceiling per call
    /// - CODEGEN_MAX_LOOPS: Maximum continuation rounds
    /// - CODEGEN_STREAMING: Enable streaming (true/false)
    /// - CODEGEN_TASK_TIMEOUT_SECS: Watchdog timeout
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply `CODEGEN_*` overrides from `lookup`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("CODEGEN_MODEL") {
            self.model = model;
        }

        if let Some(value) = lookup("CODEGEN_TEMPERATURE").and_then(|v| v.parse::<f32>().ok()) {
            self.temperature = value.clamp(0.0, 2.0);
        }

        if let Some(value) = lookup("CODEGEN_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            self.max_tokens = value;
        }

        if let Some(value) = lookup("CODEGEN_MAX_LOOPS").and_then(|v| v.parse().ok()) {
            self.max_loops = value;
        }

        if let Some(streaming) = lookup("CODEGEN_STREAMING") {
            self.streaming = streaming.eq_ignore_ascii_case("true")
                || streaming == "1"
                || streaming.eq_ignore_ascii_case("yes");
        }

        if let Some(value) = lookup("CODEGEN_TASK_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.task_timeout_secs = value;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(GeneratorError::Config(
                "Model identifier cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(GeneratorError::Config(format!(
                "Temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            )));
        }

        if self.max_tokens == 0 {
            return Err(GeneratorError::Config(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.max_loops == 0 {
            return Err(GeneratorError::Config(
                "max_loops must be greater than 0".to_string(),
            ));
        }

        if self.task_timeout_secs == 0 || self.retention_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(GeneratorError::Config(
                "task timeout, retention and sweep interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Set model identifier
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set maximum continuation rounds
    pub fn with_max_loops(mut self, max_loops: u32) -> Self {
        self.max_loops = max_loops;
        self
    }

    /// Set streaming mode
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    /// Set the pause between rounds
    pub fn with_round_delay_ms(mut self, ms: u64) -> Self {
        self.round_delay_ms = ms;
        self
    }

    /// Set the watchdog timeout
    pub fn with_task_timeout_secs(mut self, secs: u64) -> Self {
        self.task_timeout_secs = secs;
        self
    }

    /// Set system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Settings for the continuation engine
    pub fn continuation(&self) -> ContinuationConfig {
        ContinuationConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            max_loops: self.max_loops,
            streaming: self.streaming,
            round_delay: Duration::from_millis(self.round_delay_ms),
        }
    }

    /// Settings for the task ledger
    pub fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            retention: Duration::from_secs(self.retention_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

/// Timing settings for the task ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Non-terminal tasks older than this are marked `timeout`
    pub task_timeout: Duration,
    /// Terminal tasks are deleted this long after completion
    pub retention: Duration,
    /// How often the background sweep runs
    pub sweep_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(default_task_timeout_secs()),
            retention: Duration::from_secs(default_retention_secs()),
            sweep_interval: Duration::from_secs(default_sweep_interval_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::default();
        assert_eq!(config.max_loops, 20);
        assert!(config.streaming);
        assert_eq!(config.task_timeout_secs, 600);
        assert!(config.validate().is_ok());

        let ledger = config.ledger();
        assert_eq!(ledger.task_timeout, Duration::from_secs(600));
        assert_eq!(ledger.retention, Duration::from_secs(3600));
        assert_eq!(ledger.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_validation() {
        assert!(GeneratorConfig::new("").validate().is_err());
        assert!(GeneratorConfig::default().with_max_loops(0).validate().is_err());
        assert!(GeneratorConfig::default().with_task_timeout_secs(0).validate().is_err());

        let mut config = GeneratorConfig::default();
        config.temperature = 3.5;
        assert!(config.validate().is_err());

        let mut config = GeneratorConfig::default();
        config.max_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model: deepseek-chat\nmax_loops: 5\nstreaming: false").unwrap();

        let config = GeneratorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.model, "deepseek-chat");
        assert_eq!(config.max_loops, 5);
        assert!(!config.streaming);
        assert_eq!(config.max_tokens, 8192);

        let continuation = config.continuation();
        assert_eq!(continuation.max_loops, 5);
        assert_eq!(continuation.model, "deepseek-chat");
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model: gpt-4o\nmax_loops: 0").unwrap();

        assert!(matches!(
            GeneratorConfig::from_file(file.path()),
            Err(GeneratorError::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars = std::collections::HashMap::from([
            ("CODEGEN_MODEL", "deepseek-chat"),
            ("CODEGEN_TEMPERATURE", "9.0"),
            ("CODEGEN_MAX_TOKENS", "lots"),
            ("CODEGEN_MAX_LOOPS", "7"),
            ("CODEGEN_STREAMING", "no"),
            ("CODEGEN_TASK_TIMEOUT_SECS", "30"),
        ]);

        let mut config = GeneratorConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.model, "deepseek-chat");
        assert_eq!(config.temperature, 2.0);
        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.max_loops, 7);
        assert!(!config.streaming);
        assert_eq!(config.task_timeout_secs, 30);
    }

    #[test]
    fn test_env_override_fixes_file_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model: gpt-4o\nmax_loops: 0").unwrap();

        std::env::set_var("CODEGEN_MAX_LOOPS", "4");
        let config = GeneratorConfig::from_file_with_env(file.path());
        std::env::remove_var("CODEGEN_MAX_LOOPS");

        assert_eq!(config.unwrap().max_loops, 4);
    }

    #[test]
    fn test_missing_file() {
        assert!(GeneratorConfig::from_file("/nonexistent/codegen.yaml").is_err());
    }
}
