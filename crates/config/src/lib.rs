use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod logging;

pub use logging::init_logging;

/// Environment variable naming a YAML configuration file
pub const CONFIG_FILE_ENV: &str = "ICN_GROUP_CONFIG_FILE";

/// Environment variable overriding the configured log level
pub const LOG_LEVEL_ENV: &str = "ICN_GROUP_LOG_LEVEL";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors that can occur in configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read file: {0}")]
    FileReadError(String),

    #[error("Failed to parse YAML: {0}")]
    YamlParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Largest retention a timestamp offset can represent (millisecond range of `i64`)
pub const MAX_DECIDED_RETENTION_SECS: u64 = i64::MAX as u64 / 1000;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Tunables of the group decision engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum byte length of any metadata string
    #[serde(default = "default_max_metadata_len")]
    pub max_metadata_len: usize,
    /// Maximum number of actions a single proposal may carry
    #[serde(default = "default_max_actions_per_proposal")]
    pub max_actions_per_proposal: usize,
    /// Seconds an accepted or rejected proposal is kept past its voting period end
    #[serde(default)]
    pub decided_retention_secs: u64,
    /// Prefix of derived group policy addresses
    #[serde(default = "default_policy_address_prefix")]
    pub policy_address_prefix: String,
    /// Default tracing filter
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_metadata_len() -> usize {
    255
}

fn default_max_actions_per_proposal() -> usize {
    64
}

fn default_policy_address_prefix() -> String {
    "icngp".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_metadata_len: default_max_metadata_len(),
            max_actions_per_proposal: default_max_actions_per_proposal(),
            decided_retention_secs: 0,
            policy_address_prefix: default_policy_address_prefix(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Retention window for decided proposals
    pub fn decided_retention(&self) -> Duration {
        Duration::from_secs(self.decided_retention_secs)
    }

    /// Check the configuration for values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_actions_per_proposal == 0 {
            return Err(ConfigError::Invalid(
                "max_actions_per_proposal must be at least 1".to_string(),
            ));
        }

        if self.decided_retention_secs > MAX_DECIDED_RETENTION_SECS {
            return Err(ConfigError::Invalid(format!(
                "decided_retention_secs must be at most {}",
                MAX_DECIDED_RETENTION_SECS
            )));
        }

        if self.policy_address_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "policy_address_prefix cannot be empty".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(format!("Failed to read {}: {}", path.display(), e)))?;

        Self::from_yaml_str(&contents)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(level) = env::var(LOG_LEVEL_ENV) {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_metadata_len, 255);
        assert_eq!(config.max_actions_per_proposal, 64);
        assert_eq!(config.decided_retention(), Duration::ZERO);
        assert_eq!(config.policy_address_prefix, "icngp");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = EngineConfig::from_yaml_str("decided_retention_secs: 3600\nlog_level: debug\n").unwrap();
        assert_eq!(config.decided_retention(), Duration::from_secs(3600));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_metadata_len, 255);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = EngineConfig::from_yaml_str("max_actions_per_proposal: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = EngineConfig::from_yaml_str("log_level: loud\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = EngineConfig::from_yaml_str(&format!("decided_retention_secs: {}\n", u64::MAX));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = EngineConfig::from_yaml_str("max_metadata_len: [1, 2]\n");
        assert!(matches!(result, Err(ConfigError::YamlParseError(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_metadata_len: 16").unwrap();
        writeln!(file, "policy_address_prefix: coop").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_metadata_len, 16);
        assert_eq!(config.policy_address_prefix, "coop");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = EngineConfig::from_file(dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
