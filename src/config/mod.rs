//! Configuration module for the voice orchestrator
//!
//! Process-level settings come from .env files, YAML files, and environment
//! variables. Priority: YAML > ENV vars > .env values > defaults. Per-call
//! behaviour lives in [`AgentConfiguration`], which is supplied with each session.
//!
//! # Example
//! ```rust,no_run
//! use voice_orchestrator::config::OrchestratorConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = OrchestratorConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let config = OrchestratorConfig::from_file(&PathBuf::from("orchestrator.yaml"))?;
//! println!("tool timeout: {:?}", config.tool_timeout);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub mod agent;
mod yaml;

pub use agent::{AgentConfiguration, SessionMode, TurnDetectionSettings};
pub use yaml::YamlConfig;

/// Default bound for provider HTTP calls and tool execution.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default bound for establishing provider WebSocket connections.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Model/tool round trips allowed for a single pipeline turn.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 4;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse agent configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// Process-wide orchestrator settings shared by every session.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Bound for provider REST calls (TTS synthesis, LLM streams, REST STT)
    pub provider_timeout: Duration,
    /// Bound for a single tool execution; exceeding it yields a failed result
    pub tool_timeout: Duration,
    /// Bound for establishing provider connections during `initialize`
    pub connect_timeout: Duration,
    /// Timezone used for instructions when the agent sets none
    pub default_timezone: String,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Upper bound on model/tool round trips per pipeline turn
    pub max_tool_rounds: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            tool_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            default_timezone: "UTC".to_string(),
            log_level: "info".to_string(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables.
    ///
    /// Recognized variables: `PROVIDER_TIMEOUT_SECS`, `TOOL_TIMEOUT_SECS`,
    /// `CONNECT_TIMEOUT_SECS`, `DEFAULT_TIMEZONE`, `LOG_LEVEL`, `MAX_TOOL_ROUNDS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            provider_timeout: env_secs("PROVIDER_TIMEOUT_SECS")?
                .unwrap_or(defaults.provider_timeout),
            tool_timeout: env_secs("TOOL_TIMEOUT_SECS")?.unwrap_or(defaults.tool_timeout),
            connect_timeout: env_secs("CONNECT_TIMEOUT_SECS")?
                .unwrap_or(defaults.connect_timeout),
            default_timezone: env_string("DEFAULT_TIMEZONE").unwrap_or(defaults.default_timezone),
            log_level: env_string("LOG_LEVEL").unwrap_or(defaults.log_level),
            max_tool_rounds: env_parse::<usize>("MAX_TOOL_ROUNDS")?
                .unwrap_or(defaults.max_tool_rounds),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, falling back to the environment for
    /// anything the file leaves out.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;
        let base = Self::from_env()?;
        let config = yaml.merge_into(base);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("provider_timeout", self.provider_timeout),
            ("tool_timeout", self.tool_timeout),
            ("connect_timeout", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: "0".to_string(),
                });
            }
        }
        if self.max_tool_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_tool_rounds".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}

fn env_secs(key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn cleanup_env_vars() {
        unsafe {
            for key in [
                "PROVIDER_TIMEOUT_SECS",
                "TOOL_TIMEOUT_SECS",
                "CONNECT_TIMEOUT_SECS",
                "DEFAULT_TIMEZONE",
                "LOG_LEVEL",
                "MAX_TOOL_ROUNDS",
            ] {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        let config = OrchestratorConfig::from_env().unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert_eq!(config.default_timezone, "UTC");
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TOOL_TIMEOUT_SECS", "5");
            env::set_var("DEFAULT_TIMEZONE", "America/New_York");
        }
        let config = OrchestratorConfig::from_env().unwrap();
        assert_eq!(config.tool_timeout, Duration::from_secs(5));
        assert_eq!(config.default_timezone, "America/New_York");
        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PROVIDER_TIMEOUT_SECS", "soon");
        }
        let err = OrchestratorConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PROVIDER_TIMEOUT_SECS"));
        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_zero_timeout() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TOOL_TIMEOUT_SECS", "0");
        }
        assert!(OrchestratorConfig::from_env().is_err());
        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("orchestrator.yaml");
        fs::write(
            &config_path,
            r#"
timeouts:
  tool_secs: 12
session:
  default_timezone: "Europe/Berlin"
"#,
        )
        .unwrap();

        unsafe {
            env::set_var("TOOL_TIMEOUT_SECS", "3");
            env::set_var("PROVIDER_TIMEOUT_SECS", "7");
        }

        let config = OrchestratorConfig::from_file(&config_path).unwrap();
        assert_eq!(config.tool_timeout, Duration::from_secs(12));
        // Not in YAML, so ENV wins
        assert_eq!(config.provider_timeout, Duration::from_secs(7));
        assert_eq!(config.default_timezone, "Europe/Berlin");
        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing() {
        cleanup_env_vars();
        let err = OrchestratorConfig::from_file(&PathBuf::from("/nonexistent/x.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
