use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::{ConfigError, OrchestratorConfig};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration; anything left out
/// keeps the value loaded from the environment.
///
/// # Example YAML structure
/// ```yaml
/// timeouts:
///   provider_secs: 30
///   tool_secs: 30
///   connect_secs: 10
///
/// session:
///   default_timezone: "UTC"
///   max_tool_rounds: 4
///
/// logging:
///   level: "info"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub timeouts: Option<TimeoutsYaml>,
    pub session: Option<SessionYaml>,
    pub logging: Option<LoggingYaml>,
}

/// Timeout configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TimeoutsYaml {
    pub provider_secs: Option<u64>,
    pub tool_secs: Option<u64>,
    pub connect_secs: Option<u64>,
}

/// Session defaults from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub default_timezone: Option<String>,
    pub max_tool_rounds: Option<usize>,
}

/// Logging configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingYaml {
    pub level: Option<String>,
}

impl YamlConfig {
    /// Load YAML configuration from a file.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Overlay the values present in this file onto `base`.
    pub fn merge_into(self, mut base: OrchestratorConfig) -> OrchestratorConfig {
        if let Some(timeouts) = self.timeouts {
            if let Some(secs) = timeouts.provider_secs {
                base.provider_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = timeouts.tool_secs {
                base.tool_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = timeouts.connect_secs {
                base.connect_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(session) = self.session {
            if let Some(tz) = session.default_timezone {
                base.default_timezone = tz;
            }
            if let Some(rounds) = session.max_tool_rounds {
                base.max_tool_rounds = rounds;
            }
        }
        if let Some(level) = self.logging.and_then(|l| l.level) {
            base.log_level = level;
        }
        base
    }
}
