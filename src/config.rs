//! Host configuration
//!
//! ```yaml
//! connection: DefaultStorage
//! sampler:
//!   initialDelayMs: 3000
//!   intervalMs: 10000
//! progressSeparator: "\n"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::JobHostError;
use crate::sampler::SamplerConfig;

/// Replaces `connection` when set
pub const CONNECTION_ENV: &str = "JOBHOST_CONNECTION";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
    /// Connection identity used when the invocation does not name one
    pub connection: String,
    pub sampler: SamplerSettings,
    pub progress_separator: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplerSettings {
    pub initial_delay_ms: u64,
    pub interval_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            connection: String::new(),
            sampler: SamplerSettings::default(),
            progress_separator: "\n".to_string(),
        }
    }
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 3_000,
            interval_ms: 10_000,
        }
    }
}

impl HostConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, JobHostError> {
        let config: HostConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, JobHostError> {
        let yaml = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml_str(&yaml)?.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(connection) = std::env::var(CONNECTION_ENV) {
            if !connection.is_empty() {
                self.connection = connection;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), JobHostError> {
        if self.sampler.interval_ms == 0 {
            return Err(JobHostError::InvalidConfig {
                field: "sampler.intervalMs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            initial_delay: Duration::from_millis(self.sampler.initial_delay_ms),
            interval: Duration::from_millis(self.sampler.interval_ms),
            separator: self.progress_separator.clone(),
        }
    }
}
