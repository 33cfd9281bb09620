//! Config loading, validation, and duration accessors.

use super::model::LockConfig;
use crate::error::{LockError, Result};
use std::path::Path;
use std::time::Duration;

impl LockConfig {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(LockConfig)` - Successfully loaded and validated config
    /// * `Err(LockError::Config)` - Read error, parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LockError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LockConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LockError::Config(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LockError::Config(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - both check intervals must be positive
    /// - `message_timeout_ms` and `accept_poll_ms` must be positive
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            return Err(LockError::Config(
                "check_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.uncertain_check_interval_secs == 0 {
            return Err(LockError::Config(
                "uncertain_check_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.message_timeout_ms == 0 {
            return Err(LockError::Config(
                "message_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.accept_poll_ms == 0 {
            return Err(LockError::Config(
                "accept_poll_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    // Accessors clamp zero to the smallest usable value; configs built in
    // code never pass through `validate`.

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn uncertain_check_interval(&self) -> Duration {
        Duration::from_secs(self.uncertain_check_interval_secs.max(1))
    }

    pub fn reassert_delay(&self) -> Duration {
        Duration::from_millis(self.reassert_delay_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms.max(1))
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms.max(1))
    }
}
