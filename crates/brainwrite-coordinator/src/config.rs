//! Coordinator configuration
//!
//! Loaded from TOML or built in code with the `with_*` methods. Missing
//! keys fall back to [`CoordinatorConfig::default`].

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Longest lease a board may hand out
const MAX_LEASE_TTL_SECS: u64 = 86_400;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parsed but are out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What the sweeper does for a participant whose lease ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonmentPolicy {
    /// Write an empty row in their name and move on
    #[default]
    RecordBlank,
    /// Remove them and their rows from the board; rotation skips them
    Purge,
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Write window granted with each lease
    pub lease_ttl_secs: u64,
    /// Handling of expired leases
    pub abandonment_policy: AbandonmentPolicy,
    /// Sweep the board before every submission
    pub sweep_before_submit: bool,
    /// Period of the background sweep loop
    pub sweep_interval_secs: u64,
    /// Compare-and-swap attempts before a lease request gives up
    pub cas_attempts: u32,
    /// Longest display name accepted on join, in characters
    pub max_display_name_len: usize,
}

impl CoordinatorConfig {
    /// Parse from TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError`] on malformed TOML or out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file can't be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first bad key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_ttl_secs == 0 || self.lease_ttl_secs > MAX_LEASE_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "lease_ttl_secs must be within 1..={MAX_LEASE_TTL_SECS}"
            )));
        }
        if self.cas_attempts == 0 {
            return Err(ConfigError::Invalid("cas_attempts must be at least 1".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be at least 1".into(),
            ));
        }
        if self.max_display_name_len == 0 {
            return Err(ConfigError::Invalid(
                "max_display_name_len must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Lease window as a duration
    #[inline]
    #[must_use]
    pub fn lease_ttl(&self) -> chrono::Duration {
        let secs = self.lease_ttl_secs.min(MAX_LEASE_TTL_SECS);
        // bounded above, cannot wrap
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1_000))
    }

    /// Sweep loop period
    #[inline]
    #[must_use]
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    /// With lease TTL in seconds
    #[inline]
    #[must_use]
    pub fn with_lease_ttl_secs(mut self, secs: u64) -> Self {
        self.lease_ttl_secs = secs;
        self
    }

    /// With abandonment policy
    #[inline]
    #[must_use]
    pub fn with_abandonment_policy(mut self, policy: AbandonmentPolicy) -> Self {
        self.abandonment_policy = policy;
        self
    }

    /// With or without the sweep before each submit
    #[inline]
    #[must_use]
    pub fn with_sweep_before_submit(mut self, enabled: bool) -> Self {
        self.sweep_before_submit = enabled;
        self
    }

    /// With sweep loop period in seconds
    #[inline]
    #[must_use]
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// With compare-and-swap attempts
    #[inline]
    #[must_use]
    pub fn with_cas_attempts(mut self, attempts: u32) -> Self {
        self.cas_attempts = attempts;
        self
    }

    /// With display name limit
    #[inline]
    #[must_use]
    pub fn with_max_display_name_len(mut self, len: usize) -> Self {
        self.max_display_name_len = len;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: 300,
            abandonment_policy: AbandonmentPolicy::RecordBlank,
            sweep_before_submit: true,
            sweep_interval_secs: 30,
            cas_attempts: 4,
            max_display_name_len: 64,
        }
    }
}
