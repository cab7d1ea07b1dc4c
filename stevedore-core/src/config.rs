//! Reconciler configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the controller loop and action executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Interval between reconcile ticks in milliseconds. Store changes and
    /// operator triggers start a cycle earlier.
    pub tick_interval_ms: u64,

    /// Maximum number of identities reconciled concurrently. Actions within
    /// one identity always run serially.
    pub max_concurrent_identities: usize,

    /// Action execution policy.
    pub action: ActionConfig,
}

/// Retry and timeout policy for individual actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Deadline per collaborator call in milliseconds. A call past the
    /// deadline is treated as a transient failure.
    pub timeout_ms: u64,

    /// Maximum attempts per action before a transient failure is reported
    /// as permanent.
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds. Attempt `n` waits
    /// `base * 2^(n-1)` plus jitter, capped.
    pub backoff_base_ms: u64,

    /// Upper bound on the backoff delay in milliseconds.
    pub backoff_cap_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            max_concurrent_identities: 8,
            action: ActionConfig::default(),
        }
    }
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_attempts: 4,
            backoff_base_ms: 100,
            backoff_cap_ms: 5_000,
        }
    }
}

impl ReconcilerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> ReconcilerConfigBuilder {
        ReconcilerConfigBuilder::default()
    }

    /// Build a configuration from `STEVEDORE_*` environment variables,
    /// starting from defaults.
    ///
    /// Recognized variables:
    /// - `STEVEDORE_TICK_INTERVAL_MS`
    /// - `STEVEDORE_MAX_CONCURRENT_IDENTITIES`
    /// - `STEVEDORE_ACTION_TIMEOUT_MS`
    /// - `STEVEDORE_ACTION_MAX_ATTEMPTS`
    /// - `STEVEDORE_BACKOFF_BASE_MS`
    /// - `STEVEDORE_BACKOFF_CAP_MS`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("STEVEDORE_TICK_INTERVAL_MS") {
            config.tick_interval_ms = v;
        }
        if let Some(v) = env_parse("STEVEDORE_MAX_CONCURRENT_IDENTITIES") {
            config.max_concurrent_identities = v;
        }
        if let Some(v) = env_parse("STEVEDORE_ACTION_TIMEOUT_MS") {
            config.action.timeout_ms = v;
        }
        if let Some(v) = env_parse("STEVEDORE_ACTION_MAX_ATTEMPTS") {
            config.action.max_attempts = v;
        }
        if let Some(v) = env_parse("STEVEDORE_BACKOFF_BASE_MS") {
            config.action.backoff_base_ms = v;
        }
        if let Some(v) = env_parse("STEVEDORE_BACKOFF_CAP_MS") {
            config.action.backoff_cap_ms = v;
        }
        config
    }

    /// Get the tick interval as a Duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be > 0".to_string());
        }
        if self.max_concurrent_identities == 0 {
            return Err("max_concurrent_identities must be > 0".to_string());
        }
        self.action.validate()
    }
}

impl ActionConfig {
    /// Get the per-call deadline as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate the action policy.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be > 0".to_string());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be > 0".to_string());
        }
        if self.backoff_base_ms == 0 {
            return Err("backoff_base_ms must be > 0".to_string());
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(format!(
                "backoff_cap_ms ({}) must be >= backoff_base_ms ({})",
                self.backoff_cap_ms, self.backoff_base_ms
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Builder for [`ReconcilerConfig`].
#[derive(Debug, Default)]
pub struct ReconcilerConfigBuilder {
    config: ReconcilerConfig,
}

impl ReconcilerConfigBuilder {
    /// Set the tick interval in milliseconds.
    #[must_use]
    pub fn tick_interval_ms(mut self, ms: u64) -> Self {
        self.config.tick_interval_ms = ms;
        self
    }

    /// Set the maximum number of concurrently reconciled identities.
    #[must_use]
    pub fn max_concurrent_identities(mut self, n: usize) -> Self {
        self.config.max_concurrent_identities = n;
        self
    }

    /// Set the per-call deadline in milliseconds.
    #[must_use]
    pub fn action_timeout_ms(mut self, ms: u64) -> Self {
        self.config.action.timeout_ms = ms;
        self
    }

    /// Set the maximum attempts per action.
    #[must_use]
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.action.max_attempts = n;
        self
    }

    /// Set the backoff base and cap in milliseconds.
    #[must_use]
    pub fn backoff_ms(mut self, base: u64, cap: u64) -> Self {
        self.config.action.backoff_base_ms = base;
        self.config.action.backoff_cap_ms = cap;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<ReconcilerConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ReconcilerConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_roundtrip() {
        let config = ReconcilerConfig::builder()
            .tick_interval_ms(100)
            .max_concurrent_identities(4)
            .action_timeout_ms(250)
            .max_attempts(3)
            .backoff_ms(10, 50)
            .build()
            .unwrap();

        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.action.timeout(), Duration::from_millis(250));
        assert_eq!(config.action.max_attempts, 3);
    }

    #[test]
    fn invalid_backoff_is_rejected() {
        let result = ReconcilerConfig::builder().backoff_ms(100, 50).build();
        assert!(result.is_err());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let result = ReconcilerConfig::builder().max_attempts(0).build();
        assert!(result.is_err());
    }
}
