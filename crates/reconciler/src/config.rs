//! Configuration for the reconciler.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How often a ready resource re-checks that its backend record still exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadyProbePolicy {
    /// Trust the recorded id; never probe ready resources.
    #[default]
    Never,
    /// Probe on every pass.
    EveryPass,
    /// Probe when the last verification is older than this window.
    Every(#[serde(with = "duration_secs")] Duration),
}

impl ReadyProbePolicy {
    /// Parse the `USEROP_READY_PROBE` form: `never`, `every-pass`, or seconds.
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "never" => Some(Self::Never),
            "every-pass" | "always" => Some(Self::EveryPass),
            secs => secs
                .parse::<u64>()
                .ok()
                .map(|s| Self::Every(Duration::from_secs(s))),
        }
    }
}

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Delay before re-checking a resource that needed no change.
    #[serde(with = "duration_secs", default = "default_idle_interval")]
    pub idle_interval: Duration,

    /// Upper bound for every backend and status call.
    #[serde(with = "duration_secs", default = "default_call_timeout")]
    pub call_timeout: Duration,

    /// Re-probe cadence for ready resources.
    #[serde(default)]
    pub ready_probe: ReadyProbePolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            idle_interval: default_idle_interval(),
            call_timeout: default_call_timeout(),
            ready_probe: ReadyProbePolicy::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Set the idle interval.
    #[must_use]
    pub const fn idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Set the call timeout.
    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the ready re-probe policy.
    #[must_use]
    pub const fn ready_probe(mut self, policy: ReadyProbePolicy) -> Self {
        self.ready_probe = policy;
        self
    }

    /// Reject values that would stall or spin the loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero durations.
    pub fn validate(&self) -> Result<()> {
        if self.idle_interval.is_zero() {
            return Err(Error::invalid_config("idle_interval must be positive"));
        }
        if self.call_timeout.is_zero() {
            return Err(Error::invalid_config("call_timeout must be positive"));
        }
        if matches!(self.ready_probe, ReadyProbePolicy::Every(d) if d.is_zero()) {
            return Err(Error::invalid_config(
                "ready_probe window must be positive; use every-pass instead",
            ));
        }
        Ok(())
    }

    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(secs) = lookup("USEROP_IDLE_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            config.idle_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = lookup("USEROP_CALL_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.call_timeout = Duration::from_secs(secs);
        }

        if let Some(policy) = lookup("USEROP_READY_PROBE").and_then(|v| ReadyProbePolicy::parse(&v))
        {
            config.ready_probe = policy;
        }

        config
    }

    /// Load configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the file cannot be read, parsed, or
    /// fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("failed to read {}: {e}", path.display()))
        })?;

        // Try JSON first, then TOML
        let config: Self = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))?
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))?
        };

        config.validate()?;
        Ok(config)
    }
}

const fn default_idle_interval() -> Duration {
    Duration::from_secs(15)
}

const fn default_call_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Serialization helper for Duration as seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a duration as whole seconds.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    /// Deserialize whole seconds into a duration.
    ///
    /// # Errors
    ///
    /// Propagates deserializer errors.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.idle_interval, Duration::from_secs(15));
        assert_eq!(config.ready_probe, ReadyProbePolicy::Never);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("USEROP_IDLE_INTERVAL_SECS", "30"),
            ("USEROP_CALL_TIMEOUT_SECS", "2"),
            ("USEROP_READY_PROBE", "300"),
        ]
        .into_iter()
        .collect();

        let config = ReconcilerConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.idle_interval, Duration::from_secs(30));
        assert_eq!(config.call_timeout, Duration::from_secs(2));
        assert_eq!(
            config.ready_probe,
            ReadyProbePolicy::Every(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = ReconcilerConfig::from_lookup(|k| match k {
            "USEROP_IDLE_INTERVAL_SECS" => Some("soon".to_string()),
            "USEROP_READY_PROBE" => Some("every-pass".to_string()),
            _ => None,
        });
        assert_eq!(config.idle_interval, Duration::from_secs(15));
        assert_eq!(config.ready_probe, ReadyProbePolicy::EveryPass);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "idle_interval = 60\ncall_timeout = 5\nready_probe = {{ every = 600 }}"
        )
        .unwrap();

        let config = ReconcilerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.idle_interval, Duration::from_secs(60));
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(
            config.ready_probe,
            ReadyProbePolicy::Every(Duration::from_secs(600))
        );
    }

    #[test]
    fn test_from_json_file_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"ready_probe": "every-pass"}}"#).unwrap();

        let config = ReconcilerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.idle_interval, Duration::from_secs(15));
        assert_eq!(config.ready_probe, ReadyProbePolicy::EveryPass);
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "call_timeout = 0").unwrap();

        let result = ReconcilerConfig::from_file(file.path());
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }
}
