//! Startup configuration for the relay.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("session timeout must be non-zero")]
    ZeroSessionTimeout,
    #[error("sweep interval must be non-zero")]
    ZeroSweepInterval,
    #[error("sweep interval {sweep:?} exceeds session timeout {timeout:?}")]
    SweepSlowerThanTimeout { sweep: Duration, timeout: Duration },
    #[error("max sessions must be non-zero")]
    ZeroMaxSessions,
    #[error("stats interval must be non-zero")]
    ZeroStatsInterval,
}

/// Tunables owned outside the routing core: the watchdog threshold and
/// cadence, session capacity, and how often the stats line is emitted.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Silence longer than this reaps the session.
    pub session_timeout: Duration,
    /// Cadence of the liveness sweep.
    pub sweep_interval: Duration,
    /// Maximum concurrent sessions; further connects are rejected.
    pub max_sessions: usize,
    /// Cadence of the periodic stats log line.
    pub stats_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            max_sessions: 1024,
            stats_interval: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    /// Rejects configurations the relay cannot run with. Called during
    /// initialization; any error here aborts startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_timeout.is_zero() {
            return Err(ConfigError::ZeroSessionTimeout);
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if self.sweep_interval > self.session_timeout {
            return Err(ConfigError::SweepSlowerThanTimeout {
                sweep: self.sweep_interval,
                timeout: self.session_timeout,
            });
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::ZeroMaxSessions);
        }
        if self.stats_interval.is_zero() {
            return Err(ConfigError::ZeroStatsInterval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(RelayConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let config = RelayConfig {
            session_timeout: Duration::ZERO,
            ..RelayConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroSessionTimeout));

        let config = RelayConfig {
            sweep_interval: Duration::ZERO,
            ..RelayConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroSweepInterval));
    }

    #[test]
    fn sweep_slower_than_timeout_is_rejected() {
        let config = RelayConfig {
            session_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(10),
            ..RelayConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SweepSlowerThanTimeout { .. })
        ));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = RelayConfig {
            max_sessions: 0,
            ..RelayConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroMaxSessions));
    }
}
