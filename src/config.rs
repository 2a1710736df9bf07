//! Configuration
//!
//! Tunables read from the environment. Every value has a default, so an
//! empty environment is a valid configuration.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::matchmaking::pairing::DEFAULT_SKILL_WINDOW;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value found.
        value: String,
    },
}

/// Read and parse an environment variable. Unset means `Ok(None)`.
pub(crate) fn env_parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(None),
    }
}

/// Read a period length. Zero is rejected since a timer cannot run at it.
pub(crate) fn env_period(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match env_parse::<u64>(key)? {
        Some(0) => Err(ConfigError::InvalidValue { key, value: "0".into() }),
        period => Ok(period),
    }
}

/// Read a boolean flag ("true"/"1").
pub(crate) fn env_flag(key: &'static str) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// Matchmaking policy.
#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    /// Maximum rating gap for a pairing.
    pub skill_window: u32,
    /// Period of the pairing tick.
    pub tick_interval: Duration,
    /// Maximum ticks run back-to-back in one period while matches keep
    /// being found.
    pub burst_limit: usize,
    /// How long terminal entries are kept before pruning.
    pub retention: Duration,
    /// How often pruning runs.
    pub retention_interval: Duration,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            skill_window: DEFAULT_SKILL_WINDOW,
            tick_interval: Duration::from_secs(5),
            burst_limit: 32,
            retention: Duration::from_secs(600),
            retention_interval: Duration::from_secs(60),
        }
    }
}

impl MatchmakingConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            skill_window: env_parse("MATCH_SKILL_WINDOW")?.unwrap_or(defaults.skill_window),
            tick_interval: env_period("MATCH_TICK_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            burst_limit: env_parse("MATCH_BURST_LIMIT")?.unwrap_or(defaults.burst_limit),
            retention: env_parse("MATCH_RETENTION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
            retention_interval: env_period("MATCH_RETENTION_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention_interval),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matchmaking_config_default() {
        let config = MatchmakingConfig::default();
        assert_eq!(config.skill_window, 200);
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert!(config.burst_limit >= 1);
    }

    #[test]
    fn test_env_parse() {
        // Keys are unique to this test to avoid racing other tests
        std::env::set_var("CHESS_TEST_PARSE_OK", " 250 ");
        std::env::set_var("CHESS_TEST_PARSE_BAD", "lots");

        assert_eq!(env_parse::<u32>("CHESS_TEST_PARSE_OK").unwrap(), Some(250));
        assert_eq!(env_parse::<u32>("CHESS_TEST_PARSE_UNSET").unwrap(), None);
        assert!(matches!(
            env_parse::<u32>("CHESS_TEST_PARSE_BAD"),
            Err(ConfigError::InvalidValue { key: "CHESS_TEST_PARSE_BAD", .. })
        ));
    }

    #[test]
    fn test_env_period_rejects_zero() {
        std::env::set_var("CHESS_TEST_PERIOD_ZERO", "0");
        std::env::set_var("CHESS_TEST_PERIOD_OK", "15");

        assert!(matches!(
            env_period("CHESS_TEST_PERIOD_ZERO"),
            Err(ConfigError::InvalidValue { key: "CHESS_TEST_PERIOD_ZERO", .. })
        ));
        assert_eq!(env_period("CHESS_TEST_PERIOD_OK").unwrap(), Some(15));
        assert_eq!(env_period("CHESS_TEST_PERIOD_UNSET").unwrap(), None);
    }

    #[test]
    fn test_env_flag() {
        std::env::set_var("CHESS_TEST_FLAG_ON", "1");
        std::env::set_var("CHESS_TEST_FLAG_OFF", "no");
        assert!(env_flag("CHESS_TEST_FLAG_ON"));
        assert!(!env_flag("CHESS_TEST_FLAG_OFF"));
        assert!(!env_flag("CHESS_TEST_FLAG_UNSET"));
    }
}
