//! Coordinator configuration and its environment-driven loader.
//!
//! [`CoordinatorConfig`] holds the tunables the coordinator reads at
//! construction. [`FetchOnceEnvCfg`] captures the same settings from
//! `FETCH_ONCE_*` environment variables and validates them into a
//! [`CoordinatorConfig`].

use std::ffi::OsString;
use std::num::NonZeroUsize;
use std::time::Duration;

use color_eyre::eyre::{Context, eyre};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::fetcher::Priority;

/// Delay before a joining request is re-dispatched under
/// [`JoinStrategy::Poll`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Number of fetches allowed to run at once unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: NonZeroUsize = match NonZeroUsize::new(4) {
    Some(value) => value,
    None => NonZeroUsize::MIN,
};

/// How a request that finds a fetch already in flight converges on its
/// result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Wait on the in-flight fetch and receive its outcome as soon as it is
    /// stored.
    #[default]
    Notify,
    /// Re-dispatch the whole request after `interval` until it hits the
    /// cache or starts its own fetch.
    Poll {
        /// Delay between attempts. Must be non-zero.
        interval: Duration,
    },
}

impl JoinStrategy {
    /// Polling with [`DEFAULT_POLL_INTERVAL`].
    #[must_use]
    pub const fn poll() -> Self {
        Self::Poll {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Tunables read by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Join behaviour for requests that find a fetch in flight.
    pub join_strategy: JoinStrategy,
    /// Upper bound on fetches running at once.
    pub max_concurrent_fetches: NonZeroUsize,
    /// Priority hint passed to the fetcher.
    pub fetch_priority: Priority,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            join_strategy: JoinStrategy::default(),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            fetch_priority: Priority::UserInitiated,
        }
    }
}

impl CoordinatorConfig {
    /// Checks invariants that the type system does not enforce.
    ///
    /// # Errors
    ///
    /// Returns an error when a polling join strategy has a zero interval.
    pub fn validate(&self) -> ConfigResult<()> {
        if let JoinStrategy::Poll { interval } = self.join_strategy {
            if interval.is_zero() {
                return Err(ConfigError::from(eyre!(
                    "poll interval must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

/// Captures coordinator settings supplied via environment variables.
///
/// # Examples
/// ```
/// use fetch_once::FetchOnceEnvCfg;
///
/// let cfg = FetchOnceEnvCfg::default();
/// assert!(cfg.join_strategy.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, OrthoConfig, Default)]
#[ortho_config(prefix = "FETCH_ONCE")]
pub struct FetchOnceEnvCfg {
    /// Join behaviour: `notify` or `poll`.
    pub join_strategy: Option<String>,
    /// Poll interval in milliseconds. Implies `poll` when no strategy is set.
    pub poll_interval_ms: Option<u64>,
    /// Upper bound on fetches running at once.
    pub max_concurrent_fetches: Option<usize>,
    /// Priority hint: `background`, `normal` or `user-initiated`.
    pub fetch_priority: Option<String>,
}

impl FetchOnceEnvCfg {
    /// Loads configuration from environment variables without parsing CLI
    /// arguments.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable cannot be parsed into its field type.
    pub fn load() -> ConfigResult<Self> {
        let args = [OsString::from("fetch-once")];
        Self::load_from_iter(args).map_err(|err| ConfigError::from(eyre!(err)))
    }

    /// Converts the captured settings into a validated [`CoordinatorConfig`].
    ///
    /// Unset fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown strategy or priority name, a zero poll
    /// interval, or a zero concurrency limit.
    pub fn to_config(&self) -> ConfigResult<CoordinatorConfig> {
        let mut config = CoordinatorConfig::default();

        self.apply_join_strategy(&mut config)?;
        self.apply_concurrency(&mut config)?;
        self.apply_priority(&mut config)?;

        config.validate()?;
        Ok(config)
    }

    fn apply_join_strategy(&self, config: &mut CoordinatorConfig) -> ConfigResult<()> {
        let interval = self.poll_interval_ms.map(Duration::from_millis);
        let strategy = match self.join_strategy.as_deref().map(str::trim) {
            None if interval.is_none() => return Ok(()),
            Some(name) if name.eq_ignore_ascii_case("notify") => {
                if interval.is_some() {
                    return Err(ConfigError::from(eyre!(
                        "FETCH_ONCE_POLL_INTERVAL_MS only applies to the poll join strategy"
                    )));
                }
                JoinStrategy::Notify
            }
            None => JoinStrategy::Poll {
                interval: interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            },
            Some(name) if name.eq_ignore_ascii_case("poll") => JoinStrategy::Poll {
                interval: interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            },
            Some(other) => {
                return Err(ConfigError::from(eyre!(
                    "unknown join strategy '{other}', expected notify or poll"
                )));
            }
        };
        config.join_strategy = strategy;
        Ok(())
    }

    fn apply_concurrency(&self, config: &mut CoordinatorConfig) -> ConfigResult<()> {
        if let Some(limit) = self.max_concurrent_fetches {
            config.max_concurrent_fetches = NonZeroUsize::new(limit).ok_or_else(|| {
                ConfigError::from(eyre!("max concurrent fetches must be at least 1"))
            })?;
        }
        Ok(())
    }

    fn apply_priority(&self, config: &mut CoordinatorConfig) -> ConfigResult<()> {
        if let Some(ref raw) = self.fetch_priority {
            config.fetch_priority = raw
                .parse::<Priority>()
                .context("FETCH_ONCE_FETCH_PRIORITY invalid")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_config_uses_notification_joins() {
        let config = FetchOnceEnvCfg::default()
            .to_config()
            .expect("defaults are valid");
        assert_eq!(config, CoordinatorConfig::default());
        assert_eq!(config.join_strategy, JoinStrategy::Notify);
        assert_eq!(config.max_concurrent_fetches.get(), 4);
        assert_eq!(config.fetch_priority, Priority::UserInitiated);
    }

    #[rstest]
    #[case::explicit_poll(Some("poll"), None, JoinStrategy::poll())]
    #[case::poll_with_interval(
        Some("Poll"),
        Some(250),
        JoinStrategy::Poll { interval: Duration::from_millis(250) }
    )]
    #[case::interval_implies_poll(
        None,
        Some(50),
        JoinStrategy::Poll { interval: Duration::from_millis(50) }
    )]
    #[case::explicit_notify(Some(" notify "), None, JoinStrategy::Notify)]
    fn join_strategy_is_derived_from_fields(
        #[case] strategy: Option<&str>,
        #[case] interval_ms: Option<u64>,
        #[case] expected: JoinStrategy,
    ) {
        let cfg = FetchOnceEnvCfg {
            join_strategy: strategy.map(str::to_owned),
            poll_interval_ms: interval_ms,
            ..FetchOnceEnvCfg::default()
        };
        let config = cfg.to_config().expect("valid configuration");
        assert_eq!(config.join_strategy, expected);
    }

    #[rstest]
    #[case::unknown_strategy(Some("spin"), None, None, None, "unknown join strategy")]
    #[case::zero_interval(Some("poll"), Some(0), None, None, "greater than zero")]
    #[case::interval_with_notify(Some("notify"), Some(10), None, None, "only applies")]
    #[case::zero_concurrency(None, None, Some(0), None, "at least 1")]
    #[case::unknown_priority(None, None, None, Some("urgent"), "FETCH_ONCE_FETCH_PRIORITY")]
    fn invalid_settings_are_rejected(
        #[case] strategy: Option<&str>,
        #[case] interval_ms: Option<u64>,
        #[case] concurrency: Option<usize>,
        #[case] priority: Option<&str>,
        #[case] expected_fragment: &str,
    ) {
        let cfg = FetchOnceEnvCfg {
            join_strategy: strategy.map(str::to_owned),
            poll_interval_ms: interval_ms,
            max_concurrent_fetches: concurrency,
            fetch_priority: priority.map(str::to_owned),
        };
        let err = cfg.to_config().expect_err("configuration must be rejected");
        assert!(
            err.to_string().contains(expected_fragment),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn zero_poll_interval_fails_validation() {
        let config = CoordinatorConfig {
            join_strategy: JoinStrategy::Poll {
                interval: Duration::ZERO,
            },
            ..CoordinatorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
