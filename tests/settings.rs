//! Validates translating `FETCH_ONCE_*` environment settings into coordinator
//! configuration.

use std::time::Duration;

use fetch_once::{FetchOnceEnvCfg, JoinStrategy, Priority};
use rstest::rstest;
use temp_env::with_vars;

const VARS: [&str; 4] = [
    "FETCH_ONCE_JOIN_STRATEGY",
    "FETCH_ONCE_POLL_INTERVAL_MS",
    "FETCH_ONCE_MAX_CONCURRENT_FETCHES",
    "FETCH_ONCE_FETCH_PRIORITY",
];

fn with_settings<R>(values: [Option<&str>; 4], action: impl FnOnce() -> R) -> R {
    let vars: Vec<(&str, Option<&str>)> = VARS.into_iter().zip(values).collect();
    with_vars(vars, action)
}

/// Loading with every variable set produces the matching configuration.
#[rstest]
fn environment_overrides_every_default() -> color_eyre::Result<()> {
    let config = with_settings(
        [Some("poll"), Some("250"), Some("8"), Some("background")],
        || FetchOnceEnvCfg::load()?.to_config(),
    )?;

    assert_eq!(
        config.join_strategy,
        JoinStrategy::Poll {
            interval: Duration::from_millis(250)
        }
    );
    assert_eq!(config.max_concurrent_fetches.get(), 8);
    assert_eq!(config.fetch_priority, Priority::Background);
    Ok(())
}

#[rstest]
fn empty_environment_keeps_defaults() -> color_eyre::Result<()> {
    let cfg = with_settings([None; 4], FetchOnceEnvCfg::load)?;

    assert!(cfg.join_strategy.is_none());
    assert!(cfg.poll_interval_ms.is_none());
    let config = cfg.to_config()?;
    assert_eq!(config.join_strategy, JoinStrategy::Notify);
    assert_eq!(config.fetch_priority, Priority::UserInitiated);
    Ok(())
}

#[rstest]
#[case::unknown_priority([None, None, None, Some("urgent")], "FETCH_ONCE_FETCH_PRIORITY")]
#[case::zero_limit([None, None, Some("0"), None], "at least 1")]
#[case::interval_with_notify([Some("notify"), Some("20"), None, None], "only applies")]
fn invalid_environment_is_reported(
    #[case] values: [Option<&str>; 4],
    #[case] expected_fragment: &str,
) -> color_eyre::Result<()> {
    let cfg = with_settings(values, FetchOnceEnvCfg::load)?;

    let err = cfg
        .to_config()
        .expect_err("invalid settings must be rejected");
    assert!(
        err.to_string().contains(expected_fragment),
        "unexpected error: {err}"
    );
    Ok(())
}

#[rstest]
fn unparsable_number_fails_to_load() {
    let result = with_settings([None, Some("soon"), None, None], FetchOnceEnvCfg::load);
    assert!(result.is_err(), "non-numeric interval must not load");
}
