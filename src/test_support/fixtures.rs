//! Runtime and key fixtures shared by unit and integration tests.

use color_eyre::eyre::{Result, eyre};
use tokio::runtime::{Builder, Runtime};

use crate::key::RequestKey;

/// Builds a current-thread Tokio runtime with timers enabled.
///
/// # Errors
///
/// Returns an error when the runtime cannot be created.
///
/// # Examples
/// ```
/// use fetch_once::test_support::test_runtime;
///
/// # fn demo() -> color_eyre::eyre::Result<()> {
/// let runtime = test_runtime()?;
/// assert_eq!(runtime.block_on(async { 2 + 2 }), 4);
/// # Ok(())
/// # }
/// # demo().unwrap();
/// ```
pub fn test_runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| eyre!(err))
}

/// Parses `https://assets.test/<path>` into a key.
///
/// # Errors
///
/// Returns an error when `path` does not form a valid URL.
pub fn asset_key(path: &str) -> Result<RequestKey> {
    RequestKey::parse(&format!("https://assets.test/{path}")).map_err(|err| eyre!(err))
}
