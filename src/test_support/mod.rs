//! Helpers re-exported for unit, integration and documentation tests.
//!
//! The collaborators here are deterministic stand-ins for a network fetcher,
//! a cache and a post-processor. Each records what the coordinator asked of
//! it so tests can assert on call counts and storage paths. Log capture
//! needs the `test-support` feature.

mod fetcher;
mod fixtures;
#[cfg(any(test, feature = "test-support"))]
mod logging;
mod recording;

pub use fetcher::{Scripted, ScriptedFetcher};
pub use fixtures::{asset_key, test_runtime};
#[cfg(any(test, feature = "test-support"))]
pub use logging::{capture_debug_logs, capture_warn_logs};
pub use recording::{RecordingPostProcessor, RecordingStore, StoreEvent};
