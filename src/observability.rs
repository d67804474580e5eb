//! Shared tracing configuration for observability instrumentation.
//!
//! Centralises the log targets used by the crate so subscribers can filter
//! coordinator events without pulling in unrelated application logs.

/// Target used by coordinator spans and logs.
pub(crate) const LOG_TARGET: &str = "fetch_once::coordinator";

/// Target used by the bundled cache store.
pub(crate) const STORE_LOG_TARGET: &str = "fetch_once::store";
