//! Cancellation handle for a started fetch.

use tokio::task::AbortHandle;

use crate::key::RequestKey;

/// Handle to the fetch started by a request.
///
/// Only the request that starts a fetch receives a handle; cache hits and
/// joins return `None`. Dropping the handle leaves the fetch running.
#[derive(Debug, Clone)]
pub struct FetchHandle {
    key: RequestKey,
    abort: AbortHandle,
}

impl FetchHandle {
    pub(super) const fn new(key: RequestKey, abort: AbortHandle) -> Self {
        Self { key, abort }
    }

    /// Key being fetched.
    #[must_use]
    pub const fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Aborts the fetch.
    ///
    /// The fetch is shared, so the originating caller and every caller that
    /// joined it observe
    /// [`RequestError::Cancelled`](crate::RequestError::Cancelled). Nothing
    /// is stored. Has no effect once the fetch has settled.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Returns `true` once the fetch task has finished or been aborted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}
