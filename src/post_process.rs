//! Size adaptation capability used when a request asks for a fitted variant.

use futures::future::BoxFuture;

use crate::artifact::{AdaptTarget, Artifact};
use crate::error::AdaptResult;

/// Produces size-adapted variants of decoded content.
///
/// The coordinator only calls [`PostProcessor::adapt`] for single-frame
/// artifacts; animated content is stored as fetched.
#[cfg_attr(test, mockall::automock)]
pub trait PostProcessor: Send + Sync {
    /// Adapts `artifact` to `target`.
    fn adapt(
        &self,
        artifact: Artifact,
        target: AdaptTarget,
    ) -> BoxFuture<'static, AdaptResult<Artifact>>;
}
