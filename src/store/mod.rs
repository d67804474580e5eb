//! Cache storage capability and the bundled in-memory store.
//!
//! The coordinator requires read-your-writes from a store: once a write
//! future resolves successfully, a lookup for the same key returns the
//! written content. Writes to different keys must not interfere. Eviction
//! and persistence formats are left to implementations.

mod memory;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::artifact::Artifact;
use crate::error::{DecodeResult, StoreResult};
use crate::key::RequestKey;

pub use memory::MemoryCacheStore;

/// Key to artifact storage consulted before any fetch is started.
#[cfg_attr(test, mockall::automock)]
pub trait CacheStore: Send + Sync {
    /// Returns the content cached for `key`, if any.
    ///
    /// Called synchronously on the request path, so it must not block on
    /// I/O for long.
    fn lookup(&self, key: &RequestKey) -> Option<Artifact>;

    /// Stores decoded content under `key`.
    fn store_artifact(
        &self,
        artifact: Artifact,
        key: &RequestKey,
    ) -> BoxFuture<'static, StoreResult<()>>;

    /// Stores raw fetched bytes under `key`.
    fn store_bytes(&self, bytes: Bytes, key: &RequestKey) -> BoxFuture<'static, StoreResult<()>>;
}

/// Turns stored raw bytes back into an artifact.
pub trait Decoder: Send + Sync {
    /// Decodes `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error when the bytes do not hold usable content.
    fn decode(&self, bytes: &Bytes) -> DecodeResult<Artifact>;
}

/// Keeps raw bytes as a single-frame artifact of unknown size.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn decode(&self, bytes: &Bytes) -> DecodeResult<Artifact> {
        Ok(Artifact::new(bytes.clone()))
    }
}
