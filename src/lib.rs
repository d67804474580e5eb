//! Fetches URL-addressed resources through a cache while guaranteeing at most
//! one network fetch per key at any moment.
//!
//! A [`Coordinator`] answers each request from its [`CacheStore`] when it
//! can. Otherwise the first caller for a key starts a fetch through the
//! [`Fetcher`], and every caller that arrives while it is in flight joins it
//! instead of starting another. Once the fetch settles the content is written
//! to the cache, optionally adapted to a target size by a [`PostProcessor`],
//! and every participant is notified.
//!
//! Behaviour is tuned through [`CoordinatorConfig`], which can also be loaded
//! from `FETCH_ONCE_*` environment variables with [`FetchOnceEnvCfg`].

mod artifact;
mod config;
mod coordinator;
mod error;
mod fetcher;
mod key;
mod observability;
mod post_process;
mod store;
#[doc(hidden)]
pub mod test_support;

pub use artifact::{AdaptTarget, Artifact, ArtifactInstance, ArtifactState, Dimensions, FitMode};
pub use config::{
    CoordinatorConfig, DEFAULT_MAX_CONCURRENT_FETCHES, DEFAULT_POLL_INTERVAL, FetchOnceEnvCfg,
    JoinStrategy,
};
pub use coordinator::{Completion, Coordinator, CoordinatorBuilder, FetchHandle, Request};
pub use error::{
    AdaptError, AdaptResult, ConfigError, ConfigResult, DecodeError, DecodeResult, FetcherError,
    FetcherResult, RequestError, Result, StoreError, StoreResult,
};
pub use fetcher::{FetchedResource, Fetcher, Priority, UnknownPriority};
pub use key::RequestKey;
pub use post_process::PostProcessor;
pub use store::{CacheStore, Decoder, MemoryCacheStore, RawDecoder};
