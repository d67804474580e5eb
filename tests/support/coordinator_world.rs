//! Shared world for coordinator scenarios.
//!
//! The world owns a current-thread runtime. Requests are issued synchronously
//! from steps and the runtime is only driven while outcomes are collected, so
//! held fetches stay observable between steps.

use std::sync::Arc;

use bytes::Bytes;
use color_eyre::eyre::{Result, ensure, eyre};
use fetch_once::test_support::{
    RecordingPostProcessor, RecordingStore, ScriptedFetcher, asset_key, test_runtime,
};
use fetch_once::{
    AdaptTarget, ArtifactInstance, ArtifactState, Coordinator, CoordinatorConfig, FetchHandle,
    Request, RequestKey,
};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

type Results = mpsc::UnboundedReceiver<fetch_once::Result<ArtifactInstance>>;

/// Terminal outcome of one request and the placeholders it saw first.
pub struct Observed {
    pub placeholders: usize,
    pub outcome: fetch_once::Result<ArtifactInstance>,
}

pub struct CoordinatorWorld {
    pub coordinator: Option<Coordinator>,
    pub fetcher: ScriptedFetcher,
    pub store: RecordingStore,
    pub key: RequestKey,
    pub handle: Option<FetchHandle>,
    pub observed: Vec<Observed>,
    pub logs: Vec<String>,
    pending: Vec<Results>,
    runtime: Runtime,
}

impl CoordinatorWorld {
    pub fn new() -> Result<Self> {
        Ok(Self {
            coordinator: None,
            fetcher: ScriptedFetcher::succeeding(payload()),
            store: RecordingStore::new(),
            key: asset_key("hero.png")?,
            handle: None,
            observed: Vec::new(),
            logs: Vec::new(),
            pending: Vec::new(),
            runtime: test_runtime()?,
        })
    }

    /// Replaces the coordinator with one built around `fetcher`.
    pub fn install(
        &mut self,
        fetcher: ScriptedFetcher,
        config: CoordinatorConfig,
        post_processor: Option<RecordingPostProcessor>,
    ) -> Result<()> {
        let cache = Arc::new(self.store.clone());
        let mut builder = Coordinator::builder(Arc::new(fetcher.clone()), cache)
            .config(config)
            .runtime(self.runtime.handle().clone());
        if let Some(adapter) = post_processor {
            builder = builder.post_processor(Arc::new(adapter));
        }
        self.coordinator = Some(builder.build()?);
        self.fetcher = fetcher;
        Ok(())
    }

    pub fn coordinator(&self) -> Result<&Coordinator> {
        self.coordinator
            .as_ref()
            .ok_or_else(|| eyre!("coordinator has not been installed"))
    }

    /// Issues `count` requests for the world's key.
    pub fn request(&mut self, count: usize, adapt: Option<AdaptTarget>) -> Result<()> {
        for _ in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut request = Request::new(self.key.clone());
            if let Some(target) = adapt {
                request = request.adapt_to(target);
            }
            let handle = self
                .coordinator()?
                .request(request, move |result| drop(tx.send(result)));
            if handle.is_some() {
                self.handle = handle;
            }
            self.pending.push(rx);
        }
        Ok(())
    }

    /// Drives the runtime until every pending request has settled.
    pub fn settle(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let observed = self.runtime.block_on(async move {
            let mut observed = Vec::with_capacity(pending.len());
            for mut results in pending {
                let mut placeholders = 0;
                loop {
                    let Some(result) = results.recv().await else {
                        return Err(eyre!("completion dropped without a terminal result"));
                    };
                    match result {
                        Ok(instance) if instance.is_placeholder() => placeholders += 1,
                        outcome => {
                            observed.push(Observed {
                                placeholders,
                                outcome,
                            });
                            break;
                        }
                    }
                }
            }
            Ok(observed)
        })?;
        self.observed.extend(observed);
        Ok(())
    }

    /// Checks the most recent outcome is freshly fetched content.
    pub fn ensure_latest_fresh(&self) -> Result<()> {
        let latest = self
            .observed
            .last()
            .ok_or_else(|| eyre!("no request has settled"))?;
        match &latest.outcome {
            Ok(instance) => {
                ensure!(
                    instance.state == ArtifactState::Fresh,
                    "expected fresh content, got {:?}",
                    instance.state
                );
                ensure!(
                    instance.bytes.as_ref() == Some(&payload()),
                    "fresh content should carry the fetched bytes"
                );
                Ok(())
            }
            Err(err) => Err(eyre!("expected fresh content, got error: {err}")),
        }
    }
}

/// Bytes served by every successful scripted fetch.
pub fn payload() -> Bytes {
    Bytes::from_static(b"\x89PNG hero")
}

/// Turns a `Result<T>` fixture into `T`, panicking with a contextual message on
/// failure so individual scenario functions stay terse.
pub fn expect_fixture<T>(fixture: Result<T>, label: &str) -> T {
    fixture.unwrap_or_else(|err| panic!("{label} fixture failed: {err:?}"))
}
