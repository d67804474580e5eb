//! In-flight fetch table.
//!
//! Every key maps to at most one [`InFlight`] entry. Claiming a key is a
//! single test-and-set on the map's entry API, so two racing requests can
//! never both become the owner of a fetch. Shard guards are only held for
//! the duration of the map operation itself.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::artifact::Artifact;
use crate::error::RequestError;
use crate::key::RequestKey;

/// Content produced by a successful fetch, shared with every joiner.
#[derive(Debug, Clone)]
pub(crate) struct Settled {
    pub(crate) artifact: Artifact,
    pub(crate) bytes: Bytes,
}

/// Terminal outcome of one fetch.
pub(crate) type Outcome = Result<Settled, RequestError>;

/// One outstanding fetch.
///
/// The outcome slot is a one-shot, multi-waiter notification: it is written
/// once when the fetch settles and read by every joiner. Dropping the entry
/// without publishing closes the slot, which joiners observe as
/// cancellation.
#[derive(Debug)]
pub(crate) struct InFlight {
    key: RequestKey,
    outcome: watch::Sender<Option<Outcome>>,
    abort: Mutex<Option<AbortHandle>>,
}

impl InFlight {
    fn new(key: RequestKey) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            key,
            outcome,
            abort: Mutex::new(None),
        }
    }

    pub(crate) const fn key(&self) -> &RequestKey {
        &self.key
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<Outcome>> {
        self.outcome.subscribe()
    }

    pub(crate) fn publish(&self, outcome: Outcome) {
        self.outcome.send_replace(Some(outcome));
    }

    /// Binds the task running this fetch so it can be aborted.
    pub(crate) fn attach(&self, handle: AbortHandle) {
        *self
            .abort
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn abort(&self) {
        let handle = self
            .abort
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Result of claiming a key.
#[derive(Debug)]
pub(crate) enum Claim {
    /// No fetch was in flight; the caller must start one for this entry.
    Owner(Arc<InFlight>),
    /// A fetch is already in flight.
    Joined(Arc<InFlight>),
}

#[derive(Debug, Default)]
pub(crate) struct InFlightTable {
    entries: DashMap<RequestKey, Arc<InFlight>>,
}

impl InFlightTable {
    /// Joins the entry for `key`, or inserts one and makes the caller its
    /// owner.
    pub(crate) fn claim(&self, key: &RequestKey) -> Claim {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => Claim::Joined(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                let flight = Arc::new(InFlight::new(key.clone()));
                vacant.insert(Arc::clone(&flight));
                Claim::Owner(flight)
            }
        }
    }

    /// Removes `flight` from the table if it is still the entry for its key.
    ///
    /// Returns `false` when the entry was already removed or replaced.
    pub(crate) fn release(&self, flight: &Arc<InFlight>) -> bool {
        self.entries
            .remove_if(flight.key(), |_, current| Arc::ptr_eq(current, flight))
            .is_some()
    }

    pub(crate) fn contains(&self, key: &RequestKey) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aborts every in-flight fetch and returns how many were signalled.
    ///
    /// Entries are removed by the aborted tasks themselves.
    pub(crate) fn abort_all(&self) -> usize {
        let flights: Vec<Arc<InFlight>> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for flight in &flights {
            flight.abort();
        }
        flights.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::thread;

    #[fixture]
    fn key() -> RequestKey {
        RequestKey::parse("https://x/img.png").expect("valid key")
    }

    #[rstest]
    fn first_claim_owns_and_later_claims_join(key: RequestKey) {
        let table = InFlightTable::default();

        let Claim::Owner(owner) = table.claim(&key) else {
            panic!("first claim must own the fetch");
        };
        let Claim::Joined(joined) = table.claim(&key) else {
            panic!("second claim must join");
        };

        assert!(Arc::ptr_eq(&owner, &joined));
        assert_eq!(table.len(), 1);
    }

    #[rstest]
    fn release_frees_the_key_for_a_new_owner(key: RequestKey) {
        let table = InFlightTable::default();
        let Claim::Owner(first) = table.claim(&key) else {
            panic!("first claim must own the fetch");
        };

        assert!(table.release(&first));
        assert!(table.is_empty());
        assert!(matches!(table.claim(&key), Claim::Owner(_)));
    }

    #[rstest]
    fn stale_release_leaves_newer_entry_in_place(key: RequestKey) {
        let table = InFlightTable::default();
        let Claim::Owner(stale) = table.claim(&key) else {
            panic!("first claim must own the fetch");
        };
        assert!(table.release(&stale));
        let Claim::Owner(current) = table.claim(&key) else {
            panic!("released key must be claimable");
        };

        assert!(!table.release(&stale), "stale entry must not evict");
        assert!(table.contains(&key));
        assert!(table.release(&current));
    }

    #[rstest]
    fn concurrent_claims_produce_exactly_one_owner(key: RequestKey) {
        let table = Arc::new(InFlightTable::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = Arc::clone(&table);
                let contended = key.clone();
                thread::spawn(move || matches!(shared.claim(&contended), Claim::Owner(_)))
            })
            .collect();

        let owners = handles
            .into_iter()
            .map(|handle| handle.join().expect("claim thread should join cleanly"))
            .filter(|owned| *owned)
            .count();

        assert_eq!(owners, 1);
        assert_eq!(table.len(), 1);
    }

    #[rstest]
    fn dropping_an_unpublished_entry_closes_the_outcome_slot(key: RequestKey) {
        let table = InFlightTable::default();
        let Claim::Owner(flight) = table.claim(&key) else {
            panic!("first claim must own the fetch");
        };
        let receiver = flight.subscribe();

        table.release(&flight);
        drop(flight);

        assert!(receiver.has_changed().is_err(), "slot should be closed");
    }

    #[rstest]
    fn published_outcome_is_visible_to_late_subscribers(key: RequestKey) {
        let flight = InFlight::new(key.clone());
        flight.publish(Err(RequestError::Decode { key }));

        let receiver = flight.subscribe();
        assert!(matches!(
            &*receiver.borrow(),
            Some(Err(RequestError::Decode { .. }))
        ));
    }
}
