// In-flight request registry
//
// Tracks executing requests so they can be cancelled en masse (logout,
// teardown). Registration hands back a guard; dropping the guard removes
// the entry, so completion, error, cancellation, an early return or the
// caller dropping the future all deregister the same way.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, trace};
use uuid::Uuid;

struct Entry {
    label: String,
    started: Instant,
    cancel: CancellationToken,
}

/// Snapshot of one in-flight request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightRequest {
    pub id: Uuid,
    pub label: String,
    pub elapsed: Duration,
}

/// Set of currently executing requests.
#[derive(Default)]
pub struct InFlightRegistry {
    entries: DashMap<Uuid, Entry>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new request. When `parent` is given, cancelling it also
    /// cancels this entry (but not the other way round).
    pub fn register(&self, label: String, parent: Option<&CancellationToken>) -> InFlightGuard<'_> {
        let id = Uuid::new_v4();
        let cancel = parent.map_or_else(CancellationToken::new, CancellationToken::child_token);
        trace!(%id, %label, "registering in-flight request");
        self.entries.insert(
            id,
            Entry {
                label,
                started: Instant::now(),
                cancel: cancel.clone(),
            },
        );
        InFlightGuard {
            registry: self,
            id,
            cancel,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<InFlightRequest> {
        self.entries
            .iter()
            .map(|entry| InFlightRequest {
                id: *entry.key(),
                label: entry.label.clone(),
                elapsed: entry.started.elapsed(),
            })
            .collect()
    }

    /// Labels of every request in flight, e.g. `"GET v1/devices"`.
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.label.clone()).collect()
    }

    /// Cancel one request by id. Returns `false` if it already finished.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.entries.get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every request registered at the time of the call.
    ///
    /// Takes a snapshot first; requests registered afterwards are left
    /// alone. Entries are removed by their own guards as the cancelled
    /// calls unwind. Returns the number of requests signalled.
    pub fn cancel_all(&self) -> usize {
        let snapshot: Vec<CancellationToken> = self
            .entries
            .iter()
            .map(|entry| entry.cancel.clone())
            .collect();
        for token in &snapshot {
            token.cancel();
        }
        if !snapshot.is_empty() {
            debug!(count = snapshot.len(), "cancelled in-flight requests");
        }
        snapshot.len()
    }

    fn deregister(&self, id: Uuid) {
        if self.entries.remove(&id).is_some() {
            trace!(%id, "deregistered in-flight request");
        }
    }
}

/// Scope guard for one registered request.
pub struct InFlightGuard<'a> {
    registry: &'a InFlightRegistry,
    id: Uuid,
    cancel: CancellationToken,
}

impl InFlightGuard<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once this request is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
