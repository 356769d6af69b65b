// ── Credential observers ──
//
// Publish/subscribe registry for "a credential became available" and
// "the credential went away". Each registration hands back a
// `Subscription`; dropping it unsubscribes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use devcloud_api::Credential;
use tracing::trace;

type AvailableFn = Box<dyn Fn(&Credential) + Send + Sync>;
type UnavailableFn = Box<dyn Fn() + Send + Sync>;

struct Observer {
    on_available: AvailableFn,
    on_unavailable: UnavailableFn,
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: DashMap<u64, Arc<Observer>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub(crate) fn subscribe<A, U>(
        self: &Arc<Self>,
        on_available: A,
        on_unavailable: U,
    ) -> Subscription
    where
        A: Fn(&Credential) + Send + Sync + 'static,
        U: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.insert(
            id,
            Arc::new(Observer {
                on_available: Box::new(on_available),
                on_unavailable: Box::new(on_unavailable),
            }),
        );
        trace!(subscription = id, "observer subscribed");
        Subscription {
            registry: Arc::downgrade(self),
            id,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn available(&self, credential: &Credential) {
        for observer in self.snapshot() {
            (observer.on_available)(credential);
        }
    }

    pub(crate) fn unavailable(&self) {
        for observer in self.snapshot() {
            (observer.on_unavailable)();
        }
    }

    // Callbacks run outside the map's shard locks so they may subscribe or
    // unsubscribe themselves.
    fn snapshot(&self) -> Vec<Arc<Observer>> {
        self.observers.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn remove(&self, id: u64) {
        if self.observers.remove(&id).is_some() {
            trace!(subscription = id, "observer unsubscribed");
        }
    }
}

/// Handle for one observer registration.
///
/// The observer stays registered until the handle is dropped or
/// [`unsubscribe`](Self::unsubscribe) is called.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<ObserverRegistry>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
