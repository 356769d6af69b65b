// ── Credential store ──
//
// The one piece of mutable shared state: the current credential. Every
// transition holds the transition lock across the credential write and the
// state update, so `current()` and `state()` never disagree once a
// transition returns. Observer events are queued under that lock and
// delivered outside it, strictly in commit order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use devcloud_api::{Credential, CredentialProvider};
use strum::{Display, IntoStaticStr};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::observer::ObserverRegistry;

/// Whether the session currently holds a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    LoggedOut,
    LoggedIn,
}

impl SessionState {
    fn of(credential: Option<&Credential>) -> Self {
        if credential.is_some() {
            Self::LoggedIn
        } else {
            Self::LoggedOut
        }
    }
}

enum Event {
    Available(Credential),
    Unavailable,
}

/// Observer events committed but not yet delivered.
#[derive(Default)]
struct Outbox {
    events: VecDeque<Event>,
    /// Set while some thread is delivering; others only enqueue.
    delivering: bool,
}

pub(crate) struct CredentialStore {
    current: watch::Sender<Option<Credential>>,
    state: watch::Sender<SessionState>,
    /// Bumped on every transition. A refresh started at epoch `n` may only
    /// install its result if the store is still at `n`.
    epoch: AtomicU64,
    transitions: Mutex<Outbox>,
    observers: Arc<ObserverRegistry>,
}

impl CredentialStore {
    pub(crate) fn new() -> Self {
        let (current, _) = watch::channel(None);
        let (state, _) = watch::channel(SessionState::LoggedOut);
        Self {
            current,
            state,
            epoch: AtomicU64::new(0),
            transitions: Mutex::new(Outbox::default()),
            observers: Arc::new(ObserverRegistry::default()),
        }
    }

    pub(crate) fn current(&self) -> Option<Credential> {
        self.current.borrow().clone()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    pub(crate) fn subscribe_current(&self) -> watch::Receiver<Option<Credential>> {
        self.current.subscribe()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Replace the current credential unconditionally.
    pub(crate) fn install(&self, credential: &Credential) {
        self.transition(|slot| {
            *slot = Some(credential.clone());
            true
        });
    }

    /// Replace the current credential only if nothing else changed it since
    /// `epoch` was read. Returns whether it was installed.
    pub(crate) fn install_if(&self, epoch: u64, credential: &Credential) -> bool {
        self.transition(|slot| {
            if self.epoch.load(Ordering::Acquire) != epoch {
                return false;
            }
            *slot = Some(credential.clone());
            true
        })
    }

    /// Drop the current credential. Returns `false` (and notifies nobody)
    /// if there was none.
    pub(crate) fn clear(&self) -> bool {
        self.transition(|slot| slot.take().is_some())
    }

    /// Drop the current credential only if it carries the same token as
    /// `rejected`. A rejection of an older token is ignored.
    pub(crate) fn revoke(&self, rejected: &Credential) -> bool {
        self.transition(|slot| {
            if !slot.as_ref().is_some_and(|c| c.same_token(rejected)) {
                return false;
            }
            *slot = None;
            true
        })
    }

    /// Apply `change` under the transition lock. When it reports a change,
    /// bump the epoch, publish the matching `SessionState` and queue the
    /// observer event before the lock is released.
    fn transition<F>(&self, change: F) -> bool
    where
        F: FnOnce(&mut Option<Credential>) -> bool,
    {
        let mut outbox = lock(&self.transitions);
        let mut event = None;
        self.current.send_if_modified(|slot| {
            if !change(slot) {
                return false;
            }
            self.epoch.fetch_add(1, Ordering::AcqRel);
            event = Some(match slot {
                Some(credential) => Event::Available(credential.clone()),
                None => Event::Unavailable,
            });
            true
        });
        let Some(event) = event else {
            return false;
        };

        self.set_state(SessionState::of(match &event {
            Event::Available(credential) => Some(credential),
            Event::Unavailable => None,
        }));
        outbox.events.push_back(event);
        let deliver = !outbox.delivering;
        outbox.delivering = true;
        drop(outbox);

        if deliver {
            self.deliver();
        }
        true
    }

    /// Drain the outbox. Only one thread delivers at a time; transitions
    /// made meanwhile (including from inside a callback) are picked up by
    /// the same loop.
    fn deliver(&self) {
        let _reset = DeliveryGuard(self);
        loop {
            let event = {
                let mut outbox = lock(&self.transitions);
                match outbox.events.pop_front() {
                    Some(event) => event,
                    None => {
                        outbox.delivering = false;
                        return;
                    }
                }
            };
            match event {
                Event::Available(credential) => {
                    debug!(token = %credential.token_suffix(), "credential available");
                    self.observers.available(&credential);
                }
                Event::Unavailable => {
                    debug!("credential unavailable");
                    self.observers.unavailable();
                }
            }
        }
    }

    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            info!(from = %state, to = %next, "session state changed");
            *state = next;
            true
        });
    }
}

/// Hands delivery back if an observer callback panics mid-drain.
struct DeliveryGuard<'a>(&'a CredentialStore);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(&self.0.transitions).delivering = false;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CredentialProvider for CredentialStore {
    fn current(&self) -> Option<Credential> {
        CredentialStore::current(self)
    }

    fn rejected(&self, credential: &Credential) {
        if self.revoke(credential) {
            warn!(
                token = %credential.token_suffix(),
                "access token rejected; session logged out"
            );
        } else {
            debug!(
                token = %credential.token_suffix(),
                "stale access token rejected; ignoring"
            );
        }
    }
}
