// ── Revocable credential handles ──
//
// What a domain object (a device handle, a SIM handle) keeps instead of a
// bare `Credential`: a live view of the session's current credential that
// empties on logout and picks up the new token after a refresh.

use std::pin::Pin;
use std::task::{Context, Poll};

use devcloud_api::Credential;
use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A live, revocable view of the session's credential.
#[derive(Debug, Clone)]
pub struct CredentialWatch {
    receiver: watch::Receiver<Option<Credential>>,
}

impl CredentialWatch {
    pub(crate) fn new(receiver: watch::Receiver<Option<Credential>>) -> Self {
        Self { receiver }
    }

    /// The credential right now, or `None` once the session logged out.
    pub fn current(&self) -> Option<Credential> {
        self.receiver.borrow().clone()
    }

    pub fn is_available(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Wait for the next change and return the new value.
    /// Returns `None` if the session has been dropped.
    pub async fn changed(&mut self) -> Option<Option<Credential>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Convert into a `Stream` that yields the current value first, then
    /// every change.
    pub fn into_stream(self) -> CredentialStream {
        CredentialStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter over a [`CredentialWatch`].
pub struct CredentialStream {
    inner: WatchStream<Option<Credential>>,
}

impl Stream for CredentialStream {
    type Item = Option<Credential>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
