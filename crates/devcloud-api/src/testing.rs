// Test doubles shared by the unit tests in this crate.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::StatusCode;

use crate::credential::Credential;
use crate::dispatch::CredentialProvider;
use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};

type Scripted = (Option<Duration>, Result<TransportResponse, TransportError>);

/// Transport spy that replays scripted outcomes in order and records every
/// request it was asked to send.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<TransportRequest>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, outcome: Result<TransportResponse, TransportError>) {
        self.script.lock().unwrap().push_back((None, outcome));
    }

    pub(crate) fn push_ok(&self, status: StatusCode, body: serde_json::Value) {
        self.push(Ok(TransportResponse::new(status, body.to_string())));
    }

    pub(crate) fn push_delayed(
        &self,
        delay: Duration,
        status: StatusCode,
        body: serde_json::Value,
    ) {
        self.script.lock().unwrap().push_back((
            Some(delay),
            Ok(TransportResponse::new(status, body.to_string())),
        ));
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<TransportRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let (delay, outcome) = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| (None, Err(TransportError::timeout("script exhausted"))));
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome
        })
    }
}

/// Provider with a fixed current credential that counts rejections.
pub(crate) struct FixedCredential {
    current: Option<Credential>,
    rejections: AtomicUsize,
}

impl FixedCredential {
    pub(crate) fn new(current: Option<Credential>) -> Self {
        Self {
            current,
            rejections: AtomicUsize::new(0),
        }
    }

    pub(crate) fn rejections(&self) -> usize {
        self.rejections.load(Ordering::SeqCst)
    }
}

impl CredentialProvider for FixedCredential {
    fn current(&self) -> Option<Credential> {
        self.current.clone()
    }

    fn rejected(&self, _credential: &Credential) {
        self.rejections.fetch_add(1, Ordering::SeqCst);
    }
}
