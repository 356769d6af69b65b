// ── Session ──
//
// Token lifecycle for one cloud account: login, refresh, logout, and the
// notifications domain objects use to follow the current credential.
// The session owns the credential store and hands it to its dispatcher as
// the credential provider, so a 401 on any authenticated call logs the
// session out without the caller asking.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use devcloud_api::oauth::{self, TokenResponse};
use devcloud_api::{
    CallOptions, Credential, Dispatcher, Error, ErrorKind, HttpTransport, Resource, Transport,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::observer::Subscription;
use crate::store::{CredentialStore, SessionState};
use crate::watch::CredentialWatch;

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, Error>>>;

/// Login material kept so `refresh()` can repeat the original grant when
/// the credential carries no refresh token.
#[derive(Clone)]
enum Grant {
    Password {
        username: String,
        password: SecretString,
    },
    ClientCredentials,
}

/// An authenticated session against the cloud API.
///
/// Cheaply cloneable via `Arc<SessionInner>`; every clone shares one
/// current credential, one dispatcher and one in-progress refresh.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    store: Arc<CredentialStore>,
    dispatcher: Dispatcher,
    grant: Mutex<Option<Grant>>,
    refresh: Mutex<Option<RefreshFuture>>,
}

impl Session {
    /// Create a logged-out session using the reqwest transport.
    pub fn new(config: SessionConfig) -> Result<Self, Error> {
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a logged-out session over a caller-supplied transport.
    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let store = Arc::new(CredentialStore::new());
        let dispatcher = Dispatcher::with_credentials(transport, &config.api_url, store.clone());
        Self {
            inner: Arc::new(SessionInner {
                config,
                store,
                dispatcher,
                grant: Mutex::new(None),
                refresh: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The dispatcher domain code executes its resources with. Its
    /// credential provider is this session.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    // ── Login ────────────────────────────────────────────────────────

    /// Exchange a username and password for a credential.
    ///
    /// On failure the previous credential, if any, is left untouched. An
    /// account with multi-factor auth enabled fails with
    /// `ServerReportedError` carrying an [`Error::mfa_token`]; finish with
    /// [`login_with_otp`](Self::login_with_otp).
    pub async fn login(
        &self,
        username: &str,
        password: SecretString,
    ) -> Result<Credential, Error> {
        let config = &self.inner.config;
        let resource =
            oauth::password_grant(&config.client, username, &password, config.token_lifetime);
        let credential = self.request_token(&resource).await?;

        *lock(&self.inner.grant) = Some(Grant::Password {
            username: username.to_owned(),
            password,
        });
        self.inner.store.install(&credential);
        info!(username, token = %credential.token_suffix(), "logged in");
        Ok(credential)
    }

    /// Second step of a multi-factor login.
    pub async fn login_with_otp(&self, mfa_token: &str, otp: &str) -> Result<Credential, Error> {
        let resource = oauth::mfa_otp_grant(&self.inner.config.client, mfa_token, otp);
        let credential = self.request_token(&resource).await?;

        *lock(&self.inner.grant) = None;
        self.inner.store.install(&credential);
        info!(token = %credential.token_suffix(), "logged in with one-time password");
        Ok(credential)
    }

    /// Client-credentials login for product and customer integrations.
    pub async fn login_client(&self) -> Result<Credential, Error> {
        let config = &self.inner.config;
        let resource = oauth::client_credentials_grant(&config.client, config.token_lifetime);
        let credential = self.request_token(&resource).await?;

        *lock(&self.inner.grant) = Some(Grant::ClientCredentials);
        self.inner.store.install(&credential);
        info!(client_id = %config.client.client_id, "logged in as OAuth client");
        Ok(credential)
    }

    /// Adopt a credential obtained elsewhere, e.g. one the application
    /// persisted from a previous run.
    pub fn restore(&self, credential: Credential) {
        *lock(&self.inner.grant) = None;
        debug!(token = %credential.token_suffix(), "restoring credential");
        self.inner.store.install(&credential);
    }

    async fn request_token(&self, resource: &Resource) -> Result<Credential, Error> {
        request_token(&self.inner.dispatcher, resource).await
    }

    // ── Refresh ──────────────────────────────────────────────────────

    /// Obtain a fresh credential and make it current.
    ///
    /// Concurrent callers share one renewal: the first caller starts it,
    /// everyone who arrives while it runs awaits the same outcome. The
    /// renewal uses the credential's refresh token when it has one, else
    /// repeats the original password or client-credentials grant.
    pub async fn refresh(&self) -> Result<Credential, Error> {
        let pending = {
            let mut slot = lock(&self.inner.refresh);
            if let Some(pending) = slot.as_ref() {
                debug!("joining refresh in progress");
                pending.clone()
            } else {
                let pending = start_refresh(Arc::clone(&self.inner));
                *slot = Some(pending.clone());
                pending
            }
        };
        pending.await
    }

    /// The current credential, refreshed first if it expires within the
    /// configured leeway.
    pub async fn valid_credential(&self) -> Result<Credential, Error> {
        match self.current_credential() {
            Some(credential)
                if !credential.is_expired(Utc::now(), self.inner.config.expiry_leeway) =>
            {
                Ok(credential)
            }
            _ => self.refresh().await,
        }
    }

    // ── Logout ───────────────────────────────────────────────────────

    /// End the session.
    ///
    /// Local state is cleared first and unconditionally: the credential,
    /// the remembered login material, and every request in flight. The
    /// server-side token is then invalidated best-effort; its error, if
    /// any, is returned but changes nothing locally.
    pub async fn logout(&self) -> Result<(), Error> {
        let credential = self.inner.store.current();
        *lock(&self.inner.grant) = None;
        let cancelled = self.inner.dispatcher.cancel_all();
        self.inner.store.clear();
        info!(cancelled, "logged out");

        let Some(credential) = credential else {
            return Ok(());
        };
        if credential.is_expired(Utc::now(), Duration::ZERO) {
            debug!(token = %credential.token_suffix(), "token already expired; not revoking");
            return Ok(());
        }

        self.inner
            .dispatcher
            .execute_empty(
                &oauth::revoke_current(),
                CallOptions::default().credential(credential),
            )
            .await
            .inspect_err(|e| warn!(error = %e, "could not invalidate access token on the server"))
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Non-blocking read of the current credential.
    pub fn current_credential(&self) -> Option<Credential> {
        self.inner.store.current()
    }

    pub fn state(&self) -> SessionState {
        self.inner.store.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.store.subscribe_state()
    }

    /// A revocable view of the current credential for a domain object.
    pub fn watch_credential(&self) -> CredentialWatch {
        CredentialWatch::new(self.inner.store.subscribe_current())
    }

    /// Register callbacks for credential availability changes.
    ///
    /// `on_available` runs after every login, restore and successful
    /// refresh; `on_unavailable` runs once per transition to logged out,
    /// whether by `logout()` or because the server rejected the token.
    pub fn subscribe<A, U>(&self, on_available: A, on_unavailable: U) -> Subscription
    where
        A: Fn(&Credential) + Send + Sync + 'static,
        U: Fn() + Send + Sync + 'static,
    {
        self.inner
            .store
            .observers()
            .subscribe(on_available, on_unavailable)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("api_url", &self.inner.config.api_url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ── Refresh internals ───────────────────────────────────────────────

/// Spawn the renewal and wrap its handle in a shareable future. The task
/// empties the refresh slot itself when it ends, so a slow waiter never
/// keeps a finished refresh alive.
fn start_refresh(inner: Arc<SessionInner>) -> RefreshFuture {
    let epoch = inner.store.epoch();
    let task = tokio::spawn(async move {
        let _slot = RefreshSlot(Arc::clone(&inner));
        renew(&inner, epoch).await
    });
    async move {
        task.await.unwrap_or_else(|e| {
            Err(Error::new(ErrorKind::Unknown, "The token refresh did not complete").with_source(e))
        })
    }
    .boxed()
    .shared()
}

/// Empties the refresh slot on drop, including when the renewal panics or
/// the runtime aborts the task, so the next `refresh()` starts afresh.
struct RefreshSlot(Arc<SessionInner>);

impl Drop for RefreshSlot {
    fn drop(&mut self) {
        lock(&self.0.refresh).take();
    }
}

async fn renew(inner: &SessionInner, epoch: u64) -> Result<Credential, Error> {
    let client = &inner.config.client;
    let previous = inner.store.current();
    let refresh_token = previous.as_ref().and_then(Credential::refresh_token).cloned();
    let grant = lock(&inner.grant).clone();

    let resource = match (&refresh_token, grant) {
        (Some(token), _) => oauth::refresh_grant(client, token),
        (None, Some(Grant::Password { username, password })) => {
            oauth::password_grant(client, &username, &password, inner.config.token_lifetime)
        }
        (None, Some(Grant::ClientCredentials)) => {
            oauth::client_credentials_grant(client, inner.config.token_lifetime)
        }
        (None, None) => {
            return Err(Error::unauthenticated(
                "Your session cannot be renewed. Please log in again.",
            ));
        }
    };
    debug!(with_refresh_token = refresh_token.is_some(), "refreshing access token");

    let mut credential = request_token(&inner.dispatcher, &resource).await?;
    // The server may rotate the refresh token or omit it; keep the old one
    // when omitted.
    if credential.refresh_token().is_none() {
        if let Some(token) = refresh_token {
            credential = credential.with_refresh_token(token.expose_secret());
        }
    }

    if inner.store.install_if(epoch, &credential) {
        info!(token = %credential.token_suffix(), "access token refreshed");
        return Ok(credential);
    }

    // Someone logged in, restored, or logged out while we were waiting on
    // the server; their outcome stands.
    debug!("session changed during refresh; discarding renewed token");
    inner.store.current().ok_or_else(|| {
        Error::cancelled("The session ended while the access token was being refreshed")
    })
}

async fn request_token(dispatcher: &Dispatcher, resource: &Resource) -> Result<Credential, Error> {
    let response: TokenResponse = dispatcher.execute(resource).await?;
    Ok(Credential::from_token_response(response, Utc::now()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
