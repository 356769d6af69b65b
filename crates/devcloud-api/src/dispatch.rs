// Request dispatcher
//
// Executes one `Resource` and produces one typed result. The sequence is
// fixed: auth check -> build -> register -> send -> decode or classify ->
// deregister. Every calling convention (see `convention.rs`) funnels into
// `execute_with`; nothing else decodes or classifies.

use std::any::type_name;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::classify::{classify_response, classify_transport, decode_failure};
use crate::credential::Credential;
use crate::error::Error;
use crate::inflight::InFlightRegistry;
use crate::resource::{Body, Part, Resource};
use crate::transport::{Transport, TransportBody, TransportPart, TransportRequest};

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";

// ── Credential source ───────────────────────────────────────────────

/// Where the dispatcher gets the current credential from, and who it tells
/// when the server rejects one.
pub trait CredentialProvider: Send + Sync {
    /// Non-blocking read of the current credential.
    fn current(&self) -> Option<Credential>;

    /// The server refused `credential` on an authenticated call.
    fn rejected(&self, credential: &Credential);
}

// ── Per-call options ────────────────────────────────────────────────

/// Options for a single call.
///
/// An explicit `credential` always wins over the provider's current one.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub credential: Option<Credential>,
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Executes [`Resource`] descriptors against the cloud API.
///
/// Cheaply cloneable; clones share the transport, credential provider and
/// in-flight registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    transport: Arc<dyn Transport>,
    base_url: Url,
    credentials: Option<Arc<dyn CredentialProvider>>,
    inflight: InFlightRegistry,
}

impl Dispatcher {
    /// Create a dispatcher with no credential provider: only anonymous
    /// calls and calls with an explicit credential can succeed.
    pub fn new(transport: Arc<dyn Transport>, base_url: &Url) -> Self {
        Self::build(transport, base_url, None)
    }

    pub fn with_credentials(
        transport: Arc<dyn Transport>,
        base_url: &Url,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self::build(transport, base_url, Some(credentials))
    }

    fn build(
        transport: Arc<dyn Transport>,
        base_url: &Url,
        credentials: Option<Arc<dyn CredentialProvider>>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                transport,
                base_url: normalize_base_url(base_url),
                credentials,
                inflight: InFlightRegistry::new(),
            }),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn inflight(&self) -> &InFlightRegistry {
        &self.inner.inflight
    }

    /// Cancel every request in flight right now. See
    /// [`InFlightRegistry::cancel_all`].
    pub fn cancel_all(&self) -> usize {
        self.inner.inflight.cancel_all()
    }

    // ── Core operation ───────────────────────────────────────────────

    /// Execute and decode the body as `T`.
    pub async fn execute<T: DeserializeOwned>(&self, resource: &Resource) -> Result<T, Error> {
        self.execute_with(resource, CallOptions::default()).await
    }

    pub async fn execute_with<T: DeserializeOwned>(
        &self,
        resource: &Resource,
        options: CallOptions,
    ) -> Result<T, Error> {
        let body = self.send(resource, options).await?;
        serde_json::from_slice(&body).map_err(|e| decode_failure(type_name::<T>(), &body, e))
    }

    /// Execute and hand back the raw success body.
    pub async fn execute_bytes(
        &self,
        resource: &Resource,
        options: CallOptions,
    ) -> Result<Bytes, Error> {
        self.send(resource, options).await
    }

    /// Execute, ignoring whatever the success body contains.
    pub async fn execute_empty(
        &self,
        resource: &Resource,
        options: CallOptions,
    ) -> Result<(), Error> {
        self.send(resource, options).await.map(drop)
    }

    async fn send(&self, resource: &Resource, options: CallOptions) -> Result<Bytes, Error> {
        let CallOptions { credential, cancel } = options;

        let credential = self.authorize(resource, credential)?;
        let request = self.build_request(resource, credential.as_ref()).await?;

        let guard = self
            .inner
            .inflight
            .register(resource.label(), cancel.as_ref());
        debug!(
            request_id = %guard.id(),
            method = %request.method,
            url = %request.url,
            "dispatching"
        );

        let outcome = tokio::select! {
            biased;
            () = guard.cancelled() => {
                debug!(request_id = %guard.id(), "request cancelled");
                return Err(Error::cancelled("The request was cancelled"));
            }
            result = self.inner.transport.send(request) => result,
        };
        drop(guard);

        let response = outcome.map_err(classify_transport)?;
        if response.status.is_success() {
            return Ok(response.body);
        }

        let error = classify_response(&response);
        debug!(status = %response.status, kind = %error.kind(), "request failed");
        if let Some(credential) = credential.as_ref().filter(|_| error.is_auth_rejection()) {
            self.credential_rejected(credential);
        }
        Err(error)
    }

    /// Decide which credential, if any, goes on the request. Refuses before
    /// any I/O when one is required and none is usable.
    fn authorize(
        &self,
        resource: &Resource,
        explicit: Option<Credential>,
    ) -> Result<Option<Credential>, Error> {
        let credential = match explicit {
            Some(credential) => credential,
            None if resource.requires_auth() => self
                .inner
                .credentials
                .as_ref()
                .and_then(|provider| provider.current())
                .ok_or_else(|| {
                    Error::unauthenticated("You are not logged in. Please log in and try again.")
                })?,
            None => return Ok(None),
        };

        if credential.is_expired(Utc::now(), std::time::Duration::ZERO) {
            return Err(Error::unauthenticated(
                "Your access token has expired. Please refresh it and try again.",
            ));
        }
        Ok(Some(credential))
    }

    fn credential_rejected(&self, credential: &Credential) {
        warn!(token = %credential.token_suffix(), "server rejected access token");
        if let Some(provider) = &self.inner.credentials {
            provider.rejected(credential);
        }
    }

    // ── Request building ─────────────────────────────────────────────

    async fn build_request(
        &self,
        resource: &Resource,
        credential: Option<&Credential>,
    ) -> Result<TransportRequest, Error> {
        let mut url = self
            .inner
            .base_url
            .join(resource.path().trim_start_matches('/'))
            .map_err(|e| {
                Error::invalid_request(format!("invalid request path {:?}", resource.path()))
                    .with_source(e)
            })?;
        if !resource.query_parameters().is_empty() {
            url.query_pairs_mut().extend_pairs(resource.query_parameters());
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(JSON));
        if let Some(credential) = credential {
            headers.insert(AUTHORIZATION, bearer(credential)?);
        }

        Ok(TransportRequest {
            method: resource.method(),
            url,
            headers,
            body: encode_body(resource.body()).await?,
        })
    }
}

/// Make sure the base URL ends with `/` so relative paths join beneath it.
fn normalize_base_url(raw: &Url) -> Url {
    let mut url = raw.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn bearer(credential: &Credential) -> Result<HeaderValue, Error> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", credential.expose_token()))
        .map_err(|e| {
            Error::invalid_request("access token is not a valid header value").with_source(e)
        })?;
    value.set_sensitive(true);
    Ok(value)
}

async fn encode_body(body: &Body) -> Result<TransportBody, Error> {
    Ok(match body {
        Body::None => TransportBody::Empty,
        Body::Json(value) => TransportBody::Bytes {
            content_type: JSON,
            data: serde_json::to_vec(value)
                .map_err(|e| {
                    Error::invalid_request("request body could not be encoded").with_source(e)
                })?
                .into(),
        },
        Body::Form(fields) => TransportBody::Bytes {
            content_type: FORM,
            data: url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(fields)
                .finish()
                .into(),
        },
        Body::Multipart(parts) => {
            let mut loaded = Vec::with_capacity(parts.len());
            for part in parts {
                loaded.push(load_part(part).await?);
            }
            TransportBody::Multipart(loaded)
        }
    })
}

async fn load_part(part: &Part) -> Result<TransportPart, Error> {
    Ok(match part {
        Part::Text { name, value } => TransportPart::Text {
            name: name.clone(),
            value: value.clone(),
        },
        Part::File {
            name,
            path,
            media_type,
        } => {
            if let Err(e) = media_type.parse::<mime::Mime>() {
                return Err(
                    Error::invalid_request(format!("invalid media type {media_type:?}"))
                        .with_source(e),
                );
            }
            let data = tokio::fs::read(path).await.map_err(|e| {
                Error::invalid_request(format!("could not read {}", path.display())).with_source(e)
            })?;
            let file_name = path
                .file_name()
                .map_or_else(|| name.clone(), |f| f.to_string_lossy().into_owned());
            TransportPart::File {
                name: name.clone(),
                file_name,
                media_type: media_type.clone(),
                data: data.into(),
            }
        }
    })
}
