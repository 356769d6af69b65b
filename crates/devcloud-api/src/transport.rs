// Transport boundary.
//
// One operation: send a fully-built request, receive status + headers + body.
// `HttpTransport` is the production implementation on top of `reqwest`;
// tests plug in their own `Transport`. TLS, timeout and user-agent settings
// live in `TransportConfig` so every client is built the same way.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use thiserror::Error;
use tracing::trace;
use url::Url;

use crate::error::{BoxError, Error, ErrorKind};
use crate::resource::Method;

const USER_AGENT: &str = concat!("devcloud/", env!("CARGO_PKG_VERSION"));

// ── Wire-level request / response ───────────────────────────────────

/// A request ready to go on the wire.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: TransportBody,
}

/// Serialized request body.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportBody {
    Empty,
    /// Pre-encoded bytes (JSON, url-encoded form). `content_type` is sent
    /// as the `Content-Type` header.
    Bytes {
        content_type: &'static str,
        data: Bytes,
    },
    /// `multipart/form-data`; the boundary is chosen by the transport.
    Multipart(Vec<TransportPart>),
}

/// One loaded multipart part.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        media_type: String,
        data: Bytes,
    },
}

/// What came back.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

// ── Transport errors ────────────────────────────────────────────────

/// Broad nature of a transport failure; drives classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

/// No response was received at all.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

// ── Transport trait ─────────────────────────────────────────────────

/// Pluggable "send request, receive response" boundary.
///
/// Dropping the returned future must abort the request.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>>;
}

// ── Transport configuration ─────────────────────────────────────────

/// TLS verification mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (local test rigs only).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            user_agent: USER_AGENT.into(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str());

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path).map_err(|e| {
                    tls_error(format!("failed to read CA cert {}", path.display())).with_source(e)
                })?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| tls_error("invalid CA cert").with_source(e))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| tls_error("failed to build HTTP client").with_source(e))
    }
}

fn tls_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::NetworkFailure, message)
}

// ── reqwest-backed transport ────────────────────────────────────────

/// Production transport on top of `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: config.build_client()?,
        })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn round_trip(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let TransportRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.http.request(method.as_reqwest(), url).headers(headers);
        builder = match body {
            TransportBody::Empty => builder,
            TransportBody::Bytes { content_type, data } => builder
                .header(CONTENT_TYPE, HeaderValue::from_static(content_type))
                .body(data),
            TransportBody::Multipart(parts) => builder.multipart(multipart_form(parts)?),
        };

        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;
        trace!(%status, bytes = body.len(), "response received");

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        Box::pin(self.round_trip(request))
    }
}

fn multipart_form(parts: Vec<TransportPart>) -> Result<reqwest::multipart::Form, TransportError> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match part {
            TransportPart::Text { name, value } => form.text(name, value),
            TransportPart::File {
                name,
                file_name,
                media_type,
                data,
            } => {
                let part = reqwest::multipart::Part::bytes(data.to_vec())
                    .file_name(file_name)
                    .mime_str(&media_type)?;
                form.part(name, part)
            }
        };
    }
    Ok(form)
}
