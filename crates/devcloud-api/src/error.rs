// Error taxonomy for the request engine.
//
// Every failed call surfaces as exactly one `Error`. The `message` is meant
// for direct display; everything diagnostic (decoded server payloads, raw
// bodies, transport causes) hangs off `detail` and `source` so the two are
// never mixed.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Shared, cloneable error cause.
///
/// Kept behind an `Arc` so an [`Error`] can be cloned into every waiter of a
/// coalesced token refresh.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of a failed call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, strum::IntoStaticStr,
)]
#[strum(serialize_all = "camelCase")]
pub enum ErrorKind {
    /// No usable credential, or the server rejected the one presented.
    Unauthenticated,
    /// The request timed out (transport timeout, HTTP 408, or the
    /// server's own "timed out" report).
    NetworkTimeout,
    /// Connection refused, reset, DNS failure, TLS failure.
    NetworkFailure,
    /// The server described the failure in one of its known error shapes.
    ServerReportedError,
    /// Valid JSON error body that matches none of the known shapes.
    ResponseShapeMismatch,
    /// Body bytes that could not be decoded at all, or a success body that
    /// does not match the type the caller asked for.
    MalformedResponse,
    /// HTTP 400, or a request that could not be built locally.
    InvalidRequest,
    /// HTTP 403.
    Forbidden,
    /// HTTP 404.
    NotFound,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
    /// The call was cancelled before it completed.
    Cancelled,
    /// Nothing else matched.
    Unknown,
}

/// Decoded server payload or raw body attached to an [`Error`] for
/// diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDetail {
    /// `{"errors": [...], "error_description": "...", "mfa_token": "..."}`
    ServerErrors {
        errors: Vec<String>,
        description: Option<String>,
        mfa_token: Option<String>,
    },
    /// OAuth-style `{"error": "...", "error_description": "..."}`.
    OAuth { error: String, description: String },
    /// `{"ok": false, "error": "..."}`.
    Legacy { ok: bool, error: Option<String> },
    /// Parseable JSON that matched none of the known shapes.
    Json(serde_json::Value),
    /// Raw body text (possibly truncated) for undecodable payloads.
    Body(String),
}

/// A classified failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    retry_after: Option<Duration>,
    detail: Option<ErrorDetail>,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
            detail: None,
            source: None,
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    // ── Builders ─────────────────────────────────────────────────────

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable description, suitable for showing to a user.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status of the failed response, if one was received.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// How long the caller should wait before retrying, when the failure
    /// looks transient. The engine itself never retries.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn detail(&self) -> Option<&ErrorDetail> {
        self.detail.as_ref()
    }

    /// The multi-factor continuation token, when the server asked for one.
    pub fn mfa_token(&self) -> Option<&str> {
        match &self.detail {
            Some(ErrorDetail::ServerErrors { mfa_token, .. }) => mfa_token.as_deref(),
            _ => None,
        }
    }

    // ── Predicates ───────────────────────────────────────────────────

    /// Returns `true` if the server refused the presented credential.
    ///
    /// Matches on the kind *and* on a bare 401, since a 401 carrying an
    /// OAuth body classifies as `ServerReportedError`.
    pub fn is_auth_rejection(&self) -> bool {
        self.kind == ErrorKind::Unauthenticated || self.status == Some(401)
    }

    /// Returns `true` if retrying later might succeed.
    pub fn is_transient(&self) -> bool {
        self.retry_after.is_some()
            || matches!(
                self.kind,
                ErrorKind::NetworkTimeout
                    | ErrorKind::NetworkFailure
                    | ErrorKind::RateLimited
                    | ErrorKind::ServerError
            )
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound || self.status == Some(404)
    }
}
