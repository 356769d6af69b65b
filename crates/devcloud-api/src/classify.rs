// Error classification
//
// Turns a failed attempt into exactly one `Error`. The upstream service
// answers failures with several JSON shapes, inconsistently across
// endpoints, so bodies are tried against each known shape in a fixed order
// and the first match wins. Shapes that are structural subsets of others
// come later.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, ErrorDetail, ErrorKind};
use crate::transport::{TransportError, TransportResponse};

/// Retry hint used when a failure looks transient and the server did not
/// say how long to wait.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// The `error` value the service uses in `{ok, error}` bodies when a device
/// or upstream call timed out.
pub const TIMED_OUT_SENTINEL: &str = "Timed out.";

const BODY_PREVIEW_LEN: usize = 512;

// ── Known error shapes ──────────────────────────────────────────────

/// `{"errors": [...], "error_description": "...", "mfa_token": "..."}`
#[derive(Deserialize)]
struct StructuredErrors {
    errors: Vec<Value>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    mfa_token: Option<String>,
}

/// `{"error": "...", "error_description": "..."}`
#[derive(Deserialize)]
struct OAuthError {
    error: String,
    error_description: String,
}

/// `{"ok": false, "error": "..."}`
#[derive(Deserialize)]
struct LegacyError {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

// ── Entry points ────────────────────────────────────────────────────

/// Classify a failure where no response was received.
pub fn classify_transport(err: TransportError) -> Error {
    if err.is_timeout() {
        Error::new(ErrorKind::NetworkTimeout, "The request timed out")
            .with_retry_after(DEFAULT_RETRY_AFTER)
            .with_source(err)
    } else {
        Error::new(
            ErrorKind::NetworkFailure,
            "Could not reach the server. Check your network connection.",
        )
        .with_source(err)
    }
}

/// Classify a response whose status did not signal success.
pub fn classify_response(response: &TransportResponse) -> Error {
    let status = response.status;
    let retry_hint = retry_hint(response);

    let error = if response.body.iter().all(u8::is_ascii_whitespace) {
        classify_status(status, retry_hint)
    } else {
        classify_body(status, &response.body)
    };

    let error = error.with_status(status.as_u16());
    match (error.retry_after(), retry_hint) {
        (None, Some(hint)) => error.with_retry_after(hint),
        _ => error,
    }
}

/// A success response whose body does not decode as the caller's type.
pub fn decode_failure(type_name: &str, body: &[u8], err: serde_json::Error) -> Error {
    Error::new(
        ErrorKind::MalformedResponse,
        format!("The server response did not match the expected {type_name}"),
    )
    .with_detail(ErrorDetail::Body(preview(body)))
    .with_source(err)
}

// ── Body classification ─────────────────────────────────────────────

fn classify_body(status: StatusCode, body: &[u8]) -> Error {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            return Error::new(
                ErrorKind::MalformedResponse,
                format!("The server returned an unreadable error response (HTTP {status})"),
            )
            .with_detail(ErrorDetail::Body(preview(body)))
            .with_source(e);
        }
    };

    // Only objects can carry a known shape; serde would otherwise happily
    // read a struct out of a JSON array.
    if value.is_object() {
        if let Ok(shape) = StructuredErrors::deserialize(&value) {
            return structured(status, shape);
        }
        if let Ok(shape) = OAuthError::deserialize(&value) {
            return oauth(shape);
        }
        if let Ok(shape) = LegacyError::deserialize(&value) {
            return legacy(status, shape);
        }
    }

    Error::new(
        ErrorKind::ResponseShapeMismatch,
        format!("The server returned an unrecognized error response (HTTP {status})"),
    )
    .with_detail(ErrorDetail::Json(value))
}

fn structured(status: StatusCode, shape: StructuredErrors) -> Error {
    let errors: Vec<String> = shape.errors.iter().map(error_text).collect();
    let message = shape
        .error_description
        .clone()
        .filter(|d| !d.is_empty())
        .or_else(|| (!errors.is_empty()).then(|| errors.join("; ")))
        .unwrap_or_else(|| format!("Request failed (HTTP {status})"));

    Error::new(ErrorKind::ServerReportedError, message).with_detail(ErrorDetail::ServerErrors {
        errors,
        description: shape.error_description,
        mfa_token: shape.mfa_token,
    })
}

fn oauth(shape: OAuthError) -> Error {
    let message = if shape.error_description.is_empty() {
        shape.error.clone()
    } else {
        shape.error_description.clone()
    };
    Error::new(ErrorKind::ServerReportedError, message).with_detail(ErrorDetail::OAuth {
        error: shape.error,
        description: shape.error_description,
    })
}

fn legacy(status: StatusCode, shape: LegacyError) -> Error {
    let message = shape
        .error
        .clone()
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| format!("Request failed (HTTP {status})"));
    let timed_out = shape.error.as_deref().is_some_and(is_timed_out);

    let error =
        Error::new(ErrorKind::ServerReportedError, message).with_detail(ErrorDetail::Legacy {
            ok: shape.ok,
            error: shape.error,
        });
    if timed_out {
        error.with_retry_after(DEFAULT_RETRY_AFTER)
    } else {
        error
    }
}

fn is_timed_out(error: &str) -> bool {
    let sentinel = TIMED_OUT_SENTINEL.trim_end_matches('.');
    error.trim().trim_end_matches('.').eq_ignore_ascii_case(sentinel)
}

/// Entries in `errors` are usually strings, sometimes objects.
fn error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .map_or_else(|| value.to_string(), str::to_owned),
        other => other.to_string(),
    }
}

// ── Status classification ───────────────────────────────────────────

fn classify_status(status: StatusCode, retry_hint: Option<Duration>) -> Error {
    let retry = retry_hint.unwrap_or(DEFAULT_RETRY_AFTER);
    match status.as_u16() {
        400 => Error::new(ErrorKind::InvalidRequest, "The request was invalid"),
        401 => Error::unauthenticated("Authentication required. Please log in again."),
        403 => Error::new(
            ErrorKind::Forbidden,
            "You do not have permission to perform this action",
        ),
        404 => Error::new(ErrorKind::NotFound, "The requested resource was not found"),
        408 => Error::new(ErrorKind::NetworkTimeout, "The server timed out waiting for the request")
            .with_retry_after(retry),
        429 => Error::new(ErrorKind::RateLimited, "Too many requests. Try again later.")
            .with_retry_after(retry),
        500..=599 => Error::new(
            ErrorKind::ServerError,
            format!("The server encountered an error (HTTP {status})"),
        ),
        _ => Error::new(
            ErrorKind::Unknown,
            format!("Unexpected response from the server (HTTP {status})"),
        )
        .with_detail(ErrorDetail::Body(format!("HTTP {status} with an empty body"))),
    }
}

/// Transient statuses get a retry hint; `Retry-After` (seconds) wins over
/// the default.
fn retry_hint(response: &TransportResponse) -> Option<Duration> {
    let header = response
        .headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    match response.status.as_u16() {
        408 | 429 => Some(header.unwrap_or(DEFAULT_RETRY_AFTER)),
        _ => header,
    }
}

fn preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(BODY_PREVIEW_LEN) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.into_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    use super::*;

    fn response(status: u16, body: &str) -> TransportResponse {
        TransportResponse::new(StatusCode::from_u16(status).unwrap(), body.to_owned())
    }

    #[test]
    fn timeout_transport_error_carries_retry_hint() {
        let err = classify_transport(TransportError::timeout("deadline elapsed"));
        assert_eq!(err.kind(), ErrorKind::NetworkTimeout);
        assert_eq!(err.retry_after(), Some(DEFAULT_RETRY_AFTER));
    }

    #[test]
    fn other_transport_error_keeps_underlying_cause() {
        let cause = TransportError::new(
            crate::transport::TransportErrorKind::Connect,
            "connection refused",
        );
        let err = classify_transport(cause);
        assert_eq!(err.kind(), ErrorKind::NetworkFailure);
        assert_eq!(err.retry_after(), None);
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("connection refused"));
    }

    #[test]
    fn structured_errors_keep_mfa_token() {
        let body = json!({
            "errors": ["mfa_required"],
            "error_description": "Multi-factor authentication required",
            "mfa_token": "7c0a7bd4-5b8f-4e8b-9d3a-3c1f2c9b1e2a"
        });
        let err = classify_response(&response(403, &body.to_string()));

        assert_eq!(err.kind(), ErrorKind::ServerReportedError);
        assert_eq!(err.message(), "Multi-factor authentication required");
        assert_eq!(err.mfa_token(), Some("7c0a7bd4-5b8f-4e8b-9d3a-3c1f2c9b1e2a"));
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn structured_error_objects_are_flattened() {
        let body = json!({ "errors": [{ "message": "name is taken" }, 42] });
        let err = classify_response(&response(400, &body.to_string()));
        assert_eq!(err.message(), "name is taken; 42");
    }

    #[test]
    fn oauth_shape_uses_description() {
        let body = json!({
            "error": "invalid_token",
            "error_description": "The access token provided is invalid."
        });
        let err = classify_response(&response(401, &body.to_string()));

        assert_eq!(err.kind(), ErrorKind::ServerReportedError);
        assert_eq!(err.message(), "The access token provided is invalid.");
        assert!(err.is_auth_rejection());
        assert_eq!(
            err.detail(),
            Some(&ErrorDetail::OAuth {
                error: "invalid_token".into(),
                description: "The access token provided is invalid.".into(),
            })
        );
    }

    #[test]
    fn timed_out_sentinel_sets_retry_after() {
        let err = classify_response(&response(
            408,
            &json!({ "ok": false, "error": "Timed out." }).to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::ServerReportedError);
        let retry = err.retry_after().unwrap();
        assert!(retry > Duration::ZERO && retry <= Duration::from_secs(30));

        let err = classify_response(&response(
            500,
            &json!({ "ok": false, "error": "Timed out." }).to_string(),
        ));
        assert_eq!(err.retry_after(), Some(DEFAULT_RETRY_AFTER));
    }

    #[test]
    fn legacy_shape_without_sentinel_has_no_retry() {
        let err = classify_response(&response(
            400,
            &json!({ "ok": false, "error": "Variable not found" }).to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::ServerReportedError);
        assert_eq!(err.message(), "Variable not found");
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn error_without_description_is_not_oauth() {
        // `{error}` alone matches no known shape.
        let err = classify_response(&response(
            400,
            &json!({ "error": "something odd" }).to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::ResponseShapeMismatch);
        assert_eq!(
            err.detail(),
            Some(&ErrorDetail::Json(json!({ "error": "something odd" })))
        );
    }

    #[test]
    fn arrays_never_match_an_object_shape() {
        let err = classify_response(&response(500, "[false, \"boom\"]"));
        assert_eq!(err.kind(), ErrorKind::ResponseShapeMismatch);
    }

    #[test]
    fn non_json_body_is_malformed() {
        let err = classify_response(&response(502, "<html>Bad Gateway</html>"));
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
        assert_eq!(
            err.detail(),
            Some(&ErrorDetail::Body("<html>Bad Gateway</html>".into()))
        );
    }

    #[test]
    fn empty_body_uses_status_table() {
        let cases = [
            (400, ErrorKind::InvalidRequest),
            (401, ErrorKind::Unauthenticated),
            (403, ErrorKind::Forbidden),
            (404, ErrorKind::NotFound),
            (408, ErrorKind::NetworkTimeout),
            (429, ErrorKind::RateLimited),
            (500, ErrorKind::ServerError),
            (503, ErrorKind::ServerError),
            (418, ErrorKind::Unknown),
            (302, ErrorKind::Unknown),
        ];
        for (status, kind) in cases {
            let err = classify_response(&response(status, ""));
            assert_eq!(err.kind(), kind, "HTTP {status}");
            assert_eq!(err.status(), Some(status));
        }
    }

    #[test]
    fn rate_limit_honors_retry_after_header() {
        let mut resp = response(429, "");
        resp.headers
            .insert(RETRY_AFTER, HeaderValue::from_static("12"));
        let err = classify_response(&resp);
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));

        let err = classify_response(&response(408, "   "));
        assert_eq!(err.retry_after(), Some(DEFAULT_RETRY_AFTER));
    }

    #[test]
    fn shaped_body_on_rate_limit_keeps_specific_kind() {
        let body = json!({ "error": "rate_limited", "error_description": "Slow down" });
        let err = classify_response(&response(429, &body.to_string()));
        assert_eq!(err.kind(), ErrorKind::ServerReportedError);
        assert_eq!(err.retry_after(), Some(DEFAULT_RETRY_AFTER));
    }

    #[test]
    fn decode_failure_names_the_expected_type() {
        let serde_err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let err = decode_failure("devcloud::Device", b"\"nope\"", serde_err);
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
        assert!(err.message().contains("devcloud::Device"));
    }
}
