#![allow(clippy::unwrap_used)]
// Integration tests for `Dispatcher` over the reqwest transport, using wiremock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use devcloud_api::{
    CallOptions, Credential, CredentialProvider, Dispatcher, ErrorKind, HttpTransport, Part,
    Resource, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

#[derive(Default)]
struct StaticCredential {
    current: Option<Credential>,
    rejected: AtomicUsize,
}

impl CredentialProvider for StaticCredential {
    fn current(&self) -> Option<Credential> {
        self.current.clone()
    }

    fn rejected(&self, _credential: &Credential) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Deserialize)]
struct Device {
    id: String,
    name: String,
    connected: bool,
}

async fn setup_with(
    credential: Option<Credential>,
    timeout: Duration,
) -> (MockServer, Dispatcher, Arc<StaticCredential>) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let transport = HttpTransport::new(&TransportConfig {
        timeout,
        ..TransportConfig::default()
    })
    .unwrap();
    let provider = Arc::new(StaticCredential {
        current: credential,
        ..StaticCredential::default()
    });
    let dispatcher = Dispatcher::with_credentials(Arc::new(transport), &base_url, provider.clone());
    (server, dispatcher, provider)
}

async fn setup() -> (MockServer, Dispatcher, Arc<StaticCredential>) {
    setup_with(Some(Credential::new("abcd1234")), Duration::from_secs(5)).await
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_get_device_with_bearer() {
    let (server, dispatcher, _) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/devices/0123456789abcdef"))
        .and(header("authorization", "Bearer abcd1234"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "0123456789abcdef",
            "name": "porch-light",
            "connected": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let device: Device = dispatcher
        .execute(&Resource::get("v1/devices/0123456789abcdef"))
        .await
        .unwrap();

    assert_eq!(device.id, "0123456789abcdef");
    assert_eq!(device.name, "porch-light");
    assert!(device.connected);
}

#[tokio::test]
async fn test_query_parameters_are_sent_in_order() {
    let (server, dispatcher, _) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/sims"))
        .and(query_param("page", "2"))
        .and(query_param("per_page", "25"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sims": [] })))
        .mount(&server)
        .await;

    let res = Resource::get("v1/sims").query("page", 2).query("per_page", 25);
    let body: serde_json::Value = dispatcher.execute(&res).await.unwrap();
    assert_eq!(body, json!({ "sims": [] }));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received[0].url.query(), Some("page=2&per_page=25"));
}

#[tokio::test]
async fn test_json_body_sets_content_type() {
    let (server, dispatcher, _) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/v1/devices/abc"))
        .and(header("content-type", "application/json"))
        .and(body_string_contains("\"name\":\"garage\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let res = Resource::put("v1/devices/abc")
        .json(&json!({ "name": "garage" }))
        .unwrap();
    dispatcher
        .execute_empty(&res, CallOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_multipart_upload() {
    let (server, dispatcher, _) = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let firmware = dir.path().join("tinker.bin");
    std::fs::write(&firmware, b"\x7fELF-not-really").unwrap();

    Mock::given(method("PUT"))
        .and(path("/v1/devices/abc"))
        .and(header_exists("content-type"))
        .and(body_string_contains("tinker.bin"))
        .and(body_string_contains("file_type"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let res = Resource::put("v1/devices/abc").multipart(vec![
        Part::text("file_type", "binary"),
        Part::file("file", &firmware, "application/octet-stream"),
    ]);
    dispatcher
        .execute_empty(&res, CallOptions::default())
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    let content_type = received[0].headers.get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().starts_with("multipart/form-data"));
}

#[tokio::test]
async fn test_stream_convention_yields_once() {
    let (server, dispatcher, _) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/diagnostics/abc/last"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "healthy" })))
        .expect(1)
        .mount(&server)
        .await;

    let items: Vec<_> = dispatcher
        .stream::<serde_json::Value>(
            Resource::get("v1/diagnostics/abc/last"),
            CallOptions::default(),
        )
        .collect()
        .await;

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().unwrap()["status"], "healthy");
}

// ── Error tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_credential_makes_no_request() {
    let (server, dispatcher, _) = setup_with(None, Duration::from_secs(5)).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = dispatcher
        .execute::<Device>(&Resource::get("v1/devices/abc"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[tokio::test]
async fn test_mfa_required_round_trips_token() {
    let (server, dispatcher, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "errors": ["mfa_required"],
            "error_description": "Multi-factor authentication required",
            "mfa_token": "mfa-0f4c"
        })))
        .mount(&server)
        .await;

    let res = Resource::post("oauth/token")
        .form([("grant_type", "password")])
        .anonymous();
    let err = dispatcher
        .execute::<serde_json::Value>(&res)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerReportedError);
    assert_eq!(err.mfa_token(), Some("mfa-0f4c"));
    assert_eq!(err.status(), Some(403));
}

#[tokio::test]
async fn test_timed_out_body_has_retry_hint() {
    let (server, dispatcher, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/devices/abc/digitalwrite"))
        .respond_with(
            ResponseTemplate::new(408).set_body_json(json!({ "ok": false, "error": "Timed out." })),
        )
        .mount(&server)
        .await;

    let err = dispatcher
        .execute::<serde_json::Value>(&Resource::post("v1/devices/abc/digitalwrite"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerReportedError);
    let retry = err.retry_after().unwrap();
    assert!(retry <= Duration::from_secs(30));
}

#[tokio::test]
async fn test_unauthorized_reports_rejection() {
    let (server, dispatcher, provider) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_token",
            "error_description": "The access token provided is invalid."
        })))
        .mount(&server)
        .await;

    let err = dispatcher
        .execute::<Device>(&Resource::get("v1/devices"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerReportedError);
    assert_eq!(err.message(), "The access token provided is invalid.");
    assert_eq!(provider.rejected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_error_500() {
    let (server, dispatcher, provider) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = dispatcher
        .execute::<Device>(&Resource::get("v1/devices"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert_eq!(err.status(), Some(500));
    assert_eq!(provider.rejected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_success_with_unexpected_shape() {
    let (server, dispatcher, _) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;

    let err = dispatcher
        .execute::<Device>(&Resource::get("v1/devices/abc"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
}

#[tokio::test]
async fn test_transport_timeout() {
    let (server, dispatcher, _) =
        setup_with(Some(Credential::new("abcd1234")), Duration::from_millis(100)).await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let err = dispatcher
        .execute::<serde_json::Value>(&Resource::get("v1/devices"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NetworkTimeout);
    assert!(err.retry_after().is_some());
    assert!(dispatcher.inflight().is_empty());
}

#[tokio::test]
async fn test_connection_refused() {
    // Bind then drop a server so nothing listens on the port.
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    drop(server);

    let transport = HttpTransport::new(&TransportConfig::default()).unwrap();
    let dispatcher = Dispatcher::new(Arc::new(transport), &base_url);

    let err = dispatcher
        .execute::<serde_json::Value>(&Resource::get("v1/ping").anonymous())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NetworkFailure);
    assert!(std::error::Error::source(&err).is_some());
}
