// devcloud-api: authenticated request engine for the device-management cloud.
//
// Domain code describes a call as a `Resource`, the `Dispatcher` executes it
// with the current `Credential`, and failures come back classified as one
// `Error`. Token lifecycle (login, refresh, logout) lives in `devcloud-core`.

pub mod classify;
pub mod convention;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod inflight;
pub mod oauth;
pub mod resource;
pub mod transport;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod testing;

pub use convention::CallHandle;
pub use credential::Credential;
pub use dispatch::{CallOptions, CredentialProvider, Dispatcher};
pub use error::{Error, ErrorDetail, ErrorKind};
pub use inflight::{InFlightRegistry, InFlightRequest};
pub use oauth::{ClientAuth, TokenResponse};
pub use resource::{Body, Method, Part, Resource};
pub use transport::{
    HttpTransport, TlsMode, Transport, TransportBody, TransportConfig, TransportError,
    TransportErrorKind, TransportPart, TransportRequest, TransportResponse,
};
