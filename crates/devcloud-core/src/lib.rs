// devcloud-core: session and access-token lifecycle on top of devcloud-api.

pub mod config;
pub mod observer;
pub mod session;
pub mod store;
pub mod watch;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::SessionConfig;
pub use observer::Subscription;
pub use session::Session;
pub use store::SessionState;
pub use watch::{CredentialStream, CredentialWatch};

pub use devcloud_api::{CallOptions, Credential, Dispatcher, Error, ErrorKind, Resource};
