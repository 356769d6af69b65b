// ── Runtime session configuration ──
//
// Describes which cloud to talk to and how the OAuth client identifies
// itself. Never touches disk: `devcloud-config` (or the application)
// builds a `SessionConfig` and hands it in.

use std::time::Duration;

use devcloud_api::{ClientAuth, TransportConfig};
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.particle.io";

/// How long before its expiry a credential is already treated as stale.
pub const DEFAULT_EXPIRY_LEEWAY: Duration = Duration::from_secs(60);

/// Configuration for one [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cloud API base URL.
    pub api_url: Url,
    /// OAuth client sent with every token grant.
    pub client: ClientAuth,
    /// Lifetime requested for new tokens. `None` lets the server decide.
    pub token_lifetime: Option<Duration>,
    /// See [`DEFAULT_EXPIRY_LEEWAY`].
    pub expiry_leeway: Duration,
    pub transport: TransportConfig,
}

impl SessionConfig {
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL is a valid URL"),
            client: ClientAuth::default(),
            token_lifetime: None,
            expiry_leeway: DEFAULT_EXPIRY_LEEWAY,
            transport: TransportConfig::default(),
        }
    }
}
