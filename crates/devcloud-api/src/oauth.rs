// OAuth token endpoint
//
// Descriptors for the grants the cloud accepts at `oauth/token`, plus the
// token-invalidation call. All token grants are anonymous: the OAuth client
// identifies itself with `client_id`/`client_secret` form fields rather
// than a bearer token.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::resource::Resource;

pub const TOKEN_PATH: &str = "oauth/token";
pub const CURRENT_TOKEN_PATH: &str = "v1/access_tokens/current";

const GRANT_PASSWORD: &str = "password";
const GRANT_REFRESH: &str = "refresh_token";
const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
const GRANT_MFA_OTP: &str = "urn:custom:mfa-otp";

/// Success body of the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds; `0` means the token does not expire.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth client identity sent with every grant.
#[derive(Debug, Clone)]
pub struct ClientAuth {
    pub client_id: String,
    pub client_secret: SecretString,
}

impl ClientAuth {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
        }
    }

    fn fields(&self, grant_type: &str) -> Vec<(String, String)> {
        vec![
            ("grant_type".into(), grant_type.into()),
            ("client_id".into(), self.client_id.clone()),
            (
                "client_secret".into(),
                self.client_secret.expose_secret().to_owned(),
            ),
        ]
    }
}

impl Default for ClientAuth {
    fn default() -> Self {
        Self::new("particle", "particle")
    }
}

fn token_request(mut fields: Vec<(String, String)>, lifetime: Option<Duration>) -> Resource {
    if let Some(lifetime) = lifetime {
        fields.push(("expires_in".into(), lifetime.as_secs().to_string()));
    }
    Resource::post(TOKEN_PATH).form(fields).anonymous()
}

/// Resource-owner password grant (`login`).
pub fn password_grant(
    client: &ClientAuth,
    username: &str,
    password: &SecretString,
    lifetime: Option<Duration>,
) -> Resource {
    let mut fields = client.fields(GRANT_PASSWORD);
    fields.push(("username".into(), username.to_owned()));
    fields.push(("password".into(), password.expose_secret().to_owned()));
    token_request(fields, lifetime)
}

/// Second step of a multi-factor login.
pub fn mfa_otp_grant(client: &ClientAuth, mfa_token: &str, otp: &str) -> Resource {
    let mut fields = client.fields(GRANT_MFA_OTP);
    fields.push(("mfa_token".into(), mfa_token.to_owned()));
    fields.push(("otp".into(), otp.to_owned()));
    token_request(fields, None)
}

/// Client-credentials grant for product/customer integrations.
pub fn client_credentials_grant(client: &ClientAuth, lifetime: Option<Duration>) -> Resource {
    token_request(client.fields(GRANT_CLIENT_CREDENTIALS), lifetime)
}

/// Renew with a refresh token.
pub fn refresh_grant(client: &ClientAuth, refresh_token: &SecretString) -> Resource {
    let mut fields = client.fields(GRANT_REFRESH);
    fields.push((
        "refresh_token".into(),
        refresh_token.expose_secret().to_owned(),
    ));
    token_request(fields, None)
}

/// Invalidate the bearer token the request is sent with.
pub fn revoke_current() -> Resource {
    Resource::delete(CURRENT_TOKEN_PATH)
}
