use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::oauth::TokenResponse;

/// A bearer access token.
///
/// Immutable once issued: a refresh produces a new `Credential`, logout
/// drops it. The raw token is only reachable through
/// [`expose_token()`](Self::expose_token); `Debug` prints a short suffix.
#[derive(Clone)]
pub struct Credential {
    token: SecretString,
    expires_at: Option<DateTime<Utc>>,
    scopes: BTreeSet<String>,
    refresh_token: Option<SecretString>,
}

impl Credential {
    /// A non-expiring credential with no scopes.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_at: None,
            scopes: BTreeSet::new(),
            refresh_token: None,
        }
    }

    /// Build from an OAuth token-endpoint response received at `now`.
    ///
    /// An `expires_in` of zero (or absent) means the token never expires.
    pub fn from_token_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        let expires_at = response
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(|secs| now.checked_add_signed(chrono::Duration::seconds(secs)));
        let scopes = response
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();

        Self {
            token: SecretString::from(response.access_token),
            expires_at,
            scopes,
            refresh_token: response.refresh_token.map(SecretString::from),
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the expiry relative to now.
    pub fn expires_in(self, lifetime: Duration) -> Self {
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.with_expiry(expires_at)
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::from(refresh_token.into()));
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn expose_token(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    /// Last four characters of the token, safe for diagnostics.
    pub fn token_suffix(&self) -> String {
        let token = self.token.expose_secret();
        let start = token
            .char_indices()
            .rev()
            .nth(3)
            .map_or(0, |(idx, _)| idx);
        format!("…{}", &token[start..])
    }

    /// `true` when the token expires within `leeway` of `now`.
    /// Credentials without an expiry never expire.
    pub fn is_expired(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let leeway = chrono::Duration::from_std(leeway).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(leeway)
            .is_none_or(|deadline| deadline >= expires_at)
    }

    /// Whether both credentials carry the same access token.
    pub fn same_token(&self, other: &Credential) -> bool {
        self.token.expose_secret() == other.token.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.token_suffix())
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("refreshable", &self.refresh_token.is_some())
            .finish()
    }
}
