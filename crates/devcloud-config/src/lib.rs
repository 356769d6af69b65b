//! Configuration profiles for devcloud applications.
//!
//! TOML profiles, access-token resolution (env + plaintext), and
//! translation to `devcloud_core::SessionConfig`. The application decides
//! where a token is persisted; this crate only reads it back so a session
//! can be restored at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use devcloud_api::{ClientAuth, Credential, TlsMode, TransportConfig};
use devcloud_core::SessionConfig;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable consulted when a profile names none of its own.
pub const ACCESS_TOKEN_ENV: &str = "DEVCLOUD_ACCESS_TOKEN";

const ENV_PREFIX: &str = "DEVCLOUD_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    UnknownProfile { profile: String },

    #[error("no access token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, falling back to `default_profile`, then `"default"`.
    pub fn profile<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

/// Values a profile inherits when it does not set its own.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_api_url() -> String {
    devcloud_core::config::DEFAULT_API_URL.into()
}
fn default_timeout() -> u64 {
    30
}

/// A named account profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Cloud API base URL. Falls back to `defaults.api_url`.
    pub api_url: Option<String>,

    /// OAuth client id. Falls back to the public SDK client.
    pub client_id: Option<String>,

    /// OAuth client secret (plaintext).
    pub client_secret: Option<String>,

    /// Account the profile logs in as.
    pub username: Option<String>,

    /// Access token (plaintext; prefer an env var).
    pub access_token: Option<String>,

    /// Environment variable name containing the access token.
    pub access_token_env: Option<String>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override `defaults.insecure`.
    pub insecure: Option<bool>,

    /// Override `defaults.timeout` (seconds).
    pub timeout: Option<u64>,

    /// Lifetime to request for new tokens (seconds).
    pub token_lifetime: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "devcloud", "devcloud").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("devcloud");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. A missing file is not an error; defaults
/// and `DEVCLOUD_*` env vars still apply (`DEVCLOUD_DEFAULTS__TIMEOUT=10`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a persisted access token: the env var named by the profile,
/// then [`ACCESS_TOKEN_ENV`], then the plaintext value in the profile.
pub fn resolve_access_token(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.access_token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Ok(val) = std::env::var(ACCESS_TOKEN_ENV) {
        return Ok(SecretString::from(val));
    }

    if let Some(ref token) = profile.access_token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// A credential for `Session::restore` built from the resolved token.
/// Expiry is unknown here; the server's 401 is the authority.
pub fn restore_credential(
    profile: &Profile,
    profile_name: &str,
) -> Result<Credential, ConfigError> {
    let token = resolve_access_token(profile, profile_name)?;
    Ok(Credential::new(token.expose_secret()))
}

/// The account a profile logs in as, for `Session::login`.
pub fn resolve_username<'a>(
    profile: &'a Profile,
    profile_name: &str,
) -> Result<&'a str, ConfigError> {
    profile
        .username
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ConfigError::Validation {
            field: "username".into(),
            reason: format!("profile '{profile_name}' has no username"),
        })
}

/// The OAuth client a profile identifies as.
pub fn resolve_client(profile: &Profile) -> ClientAuth {
    match (&profile.client_id, &profile.client_secret) {
        (Some(id), Some(secret)) => ClientAuth::new(id.clone(), secret.clone()),
        (Some(id), None) => ClientAuth::new(id.clone(), String::new()),
        _ => ClientAuth::default(),
    }
}

/// Build a `SessionConfig` from a profile and the global defaults.
pub fn profile_to_session_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    let raw_url = profile.api_url.as_deref().unwrap_or(&defaults.api_url);
    let api_url: url::Url = raw_url.parse().map_err(|_| ConfigError::Validation {
        field: "api_url".into(),
        reason: format!("invalid URL: {raw_url}"),
    })?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    let timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    if timeout.is_zero() {
        return Err(ConfigError::Validation {
            field: "timeout".into(),
            reason: "must be at least 1 second".into(),
        });
    }

    Ok(SessionConfig {
        api_url,
        client: resolve_client(profile),
        token_lifetime: profile.token_lifetime.map(Duration::from_secs),
        transport: TransportConfig {
            tls,
            timeout,
            ..TransportConfig::default()
        },
        ..SessionConfig::default()
    })
}
