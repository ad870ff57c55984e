//! Application configuration loaded from environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Credentials used to sign channel subscriptions for the hosted pub/sub app.
#[derive(Debug, Clone)]
pub struct SigningCredentials {
    pub app_id: String,
    pub key: String,
    pub secret: String,
    pub cluster: String,
}

/// Auth server configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g. `0.0.0.0:3000`).
    pub server_addr: SocketAddr,
    /// Shared password every client must present.
    pub password: String,
    /// `None` when any of the `PUSHER_*` variables is missing; auth requests then fail with 500.
    pub credentials: Option<SigningCredentials>,
    /// `PUSHER_*` variables that were unset or empty, for logging once tracing is up.
    pub missing_credentials: Vec<&'static str>,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let server_addr = std::env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let server_addr: SocketAddr = server_addr
            .parse()
            .map_err(|_| ConfigLoadError::InvalidServerAddr)?;

        let password = std::env::var("PASSWORD").unwrap_or_default();
        let (credentials, missing_credentials) =
            signing_credentials(|name| std::env::var(name).ok());
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            server_addr,
            password,
            credentials,
            missing_credentials,
            log_level,
        })
    }
}

const CREDENTIAL_VARS: [&str; 4] = ["PUSHER_APP_ID", "PUSHER_KEY", "PUSHER_SECRET", "PUSHER_CLUSTER"];

fn signing_credentials(
    lookup: impl Fn(&str) -> Option<String>,
) -> (Option<SigningCredentials>, Vec<&'static str>) {
    let mut missing = Vec::new();
    let values = CREDENTIAL_VARS.map(|name| {
        let value = lookup(name).filter(|v| !v.is_empty());
        if value.is_none() {
            missing.push(name);
        }
        value.unwrap_or_default()
    });
    if !missing.is_empty() {
        return (None, missing);
    }
    let [app_id, key, secret, cluster] = values;
    (
        Some(SigningCredentials {
            app_id,
            key,
            secret,
            cluster,
        }),
        missing,
    )
}

/// Client-side settings for the presence subscription demo.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Public app key of the pub/sub service.
    pub key: String,
    pub cluster: String,
    /// Overrides `ws-{cluster}.pusher.com` (e.g. `127.0.0.1:6001` for a local service).
    pub host: Option<String>,
    pub use_tls: bool,
    /// URL of the auth endpoint served by this crate's server.
    pub auth_endpoint: String,
    /// How long a subscription may stay in `Connecting` before a timeout error is emitted.
    pub auth_timeout: Duration,
    pub channel: String,
    /// Directory holding the file-backed session storage.
    pub identity_dir: PathBuf,
    pub log_level: String,
}

impl ClientConfig {
    /// Load client configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let key = std::env::var("PUSHER_KEY").map_err(|_| ConfigLoadError::Missing("PUSHER_KEY"))?;
        let cluster = std::env::var("PUSHER_CLUSTER").unwrap_or_else(|_| "us2".to_string());
        let host = std::env::var("PUSHER_HOST").ok().filter(|h| !h.is_empty());
        let use_tls = match std::env::var("PUSHER_TLS") {
            Ok(v) => parse_bool(&v).ok_or(ConfigLoadError::Invalid("PUSHER_TLS"))?,
            Err(_) => true,
        };
        let auth_endpoint = std::env::var("AUTH_ENDPOINT")
            .unwrap_or_else(|_| "http://127.0.0.1:3000/pusher/auth".to_string());
        let auth_timeout = match std::env::var("AUTH_TIMEOUT_MS") {
            Ok(v) => Duration::from_millis(
                v.parse()
                    .map_err(|_| ConfigLoadError::Invalid("AUTH_TIMEOUT_MS"))?,
            ),
            Err(_) => Duration::from_secs(10),
        };
        let channel = std::env::var("CHANNEL").unwrap_or_else(|_| "presence-main".to_string());
        let identity_dir = std::env::var("IDENTITY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            key,
            cluster,
            host,
            use_tls,
            auth_endpoint,
            auth_timeout,
            channel,
            identity_dir,
            log_level,
        })
    }

    /// Host serving the WebSocket endpoint.
    pub fn ws_host(&self) -> String {
        self.host
            .clone()
            .unwrap_or_else(|| format!("ws-{}.pusher.com", self.cluster))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid SERVER_ADDR")]
    InvalidServerAddr,
    #[error("Missing {0}")]
    Missing(&'static str),
    #[error("Invalid {0}")]
    Invalid(&'static str),
}
