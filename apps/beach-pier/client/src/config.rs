use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::connection::ReconnectPolicy;
use crate::identity::{ClientIdentity, FileStore, IdentityStore, MemoryStore, StoreError};

pub const SERVER_ENV: &str = "BEACH_PIER_SERVER";
pub const STATE_FILE_ENV: &str = "BEACH_PIER_STATE_FILE";
pub const MAX_RECONNECTS_ENV: &str = "BEACH_PIER_MAX_RECONNECTS";
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server url {url:?}: {reason}")]
    InvalidServer { url: String, reason: String },
    #[error("unsupported scheme {0:?}; expected http, https, ws or wss")]
    UnsupportedScheme(String),
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
    #[error("identity storage: {0}")]
    Store(#[from] StoreError),
}

/// Base address of the chat server.
///
/// Stored in its HTTP form; the socket address is derived so that `http`
/// maps to `ws` and `https` to `wss`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    base: Url,
}

impl ServerEndpoint {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_owned()
        } else {
            format!("http://{trimmed}")
        };
        let invalid = |reason: String| ConfigError::InvalidServer {
            url: raw.to_owned(),
            reason,
        };
        let mut base = Url::parse(&with_scheme).map_err(|err| invalid(err.to_string()))?;

        let http_scheme = match base.scheme() {
            "http" | "ws" => "http",
            "https" | "wss" => "https",
            other => return Err(ConfigError::UnsupportedScheme(other.to_owned())),
        };
        base.set_scheme(http_scheme)
            .map_err(|_| invalid("cannot change scheme".into()))?;

        // Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
        if base.host_str() == Some("localhost") {
            base.set_host(Some("127.0.0.1"))
                .map_err(|err| invalid(err.to_string()))?;
        }
        base.set_query(None);
        base.set_fragment(None);
        let path = base.path().trim_end_matches('/').to_owned();
        base.set_path(&path);
        Ok(Self { base })
    }

    pub fn is_secure(&self) -> bool {
        self.base.scheme() == "https"
    }

    /// `<ws|wss>://<host>/ws/<client_id>`
    pub fn websocket_url(&self, client: &ClientIdentity) -> Url {
        let mut url = self.join(&format!("ws/{}", client.as_str()));
        let scheme = if self.is_secure() { "wss" } else { "ws" };
        // http(s) -> ws(s) stays within the special schemes and cannot fail.
        let _ = url.set_scheme(scheme);
        url
    }

    pub fn http_url(&self, path: &str) -> Url {
        self.join(path)
    }

    fn join(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}/{}", path.trim_start_matches('/')));
        url
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base.as_str().trim_end_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct PierConfig {
    pub server: ServerEndpoint,
    /// Identity file; `None` resolves to `~/.beach/pier/state.toml`.
    pub state_file: Option<PathBuf>,
    /// Keep the client id in memory only.
    pub ephemeral: bool,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
}

impl PierConfig {
    pub fn new(server: ServerEndpoint) -> Self {
        Self {
            server,
            state_file: None,
            ephemeral: false,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server = env::var(SERVER_ENV).unwrap_or_else(|_| DEFAULT_SERVER.to_string());
        let mut config = Self::new(ServerEndpoint::parse(&server)?);
        config.state_file = env::var_os(STATE_FILE_ENV).map(PathBuf::from);
        if let Ok(raw) = env::var(MAX_RECONNECTS_ENV) {
            config.reconnect.max_attempts =
                raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    var: MAX_RECONNECTS_ENV,
                    value: raw.clone(),
                })?;
        }
        Ok(config)
    }

    pub fn identity_store(&self) -> Result<IdentityStore, ConfigError> {
        if self.ephemeral {
            return Ok(IdentityStore::new(Arc::new(MemoryStore::new())));
        }
        let path = match &self.state_file {
            Some(path) => path.clone(),
            None => FileStore::default_path()?,
        };
        Ok(IdentityStore::new(Arc::new(FileStore::new(path))))
    }
}

impl Default for PierConfig {
    fn default() -> Self {
        Self::new(ServerEndpoint::parse(DEFAULT_SERVER).expect("default server url is valid"))
    }
}
