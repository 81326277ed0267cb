//! Configuration for mcbin
//!
//! Centralized client configuration with sensible defaults.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::connection::AuthHook;
use crate::error::{McError, Result};

/// Address of one cache server.
///
/// Both transports are handled uniformly by the connection manager; a key
/// routed to a server neither knows nor cares which transport carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddr {
    /// TCP endpoint as `host:port`
    Tcp(String),

    /// Local filesystem socket path (unix only)
    Unix(PathBuf),
}

impl ServerAddr {
    /// Parse a server address from a string.
    ///
    /// Anything starting with `/` or prefixed `unix:` is a filesystem
    /// socket path; everything else is `host:port`.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix("unix:") {
            return Ok(ServerAddr::Unix(PathBuf::from(path)));
        }
        if s.starts_with('/') {
            return Ok(ServerAddr::Unix(PathBuf::from(s)));
        }
        if !s.contains(':') {
            return Err(McError::Config(format!(
                "invalid server address '{}': expected host:port or a socket path",
                s
            )));
        }
        Ok(ServerAddr::Tcp(s.to_string()))
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerAddr::Tcp(addr) => write!(f, "{}", addr),
            ServerAddr::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Credentials consumed by the authentication hook
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Identity (SASL username)
    pub username: String,

    /// Secret (SASL password)
    pub secret: String,
}

/// Main configuration for a client instance
#[derive(Clone)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Cluster Configuration
    // -------------------------------------------------------------------------
    /// Ordered list of server addresses; key routing is stable for the
    /// lifetime of the pool, so order matters.
    pub servers: Vec<ServerAddr>,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Socket connect timeout (milliseconds)
    pub connect_timeout_ms: u64,

    /// Socket read timeout (milliseconds, 0 = no timeout)
    pub read_timeout_ms: u64,

    /// Socket write timeout (milliseconds, 0 = no timeout)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Authentication Configuration
    // -------------------------------------------------------------------------
    /// Optional credentials; when set, the auth hook runs on every fresh
    /// connection before any application command.
    pub credentials: Option<Credentials>,

    /// Custom authentication hook. Overrides the default SASL PLAIN
    /// exchange built from `credentials`.
    pub auth_hook: Option<Arc<dyn AuthHook>>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("servers", &self.servers)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("write_timeout_ms", &self.write_timeout_ms)
            .field("credentials", &self.credentials.is_some())
            .field("auth_hook", &self.auth_hook.is_some())
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            connect_timeout_ms: 5000,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            credentials: None,
            auth_hook: None,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
    parse_error: Option<McError>,
}

impl ClientConfigBuilder {
    /// Add one server (`host:port`, `unix:/path`, or `/path`)
    pub fn server(mut self, addr: &str) -> Self {
        match ServerAddr::parse(addr) {
            Ok(a) => self.config.servers.push(a),
            Err(e) => self.parse_error = Some(e),
        }
        self
    }

    /// Add several servers at once
    pub fn servers<'a>(mut self, addrs: impl IntoIterator<Item = &'a str>) -> Self {
        for addr in addrs {
            self = self.server(addr);
        }
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the read timeout (in milliseconds, 0 = none)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds, 0 = none)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the credentials for the authentication hook
    pub fn credentials(mut self, username: impl Into<String>, secret: impl Into<String>) -> Self {
        self.config.credentials = Some(Credentials {
            username: username.into(),
            secret: secret.into(),
        });
        self
    }

    /// Install a custom authentication hook
    pub fn auth_hook(mut self, hook: Arc<dyn AuthHook>) -> Self {
        self.config.auth_hook = Some(hook);
        self
    }

    /// Validate and produce the final configuration
    pub fn build(self) -> Result<ClientConfig> {
        if let Some(e) = self.parse_error {
            return Err(e);
        }
        if self.config.servers.is_empty() {
            return Err(McError::Config(
                "at least one server address is required".to_string(),
            ));
        }
        Ok(self.config)
    }
}
