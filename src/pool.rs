//! Server Pool / Router
//!
//! Holds the configured server list and deterministically maps each key to
//! exactly one server. Routing is a pure function of the key bytes, so the
//! same key lands on the same server for the lifetime of the pool and keys
//! spread roughly evenly across the cluster.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{ClientConfig, ServerAddr};
use crate::connection::{AuthHook, Connection, ConnectionState, PlainAuth};
use crate::error::{McError, Result};
use crate::protocol::ResponseFrame;

// =============================================================================
// Server node
// =============================================================================

/// One configured server: its identity plus its single connection.
///
/// The mutex is the per-connection exclusion discipline: two callers never
/// interleave requests on the same socket.
pub struct ServerNode {
    addr: ServerAddr,
    conn: Mutex<Connection>,
}

impl ServerNode {
    fn new(addr: ServerAddr, config: &ClientConfig, auth: Option<Arc<dyn AuthHook>>) -> Self {
        let conn = Connection::new(addr.clone(), config, auth);
        Self {
            addr,
            conn: Mutex::new(conn),
        }
    }

    /// Server identity (as configured)
    pub fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    /// Run one logical exchange against this server's connection.
    ///
    /// Connects lazily. If the closure fails with a transport error, the
    /// connection is faulted, reconnected, and the closure re-run exactly
    /// once; a second failure surfaces as a connection error naming the
    /// server.
    pub fn with_conn<T>(&self, op: impl Fn(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        conn.ensure_connected()
            .map_err(|e| self.connection_error(e))?;

        match op(&mut conn) {
            Err(e) if e.is_transport() => {
                tracing::warn!("exchange with {} failed ({}), retrying once", self.addr, e);
                conn.fault();
                conn.ensure_connected()
                    .map_err(|e| self.connection_error(e))?;
                match op(&mut conn) {
                    // Only transport failures get the server-naming wrap;
                    // anything else keeps its kind, same as the first try
                    Err(e) if e.is_transport() => Err(self.connection_error(e)),
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Send one pre-encoded request and read its response, with the single
    /// reconnect-retry of `with_conn`.
    pub fn request(&self, bytes: &[u8]) -> Result<ResponseFrame> {
        self.with_conn(|conn| {
            conn.send(bytes)?;
            conn.receive()
        })
    }

    /// Forcibly close this server's connection
    pub fn disconnect(&self) {
        self.conn.lock().disconnect();
    }

    /// Current connection state (mainly for diagnostics and tests)
    pub fn connection_state(&self) -> ConnectionState {
        self.conn.lock().state()
    }

    fn connection_error(&self, e: McError) -> McError {
        match e {
            McError::Auth(_) | McError::Config(_) => e,
            other => McError::Connection(format!("{}: {}", self.addr, other)),
        }
    }
}

// =============================================================================
// Pool
// =============================================================================

/// The configured cluster: ordered server list plus the key router
pub struct ServerPool {
    servers: Vec<ServerNode>,
}

impl ServerPool {
    /// Build the pool from configuration. Installs the default SASL PLAIN
    /// hook when credentials are present and no custom hook was given.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        if config.servers.is_empty() {
            return Err(McError::Config(
                "at least one server address is required".to_string(),
            ));
        }

        let auth: Option<Arc<dyn AuthHook>> = match (&config.auth_hook, &config.credentials) {
            (Some(hook), _) => Some(hook.clone()),
            (None, Some(creds)) => Some(Arc::new(PlainAuth::new(creds.clone()))),
            (None, None) => None,
        };

        let servers = config
            .servers
            .iter()
            .map(|addr| ServerNode::new(addr.clone(), config, auth.clone()))
            .collect();
        Ok(Self { servers })
    }

    /// All configured servers, in configuration order
    pub fn servers(&self) -> &[ServerNode] {
        &self.servers
    }

    /// Index of the server owning `key`
    pub fn route_index(&self, key: &[u8]) -> usize {
        route_key(key, self.servers.len())
    }

    /// The server owning `key`
    pub fn route(&self, key: &[u8]) -> &ServerNode {
        &self.servers[self.route_index(key)]
    }

    /// Group keys by destination server, preserving key order per server.
    ///
    /// Returns, per server index, the indices into `keys` routed there;
    /// servers with no keys get an empty list.
    pub fn route_multi<K: AsRef<[u8]>>(&self, keys: &[K]) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.servers.len()];
        for (i, key) in keys.iter().enumerate() {
            groups[self.route_index(key.as_ref())].push(i);
        }
        groups
    }

    /// Forcibly close every connection; subsequent commands reconnect
    pub fn disconnect_all(&self) {
        for server in &self.servers {
            server.disconnect();
        }
    }
}

/// Route a key to a server index using FNV-1a.
///
/// Single-server pools short-circuit to 0.
fn route_key(key: &[u8], server_count: usize) -> usize {
    if server_count <= 1 {
        return 0;
    }
    (fnv1a(key) as usize) % server_count
}

/// FNV-1a hash (32-bit)
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
