//! Connection Manager
//!
//! One persistent socket per server, connected lazily and reconnected
//! transparently after a fault. The exchange discipline is strictly
//! synchronous: a request's response is fully drained before the next
//! request goes out on the same connection.

use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ClientConfig, Credentials, ServerAddr};
use crate::error::{McError, Result};
use crate::protocol::{read_response, write_request, Opcode, ResponseFrame, Status};

// =============================================================================
// Transport
// =============================================================================

/// A connected socket, TCP or unix-domain, behind one interface
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    /// Open a socket to `addr`, honoring the connect timeout for TCP
    fn connect(addr: &ServerAddr, connect_timeout: Option<Duration>) -> Result<Stream> {
        match addr {
            ServerAddr::Tcp(host_port) => {
                let sock_addr = host_port
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| {
                        McError::Connection(format!("{}: address resolved to nothing", host_port))
                    })?;
                let stream = match connect_timeout {
                    Some(t) => TcpStream::connect_timeout(&sock_addr, t)?,
                    None => TcpStream::connect(sock_addr)?,
                };
                // Disable Nagle's algorithm for low latency
                stream.set_nodelay(true)?;
                Ok(Stream::Tcp(stream))
            }
            #[cfg(unix)]
            ServerAddr::Unix(path) => Ok(Stream::Unix(UnixStream::connect(path)?)),
            #[cfg(not(unix))]
            ServerAddr::Unix(path) => Err(McError::Config(format!(
                "unix socket {} is not supported on this platform",
                path.display()
            ))),
        }
    }

    /// Clone the handle so reads and writes get separate buffers
    fn try_clone(&self) -> Result<Stream> {
        match self {
            Stream::Tcp(s) => Ok(Stream::Tcp(s.try_clone()?)),
            #[cfg(unix)]
            Stream::Unix(s) => Ok(Stream::Unix(s.try_clone()?)),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match self {
            Stream::Tcp(s) => s.set_read_timeout(timeout)?,
            #[cfg(unix)]
            Stream::Unix(s) => s.set_read_timeout(timeout)?,
        }
        Ok(())
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match self {
            Stream::Tcp(s) => s.set_write_timeout(timeout)?,
            #[cfg(unix)]
            Stream::Unix(s) => s.set_write_timeout(timeout)?,
        }
        Ok(())
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
        }
    }
}

// =============================================================================
// Authentication hook
// =============================================================================

/// Channel handed to the authentication hook on a fresh connection.
///
/// Only frame round-trips are exposed; the hook cannot touch connection
/// state.
pub struct AuthChannel<'a> {
    reader: &'a mut BufReader<Stream>,
    writer: &'a mut BufWriter<Stream>,
}

impl AuthChannel<'_> {
    /// Send one request frame and read its response
    pub fn round_trip(&mut self, opcode: Opcode, key: &[u8], body: &[u8]) -> Result<ResponseFrame> {
        write_request(self.writer, opcode, key, &[], body, 0, 0)?;
        self.writer.flush()?;
        read_response(self.reader)
    }
}

/// Authentication exchange run once per fresh connection, before any
/// application command is sent on it.
pub trait AuthHook: Send + Sync {
    fn authenticate(&self, channel: &mut AuthChannel<'_>) -> Result<()>;
}

/// SASL PLAIN authentication: `\0username\0secret` under mechanism `PLAIN`.
///
/// Servers built without SASL answer UnknownCommand/NotSupported; that is
/// treated as "authentication not required" rather than a failure, matching
/// how deployments mix authenticated and open servers.
pub struct PlainAuth {
    credentials: Credentials,
}

impl PlainAuth {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl AuthHook for PlainAuth {
    fn authenticate(&self, channel: &mut AuthChannel<'_>) -> Result<()> {
        let mut body = Vec::with_capacity(
            2 + self.credentials.username.len() + self.credentials.secret.len(),
        );
        body.push(0);
        body.extend_from_slice(self.credentials.username.as_bytes());
        body.push(0);
        body.extend_from_slice(self.credentials.secret.as_bytes());

        let frame = channel.round_trip(Opcode::SaslAuth, b"PLAIN", &body)?;
        match frame.status {
            Status::Ok => Ok(()),
            Status::UnknownCommand | Status::NotSupported => {
                tracing::debug!("server does not require authentication");
                Ok(())
            }
            Status::AuthError | Status::AuthContinue => Err(McError::Auth(format!(
                "server rejected SASL PLAIN credentials ({:?})",
                frame.status
            ))),
            other => Err(McError::Auth(format!(
                "unexpected status during authentication: {:?}",
                other
            ))),
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; next use connects
    Disconnected,

    /// Live socket, ready for an exchange
    Connected,

    /// A send/receive failed; next use reconnects
    Faulted,
}

/// The socket owned by one server: buffered reader/writer halves plus the
/// state machine driving lazy connect and reconnect-on-fault.
pub struct Connection {
    addr: ServerAddr,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    auth: Option<Arc<dyn AuthHook>>,
    state: ConnectionState,
    io: Option<ConnIo>,
}

struct ConnIo {
    reader: BufReader<Stream>,
    writer: BufWriter<Stream>,
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Connection {
    /// Create a connection in the `Disconnected` state; no socket is opened
    /// until the first exchange.
    pub fn new(addr: ServerAddr, config: &ClientConfig, auth: Option<Arc<dyn AuthHook>>) -> Self {
        Self {
            addr,
            connect_timeout: millis(config.connect_timeout_ms),
            read_timeout: millis(config.read_timeout_ms),
            write_timeout: millis(config.write_timeout_ms),
            auth,
            state: ConnectionState::Disconnected,
            io: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connect if `Disconnected` or `Faulted`; no-op when already live
    pub fn ensure_connected(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected && self.io.is_some() {
            return Ok(());
        }
        self.connect()
    }

    fn connect(&mut self) -> Result<()> {
        self.io = None;

        let stream = Stream::connect(&self.addr, self.connect_timeout)?;
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_write_timeout(self.write_timeout)?;

        let read_half = stream.try_clone()?;
        let mut io = ConnIo {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(stream),
        };

        // Auth runs on the fresh socket before any application command
        if let Some(auth) = self.auth.clone() {
            let mut channel = AuthChannel {
                reader: &mut io.reader,
                writer: &mut io.writer,
            };
            if let Err(e) = auth.authenticate(&mut channel) {
                tracing::warn!("authentication with {} failed: {}", self.addr, e);
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        }

        tracing::debug!("connected to {}", self.addr);
        self.io = Some(io);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// Tear down the socket explicitly; next use reconnects
    pub fn disconnect(&mut self) {
        if self.io.take().is_some() {
            tracing::debug!("disconnected from {}", self.addr);
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Mark the connection as failed; next use reconnects
    pub fn fault(&mut self) {
        self.io = None;
        self.state = ConnectionState::Faulted;
    }

    /// Write pre-encoded request bytes and flush.
    ///
    /// An I/O failure (timeouts included) faults the connection.
    pub fn send(&mut self, request: &[u8]) -> Result<()> {
        let io = self.live_io()?;
        let sent = io
            .writer
            .write_all(request)
            .and_then(|_| io.writer.flush());
        if let Err(e) = sent {
            self.fault();
            return Err(e.into());
        }
        Ok(())
    }

    /// Read one response frame.
    ///
    /// Both I/O failures and malformed frames fault the connection; a
    /// desynchronized stream is not recoverable in place.
    pub fn receive(&mut self) -> Result<ResponseFrame> {
        let io = self.live_io()?;
        match read_response(&mut io.reader) {
            Ok(frame) => {
                tracing::trace!(
                    "{} <- {:?} {:?} opaque={}",
                    self.addr,
                    frame.opcode,
                    frame.status,
                    frame.opaque
                );
                Ok(frame)
            }
            Err(e) => {
                self.fault();
                Err(e)
            }
        }
    }

    fn live_io(&mut self) -> Result<&mut ConnIo> {
        self.io.as_mut().ok_or_else(|| {
            McError::Connection(format!("{}: connection is not established", self.addr))
        })
    }
}
