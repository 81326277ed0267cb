//! In-process mock memcached server
//!
//! Speaks the subset of the binary protocol the client exercises, with real
//! CAS token bookkeeping, so the integration tests run without an external
//! memcached. State is process-local and per-server, which also makes the
//! multi-server routing tests observable.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{TcpListener, TcpStream};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

const REQUEST_MAGIC: u8 = 0x80;
const RESPONSE_MAGIC: u8 = 0x81;

const OP_GET: u8 = 0x00;
const OP_SET: u8 = 0x01;
const OP_ADD: u8 = 0x02;
const OP_REPLACE: u8 = 0x03;
const OP_DELETE: u8 = 0x04;
const OP_INCR: u8 = 0x05;
const OP_DECR: u8 = 0x06;
const OP_FLUSH: u8 = 0x08;
const OP_NOOP: u8 = 0x0a;
const OP_GETK: u8 = 0x0c;
const OP_GETKQ: u8 = 0x0d;
const OP_STAT: u8 = 0x10;
const OP_SASL_AUTH: u8 = 0x21;

const ST_OK: u16 = 0x0000;
const ST_NOT_FOUND: u16 = 0x0001;
const ST_EXISTS: u16 = 0x0002;
const ST_AUTH_ERROR: u16 = 0x0020;
const ST_UNKNOWN_COMMAND: u16 = 0x0081;

#[derive(Clone)]
struct Item {
    flags: u32,
    data: Vec<u8>,
    cas: u64,
}

struct Store {
    items: Mutex<HashMap<Vec<u8>, Item>>,
    next_cas: AtomicU64,
    credentials: Option<(String, String)>,
    session_epoch: AtomicU64,
}

impl Store {
    fn new(credentials: Option<(String, String)>) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            next_cas: AtomicU64::new(1),
            credentials,
            session_epoch: AtomicU64::new(0),
        }
    }

    fn fresh_cas(&self) -> u64 {
        self.next_cas.fetch_add(1, Ordering::SeqCst)
    }
}

/// A running mock server; connections are served until the test process
/// exits.
pub struct MockServer {
    addr: String,
    store: Arc<Store>,
}

impl MockServer {
    pub fn start() -> Self {
        Self::start_inner(None)
    }

    pub fn start_with_credentials(username: &str, password: &str) -> Self {
        Self::start_inner(Some((username.to_string(), password.to_string())))
    }

    fn start_inner(credentials: Option<(String, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("local addr").to_string();
        let store = Arc::new(Store::new(credentials));

        let accept_store = store.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let store = accept_store.clone();
                thread::spawn(move || serve_tcp(stream, store));
            }
        });

        Self { addr, store }
    }

    #[cfg(unix)]
    pub fn start_unix(path: &Path) -> Self {
        let listener = UnixListener::bind(path).expect("bind unix mock server");
        let addr = path.display().to_string();
        let store = Arc::new(Store::new(None));

        let accept_store = store.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let store = accept_store.clone();
                thread::spawn(move || serve_unix(stream, store));
            }
        });

        Self { addr, store }
    }

    /// Address string suitable for `ClientConfig::builder().server(...)`
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of items currently stored on this server
    pub fn item_count(&self) -> usize {
        self.store.items.lock().unwrap().len()
    }

    /// Drop every live connection at its next request, without answering
    /// it, like a server restarting under the client. Connections accepted
    /// afterwards serve normally.
    pub fn drop_live_connections(&self) {
        self.store.session_epoch.fetch_add(1, Ordering::SeqCst);
    }
}

fn serve_tcp(stream: TcpStream, store: Arc<Store>) {
    let reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let writer = BufWriter::new(stream);
    serve(reader, writer, store);
}

#[cfg(unix)]
fn serve_unix(stream: UnixStream, store: Arc<Store>) {
    let reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let writer = BufWriter::new(stream);
    serve(reader, writer, store);
}

struct Request {
    opcode: u8,
    opaque: u32,
    cas: u64,
    extras: Vec<u8>,
    key: Vec<u8>,
    value: Vec<u8>,
}

fn serve<R: Read, W: Write>(mut reader: R, mut writer: W, store: Arc<Store>) {
    let epoch = store.session_epoch.load(Ordering::SeqCst);
    while let Some(request) = read_request(&mut reader) {
        if store.session_epoch.load(Ordering::SeqCst) != epoch {
            // The connection was severed; close without answering
            return;
        }
        handle(&request, &mut writer, &store);
        if writer.flush().is_err() {
            // Client went away mid-exchange
            return;
        }
    }
}

fn read_request<R: Read>(reader: &mut R) -> Option<Request> {
    let mut header = [0u8; 24];
    reader.read_exact(&mut header).ok()?;
    assert_eq!(header[0], REQUEST_MAGIC, "mock server got bad magic");

    let opcode = header[1];
    let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let extras_len = header[4] as usize;
    let total_body = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    let opaque = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
    let cas = u64::from_be_bytes(header[16..24].try_into().unwrap());

    let mut body = vec![0u8; total_body];
    reader.read_exact(&mut body).ok()?;
    let value = body.split_off(extras_len + key_len);
    let key = body.split_off(extras_len);

    Some(Request {
        opcode,
        opaque,
        cas,
        extras: body,
        key,
        value,
    })
}

fn write_response<W: Write>(
    writer: &mut W,
    opcode: u8,
    status: u16,
    opaque: u32,
    cas: u64,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
) {
    let total_body = (extras.len() + key.len() + value.len()) as u32;
    let mut frame = Vec::with_capacity(24 + total_body as usize);
    frame.push(RESPONSE_MAGIC);
    frame.push(opcode);
    frame.extend_from_slice(&(key.len() as u16).to_be_bytes());
    frame.push(extras.len() as u8);
    frame.push(0);
    frame.extend_from_slice(&status.to_be_bytes());
    frame.extend_from_slice(&total_body.to_be_bytes());
    frame.extend_from_slice(&opaque.to_be_bytes());
    frame.extend_from_slice(&cas.to_be_bytes());
    frame.extend_from_slice(extras);
    frame.extend_from_slice(key);
    frame.extend_from_slice(value);
    // A vanished client surfaces at the post-request flush
    let _ = writer.write_all(&frame);
}

fn handle<W: Write>(req: &Request, writer: &mut W, store: &Store) {
    match req.opcode {
        OP_GET | OP_GETK | OP_GETKQ => handle_get(req, writer, store),
        OP_SET | OP_ADD | OP_REPLACE => handle_store(req, writer, store),
        OP_DELETE => handle_delete(req, writer, store),
        OP_INCR | OP_DECR => handle_counter(req, writer, store),
        OP_FLUSH => {
            store.items.lock().unwrap().clear();
            write_response(writer, req.opcode, ST_OK, req.opaque, 0, &[], &[], &[]);
        }
        OP_NOOP => {
            write_response(writer, req.opcode, ST_OK, req.opaque, 0, &[], &[], &[]);
        }
        OP_STAT => handle_stat(req, writer, store),
        OP_SASL_AUTH => handle_auth(req, writer, store),
        other => {
            write_response(writer, other, ST_UNKNOWN_COMMAND, req.opaque, 0, &[], &[], &[]);
        }
    }
}

fn handle_get<W: Write>(req: &Request, writer: &mut W, store: &Store) {
    let items = store.items.lock().unwrap();
    match items.get(&req.key) {
        Some(item) => {
            let extras = item.flags.to_be_bytes();
            let key: &[u8] = if req.opcode == OP_GET { &[] } else { &req.key };
            write_response(
                writer, req.opcode, ST_OK, req.opaque, item.cas, &extras, key, &item.data,
            );
        }
        None => {
            // Quiet gets are silent on a miss
            if req.opcode != OP_GETKQ {
                write_response(
                    writer,
                    req.opcode,
                    ST_NOT_FOUND,
                    req.opaque,
                    0,
                    &[],
                    &[],
                    b"Not found",
                );
            }
        }
    }
}

fn handle_store<W: Write>(req: &Request, writer: &mut W, store: &Store) {
    assert!(req.extras.len() >= 4, "store request missing flags extras");
    let flags = u32::from_be_bytes(req.extras[..4].try_into().unwrap());

    let mut items = store.items.lock().unwrap();
    let existing = items.get(&req.key);

    let status = match (req.opcode, existing, req.cas) {
        (OP_ADD, Some(_), _) => ST_EXISTS,
        (OP_REPLACE, None, _) => ST_NOT_FOUND,
        (OP_SET, None, cas) if cas != 0 => ST_NOT_FOUND,
        (OP_SET, Some(item), cas) if cas != 0 && item.cas != cas => ST_EXISTS,
        _ => ST_OK,
    };

    if status != ST_OK {
        write_response(writer, req.opcode, status, req.opaque, 0, &[], &[], &[]);
        return;
    }

    let cas = store.fresh_cas();
    items.insert(
        req.key.clone(),
        Item {
            flags,
            data: req.value.clone(),
            cas,
        },
    );
    write_response(writer, req.opcode, ST_OK, req.opaque, cas, &[], &[], &[]);
}

fn handle_delete<W: Write>(req: &Request, writer: &mut W, store: &Store) {
    let mut items = store.items.lock().unwrap();
    let status = match items.get(&req.key) {
        None => ST_NOT_FOUND,
        Some(item) if req.cas != 0 && item.cas != req.cas => ST_EXISTS,
        Some(_) => {
            items.remove(&req.key);
            ST_OK
        }
    };
    write_response(writer, req.opcode, status, req.opaque, 0, &[], &[], &[]);
}

fn handle_counter<W: Write>(req: &Request, writer: &mut W, store: &Store) {
    assert_eq!(req.extras.len(), 20, "counter request needs 20 extras bytes");
    let delta = u64::from_be_bytes(req.extras[..8].try_into().unwrap());
    let initial = u64::from_be_bytes(req.extras[8..16].try_into().unwrap());
    let expiration = u32::from_be_bytes(req.extras[16..20].try_into().unwrap());

    let mut items = store.items.lock().unwrap();
    let new_value = match items.get(&req.key) {
        Some(item) => {
            let current: u64 = String::from_utf8_lossy(&item.data)
                .parse()
                .expect("counter value is decimal");
            if req.opcode == OP_INCR {
                current.wrapping_add(delta)
            } else {
                current.saturating_sub(delta)
            }
        }
        None => {
            // 0xffffffff expiration means "do not create"
            if expiration == u32::MAX {
                write_response(writer, req.opcode, ST_NOT_FOUND, req.opaque, 0, &[], &[], &[]);
                return;
            }
            initial
        }
    };

    let cas = store.fresh_cas();
    items.insert(
        req.key.clone(),
        Item {
            flags: 0,
            data: new_value.to_string().into_bytes(),
            cas,
        },
    );
    write_response(
        writer,
        req.opcode,
        ST_OK,
        req.opaque,
        cas,
        &[],
        &[],
        &new_value.to_be_bytes(),
    );
}

fn handle_stat<W: Write>(req: &Request, writer: &mut W, store: &Store) {
    let mut entries: Vec<(String, String)> = vec![
        ("pid".to_string(), "12345".to_string()),
        ("version".to_string(), "1.6.0".to_string()),
        (
            "curr_items".to_string(),
            store.items.lock().unwrap().len().to_string(),
        ),
    ];
    match req.key.as_slice() {
        b"settings" => {
            entries.push(("verbosity".to_string(), "1".to_string()));
            entries.push(("maxconns".to_string(), "1024".to_string()));
        }
        b"slabs" => {
            entries.push(("1:chunk_size".to_string(), "96".to_string()));
            entries.push(("1:get_hits".to_string(), "0".to_string()));
        }
        _ => {}
    }

    for (name, value) in &entries {
        write_response(
            writer,
            req.opcode,
            ST_OK,
            req.opaque,
            0,
            &[],
            name.as_bytes(),
            value.as_bytes(),
        );
    }
    // Empty-key terminator ends the sequence
    write_response(writer, req.opcode, ST_OK, req.opaque, 0, &[], &[], &[]);
}

fn handle_auth<W: Write>(req: &Request, writer: &mut W, store: &Store) {
    let Some((user, pass)) = &store.credentials else {
        // No SASL support configured, like a server built without auth
        write_response(
            writer,
            req.opcode,
            ST_UNKNOWN_COMMAND,
            req.opaque,
            0,
            &[],
            &[],
            &[],
        );
        return;
    };

    assert_eq!(req.key, b"PLAIN", "mock server only speaks SASL PLAIN");
    let mut parts = req.value.split(|&b| b == 0);
    let _authzid = parts.next();
    let authcid = parts.next().unwrap_or(&[]);
    let passwd = parts.next().unwrap_or(&[]);

    if authcid == user.as_bytes() && passwd == pass.as_bytes() {
        write_response(
            writer,
            req.opcode,
            ST_OK,
            req.opaque,
            0,
            &[],
            &[],
            b"Authenticated",
        );
    } else {
        write_response(
            writer,
            req.opcode,
            ST_AUTH_ERROR,
            req.opaque,
            0,
            &[],
            &[],
            b"Auth failure",
        );
    }
}
