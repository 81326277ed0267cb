//! Command Engine
//!
//! The public client API. Every operation follows the same path:
//!
//! ```text
//! Client ──▶ ServerPool (route key → server)
//!        ──▶ ServerNode (acquire connection, single reconnect-retry)
//!        ──▶ codec (encode frame) ──▶ socket ──▶ codec (decode frame)
//!        ──▶ value serializer (decode typed value)
//! ```
//!
//! Expected cache outcomes (miss, CAS mismatch, exists-on-add,
//! not-stored-on-replace) come back as `Option`/`bool`; only transport,
//! protocol, and auth failures are errors. Multi-key operations are grouped
//! per server and pipelined; distinct servers are exchanged with in
//! parallel.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;

use crate::config::ClientConfig;
use crate::error::{McError, Result};
use crate::pool::{ServerNode, ServerPool};
use crate::protocol::{encode_request, Opcode, ResponseFrame, Status, HEADER_SIZE};
use crate::value::{decode_value, encode_value, ObjectCodec, Passthrough, Value};

/// Upper bound on the encoded bytes of one pipelined store chunk. Large
/// batches are split so a single write never grows unbounded; ordering is
/// preserved within and across chunks.
const MAX_CHUNK_BYTES: usize = 1024 * 1024;

/// Upper bound on requests per pipelined chunk. Keeps the response burst
/// for a chunk well under socket buffer sizes; a peer that answers while we
/// are still writing must never be able to wedge both directions.
const MAX_CHUNK_ITEMS: usize = 1024;

/// One entry of a `set_multi` batch
#[derive(Debug, Clone)]
pub struct SetEntry {
    /// Key (≤250 bytes)
    pub key: Vec<u8>,

    /// Value to store
    pub value: Value,

    /// `None` stores unconditionally; `Some(token)` stores only if the
    /// key's current CAS token matches. `Some(0)` stores only if the key
    /// is absent — a token of 0 can never match a stored revision, so it
    /// means "no revision existed when I looked".
    pub cas: Option<u64>,
}

impl SetEntry {
    /// Unconditional store entry
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            cas: None,
        }
    }

    /// Conditional store entry: succeeds only if the stored token matches
    pub fn with_cas(key: impl Into<Vec<u8>>, value: impl Into<Value>, cas: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            cas: Some(cas),
        }
    }
}

/// Client for a cluster of cache servers speaking the binary protocol.
///
/// Cheap to share: all methods take `&self`, and per-connection locking
/// keeps concurrent callers from interleaving requests on one socket.
pub struct Client {
    pool: ServerPool,
    object_codec: Arc<dyn ObjectCodec>,
}

impl Client {
    /// Create a client from configuration. No sockets are opened until the
    /// first command.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_object_codec(config, Arc::new(Passthrough))
    }

    /// Create a client with a custom structured-object codec
    pub fn with_object_codec(config: ClientConfig, codec: Arc<dyn ObjectCodec>) -> Result<Self> {
        let pool = ServerPool::new(&config)?;
        Ok(Self {
            pool,
            object_codec: codec,
        })
    }

    // =========================================================================
    // Single-key reads
    // =========================================================================

    /// Get the value stored under `key`, or `None` on a miss
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Value>> {
        Ok(self.fetch(key.as_ref())?.map(|(value, _)| value))
    }

    /// Get the value and its CAS token, or `None` on a miss
    pub fn gets(&self, key: impl AsRef<[u8]>) -> Result<Option<(Value, u64)>> {
        self.fetch(key.as_ref())
    }

    fn fetch(&self, key: &[u8]) -> Result<Option<(Value, u64)>> {
        let node = self.pool.route(key);
        let frame = self.exchange(node, Opcode::Get, key, &[], &[], 0)?;
        match frame.status {
            Status::Ok => {
                let value = decode_value(frame.flags()?, &frame.value, &*self.object_codec)?;
                Ok(Some((value, frame.cas)))
            }
            Status::KeyNotFound => Ok(None),
            other => Err(unexpected_status("get", other)),
        }
    }

    // =========================================================================
    // Single-key writes
    // =========================================================================

    /// Store `value` under `key` unconditionally
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl Into<Value>) -> Result<bool> {
        self.store(Opcode::Set, key.as_ref(), &value.into(), 0)
    }

    /// Conditional store. `cas: None` behaves as [`Client::add`] (store only
    /// if absent); `cas: Some(token)` stores only if the key's current token
    /// equals `token`. A mismatch (or a key that vanished) returns
    /// `Ok(false)` and leaves the stored value unchanged.
    pub fn cas(
        &self,
        key: impl AsRef<[u8]>,
        value: impl Into<Value>,
        cas: Option<u64>,
    ) -> Result<bool> {
        match cas {
            None => self.store(Opcode::Add, key.as_ref(), &value.into(), 0),
            Some(token) => self.store(Opcode::Set, key.as_ref(), &value.into(), token),
        }
    }

    /// Store only if `key` is absent; `Ok(false)` if it already exists
    pub fn add(&self, key: impl AsRef<[u8]>, value: impl Into<Value>) -> Result<bool> {
        self.store(Opcode::Add, key.as_ref(), &value.into(), 0)
    }

    /// Store only if `key` exists; `Ok(false)` if it is absent
    pub fn replace(&self, key: impl AsRef<[u8]>, value: impl Into<Value>) -> Result<bool> {
        self.store(Opcode::Replace, key.as_ref(), &value.into(), 0)
    }

    fn store(&self, opcode: Opcode, key: &[u8], value: &Value, cas: u64) -> Result<bool> {
        let (flags, data) = encode_value(value, &*self.object_codec)?;
        let extras = store_extras(flags);
        let node = self.pool.route(key);
        let frame = self.exchange(node, opcode, key, &extras, &data, cas)?;
        store_outcome(&frame)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete `key`. Deleting an absent key returns `Ok(true)`: delete is
    /// idempotent by policy, reporting "the key is gone" rather than
    /// whether this call removed it.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.delete_with(key.as_ref(), 0)
    }

    /// Delete `key` only if its current CAS token equals `cas`; a mismatch
    /// returns `Ok(false)` and leaves the value in place.
    pub fn delete_cas(&self, key: impl AsRef<[u8]>, cas: u64) -> Result<bool> {
        self.delete_with(key.as_ref(), cas)
    }

    fn delete_with(&self, key: &[u8], cas: u64) -> Result<bool> {
        let node = self.pool.route(key);
        let frame = self.exchange(node, Opcode::Delete, key, &[], &[], cas)?;
        match frame.status {
            Status::Ok | Status::KeyNotFound => Ok(true),
            Status::KeyExists | Status::ItemNotStored => Ok(false),
            other => Err(unexpected_status("delete", other)),
        }
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Increment the counter at `key` by `delta`, returning the new value.
    /// An absent counter is initialized to 0 first, so the first `incr` on
    /// a missing key returns 0. Wraps at the server's native 64-bit width.
    pub fn incr(&self, key: impl AsRef<[u8]>, delta: u64) -> Result<u64> {
        self.counter(Opcode::Increment, key.as_ref(), delta)
    }

    /// Decrement the counter at `key` by `delta`, returning the new value.
    /// Floors at 0, never goes negative.
    pub fn decr(&self, key: impl AsRef<[u8]>, delta: u64) -> Result<u64> {
        self.counter(Opcode::Decrement, key.as_ref(), delta)
    }

    fn counter(&self, opcode: Opcode, key: &[u8], delta: u64) -> Result<u64> {
        // extras: delta(8) + initial(8) + expiration(4); initial 0 and a
        // zero expiration so absent counters are created, not rejected
        let mut extras = [0u8; 20];
        extras[..8].copy_from_slice(&delta.to_be_bytes());
        let node = self.pool.route(key);
        let frame = self.exchange(node, opcode, key, &extras, &[], 0)?;
        if !frame.is_ok() {
            return Err(unexpected_status("counter", frame.status));
        }
        frame.counter_value()
    }

    // =========================================================================
    // Cluster-wide operations
    // =========================================================================

    /// Clear all keys on every configured server. Not atomic across
    /// servers: a transport failure on one server leaves the others
    /// flushed.
    pub fn flush_all(&self) -> Result<bool> {
        let jobs: Vec<(usize, ())> = (0..self.pool.servers().len()).map(|i| (i, ())).collect();
        let results = self.dispatch(jobs, |node, ()| {
            let mut buf = BytesMut::new();
            encode_request(&mut buf, Opcode::Flush, &[], &[], &[], 0, 0)?;
            let frame = node.request(&buf)?;
            Ok(frame.is_ok())
        })?;
        let flushed = self.take_first_error(results)?;
        Ok(flushed.into_iter().all(|(_, ok)| ok))
    }

    /// Fetch operational statistics from every server, optionally scoped to
    /// a category (e.g. `"settings"` or `"slabs"`). Per server, stat
    /// key/value frames arrive in order until an empty-key terminator; the
    /// pairs are returned in arrival order, keyed by server identity.
    pub fn stats(&self, category: Option<&str>) -> Result<HashMap<String, Vec<(String, String)>>> {
        let stat_key = category.unwrap_or("").as_bytes();
        let jobs: Vec<(usize, ())> = (0..self.pool.servers().len()).map(|i| (i, ())).collect();
        let results = self.dispatch(jobs, |node, ()| {
            node.with_conn(|conn| {
                let mut buf = BytesMut::new();
                encode_request(&mut buf, Opcode::Stat, stat_key, &[], &[], 0, 0)?;
                conn.send(&buf)?;

                let mut entries = Vec::new();
                loop {
                    let frame = conn.receive()?;
                    if frame.opcode != Opcode::Stat {
                        return Err(McError::Protocol(format!(
                            "expected a stat response, got {:?}",
                            frame.opcode
                        )));
                    }
                    if !frame.is_ok() {
                        return Err(unexpected_status("stats", frame.status));
                    }
                    if frame.key.is_empty() {
                        return Ok(entries);
                    }
                    entries.push((
                        String::from_utf8_lossy(&frame.key).into_owned(),
                        String::from_utf8_lossy(&frame.value).into_owned(),
                    ));
                }
            })
        })?;
        let per_server = self.take_first_error(results)?;

        let servers = self.pool.servers();
        Ok(per_server
            .into_iter()
            .map(|(i, entries)| (servers[i].addr().to_string(), entries))
            .collect())
    }

    // =========================================================================
    // Batched multi-key operations
    // =========================================================================

    /// Store a batch of entries, grouped per destination server and written
    /// as pipelined chunks. Returns `Ok(true)` iff every entry was stored;
    /// per-key failures (CAS mismatch, add-on-existing) flip the result to
    /// `false` but never prevent the other entries from being stored.
    pub fn set_multi(&self, entries: &[SetEntry]) -> Result<bool> {
        if entries.is_empty() {
            return Ok(true);
        }

        // Encode values up front so serialization errors surface before
        // anything hits a socket
        let mut encoded = Vec::with_capacity(entries.len());
        for entry in entries {
            encoded.push(encode_value(&entry.value, &*self.object_codec)?);
        }
        let encoded = &encoded;

        let keys: Vec<&[u8]> = entries.iter().map(|e| e.key.as_slice()).collect();
        let jobs = non_empty_groups(self.pool.route_multi(&keys));

        let results = self.dispatch(jobs, |node, group| {
            let mut all_ok = true;
            for chunk in chunk_by_bytes(&group, |&i| {
                HEADER_SIZE + 8 + entries[i].key.len() + encoded[i].1.len()
            }) {
                all_ok &= self.store_chunk(node, entries, encoded, &chunk)?;
            }
            Ok(all_ok)
        })?;

        let stored = self.take_first_error(results)?;
        Ok(stored.into_iter().all(|(_, ok)| ok))
    }

    /// One pipelined chunk: all requests written back-to-back, then all
    /// responses drained in the same order. Opaque values are sequence
    /// numbers within the chunk so misordering is detected, never silently
    /// misattributed.
    fn store_chunk(
        &self,
        node: &ServerNode,
        entries: &[SetEntry],
        encoded: &[(u32, Vec<u8>)],
        chunk: &[usize],
    ) -> Result<bool> {
        node.with_conn(|conn| {
            let mut buf = BytesMut::new();
            let mut sent = Vec::with_capacity(chunk.len());
            for (seq, &i) in chunk.iter().enumerate() {
                let entry = &entries[i];
                let (flags, data) = &encoded[i];
                let extras = store_extras(*flags);
                let (opcode, wire_cas) = match entry.cas {
                    None => (Opcode::Set, 0),
                    Some(0) => (Opcode::Add, 0),
                    Some(token) => (Opcode::Set, token),
                };
                encode_request(
                    &mut buf,
                    opcode,
                    &entry.key,
                    &extras,
                    data,
                    wire_cas,
                    seq as u32,
                )?;
                sent.push(opcode);
            }
            conn.send(&buf)?;

            let mut all_ok = true;
            for (seq, &opcode) in sent.iter().enumerate() {
                let frame = conn.receive()?;
                if frame.opcode != opcode || frame.opaque != seq as u32 {
                    return Err(McError::Protocol(format!(
                        "pipelined response out of order: expected {:?} #{}, got {:?} #{}",
                        opcode, seq, frame.opcode, frame.opaque
                    )));
                }
                all_ok &= store_outcome(&frame)?;
            }
            Ok(all_ok)
        })
    }

    /// Fetch many keys in one pipelined batch per server. Absent keys are
    /// simply omitted from the result map.
    pub fn get_multi<K: AsRef<[u8]> + Sync>(
        &self,
        keys: &[K],
    ) -> Result<HashMap<Vec<u8>, Value>> {
        let hits = self.fetch_multi(keys)?;
        Ok(hits.into_iter().map(|(k, v, _)| (k, v)).collect())
    }

    /// Like [`Client::get_multi`], but each hit carries its CAS token
    pub fn get_multi_cas<K: AsRef<[u8]> + Sync>(
        &self,
        keys: &[K],
    ) -> Result<HashMap<Vec<u8>, (Value, u64)>> {
        let hits = self.fetch_multi(keys)?;
        Ok(hits.into_iter().map(|(k, v, c)| (k, (v, c))).collect())
    }

    fn fetch_multi<K: AsRef<[u8]> + Sync>(
        &self,
        keys: &[K],
    ) -> Result<Vec<(Vec<u8>, Value, u64)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let jobs = non_empty_groups(self.pool.route_multi(keys));

        let results = self.dispatch(jobs, |node, group| {
            let mut hits = Vec::new();
            for chunk in group.chunks(MAX_CHUNK_ITEMS) {
                hits.extend(self.fetch_chunk(node, keys, chunk)?);
            }
            Ok(hits)
        })?;

        let per_server = self.take_first_error(results)?;
        Ok(per_server.into_iter().flat_map(|(_, hits)| hits).collect())
    }

    /// One pipelined get chunk: quiet gets stay silent on a miss, so the
    /// trailing noop is the end-of-chunk marker.
    fn fetch_chunk<K: AsRef<[u8]>>(
        &self,
        node: &ServerNode,
        keys: &[K],
        chunk: &[usize],
    ) -> Result<Vec<(Vec<u8>, Value, u64)>> {
        node.with_conn(|conn| {
            let mut buf = BytesMut::new();
            for (seq, &i) in chunk.iter().enumerate() {
                encode_request(
                    &mut buf,
                    Opcode::GetKQ,
                    keys[i].as_ref(),
                    &[],
                    &[],
                    0,
                    seq as u32,
                )?;
            }
            let terminator = chunk.len() as u32;
            encode_request(&mut buf, Opcode::Noop, &[], &[], &[], 0, terminator)?;
            conn.send(&buf)?;

            let mut hits = Vec::new();
            let mut prev_opaque: i64 = -1;
            loop {
                let frame = conn.receive()?;
                match frame.opcode {
                    Opcode::Noop => {
                        if frame.opaque != terminator {
                            return Err(McError::Protocol(format!(
                                "batch terminator carries opaque {}, expected {}",
                                frame.opaque, terminator
                            )));
                        }
                        return Ok(hits);
                    }
                    Opcode::GetKQ => {
                        // Hits must arrive in request order (misses are
                        // silently skipped, so gaps are fine)
                        if i64::from(frame.opaque) <= prev_opaque || frame.opaque >= terminator {
                            return Err(McError::Protocol(format!(
                                "pipelined get response out of order: opaque {}",
                                frame.opaque
                            )));
                        }
                        prev_opaque = i64::from(frame.opaque);
                        match frame.status {
                            Status::Ok => {
                                let value = decode_value(
                                    frame.flags()?,
                                    &frame.value,
                                    &*self.object_codec,
                                )?;
                                hits.push((frame.key.clone(), value, frame.cas));
                            }
                            Status::KeyNotFound => {}
                            other => return Err(unexpected_status("get_multi", other)),
                        }
                    }
                    other => {
                        return Err(McError::Protocol(format!(
                            "unexpected opcode in get batch: {:?}",
                            other
                        )));
                    }
                }
            }
        })
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Forcibly close every connection. Server-side data is unaffected; any
    /// subsequent command transparently reconnects.
    pub fn disconnect_all(&self) {
        self.pool.disconnect_all();
    }

    /// The configured server pool (identities and connection states)
    pub fn pool(&self) -> &ServerPool {
        &self.pool
    }

    // =========================================================================
    // Dispatch plumbing
    // =========================================================================

    /// One request, one response, with echo verification
    fn exchange(
        &self,
        node: &ServerNode,
        opcode: Opcode,
        key: &[u8],
        extras: &[u8],
        body: &[u8],
        cas: u64,
    ) -> Result<ResponseFrame> {
        let mut buf = BytesMut::new();
        encode_request(&mut buf, opcode, key, extras, body, cas, 0)?;
        let frame = node.request(&buf)?;
        if frame.opcode != opcode {
            return Err(McError::Protocol(format!(
                "response opcode {:?} does not match request {:?}",
                frame.opcode, opcode
            )));
        }
        Ok(frame)
    }

    /// Run one job per server, in parallel when more than one server is
    /// involved. Every job runs to completion regardless of the others.
    fn dispatch<W, T, F>(&self, jobs: Vec<(usize, W)>, op: F) -> Result<Vec<(usize, Result<T>)>>
    where
        W: Send,
        T: Send,
        F: Fn(&ServerNode, W) -> Result<T> + Sync,
    {
        let servers = self.pool.servers();
        if jobs.len() <= 1 {
            return Ok(jobs
                .into_iter()
                .map(|(i, work)| {
                    let outcome = op(&servers[i], work);
                    (i, outcome)
                })
                .collect());
        }

        let op = &op;
        crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .into_iter()
                .map(|(i, work)| {
                    let node = &servers[i];
                    (i, scope.spawn(move |_| op(node, work)))
                })
                .collect();
            handles
                .into_iter()
                .map(|(i, handle)| {
                    let outcome = handle.join().unwrap_or_else(|_| {
                        Err(McError::Connection("batch worker panicked".to_string()))
                    });
                    (i, outcome)
                })
                .collect()
        })
        .map_err(|_| McError::Connection("parallel dispatch panicked".to_string()))
    }

    /// Separate per-server successes from failures: the first failure is
    /// returned (its message names the server), further failures are
    /// logged. Successful portions remain effective server-side.
    fn take_first_error<T>(&self, results: Vec<(usize, Result<T>)>) -> Result<Vec<(usize, T)>> {
        let servers = self.pool.servers();
        let mut successes = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (i, outcome) in results {
            match outcome {
                Ok(value) => successes.push((i, value)),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => {
                    tracing::warn!("additional batch failure on {}: {}", servers[i].addr(), e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(successes),
        }
    }
}

// =============================================================================
// Frame helpers
// =============================================================================

/// Store extras: flags(4) + expiration(4, always 0 = never expire)
fn store_extras(flags: u32) -> [u8; 8] {
    let mut extras = [0u8; 8];
    extras[..4].copy_from_slice(&flags.to_be_bytes());
    extras
}

/// Map a store response to the boolean contract: `Ok` stored, the three
/// conflict statuses are expected non-stores, anything else is a server
/// error.
fn store_outcome(frame: &ResponseFrame) -> Result<bool> {
    match frame.status {
        Status::Ok => Ok(true),
        Status::KeyExists | Status::KeyNotFound | Status::ItemNotStored => Ok(false),
        other => Err(unexpected_status("store", other)),
    }
}

fn unexpected_status(operation: &str, status: Status) -> McError {
    McError::Protocol(format!(
        "server returned {:?} for a {} operation",
        status, operation
    ))
}

/// Keep only servers that actually own keys
fn non_empty_groups(groups: Vec<Vec<usize>>) -> Vec<(usize, Vec<usize>)> {
    groups
        .into_iter()
        .enumerate()
        .filter(|(_, group)| !group.is_empty())
        .collect()
}

/// Split `group` into chunks staying under [`MAX_CHUNK_BYTES`] of encoded
/// requests and [`MAX_CHUNK_ITEMS`] entries, preserving order
fn chunk_by_bytes(group: &[usize], cost: impl Fn(&usize) -> usize) -> Vec<Vec<usize>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0usize;
    for &i in group {
        let item_cost = cost(&i);
        if !current.is_empty()
            && (current_bytes + item_cost > MAX_CHUNK_BYTES || current.len() >= MAX_CHUNK_ITEMS)
        {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current.push(i);
        current_bytes += item_cost;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
