//! In-process document store.
//!
//! [`MemoryStore`] holds one JSON tree shared by any number of
//! [`MemoryConnection`]s. Each connection plays the part of one participant's
//! client: it implements [`DocumentStore`], owns its presence markers and its
//! server-time offset, and removes its presence markers when it disconnects
//! or is dropped.
//!
//! # Feature gate
//!
//! This module is only available when the `store-memory` feature is enabled
//! (it is enabled by default).
//!
//! # Example
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), pass_pong::PassPongError> {
//! use pass_pong::{DocumentStore, MemoryStore};
//! use serde_json::json;
//!
//! let store = MemoryStore::new();
//! let alice = store.connect();
//! let bob = store.connect();
//!
//! let mut seen_by_bob = bob.subscribe("presence/ABC123").await?;
//! assert_eq!(seen_by_bob.recv().await, Some(None));
//!
//! alice.register_presence("presence/ABC123/alice").await?;
//! assert_eq!(seen_by_bob.recv().await, Some(Some(json!({ "alice": true }))));
//!
//! alice.disconnect();
//! assert_eq!(seen_by_bob.recv().await, Some(None));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::PassPongError;
use crate::store::{DocumentStore, Subscription, TransactionFn};

type Path = Vec<String>;

fn segments(path: &str) -> Path {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn join(base: &[String], relative: &str) -> Path {
    let mut full = base.to_vec();
    full.extend(segments(relative));
    full
}

/// Returns `true` if one path is a prefix of the other.
fn overlaps(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b).all(|(x, y)| x == y)
}

// ── Tree operations ─────────────────────────────────────────────────

/// Drop nulls and empty objects; `None` if nothing is left.
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::Object(cleaned))
            }
        }
        other => Some(other),
    }
}

fn read(root: &Map<String, Value>, path: &[String]) -> Option<Value> {
    let Some((first, rest)) = path.split_first() else {
        return if root.is_empty() {
            None
        } else {
            Some(Value::Object(root.clone()))
        };
    };
    let mut node = root.get(first)?;
    for segment in rest {
        node = node.as_object()?.get(segment)?;
    }
    Some(node.clone())
}

fn insert(map: &mut Map<String, Value>, path: &[String], value: Value) {
    match path.split_first() {
        None => {
            if let Value::Object(object) = value {
                *map = object;
            }
        }
        Some((last, [])) => {
            map.insert(last.clone(), value);
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child_map) = child {
                insert(child_map, rest, value);
            }
        }
    }
}

fn delete(map: &mut Map<String, Value>, path: &[String]) {
    match path.split_first() {
        None => map.clear(),
        Some((last, [])) => {
            map.remove(last);
        }
        Some((head, rest)) => {
            let mut emptied = false;
            if let Some(Value::Object(child)) = map.get_mut(head) {
                delete(child, rest);
                emptied = child.is_empty();
            }
            if emptied {
                map.remove(head);
            }
        }
    }
}

fn write(root: &mut Map<String, Value>, path: &[String], value: Value) {
    match normalize(value) {
        Some(value) => insert(root, path, value),
        None => delete(root, path),
    }
}

// ── Shared state ────────────────────────────────────────────────────

struct Subscriber {
    connection: u64,
    path: Path,
    tx: mpsc::UnboundedSender<Option<Value>>,
    last: Option<Value>,
}

#[derive(Default)]
struct Tree {
    root: Map<String, Value>,
    subscribers: Vec<Subscriber>,
    on_disconnect: HashMap<u64, Vec<Path>>,
}

impl Tree {
    /// Push the current value to every subscriber whose path overlaps a
    /// touched path and whose value actually changed.
    fn notify(&mut self, touched: &[Path]) {
        let Self {
            root, subscribers, ..
        } = self;
        subscribers.retain_mut(|sub| {
            if !touched.iter().any(|path| overlaps(path, &sub.path)) {
                return true;
            }
            let current = read(root, &sub.path);
            if current == sub.last {
                return true;
            }
            sub.last = current.clone();
            sub.tx.send(current).is_ok()
        });
    }
}

#[derive(Default)]
struct Inner {
    tree: Mutex<Tree>,
    next_connection: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// A shared in-memory JSON tree. Clone it freely; clones share the tree.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new participant connection.
    pub fn connect(&self) -> MemoryConnection {
        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        let (offset, _) = watch::channel(0);
        debug!(connection = id, "memory store connection opened");
        MemoryConnection {
            id,
            inner: Arc::clone(&self.inner),
            connected: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            offset,
        }
    }

    /// Read a value without going through a connection.
    pub fn snapshot(&self, path: &str) -> Option<Value> {
        read(&self.inner.lock().root, &segments(path))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tree = self.inner.lock();
        f.debug_struct("MemoryStore")
            .field("top_level_keys", &tree.root.len())
            .field("subscribers", &tree.subscribers.len())
            .finish()
    }
}

// ── Connection ──────────────────────────────────────────────────────

/// One participant's connection to a [`MemoryStore`].
pub struct MemoryConnection {
    id: u64,
    inner: Arc<Inner>,
    connected: AtomicBool,
    fail_writes: AtomicBool,
    offset: watch::Sender<i64>,
}

impl MemoryConnection {
    /// Simulate an abrupt disconnect: presence markers registered through
    /// this connection are deleted and its subscriptions close. Idempotent.
    pub fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut tree = self.inner.lock();
        let paths = tree.on_disconnect.remove(&self.id).unwrap_or_default();
        for path in &paths {
            delete(&mut tree.root, path);
        }
        tree.subscribers.retain(|sub| sub.connection != self.id);
        tree.notify(&paths);
        debug!(
            connection = self.id,
            presence_removed = paths.len(),
            "memory store connection closed"
        );
    }

    /// Returns `true` until [`disconnect`](Self::disconnect) is called.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Publish a new server-time offset to this connection's feed.
    pub fn set_server_time_offset(&self, offset_ms: i64) {
        self.offset.send_replace(offset_ms);
    }

    /// Make every subsequent write fail with [`PassPongError::Store`] until
    /// switched off again. Reads and subscriptions keep working.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    fn ensure_connected(&self) -> Result<(), PassPongError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(PassPongError::StoreClosed)
        }
    }

    fn ensure_writable(&self) -> Result<(), PassPongError> {
        self.ensure_connected()?;
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(PassPongError::Store("write rejected by memory store".into()));
        }
        Ok(())
    }

    fn write_many(&self, writes: Vec<(Path, Value)>) -> Result<(), PassPongError> {
        self.ensure_writable()?;
        let mut tree = self.inner.lock();
        let mut touched = Vec::with_capacity(writes.len());
        for (path, value) in writes {
            write(&mut tree.root, &path, value);
            touched.push(path);
        }
        tree.notify(&touched);
        Ok(())
    }

    fn run_transaction(&self, path: &str, apply: TransactionFn<'_>) -> Result<bool, PassPongError> {
        self.ensure_writable()?;
        let path = segments(path);
        let mut tree = self.inner.lock();
        let current = read(&tree.root, &path);
        let Some(next) = apply(current) else {
            return Ok(false);
        };
        write(&mut tree.root, &path, next);
        tree.notify(std::slice::from_ref(&path));
        Ok(true)
    }

    fn open_subscription(&self, path: &str) -> Result<Subscription, PassPongError> {
        self.ensure_connected()?;
        let path = segments(path);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tree = self.inner.lock();
        let current = read(&tree.root, &path);
        // The receiver is alive, so the first send cannot fail.
        let _ = tx.send(current.clone());
        tree.subscribers.push(Subscriber {
            connection: self.id,
            path,
            tx,
            last: current,
        });
        Ok(rx)
    }

    fn mark_present(&self, path: &str) -> Result<(), PassPongError> {
        self.ensure_writable()?;
        let path = segments(path);
        let mut tree = self.inner.lock();
        write(&mut tree.root, &path, Value::Bool(true));
        tree.on_disconnect.entry(self.id).or_default().push(path.clone());
        tree.notify(std::slice::from_ref(&path));
        Ok(())
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[async_trait]
impl DocumentStore for MemoryConnection {
    async fn get(&self, path: &str) -> Result<Option<Value>, PassPongError> {
        self.ensure_connected()?;
        Ok(read(&self.inner.lock().root, &segments(path)))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), PassPongError> {
        self.write_many(vec![(segments(path), value)])
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), PassPongError> {
        let base = segments(path);
        let writes = fields
            .into_iter()
            .map(|(key, value)| (join(&base, &key), value))
            .collect();
        self.write_many(writes)
    }

    async fn remove(&self, path: &str) -> Result<(), PassPongError> {
        self.write_many(vec![(segments(path), Value::Null)])
    }

    async fn transaction(
        &self,
        path: &str,
        apply: TransactionFn<'_>,
    ) -> Result<bool, PassPongError> {
        self.run_transaction(path, apply)
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, PassPongError> {
        self.open_subscription(path)
    }

    async fn register_presence(&self, path: &str) -> Result<(), PassPongError> {
        self.mark_present(path)
    }

    fn server_time_offset(&self) -> watch::Receiver<i64> {
        self.offset.subscribe()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
