//! Document store abstraction.
//!
//! The [`DocumentStore`] trait describes the realtime key-value store every
//! participant shares. Nothing about the game runs on the store itself: it
//! only persists documents, fans change notifications out to subscribers and
//! offers the few primitives the coordination logic relies on.
//!
//! Paths are slash-separated (`"lobbies/K3ZQ8A/players/p-1"`), values are JSON.
//! Writing `null` to a path deletes it, and objects left empty by a delete
//! disappear as well.
//!
//! # Required capabilities
//!
//! | Method | Capability |
//! |---|---|
//! | [`get`](DocumentStore::get), [`set`](DocumentStore::set), [`update`](DocumentStore::update), [`remove`](DocumentStore::remove) | nested documents |
//! | [`subscribe`](DocumentStore::subscribe) | change notifications |
//! | [`transaction`](DocumentStore::transaction) | conditional read-modify-write |
//! | [`register_presence`](DocumentStore::register_presence) | auto-delete on disconnect |
//! | [`server_time_offset`](DocumentStore::server_time_offset) | server clock offset feed |
//!
//! # Implementing a custom store
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use pass_pong::error::PassPongError;
//! use pass_pong::store::{DocumentStore, Subscription, TransactionFn};
//! use serde_json::{Map, Value};
//! use tokio::sync::watch;
//!
//! struct MyStore { /* ... */ }
//!
//! #[async_trait]
//! impl DocumentStore for MyStore {
//!     async fn get(&self, path: &str) -> Result<Option<Value>, PassPongError> { todo!() }
//!     async fn set(&self, path: &str, value: Value) -> Result<(), PassPongError> { todo!() }
//!     async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), PassPongError> { todo!() }
//!     async fn remove(&self, path: &str) -> Result<(), PassPongError> { todo!() }
//!     async fn transaction(&self, path: &str, apply: TransactionFn<'_>) -> Result<bool, PassPongError> { todo!() }
//!     async fn subscribe(&self, path: &str) -> Result<Subscription, PassPongError> { todo!() }
//!     async fn register_presence(&self, path: &str) -> Result<(), PassPongError> { todo!() }
//!     fn server_time_offset(&self) -> watch::Receiver<i64> { todo!() }
//! }
//! ```

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};

use crate::error::PassPongError;

/// Stream of values for one subscribed path.
///
/// The current value (or `None` if the path is absent) is delivered first,
/// followed by one item per committed change. The channel closes when the
/// store connection goes away.
pub type Subscription = mpsc::UnboundedReceiver<Option<Value>>;

/// Transaction body: receives the current value and returns the value to
/// commit, or `None` to abort without writing. Committing `Value::Null`
/// deletes the path.
///
/// The store may invoke it more than once when it has to retry after a
/// conflicting write, so it must not assume it runs exactly once.
pub type TransactionFn<'a> = &'a mut (dyn FnMut(Option<Value>) -> Option<Value> + Send);

/// A realtime document store shared by every participant.
///
/// # Object Safety
///
/// This trait is object-safe, so `Arc<dyn DocumentStore>` works for dynamic
/// dispatch. The coordinator and session are generic over `S: DocumentStore +
/// ?Sized` and accept either.
///
/// # Ordering
///
/// A subscriber must observe the changes of a path in commit order. No
/// ordering is promised across different paths or between participants.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Read the value at `path`, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`PassPongError::Store`] if the store cannot be reached.
    async fn get(&self, path: &str) -> Result<Option<Value>, PassPongError>;

    /// Replace the value at `path`. `Value::Null` deletes it.
    async fn set(&self, path: &str, value: Value) -> Result<(), PassPongError>;

    /// Apply several writes below `path` atomically. Keys are relative paths
    /// and may contain slashes (`"players/p-1/done"`); `Value::Null` deletes.
    /// An empty `path` addresses the root, which allows one atomic write to
    /// span several documents.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), PassPongError>;

    /// Delete `path`. Deleting an absent path succeeds.
    async fn remove(&self, path: &str) -> Result<(), PassPongError>;

    /// Atomically read-modify-write `path`.
    ///
    /// Returns `true` if `apply` produced a value that was committed, `false`
    /// if it aborted.
    async fn transaction(&self, path: &str, apply: TransactionFn<'_>)
        -> Result<bool, PassPongError>;

    /// Subscribe to `path` and everything below it.
    async fn subscribe(&self, path: &str) -> Result<Subscription, PassPongError>;

    /// Write `true` at `path` and have the store delete it when this
    /// connection drops, however abruptly.
    async fn register_presence(&self, path: &str) -> Result<(), PassPongError>;

    /// Feed of the difference between the store's clock and the local clock,
    /// in milliseconds. Starts at zero.
    fn server_time_offset(&self) -> watch::Receiver<i64>;
}
