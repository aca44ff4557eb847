//! Document store implementations.
//!
//! Concrete [`DocumentStore`](crate::DocumentStore) implementations live
//! behind feature gates:
//!
//! | Feature        | Store           |
//! |----------------|-----------------|
//! | `store-memory` | [`MemoryStore`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), pass_pong::PassPongError> {
//! use pass_pong::{DocumentStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! let conn = store.connect();
//! conn.set("lobbies/ABC123/gameStarted", serde_json::json!(false)).await?;
//!
//! let mut changes = conn.subscribe("lobbies/ABC123").await?;
//! if let Some(Some(lobby)) = changes.recv().await {
//!     println!("lobby: {lobby}");
//! }
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "store-memory")]
pub mod memory;

#[cfg(feature = "store-memory")]
pub use memory::{MemoryConnection, MemoryStore};
