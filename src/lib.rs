//! # Pass Pong
//!
//! Turn coordination core for a "pass-the-ball" party Pong played around a
//! virtual table, coordinated entirely through a shared realtime document
//! store.
//!
//! There is no game server. Every participant runs the same rules against the
//! same documents: seats are claimed with conditional writes, rounds start
//! through a single conditional transition, passes are last-write-wins, and
//! the store fans every change back out to all participants.
//!
//! ## Features
//!
//! - **Store-agnostic**: implement the [`DocumentStore`] trait for any
//!   realtime backend with subscriptions, transactions and presence markers
//! - **Browser-compatible documents**: [`document`] types read and write the
//!   JSON layout web clients use
//! - **Event-driven**: a [`PongSession`] emits typed [`SessionEvent`]s on a
//!   channel and takes commands through a handle
//! - **In-memory store**: the default `store-memory` feature provides
//!   [`MemoryStore`] for tests, demos and local play
//!
//! ## Quick Start
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), pass_pong::PassPongError> {
//! use std::sync::Arc;
//! use pass_pong::{ClockSync, DocumentStore, LobbyClient, MemoryStore, SessionConfig};
//!
//! let store = MemoryStore::new();
//! let host_conn = Arc::new(store.connect());
//! let clock = ClockSync::system(host_conn.server_time_offset());
//! let host = LobbyClient::create(host_conn, clock, "host-id", SessionConfig::default()).await?;
//!
//! let guest_conn = Arc::new(store.connect());
//! let clock = ClockSync::system(guest_conn.server_time_offset());
//! let guest = LobbyClient::join(
//!     guest_conn,
//!     clock,
//!     host.code().as_str(),
//!     "guest-id",
//!     SessionConfig::default(),
//! )
//! .await?;
//!
//! host.set_seat_count(2).await?;
//! host.sit(1).await?;
//! guest.sit(2).await?;
//! host.start_game().await?;
//! assert!(guest.snapshot().await?.game_started);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod lobby;
pub mod lobby_code;
pub mod presence;
pub mod seating;
pub mod session;
pub mod store;
pub mod stores;

// Re-export primary types for ergonomic imports.
pub use clock::{ClockSync, ManualClock, SystemClock, WallClock};
pub use config::{RoundDuration, SessionConfig, TimekeeperRole};
pub use coordinator::{MissOutcome, PassOutcome, RoundPhase, SessionContext, SessionCoordinator};
pub use document::{
    BallState, Direction, Lobby, ParticipantId, PlayerRecord, Round, SeatNumber, SeatSlot,
    Timestamp,
};
pub use error::PassPongError;
pub use error_codes::ErrorCode;
pub use event::{BallPlacement, SessionEvent};
pub use lobby::LobbyClient;
pub use lobby_code::LobbyCode;
pub use presence::{PresenceCleanup, PresenceDecision, PresenceTracker};
pub use seating::{compute_order, next_in_order, SeatingOrder};
pub use session::{PongSession, SessionView};
pub use store::DocumentStore;

#[cfg(feature = "store-memory")]
pub use stores::{MemoryConnection, MemoryStore};
