#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for pass-pong integration tests.
//!
//! Every participant gets its own [`MemoryConnection`] on one shared
//! [`MemoryStore`], so disconnecting a participant removes exactly its
//! presence markers.

use std::sync::Arc;
use std::time::Duration;

use pass_pong::{
    ClockSync, DocumentStore, LobbyClient, MemoryConnection, MemoryStore, PongSession,
    SessionConfig, SessionEvent,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

// ── Participants ────────────────────────────────────────────────────

/// One participant: a store connection plus its lobby handle.
pub struct Participant {
    pub conn: Arc<MemoryConnection>,
    pub lobby: LobbyClient<MemoryConnection>,
}

impl Participant {
    pub fn id(&self) -> &str {
        self.lobby.participant_id()
    }

    /// Start a session for this participant.
    pub fn start_session(
        &self,
        config: SessionConfig,
    ) -> (PongSession, mpsc::Receiver<SessionEvent>) {
        PongSession::start(self.conn.clone(), self.lobby.context().clone(), config)
    }
}

fn connect(store: &MemoryStore) -> (Arc<MemoryConnection>, ClockSync) {
    let conn = Arc::new(store.connect());
    let clock = ClockSync::system(conn.server_time_offset());
    (conn, clock)
}

/// Create a lobby hosted by `id`.
pub async fn host(store: &MemoryStore, id: &str, config: SessionConfig) -> Participant {
    let (conn, clock) = connect(store);
    let lobby = LobbyClient::create(conn.clone(), clock, id, config)
        .await
        .unwrap();
    Participant { conn, lobby }
}

/// Join the lobby with `code` as `id`.
pub async fn guest(store: &MemoryStore, code: &str, id: &str, config: SessionConfig) -> Participant {
    let (conn, clock) = connect(store);
    let lobby = LobbyClient::join(conn.clone(), clock, code, id, config)
        .await
        .unwrap();
    Participant { conn, lobby }
}

/// A lobby with one seat per id, seat `n` taken by `ids[n - 1]`, game
/// started. The first id hosts.
pub async fn seated_table(
    store: &MemoryStore,
    ids: &[&str],
    config: SessionConfig,
) -> Vec<Participant> {
    let first = host(store, ids[0], config.clone()).await;
    first
        .lobby
        .set_seat_count(ids.len() as u32)
        .await
        .unwrap();
    let code = first.lobby.code().to_string();

    let mut table = vec![first];
    for id in &ids[1..] {
        table.push(guest(store, &code, id, config.clone()).await);
    }
    for (i, participant) in table.iter().enumerate() {
        participant.lobby.sit(i as u32 + 1).await.unwrap();
    }
    table[0].lobby.start_game().await.unwrap();
    table
}

// ── Events ──────────────────────────────────────────────────────────

/// Next event, failing the test after 5 minutes of (virtual) time.
pub async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(300), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip events until one matches `pred`, and return it.
pub async fn wait_for(
    events: &mut mpsc::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

/// A lobby document as a browser client writes it.
pub fn browser_lobby_json() -> Value {
    json!({
        "hostId": "host-1",
        "players": {
            "host-1": { "name": "Host", "joinedAt": 1_700_000_000_000_i64, "seat": 1 },
            "guest-2": { "name": "Player", "joinedAt": 1_700_000_005_000_i64, "seat": null,
                         "blockedUntil": 1_700_000_009_000_i64 },
            "guest-3": { "name": "Mo", "joinedAt": 1_700_000_006_000_i64, "seat": 3, "done": true }
        },
        "seats": { "1": "host-1", "2": 0, "3": "guest-3", "4": 0, "5": 0 },
        "gameStarted": false
    })
}

/// A round document as a browser client writes it after a pass.
pub fn browser_round_json() -> Value {
    json!({
        "currentPlayer": "guest-3",
        "startTime": 1_700_000_100_000_i64,
        "roundDuration": 84_211,
        "ballResetTime": 1_700_000_112_345_i64,
        "ballState": { "dx": -3.25, "entrySide": "right" },
        "gameOver": false
    })
}
