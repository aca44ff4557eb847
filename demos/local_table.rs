//! # Local Table Demo
//!
//! Three participants share one in-process [`MemoryStore`]:
//!
//! 1. The host creates a lobby, two guests join with its code
//! 2. Everyone takes a seat and the host starts the game
//! 3. Each player passes the ball left shortly after it arrives
//! 4. The round times out, everyone acknowledges, the table resets
//!
//! ## Running
//!
//! ```sh
//! cargo run --example local_table
//!
//! # Watch every store write and coordinator decision:
//! RUST_LOG=debug cargo run --example local_table
//! ```

use std::sync::Arc;
use std::time::Duration;

use pass_pong::{
    BallPlacement, ClockSync, Direction, DocumentStore, LobbyClient, MemoryConnection,
    MemoryStore, PongSession, RoundDuration, SessionConfig, SessionEvent,
};

/// How long the ball takes to cross a player's screen.
const FLIGHT_TIME: Duration = Duration::from_millis(700);

/// Round length for the demo.
const ROUND_MS: u64 = 8_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = SessionConfig::default().with_round_duration(RoundDuration::Fixed(ROUND_MS));
    let store = MemoryStore::new();

    // ── Lobby ───────────────────────────────────────────────────────
    let host = create(&store, "alice", config.clone()).await?;
    let code = host.code().to_string();
    tracing::info!("Lobby {code} created");

    let bob = join(&store, &code, "bob", config.clone()).await?;
    let carol = join(&store, &code, "carol", config.clone()).await?;

    host.set_seat_count(3).await?;
    for (seat, player) in [(1, &host), (2, &bob), (3, &carol)] {
        player.sit(seat).await?;
        tracing::info!("{} sits at seat {seat}", player.participant_id());
    }

    // ── Play ────────────────────────────────────────────────────────
    let mut players = Vec::new();
    for lobby in [&host, &bob, &carol] {
        let (session, events) =
            PongSession::start(Arc::clone(lobby.store()), lobby.context().clone(), config.clone());
        players.push(tokio::spawn(play(session, events)));
    }

    host.start_game().await?;
    tracing::info!("Game started");

    tokio::select! {
        _ = async {
            for player in players {
                if let Err(e) = player.await {
                    tracing::error!("player task failed: {e}");
                }
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, closing the lobby…");
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    host.close().await?;
    tracing::info!("Lobby closed. Goodbye!");
    Ok(())
}

async fn create(
    store: &MemoryStore,
    id: &str,
    config: SessionConfig,
) -> pass_pong::error::Result<LobbyClient<MemoryConnection>> {
    let conn = Arc::new(store.connect());
    let clock = ClockSync::system(conn.server_time_offset());
    LobbyClient::create(conn, clock, id, config).await
}

async fn join(
    store: &MemoryStore,
    code: &str,
    id: &str,
    config: SessionConfig,
) -> pass_pong::error::Result<LobbyClient<MemoryConnection>> {
    let conn = Arc::new(store.connect());
    let clock = ClockSync::system(conn.server_time_offset());
    LobbyClient::join(conn, clock, code, id, config).await
}

/// One player's event loop. Returns once the round has been cleared.
async fn play(
    mut session: PongSession,
    mut events: tokio::sync::mpsc::Receiver<SessionEvent>,
) {
    let me = session.context().participant_id.clone();
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::RoundStarted {
                current_player,
                round_duration,
                ..
            } => {
                tracing::info!("[{me}] round started, {current_player} serves ({round_duration} ms)");
            }

            // The ball is on our screen: let it fly, then send it on.
            SessionEvent::BallReset { placement, .. } if placement != BallPlacement::Hidden => {
                tracing::info!("[{me}] ball arrives: {placement:?}");
                tokio::time::sleep(FLIGHT_TIME).await;
                if let Err(e) = session.pass_turn(Direction::Left, 1.5) {
                    tracing::warn!("[{me}] could not pass: {e}");
                }
            }

            SessionEvent::RoundOver { loser, you_lost } => {
                if you_lost {
                    tracing::info!("[{me}] time's up, I was holding the ball");
                } else {
                    tracing::info!("[{me}] time's up, {loser} loses");
                }
                if let Err(e) = session.acknowledge_round_end() {
                    tracing::warn!("[{me}] could not acknowledge: {e}");
                }
            }

            SessionEvent::RoundCleared => {
                tracing::info!("[{me}] table reset");
                break;
            }

            SessionEvent::Notice { code, message } => {
                tracing::warn!("[{me}] {code}: {message}");
            }

            SessionEvent::Disconnected { reason } => {
                tracing::warn!("[{me}] disconnected: {}", reason.as_deref().unwrap_or("unknown"));
                return;
            }

            other => tracing::debug!("[{me}] {other:?}"),
        }
    }
    session.shutdown().await;
}
