//! Background driver for one participant at the table.
//!
//! [`PongSession`] is a thin handle that talks to a background session loop
//! over an unbounded command channel. The loop subscribes to the lobby, the
//! round and the presence documents, feeds every change into a
//! [`SessionCoordinator`], ticks its timers and emits [`SessionEvent`]s on a
//! bounded channel returned from [`PongSession::start`].
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), pass_pong::PassPongError> {
//! use std::sync::Arc;
//! use pass_pong::{
//!     ClockSync, Direction, DocumentStore, LobbyClient, MemoryStore, PongSession, SessionConfig,
//!     SessionEvent,
//! };
//!
//! let store = Arc::new(MemoryStore::new().connect());
//! let clock = ClockSync::system(store.server_time_offset());
//! let lobby = LobbyClient::create(store.clone(), clock, "alice", SessionConfig::default()).await?;
//!
//! let (mut session, mut events) =
//!     PongSession::start(store, lobby.context().clone(), SessionConfig::default());
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::BallReset { .. } => session.pass_turn(Direction::Left, 1.0)?,
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::clock::ClockSync;
use crate::config::SessionConfig;
use crate::coordinator::{PassOutcome, RoundPhase, SessionContext, SessionCoordinator};
use crate::document::{
    decode, lobby_path, presence_entry_path, presence_path, round_path, Direction, Lobby,
    ParticipantId, Round, Timestamp,
};
use crate::error::{PassPongError, Result};
use crate::event::SessionEvent;
use crate::presence::{count_present, PresenceTracker, StoreCleanup};
use crate::seating::SeatingOrder;
use crate::store::DocumentStore;

// ── Commands ────────────────────────────────────────────────────────

#[derive(Debug)]
enum SessionCommand {
    PassTurn { direction: Direction, dx: f64 },
    ReportMiss,
    AcknowledgeRoundEnd,
    Resync,
}

// ── Shared state ────────────────────────────────────────────────────

/// Snapshot of the session as last seen by the loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub phase: RoundPhase,
    pub seating_order: SeatingOrder,
    pub host_id: Option<ParticipantId>,
    pub current_player: Option<ParticipantId>,
    pub is_current_player: bool,
    pub punished_until: Option<Timestamp>,
}

struct SessionState {
    running: AtomicBool,
    view: Mutex<SessionView>,
}

// ── Session handle ──────────────────────────────────────────────────

/// Handle on a running session loop.
///
/// Commands return as soon as they are queued. Their effects show up on the
/// event channel; failures are reported as [`SessionEvent::Notice`].
pub struct PongSession {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    state: Arc<SessionState>,
    context: SessionContext,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl PongSession {
    /// Start a session on the system clock, corrected by the store's
    /// server-time offset.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start<S: DocumentStore + ?Sized>(
        store: Arc<S>,
        context: SessionContext,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let clock = ClockSync::system(store.server_time_offset());
        Self::start_with_clock(store, context, clock, config)
    }

    /// Start a session with an explicit clock.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start_with_clock<S: DocumentStore + ?Sized>(
        store: Arc<S>,
        context: SessionContext,
        clock: ClockSync,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let state = Arc::new(SessionState {
            running: AtomicBool::new(true),
            view: Mutex::new(SessionView::default()),
        });
        let shutdown_timeout = config.shutdown_timeout;
        let coordinator =
            SessionCoordinator::new(Arc::clone(&store), context.clone(), clock, config.clone());

        let task = tokio::spawn(session_loop(
            store,
            coordinator,
            config,
            cmd_rx,
            event_tx,
            Arc::clone(&state),
            shutdown_rx,
        ));

        let session = Self {
            cmd_tx,
            state,
            context,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };
        (session, event_rx)
    }

    // ── Commands ────────────────────────────────────────────────────

    /// The ball left through the top in `direction` with horizontal speed
    /// `dx`: hand it to the neighbour on that side.
    ///
    /// # Errors
    ///
    /// Returns [`PassPongError::SessionClosed`] if the loop has stopped.
    pub fn pass_turn(&self, direction: Direction, dx: f64) -> Result<()> {
        self.send(SessionCommand::PassTurn { direction, dx })
    }

    /// The ball left through the bottom.
    ///
    /// # Errors
    ///
    /// Returns [`PassPongError::SessionClosed`] if the loop has stopped.
    pub fn report_miss(&self) -> Result<()> {
        self.send(SessionCommand::ReportMiss)
    }

    /// Confirm we saw the end of the round.
    ///
    /// # Errors
    ///
    /// Returns [`PassPongError::SessionClosed`] if the loop has stopped.
    pub fn acknowledge_round_end(&self) -> Result<()> {
        self.send(SessionCommand::AcknowledgeRoundEnd)
    }

    /// Re-read the lobby and round documents.
    ///
    /// # Errors
    ///
    /// Returns [`PassPongError::SessionClosed`] if the loop has stopped.
    pub fn resync(&self) -> Result<()> {
        self.send(SessionCommand::Resync)
    }

    /// Stop the session loop.
    ///
    /// The event receiver yields a final [`SessionEvent::Disconnected`] and
    /// then `None`.
    pub async fn shutdown(&mut self) {
        debug!("PongSession: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.running.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while the session loop runs.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// The latest state published by the loop.
    pub async fn view(&self) -> SessionView {
        self.state.view.lock().await.clone()
    }

    fn send(&self, cmd: SessionCommand) -> Result<()> {
        if !self.is_running() {
            return Err(PassPongError::SessionClosed);
        }
        self.cmd_tx
            .send(cmd)
            .map_err(|_| PassPongError::SessionClosed)
    }
}

impl std::fmt::Debug for PongSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PongSession")
            .field("context", &self.context)
            .field("running", &self.is_running())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for PongSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// Multiplexes commands, document changes and the timer tick.
///
/// Exits when:
/// - shutdown is requested or the handle is dropped
/// - a subscription closes (store connection gone)
/// - the lobby disappears or we were removed from it
async fn session_loop<S: DocumentStore + ?Sized>(
    store: Arc<S>,
    mut coordinator: SessionCoordinator<S>,
    config: SessionConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
    state: Arc<SessionState>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let context = coordinator.context().clone();
    let code = context.lobby_code.clone();
    debug!(lobby = %code, participant = %context.participant_id, "session loop started");

    // Register before subscribing so our own marker is in the first snapshot.
    let presence_entry = presence_entry_path(&code, &context.participant_id);
    if let Err(e) = store.register_presence(&presence_entry).await {
        emit_notice(&event_tx, &e).await;
    }

    let subscriptions = async {
        Ok::<_, PassPongError>((
            store.subscribe(&lobby_path(&code)).await?,
            store.subscribe(&round_path(&code)).await?,
            store.subscribe(&presence_path(&code)).await?,
        ))
    };
    let (mut lobby_rx, mut round_rx, mut presence_rx) = match subscriptions.await {
        Ok(subs) => subs,
        Err(e) => {
            emit_disconnected(&event_tx, &state, Some(format!("subscribe failed: {e}"))).await;
            return;
        }
    };

    let cleanup = Arc::new(StoreCleanup::new(Arc::clone(&store), code.clone()));
    let mut presence = PresenceTracker::new(config.presence_grace, cleanup);
    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                break Some("session shut down".to_string());
            }

            value = lobby_rx.recv() => {
                let Some(value) = value else {
                    break Some("store connection closed".to_string());
                };
                let result = match decode::<Lobby>(value) {
                    Ok(lobby) => coordinator.observe_lobby(lobby).await,
                    Err(e) => Err(e),
                };
                report(&event_tx, result).await;
            }

            value = round_rx.recv() => {
                let Some(value) = value else {
                    break Some("store connection closed".to_string());
                };
                let result = match decode::<Round>(value) {
                    Ok(round) => coordinator.observe_round(round).await,
                    Err(e) => Err(e),
                };
                report(&event_tx, result).await;
            }

            value = presence_rx.recv() => {
                let Some(value) = value else {
                    break Some("store connection closed".to_string());
                };
                let active = count_present(value.as_ref());
                let decision = presence.observe(active);
                debug!(active, ?decision, "presence changed");
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => handle_command(&mut coordinator, cmd, &event_tx).await,
                    None => {
                        debug!("command channel closed, shutting down session loop");
                        break Some("session shut down".to_string());
                    }
                }
            }

            _ = ticker.tick() => {
                let result = coordinator.tick().await;
                report(&event_tx, result).await;
            }
        }

        flush(&mut coordinator, &event_tx, &state).await;
        if coordinator.is_finished() {
            break Some("no longer part of the lobby".to_string());
        }
    };

    presence.cancel();
    emit_disconnected(&event_tx, &state, reason).await;
    debug!("session loop exited");
}

async fn handle_command<S: DocumentStore + ?Sized>(
    coordinator: &mut SessionCoordinator<S>,
    cmd: SessionCommand,
    event_tx: &mpsc::Sender<SessionEvent>,
) {
    let result = match cmd {
        SessionCommand::PassTurn { direction, dx } => {
            coordinator.pass_turn(direction, dx).await.map(|outcome| {
                if !matches!(outcome, PassOutcome::Passed { .. }) {
                    debug!(?outcome, "pass not taken");
                }
            })
        }
        SessionCommand::ReportMiss => {
            let outcome = coordinator.report_miss();
            debug!(?outcome, "miss reported");
            Ok(())
        }
        SessionCommand::AcknowledgeRoundEnd => coordinator.acknowledge_round_end().await,
        SessionCommand::Resync => coordinator.resync().await,
    };
    report(event_tx, result).await;
}

/// Turn an error into a notice. Local state is left as it was.
async fn report(event_tx: &mpsc::Sender<SessionEvent>, result: Result<()>) {
    if let Err(e) = result {
        emit_notice(event_tx, &e).await;
    }
}

async fn emit_notice(event_tx: &mpsc::Sender<SessionEvent>, error: &PassPongError) {
    warn!(code = %error.code(), "{error}");
    emit_event(
        event_tx,
        SessionEvent::Notice {
            code: error.code(),
            message: error.to_string(),
        },
    )
    .await;
}

/// Publish the new view and forward queued coordinator events.
async fn flush<S: DocumentStore + ?Sized>(
    coordinator: &mut SessionCoordinator<S>,
    event_tx: &mpsc::Sender<SessionEvent>,
    state: &SessionState,
) {
    let view = SessionView {
        phase: coordinator.phase(),
        seating_order: coordinator.seating_order().to_vec(),
        host_id: coordinator.lobby().and_then(|l| l.host_id.clone()),
        current_player: coordinator.round().map(|r| r.current_player.clone()),
        is_current_player: coordinator.is_current_player(),
        punished_until: coordinator.punished_until(),
    };
    *state.view.lock().await = view;
    for event in coordinator.drain_events() {
        emit_event(event_tx, event).await;
    }
}

/// Emit an event to the event channel. If the channel is full, log a warning
/// and drop the event to avoid blocking the session loop.
async fn emit_event(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit the final [`Disconnected`](SessionEvent::Disconnected) event.
///
/// Waits for room in the channel instead of dropping: it is always the last
/// event.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<SessionEvent>,
    state: &SessionState,
    reason: Option<String>,
) {
    state.running.store(false, Ordering::Release);
    if event_tx
        .send(SessionEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(all(test, feature = "store-memory"))]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::lobby::LobbyClient;
    use crate::stores::{MemoryConnection, MemoryStore};

    type Host = (Arc<MemoryConnection>, LobbyClient<MemoryConnection>);

    async fn host_lobby(store: &MemoryStore) -> Host {
        let conn = Arc::new(store.connect());
        let clock = ClockSync::system(conn.server_time_offset());
        let lobby = LobbyClient::create(conn.clone(), clock, "host", SessionConfig::default())
            .await
            .unwrap();
        (conn, lobby)
    }

    async fn next(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(30), events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    #[tokio::test(start_paused = true)]
    async fn first_event_reflects_the_lobby() {
        let store = MemoryStore::new();
        let (conn, lobby) = host_lobby(&store).await;
        let (mut session, mut events) =
            PongSession::start(conn, lobby.context().clone(), SessionConfig::default());

        match next(&mut events).await {
            SessionEvent::LobbyUpdated {
                seating_order,
                host_id,
                game_started,
            } => {
                assert!(seating_order.is_empty());
                assert_eq!(host_id.as_deref(), Some("host"));
                assert!(!game_started);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(session.view().await.host_id.as_deref(), Some("host"));
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_emits_disconnected_and_rejects_commands() {
        let store = MemoryStore::new();
        let (conn, lobby) = host_lobby(&store).await;
        let (mut session, mut events) =
            PongSession::start(conn, lobby.context().clone(), SessionConfig::default());
        assert!(session.is_running());

        session.shutdown().await;
        assert!(!session.is_running());
        assert!(matches!(
            session.pass_turn(Direction::Left, 0.0),
            Err(PassPongError::SessionClosed)
        ));

        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(SessionEvent::Disconnected {
                reason: Some("session shut down".into())
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn premature_acknowledgement_is_a_notice() {
        let store = MemoryStore::new();
        let (conn, lobby) = host_lobby(&store).await;
        let (mut session, mut events) =
            PongSession::start(conn, lobby.context().clone(), SessionConfig::default());
        let _ = next(&mut events).await;

        session.acknowledge_round_end().unwrap();
        loop {
            if let SessionEvent::Notice { code, .. } = next(&mut events).await {
                assert_eq!(code, crate::ErrorCode::RoundNotOver);
                break;
            }
        }
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_lobby_ends_the_session() {
        let store = MemoryStore::new();
        let (conn, lobby) = host_lobby(&store).await;
        let (session, mut events) =
            PongSession::start(conn, lobby.context().clone(), SessionConfig::default());
        let _ = next(&mut events).await;

        lobby.close().await.unwrap();
        assert_eq!(next(&mut events).await, SessionEvent::LobbyClosed);
        assert!(matches!(
            next(&mut events).await,
            SessionEvent::Disconnected { .. }
        ));
        assert!(!session.is_running());
    }
}
