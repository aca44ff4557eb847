//! Round and turn coordination.
//!
//! [`SessionCoordinator`] is the per-participant state machine behind a
//! round:
//!
//! ```text
//! NoRound ──start──▶ RoundActive ──timeout──▶ RoundOver ──all done──▶ NoRound
//! ```
//!
//! It never owns shared state. Remote documents come in through
//! [`observe_lobby`](SessionCoordinator::observe_lobby) and
//! [`observe_round`](SessionCoordinator::observe_round); local intents
//! ([`pass_turn`](SessionCoordinator::pass_turn),
//! [`report_miss`](SessionCoordinator::report_miss),
//! [`acknowledge_round_end`](SessionCoordinator::acknowledge_round_end)) go
//! out as writes. Every participant runs the same logic, so the write
//! patterns are conditional or idempotent and racing clients converge.
//!
//! Ball resets are applied only when the store reports a new
//! `ballResetTime`, including for the participant that passed.
//! Resulting [`SessionEvent`]s are queued and collected with
//! [`drain_events`](SessionCoordinator::drain_events).

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::clock::ClockSync;
use crate::config::{SessionConfig, TimekeeperRole};
use crate::document::{
    decode, is_active_round, lobby_path, round_path, round_reset_writes, BallState, Direction,
    Lobby, ParticipantId, Round, Timestamp,
};
use crate::error::{PassPongError, Result};
use crate::event::{BallPlacement, SessionEvent};
use crate::lobby_code::LobbyCode;
use crate::seating::{compute_order, next_in_order, SeatingOrder};
use crate::store::DocumentStore;

/// Who this coordinator acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub lobby_code: LobbyCode,
    pub participant_id: ParticipantId,
}

impl SessionContext {
    pub fn new(lobby_code: LobbyCode, participant_id: impl Into<ParticipantId>) -> Self {
        Self {
            lobby_code,
            participant_id: participant_id.into(),
        }
    }
}

/// Local view of the round lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundPhase {
    #[default]
    NoRound,
    RoundActive,
    RoundOver,
}

/// Result of a [`pass_turn`](SessionCoordinator::pass_turn) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass was written; `to` holds the ball now.
    Passed { to: ParticipantId },
    /// Too soon after our previous pass. Nothing was written.
    Debounced,
    /// Someone else holds the ball.
    NotCurrentPlayer,
    /// No round is running.
    NoActiveRound,
    /// We are not in the seating order.
    NotSeated,
    /// We are serving a miss punishment.
    Punished,
}

/// Result of a [`report_miss`](SessionCoordinator::report_miss) request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissOutcome {
    /// Frozen until the given server time.
    Punished { until: Timestamp },
    AlreadyPunished,
    NotCurrentPlayer,
    NoActiveRound,
}

/// Per-participant round state machine.
pub struct SessionCoordinator<S: DocumentStore + ?Sized> {
    store: Arc<S>,
    context: SessionContext,
    clock: ClockSync,
    config: SessionConfig,
    lobby: Option<Lobby>,
    order: SeatingOrder,
    round: Option<Round>,
    round_seen: bool,
    phase: RoundPhase,
    applied_reset: Option<Timestamp>,
    last_pass_at: Option<Timestamp>,
    punished_until: Option<Timestamp>,
    /// `startTime` of the round we already marked over.
    timeout_reported: Option<Timestamp>,
    finished: bool,
    events: Vec<SessionEvent>,
}

impl<S: DocumentStore + ?Sized> SessionCoordinator<S> {
    pub fn new(
        store: Arc<S>,
        context: SessionContext,
        clock: ClockSync,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            context,
            clock,
            config,
            lobby: None,
            order: SeatingOrder::new(),
            round: None,
            round_seen: false,
            phase: RoundPhase::NoRound,
            applied_reset: None,
            last_pass_at: None,
            punished_until: None,
            timeout_reported: None,
            finished: false,
            events: Vec::new(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn seating_order(&self) -> &[ParticipantId] {
        &self.order
    }

    pub fn lobby(&self) -> Option<&Lobby> {
        self.lobby.as_ref()
    }

    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    pub fn punished_until(&self) -> Option<Timestamp> {
        self.punished_until
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    /// Returns `true` once the lobby is gone or we were removed from it.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns `true` if we hold the ball in a running round.
    pub fn is_current_player(&self) -> bool {
        self.phase == RoundPhase::RoundActive
            && self
                .round
                .as_ref()
                .is_some_and(|r| r.current_player == self.context.participant_id)
    }

    /// Take the events queued since the last call.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn me(&self) -> &str {
        &self.context.participant_id
    }

    // ── Remote observations ─────────────────────────────────────────

    /// Apply a lobby snapshot.
    ///
    /// Recomputes the seating order, runs the all-done cleanup when every
    /// seated participant acknowledged the round, and attempts a round start
    /// when the game is on and no round runs.
    ///
    /// # Errors
    ///
    /// Store failures from the cleanup or start writes. Local state has
    /// already been updated when they are returned.
    pub async fn observe_lobby(&mut self, lobby: Option<Lobby>) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let Some(lobby) = lobby else {
            info!(lobby = %self.context.lobby_code, "lobby closed");
            self.finish(SessionEvent::LobbyClosed);
            return Ok(());
        };
        if !lobby.players.contains_key(self.me()) {
            info!(lobby = %self.context.lobby_code, "removed from lobby");
            self.lobby = Some(lobby);
            self.finish(SessionEvent::Kicked);
            return Ok(());
        }

        self.order = compute_order(&lobby.seats);
        self.events.push(SessionEvent::LobbyUpdated {
            seating_order: self.order.clone(),
            host_id: lobby.host_id.clone(),
            game_started: lobby.game_started,
        });
        self.lobby = Some(lobby);

        self.maybe_cleanup().await?;
        self.maybe_start_round().await
    }

    /// Apply a round snapshot.
    ///
    /// # Errors
    ///
    /// Store failures from a follow-up start or cleanup write.
    pub async fn observe_round(&mut self, round: Option<Round>) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.round_seen = true;
        match round {
            None => {
                if self.phase != RoundPhase::NoRound {
                    debug!(lobby = %self.context.lobby_code, "round removed");
                    self.events.push(SessionEvent::RoundCleared);
                }
                self.reset_round_state();
                self.phase = RoundPhase::NoRound;
                self.round = None;
                self.maybe_start_round().await
            }
            Some(round) if round.game_over => {
                if self.phase != RoundPhase::RoundOver {
                    let you_lost = round.current_player == self.context.participant_id;
                    info!(loser = %round.current_player, you_lost, "round over");
                    self.events.push(SessionEvent::RoundOver {
                        loser: round.current_player.clone(),
                        you_lost,
                    });
                    self.punished_until = None;
                    self.phase = RoundPhase::RoundOver;
                }
                self.round = Some(round);
                self.maybe_cleanup().await
            }
            Some(round) => {
                self.apply_active_round(round);
                Ok(())
            }
        }
    }

    fn apply_active_round(&mut self, round: Round) {
        let previous = self.round.take();
        let is_new = self.phase != RoundPhase::RoundActive
            || previous
                .as_ref()
                .is_none_or(|p| p.start_time != round.start_time);

        if is_new {
            self.reset_round_state();
            self.phase = RoundPhase::RoundActive;
            let round_duration = round
                .round_duration
                .unwrap_or_else(|| self.config.round_duration.fallback());
            info!(
                lobby = %self.context.lobby_code,
                current_player = %round.current_player,
                round_duration,
                "round started"
            );
            self.events.push(SessionEvent::RoundStarted {
                current_player: round.current_player.clone(),
                start_time: round.start_time,
                round_duration,
            });
        } else if previous
            .as_ref()
            .is_some_and(|p| p.current_player != round.current_player)
        {
            let is_you = round.current_player == self.context.participant_id;
            if !is_you {
                self.punished_until = None;
            }
            self.events.push(SessionEvent::TurnChanged {
                current_player: round.current_player.clone(),
                is_you,
            });
        }

        if let Some(reset_time) = round.ball_reset_time {
            if self.applied_reset != Some(reset_time) {
                self.applied_reset = Some(reset_time);
                let placement = self.placement_for(&round);
                debug!(reset_time, ?placement, "ball reset applied");
                self.events.push(SessionEvent::BallReset {
                    reset_time,
                    placement,
                });
            }
        }
        self.round = Some(round);
    }

    fn placement_for(&self, round: &Round) -> BallPlacement {
        if round.current_player != self.context.participant_id {
            return BallPlacement::Hidden;
        }
        match round.ball_state {
            Some(state) => BallPlacement::Enter {
                side: state.entry_side.opposite(),
                dx: state.dx,
            },
            None => BallPlacement::Serve,
        }
    }

    fn reset_round_state(&mut self) {
        self.applied_reset = None;
        self.last_pass_at = None;
        self.punished_until = None;
        self.timeout_reported = None;
    }

    fn finish(&mut self, event: SessionEvent) {
        self.finished = true;
        self.order.clear();
        self.events.push(event);
    }

    /// Re-read both documents and observe them.
    ///
    /// # Errors
    ///
    /// Store and decoding failures.
    pub async fn resync(&mut self) -> Result<()> {
        let code = &self.context.lobby_code;
        // Read the round first and observe it last: a cleanup landing between
        // the reads then shows up as an older round next to a newer lobby,
        // never as a removed round next to a still started lobby.
        let round = decode::<Round>(self.store.get(&round_path(code)).await?)?;
        let lobby = decode::<Lobby>(self.store.get(&lobby_path(code)).await?)?;
        self.observe_lobby(lobby).await?;
        self.observe_round(round).await
    }

    // ── Round start and cleanup ─────────────────────────────────────

    async fn maybe_start_round(&mut self) -> Result<()> {
        if self.finished || !self.round_seen || self.phase != RoundPhase::NoRound {
            return Ok(());
        }
        let Some(lobby) = self.lobby.as_ref() else {
            return Ok(());
        };
        if !lobby.game_started || lobby.any_done() {
            return Ok(());
        }
        let Some(first) = self.order.first() else {
            return Ok(());
        };

        let candidate = serde_json::to_value(Round::begin(
            first.clone(),
            self.clock.now(),
            self.config.round_duration.pick(),
        ))?;
        let committed = self
            .store
            .transaction(&round_path(&self.context.lobby_code), &mut |current| {
                if is_active_round(current.as_ref()) {
                    None
                } else {
                    Some(candidate.clone())
                }
            })
            .await?;
        debug!(lobby = %self.context.lobby_code, first = %first, committed, "round start attempted");
        Ok(())
    }

    async fn maybe_cleanup(&mut self) -> Result<()> {
        if self.finished || self.phase == RoundPhase::RoundActive {
            return Ok(());
        }
        let Some(lobby) = self.lobby.as_ref() else {
            return Ok(());
        };
        if !lobby.all_seated_done() {
            return Ok(());
        }

        let code = &self.context.lobby_code;
        let fields = round_reset_writes(code, lobby);
        self.store.update("", fields).await?;
        info!(lobby = %code, "every seated participant done, round cleaned up");
        Ok(())
    }

    // ── Local intents ───────────────────────────────────────────────

    /// Pass the ball to the neighbour in `direction`, carrying `dx`.
    ///
    /// # Errors
    ///
    /// Store failures. The debounce window is not consumed by a failed
    /// write.
    pub async fn pass_turn(&mut self, direction: Direction, dx: f64) -> Result<PassOutcome> {
        if self.phase != RoundPhase::RoundActive {
            return Ok(PassOutcome::NoActiveRound);
        }
        if !self.is_current_player() {
            return Ok(PassOutcome::NotCurrentPlayer);
        }
        if self.punished_until.is_some() {
            return Ok(PassOutcome::Punished);
        }
        if !self.order.iter().any(|id| id == self.me()) {
            return Ok(PassOutcome::NotSeated);
        }

        let now = self.clock.now();
        if let Some(last) = self.last_pass_at {
            if now.saturating_sub(last) < self.config.pass_cooldown_ms() {
                debug!(since_last_ms = now.saturating_sub(last), "pass debounced");
                return Ok(PassOutcome::Debounced);
            }
        }

        let next = next_in_order(&self.order, self.me(), direction);
        let ball_state = BallState {
            dx: if dx.is_finite() { dx } else { 0.0 },
            entry_side: direction,
        };
        let mut fields = Map::new();
        fields.insert("currentPlayer".into(), Value::String(next.clone()));
        fields.insert("ballResetTime".into(), Value::from(now));
        fields.insert("ballState".into(), serde_json::to_value(ball_state)?);

        let previous = self.last_pass_at.replace(now);
        if let Err(e) = self
            .store
            .update(&round_path(&self.context.lobby_code), fields)
            .await
        {
            self.last_pass_at = previous;
            warn!("pass write failed: {e}");
            return Err(e);
        }
        debug!(to = %next, %direction, "ball passed");
        Ok(PassOutcome::Passed { to: next })
    }

    /// The ball left through the bottom: freeze for the punishment delay.
    pub fn report_miss(&mut self) -> MissOutcome {
        if self.phase != RoundPhase::RoundActive {
            return MissOutcome::NoActiveRound;
        }
        if !self.is_current_player() {
            return MissOutcome::NotCurrentPlayer;
        }
        if self.punished_until.is_some() {
            return MissOutcome::AlreadyPunished;
        }
        let until = self
            .clock
            .now()
            .saturating_add(self.config.punishment_ms());
        self.punished_until = Some(until);
        debug!(until, "missed, punished");
        self.events.push(SessionEvent::Missed { resume_at: until });
        MissOutcome::Punished { until }
    }

    /// Mark our own `done` flag after the round ended.
    ///
    /// # Errors
    ///
    /// [`PassPongError::RoundNotOver`] unless the round is over,
    /// [`PassPongError::NotInLobby`] if we have no lobby record, and store
    /// failures.
    pub async fn acknowledge_round_end(&mut self) -> Result<()> {
        if self.phase != RoundPhase::RoundOver {
            return Err(PassPongError::RoundNotOver);
        }
        if !self
            .lobby
            .as_ref()
            .is_some_and(|l| l.players.contains_key(self.me()))
        {
            return Err(PassPongError::NotInLobby);
        }
        let path = format!(
            "{}/players/{}/done",
            lobby_path(&self.context.lobby_code),
            self.context.participant_id
        );
        self.store.set(&path, Value::Bool(true)).await?;
        debug!("round end acknowledged");
        Ok(())
    }

    // ── Timers ──────────────────────────────────────────────────────

    /// Expire the miss punishment and check the round timer.
    ///
    /// # Errors
    ///
    /// Store failures from the timeout write.
    pub async fn tick(&mut self) -> Result<()> {
        if let Some(until) = self.punished_until {
            if self.clock.now() >= until {
                self.punished_until = None;
                debug!("punishment over");
                self.events.push(SessionEvent::PunishmentEnded);
            }
        }
        self.check_round_timeout().await.map(|_| ())
    }

    fn is_timekeeper(&self, round: &Round) -> bool {
        // A holder who is no longer seated cannot keep time, so everyone does.
        if !self.order.contains(&round.current_player) {
            return true;
        }
        match self.config.timekeeper {
            TimekeeperRole::CurrentPlayer => round.current_player == self.context.participant_id,
            TimekeeperRole::Host => self.lobby.as_ref().is_some_and(|l| l.is_host(self.me())),
            TimekeeperRole::Everyone => true,
        }
    }

    /// Mark the round over once its duration elapsed.
    ///
    /// Returns `true` when this call committed `gameOver`. Fires at most once
    /// per round per participant; the write is conditional on the round
    /// still being the one observed. While the ball holder is not seated
    /// (kicked or left), every participant keeps time.
    ///
    /// # Errors
    ///
    /// Store failures. A failed write is retried on the next call.
    pub async fn check_round_timeout(&mut self) -> Result<bool> {
        if self.finished || self.phase != RoundPhase::RoundActive {
            return Ok(false);
        }
        let Some(round) = self.round.as_ref() else {
            return Ok(false);
        };
        if !self.is_timekeeper(round) || self.timeout_reported == Some(round.start_time) {
            return Ok(false);
        }
        let duration = round
            .round_duration
            .unwrap_or_else(|| self.config.round_duration.fallback());
        if !round.is_expired(self.clock.now(), duration) {
            return Ok(false);
        }

        let start_time = round.start_time;
        self.timeout_reported = Some(start_time);
        let result = self
            .store
            .transaction(&round_path(&self.context.lobby_code), &mut |current| {
                let mut value = current?;
                let doc = value.as_object_mut()?;
                let same_round = doc.get("startTime").and_then(Value::as_i64) == Some(start_time);
                let over = doc.get("gameOver").and_then(Value::as_bool) == Some(true);
                if !same_round || over {
                    return None;
                }
                doc.insert("gameOver".into(), Value::Bool(true));
                Some(value)
            })
            .await;
        match result {
            Ok(committed) => {
                info!(lobby = %self.context.lobby_code, committed, "round timer expired");
                Ok(committed)
            }
            Err(e) => {
                self.timeout_reported = None;
                Err(e)
            }
        }
    }
}

impl<S: DocumentStore + ?Sized> std::fmt::Debug for SessionCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("context", &self.context)
            .field("phase", &self.phase)
            .field("order", &self.order)
            .field("finished", &self.finished)
            .finish()
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
    use crate::clock::ManualClock;
    use crate::config::RoundDuration;
    use crate::document::{PlayerRecord, SeatSlot};
    use crate::presence::{PresenceCleanup, StoreCleanup};
    use crate::stores::{MemoryConnection, MemoryStore};
    use std::time::Duration;

    const T0: Timestamp = 1_700_000_000_000;

    struct Table {
        store: MemoryStore,
        clock: Arc<ManualClock>,
        code: LobbyCode,
    }

    impl Table {
        /// Lobby with seats `1..=n` filled by `ids`, game started.
        async fn seated(ids: &[&str]) -> Self {
            let store = MemoryStore::new();
            let code = LobbyCode::parse("TABLE1").unwrap();
            let mut lobby = Lobby::new(ids[0], PlayerRecord::new("Host", T0), 0);
            for (i, id) in ids.iter().enumerate() {
                lobby
                    .players
                    .insert((*id).to_string(), PlayerRecord::new(*id, T0));
                lobby
                    .seats
                    .insert(i as u32 + 1, SeatSlot::Occupied((*id).to_string()));
            }
            lobby.game_started = true;
            let admin = store.connect();
            admin
                .set(&lobby_path(&code), serde_json::to_value(&lobby).unwrap())
                .await
                .unwrap();
            Self {
                store,
                clock: Arc::new(ManualClock::new(T0)),
                code,
            }
        }

        fn join(&self, id: &str) -> SessionCoordinator<MemoryConnection> {
            self.join_with(id, config())
        }

        fn join_with(
            &self,
            id: &str,
            config: SessionConfig,
        ) -> SessionCoordinator<MemoryConnection> {
            let conn = Arc::new(self.store.connect());
            let clock = ClockSync::new(self.clock.clone(), conn.server_time_offset());
            let context = SessionContext::new(self.code.clone(), id);
            SessionCoordinator::new(conn, context, clock, config)
        }

        fn round(&self) -> Option<Round> {
            decode(self.store.snapshot(&round_path(&self.code))).unwrap()
        }

        fn lobby(&self) -> Option<Lobby> {
            decode(self.store.snapshot(&lobby_path(&self.code))).unwrap()
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::default().with_round_duration(RoundDuration::Fixed(60_000))
    }

    /// Resync until the coordinator sees a running round.
    async fn start(coord: &mut SessionCoordinator<MemoryConnection>) {
        coord.resync().await.unwrap();
        coord.resync().await.unwrap();
        assert_eq!(coord.phase(), RoundPhase::RoundActive);
    }

    #[tokio::test]
    async fn start_elects_first_seat() {
        let table = Table::seated(&["A", "B", "C"]).await;
        let mut b = table.join("B");
        start(&mut b).await;

        let round = table.round().unwrap();
        assert_eq!(round.current_player, "A");
        assert_eq!(round.start_time, T0);
        assert_eq!(round.ball_reset_time, Some(T0));
        assert!(!round.game_over);

        let events = b.drain_events();
        assert!(events.contains(&SessionEvent::RoundStarted {
            current_player: "A".into(),
            start_time: T0,
            round_duration: 60_000,
        }));
        assert!(events.contains(&SessionEvent::BallReset {
            reset_time: T0,
            placement: BallPlacement::Hidden,
        }));
    }

    #[tokio::test]
    async fn concurrent_starters_converge() {
        let table = Table::seated(&["A", "B"]).await;
        let mut a = table.join("A");
        let mut b = table.join("B");

        // Both saw "no round" before either start landed.
        let lobby = table.lobby();
        a.observe_round(None).await.unwrap();
        b.observe_round(None).await.unwrap();

        a.observe_lobby(lobby.clone()).await.unwrap();
        let first = table.round().unwrap();
        table.clock.advance(Duration::from_millis(40));
        b.observe_lobby(lobby).await.unwrap();
        assert_eq!(table.round().unwrap(), first);

        a.resync().await.unwrap();
        b.resync().await.unwrap();
        assert_eq!(a.round(), b.round());
        assert_eq!(a.phase(), RoundPhase::RoundActive);
        assert_eq!(b.phase(), RoundPhase::RoundActive);
    }

    #[tokio::test]
    async fn no_start_without_game_started_or_seats() {
        let table = Table::seated(&["A"]).await;
        let admin = table.store.connect();
        admin
            .set(&format!("{}/gameStarted", lobby_path(&table.code)), Value::Bool(false))
            .await
            .unwrap();
        let mut a = table.join("A");
        a.resync().await.unwrap();
        assert!(table.round().is_none());

        admin
            .update(
                &lobby_path(&table.code),
                serde_json::from_value(serde_json::json!({ "gameStarted": true, "seats/1": 0 }))
                    .unwrap(),
            )
            .await
            .unwrap();
        a.resync().await.unwrap();
        assert!(a.seating_order().is_empty());
        assert!(table.round().is_none());
    }

    #[tokio::test]
    async fn reset_is_applied_once_per_reset_time() {
        let table = Table::seated(&["A", "B"]).await;
        let mut a = table.join("A");
        start(&mut a).await;
        a.drain_events();

        let mut round = table.round().unwrap();
        round.current_player = "A".into();
        round.ball_reset_time = Some(T0 + 500);
        round.ball_state = Some(BallState {
            dx: 2.0,
            entry_side: Direction::Left,
        });
        a.observe_round(Some(round.clone())).await.unwrap();
        a.observe_round(Some(round.clone())).await.unwrap();

        let resets: Vec<_> = a
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::BallReset { .. }))
            .collect();
        assert_eq!(
            resets,
            vec![SessionEvent::BallReset {
                reset_time: T0 + 500,
                placement: BallPlacement::Enter {
                    side: Direction::Right,
                    dx: 2.0
                },
            }]
        );
    }

    #[tokio::test]
    async fn passes_rotate_left_around_three_seats() {
        let table = Table::seated(&["A", "B", "C"]).await;
        let mut seats = [table.join("A"), table.join("B"), table.join("C")];
        for coord in seats.iter_mut() {
            coord.resync().await.unwrap();
        }
        for coord in seats.iter_mut() {
            coord.resync().await.unwrap();
        }

        for (passer, expected) in [(0, "B"), (1, "C"), (2, "A")] {
            table.clock.advance(Duration::from_millis(1_000));
            let outcome = seats[passer].pass_turn(Direction::Left, 1.0).await.unwrap();
            assert_eq!(outcome, PassOutcome::Passed { to: expected.into() });
            for coord in seats.iter_mut() {
                coord.resync().await.unwrap();
            }
            assert_eq!(table.round().unwrap().current_player, expected);
        }

        // A got the ball back from C, who passed left, so it enters from the right.
        let last_reset = seats[0]
            .drain_events()
            .into_iter()
            .rev()
            .find(|e| matches!(e, SessionEvent::BallReset { .. }));
        assert_eq!(
            last_reset.as_ref(),
            Some(&SessionEvent::BallReset {
                reset_time: T0 + 3_000,
                placement: BallPlacement::Enter {
                    side: Direction::Right,
                    dx: 1.0
                },
            })
        );
    }

    #[tokio::test]
    async fn pass_is_debounced_within_cooldown() {
        let table = Table::seated(&["A", "B"]).await;
        let mut a = table.join("A");
        start(&mut a).await;

        assert_eq!(
            a.pass_turn(Direction::Right, 0.0).await.unwrap(),
            PassOutcome::Passed { to: "B".into() }
        );
        table.clock.advance(Duration::from_millis(299));
        assert_eq!(
            a.pass_turn(Direction::Right, 0.0).await.unwrap(),
            PassOutcome::Debounced
        );
        assert_eq!(table.round().unwrap().ball_reset_time, Some(T0));

        table.clock.advance(Duration::from_millis(2));
        assert_eq!(
            a.pass_turn(Direction::Right, 0.0).await.unwrap(),
            PassOutcome::Passed { to: "B".into() }
        );
        assert_eq!(table.round().unwrap().ball_reset_time, Some(T0 + 301));
    }

    #[tokio::test]
    async fn failed_pass_does_not_consume_cooldown() {
        let table = Table::seated(&["A", "B"]).await;
        let conn = Arc::new(table.store.connect());
        let clock = ClockSync::new(table.clock.clone(), conn.server_time_offset());
        let mut a = SessionCoordinator::new(
            conn.clone(),
            SessionContext::new(table.code.clone(), "A"),
            clock,
            config(),
        );
        start(&mut a).await;

        conn.fail_writes(true);
        assert!(a.pass_turn(Direction::Left, 0.0).await.is_err());
        conn.fail_writes(false);
        assert_eq!(
            a.pass_turn(Direction::Left, 0.0).await.unwrap(),
            PassOutcome::Passed { to: "B".into() }
        );
    }

    #[tokio::test]
    async fn only_the_current_player_passes() {
        let table = Table::seated(&["A", "B"]).await;
        let mut b = table.join("B");
        start(&mut b).await;
        assert_eq!(
            b.pass_turn(Direction::Left, 0.0).await.unwrap(),
            PassOutcome::NotCurrentPlayer
        );

        let mut idle = table.join("Z");
        assert_eq!(
            idle.pass_turn(Direction::Left, 0.0).await.unwrap(),
            PassOutcome::NoActiveRound
        );
    }

    #[tokio::test]
    async fn lone_player_passes_to_self() {
        let table = Table::seated(&["A"]).await;
        let mut a = table.join("A");
        start(&mut a).await;
        table.clock.advance(Duration::from_millis(500));
        assert_eq!(
            a.pass_turn(Direction::Left, -1.5).await.unwrap(),
            PassOutcome::Passed { to: "A".into() }
        );
        a.resync().await.unwrap();
        assert!(a.drain_events().contains(&SessionEvent::BallReset {
            reset_time: T0 + 500,
            placement: BallPlacement::Enter {
                side: Direction::Right,
                dx: -1.5
            },
        }));
    }

    #[tokio::test]
    async fn miss_freezes_until_punishment_ends() {
        let table = Table::seated(&["A", "B"]).await;
        let mut a = table.join("A");
        start(&mut a).await;
        a.drain_events();

        assert_eq!(a.report_miss(), MissOutcome::Punished { until: T0 + 5_000 });
        assert_eq!(a.report_miss(), MissOutcome::AlreadyPunished);
        assert_eq!(
            a.pass_turn(Direction::Left, 0.0).await.unwrap(),
            PassOutcome::Punished
        );

        table.clock.advance(Duration::from_millis(4_999));
        a.tick().await.unwrap();
        assert!(a.punished_until().is_some());

        table.clock.advance(Duration::from_millis(1));
        a.tick().await.unwrap();
        assert!(a.punished_until().is_none());
        assert_eq!(
            a.drain_events(),
            vec![
                SessionEvent::Missed { resume_at: T0 + 5_000 },
                SessionEvent::PunishmentEnded
            ]
        );
        assert_eq!(table.round().unwrap().current_player, "A");
    }

    #[tokio::test]
    async fn timeout_fires_exactly_once_at_duration() {
        let table = Table::seated(&["A", "B"]).await;
        let mut a = table.join("A");
        let mut b = table.join("B");
        start(&mut a).await;
        b.resync().await.unwrap();

        table.clock.set(T0 + 59_999);
        assert!(!a.check_round_timeout().await.unwrap());
        assert!(!table.round().unwrap().game_over);

        table.clock.set(T0 + 60_000);
        // B does not hold the ball, so it is not the timekeeper.
        assert!(!b.check_round_timeout().await.unwrap());
        assert!(a.check_round_timeout().await.unwrap());
        assert!(!a.check_round_timeout().await.unwrap());
        assert!(table.round().unwrap().game_over);

        a.resync().await.unwrap();
        assert_eq!(a.phase(), RoundPhase::RoundOver);
        assert!(a.drain_events().contains(&SessionEvent::RoundOver {
            loser: "A".into(),
            you_lost: true,
        }));
    }

    #[tokio::test]
    async fn everyone_may_keep_time() {
        let table = Table::seated(&["A", "B"]).await;
        let mut b = table.join_with("B", config().with_timekeeper(TimekeeperRole::Everyone));
        start(&mut b).await;
        table.clock.set(T0 + 60_000);
        assert!(b.check_round_timeout().await.unwrap());
    }

    #[tokio::test]
    async fn acknowledgements_trigger_cleanup() {
        let table = Table::seated(&["A", "B"]).await;
        let mut a = table.join("A");
        let mut b = table.join("B");
        start(&mut a).await;
        b.resync().await.unwrap();

        assert!(matches!(
            a.acknowledge_round_end().await,
            Err(PassPongError::RoundNotOver)
        ));

        table.clock.set(T0 + 60_000);
        a.check_round_timeout().await.unwrap();
        a.resync().await.unwrap();
        b.resync().await.unwrap();

        a.acknowledge_round_end().await.unwrap();
        b.resync().await.unwrap();
        assert!(table.round().is_some(), "one of two done is not enough");
        assert!(table.lobby().unwrap().players["A"].done);

        b.acknowledge_round_end().await.unwrap();
        b.resync().await.unwrap();

        assert!(table.round().is_none());
        let lobby = table.lobby().unwrap();
        assert!(!lobby.game_started);
        assert!(!lobby.any_done());

        a.resync().await.unwrap();
        assert_eq!(a.phase(), RoundPhase::NoRound);
        assert!(a.drain_events().contains(&SessionEvent::RoundCleared));
    }

    #[tokio::test]
    async fn lobby_removal_and_kick_finish_the_session() {
        let table = Table::seated(&["A", "B"]).await;
        let admin = table.store.connect();
        let mut a = table.join("A");
        let mut b = table.join("B");
        a.resync().await.unwrap();
        b.resync().await.unwrap();

        admin
            .remove(&format!("{}/players/B", lobby_path(&table.code)))
            .await
            .unwrap();
        b.resync().await.unwrap();
        assert!(b.is_finished());
        assert_eq!(b.drain_events().last(), Some(&SessionEvent::Kicked));

        admin.remove(&lobby_path(&table.code)).await.unwrap();
        a.resync().await.unwrap();
        assert!(a.is_finished());
        assert_eq!(a.drain_events().last(), Some(&SessionEvent::LobbyClosed));
    }

    async fn cleanup_abandoned(table: &Table) {
        let store = Arc::new(table.store.connect());
        StoreCleanup::new(store, table.code.clone())
            .cleanup()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resync_after_presence_cleanup_keeps_round_removed() {
        let table = Table::seated(&["A"]).await;
        let mut a = table.join("A");
        start(&mut a).await;
        a.drain_events();

        cleanup_abandoned(&table).await;
        a.resync().await.unwrap();

        assert!(!table.lobby().unwrap().game_started);
        assert!(table.round().is_none());
        assert_eq!(a.phase(), RoundPhase::NoRound);
        assert!(a.drain_events().contains(&SessionEvent::RoundCleared));
    }

    #[tokio::test]
    async fn presence_cleanup_clears_done_flags_for_the_next_start() {
        let table = Table::seated(&["A", "B"]).await;
        let admin = table.store.connect();
        let mut a = table.join("A");
        let mut b = table.join("B");
        start(&mut a).await;
        b.resync().await.unwrap();

        table.clock.set(T0 + 60_000);
        assert!(a.check_round_timeout().await.unwrap());
        a.resync().await.unwrap();
        b.resync().await.unwrap();
        a.acknowledge_round_end().await.unwrap();
        a.resync().await.unwrap();
        b.resync().await.unwrap();

        // B never acknowledges; everybody drops off instead.
        cleanup_abandoned(&table).await;
        let lobby = table.lobby().unwrap();
        assert!(!lobby.game_started);
        assert!(!lobby.any_done());
        a.resync().await.unwrap();
        b.resync().await.unwrap();
        assert_eq!(b.phase(), RoundPhase::NoRound);

        table.clock.set(T0 + 90_000);
        admin
            .set(&format!("{}/gameStarted", lobby_path(&table.code)), Value::Bool(true))
            .await
            .unwrap();
        b.resync().await.unwrap();
        b.resync().await.unwrap();

        assert_eq!(b.phase(), RoundPhase::RoundActive);
        let round = table.round().unwrap();
        assert_eq!(round.current_player, "A");
        assert_eq!(round.start_time, T0 + 90_000);
    }

    #[tokio::test]
    async fn round_still_times_out_after_holder_is_kicked() {
        let table = Table::seated(&["A", "B"]).await;
        let admin = table.store.connect();
        let mut a = table.join("A");
        start(&mut a).await;
        assert_eq!(
            a.pass_turn(Direction::Left, 0.0).await.unwrap(),
            PassOutcome::Passed { to: "B".into() }
        );

        let lobby_doc = lobby_path(&table.code);
        let mut kick = Map::new();
        kick.insert("players/B".into(), Value::Null);
        kick.insert("seats/2".into(), Value::from(0));
        admin.update(&lobby_doc, kick).await.unwrap();
        a.resync().await.unwrap();
        assert_eq!(a.seating_order(), ["A".to_string()]);
        assert_eq!(a.round().unwrap().current_player, "B");

        table.clock.set(T0 + 59_999);
        assert!(!a.check_round_timeout().await.unwrap());
        table.clock.set(T0 + 60_000);
        assert!(a.check_round_timeout().await.unwrap());

        a.resync().await.unwrap();
        assert_eq!(a.phase(), RoundPhase::RoundOver);
        assert!(a.drain_events().contains(&SessionEvent::RoundOver {
            loser: "B".into(),
            you_lost: false,
        }));
    }
}
