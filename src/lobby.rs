//! Lobby membership, seat arbitration and host operations.
//!
//! Every mutation is a conditional read-modify-write of the whole lobby
//! document, so the checks (seat free, not blocked, requester is host) are
//! evaluated against the value actually being replaced. The host check is
//! only as strong as the clients performing it.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::ClockSync;
use crate::config::SessionConfig;
use crate::coordinator::SessionContext;
use crate::document::{
    decode, lobby_path, presence_entry_path, round_path, Lobby, ParticipantId, PlayerRecord,
    SeatNumber, SeatSlot, Timestamp,
};
use crate::error::{PassPongError, Result};
use crate::lobby_code::LobbyCode;
use crate::store::DocumentStore;

/// Name given to the participant that creates a lobby.
pub const DEFAULT_HOST_NAME: &str = "Host";

/// Name given to a participant joining a lobby.
pub const DEFAULT_PLAYER_NAME: &str = "Player";

const CODE_ATTEMPTS: usize = 8;

/// A participant's handle on one lobby.
pub struct LobbyClient<S: DocumentStore + ?Sized> {
    store: Arc<S>,
    clock: ClockSync,
    context: SessionContext,
    config: SessionConfig,
}

impl<S: DocumentStore + ?Sized> LobbyClient<S> {
    /// Create a lobby under a fresh code with `participant_id` as host.
    ///
    /// # Errors
    ///
    /// Store failures, or [`PassPongError::Store`] if no unused code was
    /// found.
    pub async fn create(
        store: Arc<S>,
        clock: ClockSync,
        participant_id: impl Into<ParticipantId>,
        config: SessionConfig,
    ) -> Result<Self> {
        let participant_id = participant_id.into();
        for attempt in 1..=CODE_ATTEMPTS {
            let code = LobbyCode::generate();
            let lobby = Lobby::new(
                &participant_id,
                PlayerRecord::new(DEFAULT_HOST_NAME, clock.now()),
                config.default_seat_count,
            );
            let value = serde_json::to_value(&lobby)?;
            let committed = store
                .transaction(&lobby_path(&code), &mut |current| match current {
                    None => Some(value.clone()),
                    Some(_) => None,
                })
                .await?;
            if !committed {
                debug!(%code, attempt, "lobby code in use, retrying");
                continue;
            }
            info!(%code, host = %participant_id, seats = config.default_seat_count, "lobby created");
            let client = Self {
                store,
                clock,
                context: SessionContext::new(code, participant_id),
                config,
            };
            client.register_presence().await?;
            return Ok(client);
        }
        Err(PassPongError::Store("no unused lobby code found".into()))
    }

    /// Join the lobby with the given code. An existing record (and its name)
    /// is kept.
    ///
    /// # Errors
    ///
    /// [`PassPongError::InvalidLobbyCode`], [`PassPongError::LobbyNotFound`]
    /// and store failures.
    pub async fn join(
        store: Arc<S>,
        clock: ClockSync,
        code: &str,
        participant_id: impl Into<ParticipantId>,
        config: SessionConfig,
    ) -> Result<Self> {
        let code = LobbyCode::parse(code)?;
        let participant_id = participant_id.into();
        let record = serde_json::to_value(PlayerRecord::new(DEFAULT_PLAYER_NAME, clock.now()))?;

        let mut found = false;
        store
            .transaction(&lobby_path(&code), &mut |current| {
                found = current.is_some();
                let mut lobby = current?;
                let players = lobby
                    .as_object_mut()?
                    .entry("players")
                    .or_insert_with(|| Value::Object(serde_json::Map::new()))
                    .as_object_mut()?;
                if players.contains_key(&participant_id) {
                    return None;
                }
                players.insert(participant_id.clone(), record.clone());
                Some(lobby)
            })
            .await?;
        if !found {
            return Err(PassPongError::LobbyNotFound {
                code: code.to_string(),
            });
        }

        info!(%code, participant = %participant_id, "joined lobby");
        let client = Self {
            store,
            clock,
            context: SessionContext::new(code, participant_id),
            config,
        };
        client.register_presence().await?;
        Ok(client)
    }

    pub fn code(&self) -> &LobbyCode {
        &self.context.lobby_code
    }

    pub fn participant_id(&self) -> &str {
        &self.context.participant_id
    }

    /// Lobby code and participant, for starting a
    /// [`PongSession`](crate::PongSession).
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// (Re-)register our presence marker for this lobby.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn register_presence(&self) -> Result<()> {
        self.store
            .register_presence(&presence_entry_path(self.code(), self.participant_id()))
            .await
    }

    /// Read the current lobby document.
    ///
    /// # Errors
    ///
    /// [`PassPongError::LobbyNotFound`] when it is gone, decoding and store
    /// failures.
    pub async fn snapshot(&self) -> Result<Lobby> {
        decode::<Lobby>(self.store.get(&lobby_path(self.code())).await?)?.ok_or_else(|| {
            PassPongError::LobbyNotFound {
                code: self.code().to_string(),
            }
        })
    }

    // ── Member operations ───────────────────────────────────────────

    /// Change our display name.
    ///
    /// # Errors
    ///
    /// [`PassPongError::InvalidName`] for a blank name, plus
    /// [`mutate`](Self::mutate) failures.
    pub async fn rename(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PassPongError::InvalidName);
        }
        let me = self.participant_id().to_string();
        self.mutate("rename", |lobby| {
            let record = lobby.players.get_mut(&me).ok_or(PassPongError::NotInLobby)?;
            record.name = name.to_string();
            Ok(())
        })
        .await
    }

    /// Take `seat`, leaving any seat we already hold.
    ///
    /// # Errors
    ///
    /// [`PassPongError::SeatBlocked`], [`PassPongError::SeatTaken`],
    /// [`PassPongError::NoSuchSeat`], plus [`mutate`](Self::mutate) failures.
    pub async fn sit(&self, seat: SeatNumber) -> Result<()> {
        let me = self.participant_id().to_string();
        let now = self.clock.now();
        self.mutate("sit", |lobby| sit_at(lobby, &me, seat, now)).await
    }

    /// Leave our seat. Sitting again is blocked for the seat-block window.
    ///
    /// # Errors
    ///
    /// [`PassPongError::NotSeated`], plus [`mutate`](Self::mutate) failures.
    pub async fn unseat(&self) -> Result<()> {
        let me = self.participant_id().to_string();
        let until = self.block_until();
        self.mutate("unseat", |lobby| unseat(lobby, &me, until)).await
    }

    /// Leave the lobby. The host has to [`close`](Self::close) it instead.
    ///
    /// # Errors
    ///
    /// [`PassPongError::HostCannotLeave`], plus [`mutate`](Self::mutate)
    /// failures.
    pub async fn leave(&self) -> Result<()> {
        let me = self.participant_id().to_string();
        self.mutate("leave", |lobby| {
            if lobby.is_host(&me) {
                return Err(PassPongError::HostCannotLeave);
            }
            remove_player(lobby, &me)
        })
        .await?;
        self.store
            .remove(&presence_entry_path(self.code(), self.participant_id()))
            .await
    }

    // ── Host operations ─────────────────────────────────────────────

    /// Remove `target` from its seat and block it from sitting for the
    /// seat-block window.
    ///
    /// # Errors
    ///
    /// [`PassPongError::NotHost`], [`PassPongError::NotInLobby`] for an
    /// unknown target, [`PassPongError::NotSeated`], plus
    /// [`mutate`](Self::mutate) failures.
    pub async fn unseat_player(&self, target: &str) -> Result<()> {
        let me = self.participant_id().to_string();
        let until = self.block_until();
        self.mutate("unseat_player", |lobby| {
            require_host(lobby, &me)?;
            unseat(lobby, target, until)
        })
        .await
    }

    /// Remove `target` from the lobby.
    ///
    /// # Errors
    ///
    /// [`PassPongError::NotHost`], [`PassPongError::HostCannotLeave`] when
    /// targeting the host, [`PassPongError::NotInLobby`], plus
    /// [`mutate`](Self::mutate) failures.
    pub async fn kick(&self, target: &str) -> Result<()> {
        let me = self.participant_id().to_string();
        self.mutate("kick", |lobby| {
            require_host(lobby, &me)?;
            if lobby.is_host(target) {
                return Err(PassPongError::HostCannotLeave);
            }
            remove_player(lobby, target)
        })
        .await
    }

    /// Change the number of seats.
    ///
    /// # Errors
    ///
    /// [`PassPongError::InvalidSeatCount`] outside `1..=max_seat_count`,
    /// [`PassPongError::NotHost`], plus [`mutate`](Self::mutate) failures.
    pub async fn set_seat_count(&self, count: u32) -> Result<()> {
        let max = self.config.max_seat_count;
        if !(1..=max).contains(&count) {
            return Err(PassPongError::InvalidSeatCount {
                requested: count,
                max,
            });
        }
        let me = self.participant_id().to_string();
        self.mutate("set_seat_count", |lobby| {
            require_host(lobby, &me)?;
            resize(lobby, count);
            Ok(())
        })
        .await
    }

    /// Start the game once every seat is taken.
    ///
    /// # Errors
    ///
    /// [`PassPongError::NotHost`], [`PassPongError::GameAlreadyStarted`],
    /// [`PassPongError::SeatsNotFilled`], plus [`mutate`](Self::mutate)
    /// failures.
    pub async fn start_game(&self) -> Result<()> {
        let me = self.participant_id().to_string();
        self.mutate("start_game", |lobby| {
            require_host(lobby, &me)?;
            if lobby.game_started {
                return Err(PassPongError::GameAlreadyStarted);
            }
            if !lobby.all_seats_filled() {
                return Err(PassPongError::SeatsNotFilled);
            }
            lobby.game_started = true;
            Ok(())
        })
        .await
    }

    /// Delete the lobby and any round.
    ///
    /// # Errors
    ///
    /// [`PassPongError::NotHost`], [`PassPongError::LobbyNotFound`] and store
    /// failures.
    pub async fn close(&self) -> Result<()> {
        let me = self.participant_id();
        let mut failure = None;
        self.store
            .transaction(&lobby_path(self.code()), &mut |current| {
                let lobby = match decode::<Lobby>(current) {
                    Ok(Some(lobby)) => lobby,
                    Ok(None) => {
                        failure = Some(self.not_found());
                        return None;
                    }
                    Err(e) => {
                        failure = Some(e);
                        return None;
                    }
                };
                failure = require_host(&lobby, me).err();
                failure.is_none().then_some(Value::Null)
            })
            .await?;
        if let Some(e) = failure {
            return Err(e);
        }
        self.store.remove(&round_path(self.code())).await?;
        info!(code = %self.code(), "lobby closed");
        Ok(())
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn block_until(&self) -> Timestamp {
        self.clock.now().saturating_add(self.config.seat_block_ms())
    }

    fn not_found(&self) -> PassPongError {
        PassPongError::LobbyNotFound {
            code: self.code().to_string(),
        }
    }

    /// Conditionally rewrite the lobby document with `apply`.
    ///
    /// `apply` may run more than once if the store retries.
    ///
    /// # Errors
    ///
    /// The error returned by `apply`, [`PassPongError::LobbyNotFound`] when
    /// the lobby is gone, decoding and store failures.
    async fn mutate<F>(&self, op: &'static str, mut apply: F) -> Result<()>
    where
        F: FnMut(&mut Lobby) -> Result<()> + Send,
    {
        let mut failure = None;
        self.store
            .transaction(&lobby_path(self.code()), &mut |current| {
                failure = None;
                let mut lobby = match decode::<Lobby>(current) {
                    Ok(Some(lobby)) => lobby,
                    Ok(None) => {
                        failure = Some(self.not_found());
                        return None;
                    }
                    Err(e) => {
                        failure = Some(e);
                        return None;
                    }
                };
                if let Err(e) = apply(&mut lobby) {
                    failure = Some(e);
                    return None;
                }
                match serde_json::to_value(&lobby) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        failure = Some(e.into());
                        None
                    }
                }
            })
            .await?;
        match failure {
            Some(e) => {
                warn!(op, code = %self.code(), "lobby operation rejected: {e}");
                Err(e)
            }
            None => {
                debug!(op, code = %self.code(), "lobby updated");
                Ok(())
            }
        }
    }
}

impl<S: DocumentStore + ?Sized> std::fmt::Debug for LobbyClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyClient")
            .field("context", &self.context)
            .finish()
    }
}

// ── Lobby mutations ─────────────────────────────────────────────────

fn require_host(lobby: &Lobby, participant: &str) -> Result<()> {
    if lobby.is_host(participant) {
        Ok(())
    } else {
        Err(PassPongError::NotHost)
    }
}

/// Empty whatever seat `participant` holds. Returns the seat it held.
fn vacate(lobby: &mut Lobby, participant: &str) -> Option<SeatNumber> {
    let seat = lobby.seat_of(participant)?;
    lobby.seats.insert(seat, SeatSlot::Empty);
    if let Some(record) = lobby.players.get_mut(participant) {
        record.seat = None;
    }
    Some(seat)
}

fn sit_at(lobby: &mut Lobby, participant: &str, seat: SeatNumber, now: Timestamp) -> Result<()> {
    let record = lobby
        .players
        .get(participant)
        .ok_or(PassPongError::NotInLobby)?;
    if let Some(until) = record.blocked_until.filter(|_| record.is_blocked(now)) {
        return Err(PassPongError::SeatBlocked { until });
    }
    match lobby.seats.get(&seat).map(SeatSlot::occupant) {
        None => return Err(PassPongError::NoSuchSeat { seat }),
        Some(Some(occupant)) if occupant == participant => return Ok(()),
        Some(Some(_)) => return Err(PassPongError::SeatTaken { seat }),
        Some(None) => {}
    }
    vacate(lobby, participant);
    lobby
        .seats
        .insert(seat, SeatSlot::Occupied(participant.to_string()));
    if let Some(record) = lobby.players.get_mut(participant) {
        record.seat = Some(seat);
        record.blocked_until = None;
    }
    Ok(())
}

fn unseat(lobby: &mut Lobby, participant: &str, until: Timestamp) -> Result<()> {
    if !lobby.players.contains_key(participant) {
        return Err(PassPongError::NotInLobby);
    }
    vacate(lobby, participant).ok_or(PassPongError::NotSeated)?;
    if let Some(record) = lobby.players.get_mut(participant) {
        record.blocked_until = Some(until);
    }
    Ok(())
}

fn remove_player(lobby: &mut Lobby, participant: &str) -> Result<()> {
    vacate(lobby, participant);
    lobby
        .players
        .remove(participant)
        .map(|_| ())
        .ok_or(PassPongError::NotInLobby)
}

fn resize(lobby: &mut Lobby, count: SeatNumber) {
    let removed: Vec<SeatNumber> = lobby.seats.range(count + 1..).map(|(n, _)| *n).collect();
    for seat in removed {
        if let Some(SeatSlot::Occupied(id)) = lobby.seats.remove(&seat) {
            if let Some(record) = lobby.players.get_mut(&id) {
                record.seat = None;
            }
        }
    }
    for seat in 1..=count {
        lobby.seats.entry(seat).or_default();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn lobby(seats: u32) -> Lobby {
        let mut lobby = Lobby::new("h", PlayerRecord::new("Host", 0), seats);
        lobby.players.insert("p".into(), PlayerRecord::new("Player", 0));
        lobby
    }

    #[test]
    fn sitting_moves_between_seats() {
        let mut l = lobby(3);
        sit_at(&mut l, "p", 1, 0).unwrap();
        sit_at(&mut l, "p", 3, 0).unwrap();
        assert_eq!(l.seats[&1], SeatSlot::Empty);
        assert_eq!(l.seats[&3], SeatSlot::Occupied("p".into()));
        assert_eq!(l.players["p"].seat, Some(3));
        // Sitting where we already are is a no-op.
        sit_at(&mut l, "p", 3, 0).unwrap();
        assert_eq!(l.seated().count(), 1);
    }

    #[test]
    fn sitting_rejects_taken_missing_and_blocked_seats() {
        let mut l = lobby(2);
        sit_at(&mut l, "h", 1, 0).unwrap();
        assert!(matches!(
            sit_at(&mut l, "p", 1, 0),
            Err(PassPongError::SeatTaken { seat: 1 })
        ));
        assert!(matches!(
            sit_at(&mut l, "p", 7, 0),
            Err(PassPongError::NoSuchSeat { seat: 7 })
        ));
        assert!(matches!(
            sit_at(&mut l, "ghost", 2, 0),
            Err(PassPongError::NotInLobby)
        ));

        unseat(&mut l, "h", 3_000).unwrap();
        assert!(matches!(
            sit_at(&mut l, "h", 2, 2_999),
            Err(PassPongError::SeatBlocked { until: 3_000 })
        ));
        sit_at(&mut l, "h", 2, 3_000).unwrap();
        assert_eq!(l.players["h"].blocked_until, None);
    }

    #[test]
    fn unseat_requires_a_seat() {
        let mut l = lobby(2);
        assert!(matches!(unseat(&mut l, "p", 10), Err(PassPongError::NotSeated)));
        assert_eq!(l.players["p"].blocked_until, None);
    }

    #[test]
    fn removing_a_player_frees_the_seat() {
        let mut l = lobby(2);
        sit_at(&mut l, "p", 2, 0).unwrap();
        remove_player(&mut l, "p").unwrap();
        assert!(!l.players.contains_key("p"));
        assert_eq!(l.seats[&2], SeatSlot::Empty);
        assert!(matches!(remove_player(&mut l, "p"), Err(PassPongError::NotInLobby)));
    }

    #[test]
    fn resize_adds_empty_seats_and_unseats_removed_ones() {
        let mut l = lobby(3);
        sit_at(&mut l, "p", 3, 0).unwrap();
        resize(&mut l, 2);
        assert_eq!(l.seats.len(), 2);
        assert_eq!(l.players["p"].seat, None);
        assert_eq!(l.players["p"].blocked_until, None);

        resize(&mut l, 6);
        assert_eq!(l.seats.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
        assert!(l.seats.values().all(SeatSlot::is_empty));
    }
}
