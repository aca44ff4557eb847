//! Typed records for the documents shared through the store.
//!
//! Every type in this module produces the JSON layout the browser clients
//! write, so native and web participants can share one table:
//!
//! ```text
//! lobbies/{code}  = { hostId, players: { [id]: { name, joinedAt, seat, blockedUntil?, done? } },
//!                     seats: { [n]: id | 0 }, gameStarted }
//! games/{code}    = { currentPlayer, startTime, roundDuration, ballResetTime,
//!                     ballState: { dx, entrySide }, gameOver }
//! presence/{code}/{id} = true
//! ```
//!
//! Optional fields default as follows when absent: `blockedUntil` means "not
//! blocked", `done` means `false`, `gameOver` means `false`, a missing
//! `roundDuration` falls back to the configured fixed duration, and a missing
//! `ballState` means "serve from the centre".

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::lobby_code::LobbyCode;

// ── Type aliases ────────────────────────────────────────────────────

/// Stable per-device participant identifier.
pub type ParticipantId = String;

/// Milliseconds since the Unix epoch on the store's clock.
pub type Timestamp = i64;

/// Seat number, starting at 1.
pub type SeatNumber = u32;

/// Generate a fresh participant identifier.
pub fn new_participant_id() -> ParticipantId {
    uuid::Uuid::new_v4().to_string()
}

// ── Paths ───────────────────────────────────────────────────────────

/// Path of the lobby document.
pub fn lobby_path(code: &LobbyCode) -> String {
    format!("lobbies/{code}")
}

/// Path of the round document.
pub fn round_path(code: &LobbyCode) -> String {
    format!("games/{code}")
}

/// Path holding every presence marker of a lobby.
pub fn presence_path(code: &LobbyCode) -> String {
    format!("presence/{code}")
}

/// Path of one participant's presence marker.
pub fn presence_entry_path(code: &LobbyCode, participant: &str) -> String {
    format!("presence/{code}/{participant}")
}

// ── Enums ───────────────────────────────────────────────────────────

/// Side of the table a ball leaves through, and the direction of the pass.
///
/// Passing `Left` hands the ball to the next seat up; `Right` to the
/// previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => f.write_str("left"),
            Self::Right => f.write_str("right"),
        }
    }
}

/// Contents of a seat.
///
/// On the wire an empty seat is the number `0`; browser clients have also
/// been seen writing `"0"`, `""` and `null`, all of which read back as
/// [`SeatSlot::Empty`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SeatSlot {
    #[default]
    Empty,
    Occupied(ParticipantId),
}

impl SeatSlot {
    /// The occupant, if any.
    pub fn occupant(&self) -> Option<&str> {
        match self {
            Self::Empty => None,
            Self::Occupied(id) => Some(id),
        }
    }

    /// Returns `true` when nobody sits here.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl Serialize for SeatSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Empty => serializer.serialize_u8(0),
            Self::Occupied(id) => serializer.serialize_str(id),
        }
    }
}

impl<'de> Deserialize<'de> for SeatSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(id) if !id.is_empty() && id != "0" => Self::Occupied(id),
            _ => Self::Empty,
        })
    }
}

// ── Records ─────────────────────────────────────────────────────────

fn is_false(value: &bool) -> bool {
    !*value
}

/// A participant's entry in the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub joined_at: Timestamp,
    /// Seat the participant believes it holds. `seats` is authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat: Option<SeatNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub done: bool,
}

impl PlayerRecord {
    /// Create a record for a participant joining at `joined_at`.
    pub fn new(name: impl Into<String>, joined_at: Timestamp) -> Self {
        Self {
            name: name.into(),
            joined_at,
            ..Default::default()
        }
    }

    /// Returns `true` while seating is blocked at time `now`.
    pub fn is_blocked(&self, now: Timestamp) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }
}

/// The lobby document: a table of participants around a virtual table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lobby {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<ParticipantId>,
    #[serde(default)]
    pub players: BTreeMap<ParticipantId, PlayerRecord>,
    #[serde(default)]
    pub seats: BTreeMap<SeatNumber, SeatSlot>,
    #[serde(default)]
    pub game_started: bool,
}

impl Lobby {
    /// Create a lobby hosted by `host` with `seat_count` empty seats.
    pub fn new(host: &str, host_record: PlayerRecord, seat_count: u32) -> Self {
        let mut players = BTreeMap::new();
        players.insert(host.to_string(), host_record);
        Self {
            host_id: Some(host.to_string()),
            players,
            seats: (1..=seat_count).map(|n| (n, SeatSlot::Empty)).collect(),
            game_started: false,
        }
    }

    /// Returns `true` if `participant` is the recorded host.
    pub fn is_host(&self, participant: &str) -> bool {
        self.host_id.as_deref() == Some(participant)
    }

    /// The seat `participant` occupies, if any.
    pub fn seat_of(&self, participant: &str) -> Option<SeatNumber> {
        self.seats
            .iter()
            .find(|(_, slot)| slot.occupant() == Some(participant))
            .map(|(seat, _)| *seat)
    }

    /// Participant ids currently seated, in seat order.
    pub fn seated(&self) -> impl Iterator<Item = &str> {
        self.seats.values().filter_map(SeatSlot::occupant)
    }

    /// Returns `true` when at least one seat exists and none is empty.
    pub fn all_seats_filled(&self) -> bool {
        !self.seats.is_empty() && self.seats.values().all(|slot| !slot.is_empty())
    }

    /// Returns `true` when at least one participant is seated and every
    /// seated participant has acknowledged the end of the round.
    pub fn all_seated_done(&self) -> bool {
        let mut seated = self.seated().peekable();
        if seated.peek().is_none() {
            return false;
        }
        seated.all(|id| self.players.get(id).is_some_and(|p| p.done))
    }

    /// Returns `true` if any participant carries a `done` flag.
    pub fn any_done(&self) -> bool {
        self.players.values().any(|p| p.done)
    }
}

/// How the ball re-enters the table after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallState {
    /// Horizontal velocity carried over from the passer.
    #[serde(default)]
    pub dx: f64,
    /// Side the ball left the passer's table through.
    pub entry_side: Direction,
}

/// The round document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub current_player: ParticipantId,
    pub start_time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ball_reset_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ball_state: Option<BallState>,
    #[serde(default)]
    pub game_over: bool,
}

impl Round {
    /// A freshly started round: `first` serves at `start_time`.
    pub fn begin(first: impl Into<ParticipantId>, start_time: Timestamp, duration_ms: u64) -> Self {
        Self {
            current_player: first.into(),
            start_time,
            round_duration: Some(duration_ms),
            ball_reset_time: Some(start_time),
            ball_state: None,
            game_over: false,
        }
    }

    /// Returns `true` once the round has run for `duration_ms` at `now`.
    pub fn is_expired(&self, now: Timestamp, duration_ms: u64) -> bool {
        let elapsed = now.saturating_sub(self.start_time);
        elapsed >= 0 && elapsed.unsigned_abs() >= duration_ms
    }
}

/// Decode an optional document as read from the store.
///
/// # Errors
///
/// Returns [`PassPongError::Serialization`](crate::PassPongError::Serialization)
/// if the value does not have the expected shape.
pub fn decode<T: serde::de::DeserializeOwned>(
    value: Option<serde_json::Value>,
) -> crate::error::Result<Option<T>> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// Root-relative writes that end the game in `lobby`: the round is removed,
/// `gameStarted` and every `done` flag are cleared.
///
/// Applied as one multi-path update, so no observer sees a removed round
/// next to a still started lobby, or a new start blocked by stale flags.
pub(crate) fn round_reset_writes(
    code: &LobbyCode,
    lobby: &Lobby,
) -> serde_json::Map<String, serde_json::Value> {
    let lobby_doc = lobby_path(code);
    let mut fields = serde_json::Map::new();
    fields.insert(
        format!("{lobby_doc}/gameStarted"),
        serde_json::Value::Bool(false),
    );
    for (id, player) in &lobby.players {
        if player.done {
            fields.insert(
                format!("{lobby_doc}/players/{id}/done"),
                serde_json::Value::Null,
            );
        }
    }
    fields.insert(round_path(code), serde_json::Value::Null);
    fields
}

/// Returns `true` if `value` is a round document that has not ended.
///
/// A document without a readable `gameOver` flag counts as active, so a
/// conditional start never overwrites it.
pub(crate) fn is_active_round(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => false,
        Some(v) => v.get("gameOver").and_then(serde_json::Value::as_bool) != Some(true),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seat_slot_reads_every_empty_sentinel() {
        for raw in [json!(0), json!("0"), json!(""), json!(null), json!(false)] {
            let slot: SeatSlot = serde_json::from_value(raw.clone()).unwrap();
            assert_eq!(slot, SeatSlot::Empty, "{raw} should be empty");
        }
        let slot: SeatSlot = serde_json::from_value(json!("p-1")).unwrap();
        assert_eq!(slot, SeatSlot::Occupied("p-1".into()));
    }

    #[test]
    fn empty_seat_writes_zero() {
        assert_eq!(serde_json::to_value(SeatSlot::Empty).unwrap(), json!(0));
        assert_eq!(
            serde_json::to_value(SeatSlot::Occupied("a".into())).unwrap(),
            json!("a")
        );
    }

    #[test]
    fn lobby_reads_browser_layout() {
        let lobby: Lobby = serde_json::from_value(json!({
            "hostId": "h",
            "players": {
                "h": { "name": "Host", "joinedAt": 1, "seat": null },
                "p": { "name": "Player", "joinedAt": 2, "blockedUntil": 5000, "done": true }
            },
            "seats": { "1": "h", "2": 0, "10": "p" },
            "gameStarted": true
        }))
        .unwrap();

        assert!(lobby.is_host("h"));
        assert_eq!(lobby.seat_of("p"), Some(10));
        assert_eq!(lobby.players["h"].seat, None);
        assert!(lobby.players["p"].is_blocked(4999));
        assert!(!lobby.players["p"].is_blocked(5000));
        assert!(lobby.players["p"].done);
        assert!(!lobby.all_seats_filled());
    }

    #[test]
    fn lobby_tolerates_missing_collections() {
        let lobby: Lobby = serde_json::from_value(json!({ "hostId": "h" })).unwrap();
        assert!(lobby.players.is_empty());
        assert!(lobby.seats.is_empty());
        assert!(!lobby.game_started);
        assert!(!lobby.all_seated_done());
    }

    #[test]
    fn all_seated_done_ignores_unseated_players() {
        let mut lobby = Lobby::new("h", PlayerRecord::new("Host", 0), 2);
        lobby.players.insert("x".into(), PlayerRecord::new("Idle", 0));
        lobby.seats.insert(1, SeatSlot::Occupied("h".into()));
        assert!(!lobby.all_seated_done());

        lobby.players.get_mut("h").unwrap().done = true;
        assert!(lobby.all_seated_done());
    }

    #[test]
    fn round_defaults_optional_fields() {
        let round: Round = serde_json::from_value(json!({
            "currentPlayer": "a",
            "startTime": 100
        }))
        .unwrap();
        assert_eq!(round.round_duration, None);
        assert_eq!(round.ball_state, None);
        assert!(!round.game_over);
    }

    #[test]
    fn round_writes_camel_case() {
        let mut round = Round::begin("a", 10, 60_000);
        round.ball_state = Some(BallState {
            dx: 1.5,
            entry_side: Direction::Left,
        });
        let value = serde_json::to_value(&round).unwrap();
        assert_eq!(value["currentPlayer"], "a");
        assert_eq!(value["ballResetTime"], 10);
        assert_eq!(value["roundDuration"], 60_000);
        assert_eq!(value["ballState"]["entrySide"], "left");
        assert_eq!(value["gameOver"], false);
    }

    #[test]
    fn expiry_is_inclusive() {
        let round = Round::begin("a", 1_000, 60_000);
        assert!(!round.is_expired(60_999, 60_000));
        assert!(round.is_expired(61_000, 60_000));
        assert!(!round.is_expired(0, 60_000));
    }

    #[test]
    fn decode_absent_and_malformed() {
        assert_eq!(decode::<Round>(None).unwrap(), None);
        assert_eq!(decode::<Round>(Some(json!(null))).unwrap(), None);
        assert!(decode::<Round>(Some(json!({ "currentPlayer": 5 }))).is_err());
        let lobby = decode::<Lobby>(Some(json!({ "hostId": "h" }))).unwrap();
        assert!(lobby.unwrap().is_host("h"));
    }

    #[test]
    fn active_round_precondition() {
        assert!(!is_active_round(None));
        assert!(!is_active_round(Some(&json!({ "gameOver": true }))));
        assert!(is_active_round(Some(&json!({ "gameOver": false }))));
        assert!(is_active_round(Some(&json!({ "currentPlayer": "a" }))));
    }
}
