//! Structured error codes for user-visible notices.
//!
//! Codes serialize as `SCREAMING_SNAKE_CASE` strings (e.g. `"SEAT_TAKEN"`) so
//! a UI layer can persist or forward them without depending on the error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes attached to [`PassPongError`](crate::PassPongError)
/// and to [`SessionEvent::Notice`](crate::SessionEvent::Notice).
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Lookup errors
    LobbyNotFound,
    InvalidLobbyCode,
    NotInLobby,

    // Seat arbitration
    SeatTaken,
    SeatBlocked,
    NoSuchSeat,
    InvalidSeatCount,
    NotSeated,
    SeatsNotFilled,

    // Host authority
    HostOnly,
    HostCannotLeave,

    // Round lifecycle
    GameAlreadyStarted,
    RoundNotOver,

    // Validation
    InvalidName,

    // Store errors
    StoreUnavailable,
    MalformedDocument,

    // Session errors
    SessionClosed,
}

impl ErrorCode {
    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            // Lookup errors
            Self::LobbyNotFound => "No lobby exists with this code. Check the code and try again.",
            Self::InvalidLobbyCode => {
                "Lobby codes are six letters or digits. Check the code and try again."
            }
            Self::NotInLobby => "You are no longer a member of this lobby.",

            // Seat arbitration
            Self::SeatTaken => "This seat is already taken.",
            Self::SeatBlocked => "Please wait a moment before sitting down again.",
            Self::NoSuchSeat => "This seat does not exist at the table.",
            Self::InvalidSeatCount => "The table must have between 1 and 12 seats.",
            Self::NotSeated => "Take a seat at the table first.",
            Self::SeatsNotFilled => "Every seat must be filled before the game can start.",

            // Host authority
            Self::HostOnly => "Only the host of the lobby can do this.",
            Self::HostCannotLeave => "The host cannot leave the lobby. Close it instead.",

            // Round lifecycle
            Self::GameAlreadyStarted => "The game has already started.",
            Self::RoundNotOver => "The round is still running.",

            // Validation
            Self::InvalidName => "Names must not be empty.",

            // Store errors
            Self::StoreUnavailable => {
                "The shared game store could not be reached. Your last action was not applied."
            }
            Self::MalformedDocument => "The shared game data is malformed.",

            // Session errors
            Self::SessionClosed => "The game session has ended.",
        }
    }

    /// Returns `true` for soft conflicts that the user can resolve by simply
    /// trying something else (another seat, waiting a moment).
    pub fn is_soft_conflict(&self) -> bool {
        matches!(
            self,
            Self::SeatTaken | Self::SeatBlocked | Self::GameAlreadyStarted | Self::RoundNotOver
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Delegate to serde so the wire name is the single source of truth.
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(s)) => f.write_str(&s),
            _ => write!(f, "{self:?}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::SeatTaken).unwrap();
        assert_eq!(json, "\"SEAT_TAKEN\"");
        let back: ErrorCode = serde_json::from_str("\"LOBBY_NOT_FOUND\"").unwrap();
        assert_eq!(back, ErrorCode::LobbyNotFound);
    }

    #[test]
    fn display_matches_wire_name() {
        assert_eq!(ErrorCode::HostOnly.to_string(), "HOST_ONLY");
        assert_eq!(ErrorCode::StoreUnavailable.to_string(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn soft_conflicts() {
        assert!(ErrorCode::SeatTaken.is_soft_conflict());
        assert!(ErrorCode::SeatBlocked.is_soft_conflict());
        assert!(!ErrorCode::LobbyNotFound.is_soft_conflict());
        assert!(!ErrorCode::HostOnly.is_soft_conflict());
    }
}
