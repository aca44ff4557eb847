//! Error types for the pass-pong coordination core.

use thiserror::Error;

use crate::document::{SeatNumber, Timestamp};
use crate::error_codes::ErrorCode;

/// Errors that can occur while coordinating a lobby or a round.
#[derive(Debug, Error)]
pub enum PassPongError {
    /// The document store could not complete a read or write.
    #[error("store error: {0}")]
    Store(String),

    /// The store connection has been closed.
    #[error("store connection closed")]
    StoreClosed,

    /// Failed to serialize or deserialize a document.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No lobby exists under the given code.
    #[error("lobby {code} not found")]
    LobbyNotFound {
        /// The code that was looked up.
        code: String,
    },

    /// The supplied text is not a valid lobby code.
    #[error("invalid lobby code: {0:?}")]
    InvalidLobbyCode(String),

    /// The participant has no record in the lobby (never joined, or kicked).
    #[error("participant is not a member of the lobby")]
    NotInLobby,

    /// A host-only operation was requested by another participant.
    #[error("only the lobby host may do this")]
    NotHost,

    /// The host tried to leave instead of closing the lobby.
    #[error("the host cannot leave the lobby, close it instead")]
    HostCannotLeave,

    /// The seat is occupied by another participant.
    #[error("seat {seat} is already taken")]
    SeatTaken {
        /// The requested seat.
        seat: SeatNumber,
    },

    /// The participant was unseated recently and may not sit yet.
    #[error("seating blocked until {until}")]
    SeatBlocked {
        /// Remote-clock timestamp at which seating is allowed again.
        until: Timestamp,
    },

    /// The lobby has no seat with this number.
    #[error("seat {seat} does not exist")]
    NoSuchSeat {
        /// The requested seat.
        seat: SeatNumber,
    },

    /// The requested seat count is outside the permitted range.
    #[error("seat count {requested} is outside 1..={max}")]
    InvalidSeatCount {
        /// The requested count.
        requested: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The participant does not occupy a seat.
    #[error("participant is not seated")]
    NotSeated,

    /// The game cannot start until every seat is occupied.
    #[error("every seat must be filled before the game starts")]
    SeatsNotFilled,

    /// The lobby has already started a game.
    #[error("the game has already started")]
    GameAlreadyStarted,

    /// The round is still running (or absent), so it cannot be acknowledged.
    #[error("the round is not over")]
    RoundNotOver,

    /// A display name was empty after trimming.
    #[error("player name must not be empty")]
    InvalidName,

    /// Attempted an operation on a session that has shut down.
    #[error("session is not running")]
    SessionClosed,
}

impl PassPongError {
    /// Returns the structured [`ErrorCode`] for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Store(_) => ErrorCode::StoreUnavailable,
            Self::StoreClosed => ErrorCode::StoreUnavailable,
            Self::Serialization(_) => ErrorCode::MalformedDocument,
            Self::LobbyNotFound { .. } => ErrorCode::LobbyNotFound,
            Self::InvalidLobbyCode(_) => ErrorCode::InvalidLobbyCode,
            Self::NotInLobby => ErrorCode::NotInLobby,
            Self::NotHost => ErrorCode::HostOnly,
            Self::HostCannotLeave => ErrorCode::HostCannotLeave,
            Self::SeatTaken { .. } => ErrorCode::SeatTaken,
            Self::SeatBlocked { .. } => ErrorCode::SeatBlocked,
            Self::NoSuchSeat { .. } => ErrorCode::NoSuchSeat,
            Self::InvalidSeatCount { .. } => ErrorCode::InvalidSeatCount,
            Self::NotSeated => ErrorCode::NotSeated,
            Self::SeatsNotFilled => ErrorCode::SeatsNotFilled,
            Self::GameAlreadyStarted => ErrorCode::GameAlreadyStarted,
            Self::RoundNotOver => ErrorCode::RoundNotOver,
            Self::InvalidName => ErrorCode::InvalidName,
            Self::SessionClosed => ErrorCode::SessionClosed,
        }
    }
}

/// A specialized [`Result`] type for pass-pong operations.
pub type Result<T> = std::result::Result<T, PassPongError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_map_to_store_unavailable() {
        assert_eq!(
            PassPongError::Store("refused".into()).code(),
            ErrorCode::StoreUnavailable
        );
        assert_eq!(PassPongError::StoreClosed.code(), ErrorCode::StoreUnavailable);
    }

    #[test]
    fn host_refusals_carry_their_own_codes() {
        assert_eq!(PassPongError::NotHost.code(), ErrorCode::HostOnly);
        assert_eq!(
            PassPongError::HostCannotLeave.code(),
            ErrorCode::HostCannotLeave
        );
    }

    #[test]
    fn serde_failures_are_malformed_documents() {
        let err: PassPongError = serde_json::from_str::<u32>("x").unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::MalformedDocument);
    }
}
