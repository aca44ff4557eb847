//! Events emitted by a [`PongSession`](crate::PongSession) to the UI layer.

use crate::document::{Direction, ParticipantId, Timestamp};
use crate::error_codes::ErrorCode;
use crate::seating::SeatingOrder;

/// Where the ball appears after a reset, from the local participant's point
/// of view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BallPlacement {
    /// The ball was passed to us: it enters from `side` carrying `dx`.
    Enter { side: Direction, dx: f64 },
    /// We serve from the centre (round start or a reset without ball state).
    Serve,
    /// Someone else has the ball; nothing is drawn.
    Hidden,
}

/// Events delivered on the session's event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The lobby document changed.
    LobbyUpdated {
        seating_order: SeatingOrder,
        host_id: Option<ParticipantId>,
        game_started: bool,
    },
    /// The lobby was closed by the host or cleaned up.
    LobbyClosed,
    /// Our player record was removed from the lobby.
    Kicked,
    /// A new round is running.
    RoundStarted {
        current_player: ParticipantId,
        start_time: Timestamp,
        round_duration: u64,
    },
    /// The ball moved to another participant.
    TurnChanged {
        current_player: ParticipantId,
        is_you: bool,
    },
    /// A new `ballResetTime` was applied.
    BallReset {
        reset_time: Timestamp,
        placement: BallPlacement,
    },
    /// We missed the ball and are frozen until `resume_at`.
    Missed { resume_at: Timestamp },
    /// The miss punishment ran out; the ball is served from the centre.
    PunishmentEnded,
    /// The round timer ran out while `loser` held the ball.
    RoundOver {
        loser: ParticipantId,
        you_lost: bool,
    },
    /// The finished round was removed and the table is back in the lobby.
    RoundCleared,
    /// A non-fatal problem worth telling the participant about.
    Notice { code: ErrorCode, message: String },
    /// The session loop stopped. Always the last event.
    Disconnected { reason: Option<String> },
}
