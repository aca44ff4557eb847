//! Session configuration.

use std::time::Duration;

use rand::Rng;

/// Seats a new lobby starts with.
pub const DEFAULT_SEAT_COUNT: u32 = 5;

/// Upper bound for the seat count of a lobby.
pub const MAX_SEAT_COUNT: u32 = 12;

/// How long a participant may not sit after leaving or losing a seat.
pub const DEFAULT_SEAT_BLOCK: Duration = Duration::from_secs(3);

/// Minimum spacing between two accepted passes by the same participant.
pub const DEFAULT_PASS_COOLDOWN: Duration = Duration::from_millis(300);

/// How long a missed ball freezes the current player.
pub const DEFAULT_PUNISHMENT: Duration = Duration::from_secs(5);

/// Grace window before an abandoned lobby's round is torn down.
pub const DEFAULT_PRESENCE_GRACE: Duration = Duration::from_secs(10);

/// Fixed round length used when a round document carries no duration.
pub const DEFAULT_ROUND_MS: u64 = 60_000;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a round lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundDuration {
    /// Always the same number of milliseconds.
    Fixed(u64),
    /// Drawn uniformly from `min..=max` milliseconds when a round starts.
    Randomized { min: u64, max: u64 },
}

impl RoundDuration {
    /// Pick the duration for a new round.
    pub fn pick(self) -> u64 {
        match self {
            Self::Fixed(ms) => ms,
            Self::Randomized { min, max } if min < max => rand::rng().random_range(min..=max),
            Self::Randomized { min, .. } => min,
        }
    }

    /// Duration assumed for a round document without `roundDuration`.
    pub fn fallback(self) -> u64 {
        match self {
            Self::Fixed(ms) => ms,
            Self::Randomized { .. } => DEFAULT_ROUND_MS,
        }
    }
}

impl Default for RoundDuration {
    fn default() -> Self {
        Self::Randomized {
            min: 60_000,
            max: 120_000,
        }
    }
}

/// Which participant writes `gameOver` when the round timer runs out.
///
/// Every client may evaluate the timer; restricting the write to one role
/// keeps redundant writes down. The write is conditional either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimekeeperRole {
    /// The participant holding the ball.
    #[default]
    CurrentPlayer,
    /// The lobby host.
    Host,
    /// Every participant.
    Everyone,
}

/// Configuration shared by [`LobbyClient`](crate::LobbyClient) and
/// [`PongSession`](crate::PongSession).
///
/// # Example
///
/// ```
/// use pass_pong::config::{RoundDuration, SessionConfig};
/// use std::time::Duration;
///
/// let config = SessionConfig::default()
///     .with_round_duration(RoundDuration::Fixed(30_000))
///     .with_pass_cooldown(Duration::from_millis(250))
///     .with_event_channel_capacity(0);
/// assert_eq!(config.round_duration.pick(), 30_000);
/// assert_eq!(config.event_channel_capacity, 1);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Seats a newly created lobby gets. Defaults to **5**.
    pub default_seat_count: u32,
    /// Largest seat count the host may choose. Defaults to **12**.
    pub max_seat_count: u32,
    /// Seating block after an unseat. Defaults to **3 seconds**.
    pub seat_block: Duration,
    /// Pass debounce window. Defaults to **300 ms**.
    pub pass_cooldown: Duration,
    /// Freeze after a miss. Defaults to **5 seconds**.
    pub punishment: Duration,
    /// Delay before cleaning up a lobby nobody is present in.
    /// Defaults to **10 seconds**.
    pub presence_grace: Duration,
    /// Round length policy. Defaults to a random 60-120 s.
    pub round_duration: RoundDuration,
    /// Who marks the round over. Defaults to the current player.
    pub timekeeper: TimekeeperRole,
    /// How often the session loop checks timers. Defaults to **50 ms**.
    pub tick_interval: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// Events that do not fit are dropped with a warning; the final
    /// `Disconnected` event is always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time given to the session loop to wind down before it is aborted.
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_seat_count: DEFAULT_SEAT_COUNT,
            max_seat_count: MAX_SEAT_COUNT,
            seat_block: DEFAULT_SEAT_BLOCK,
            pass_cooldown: DEFAULT_PASS_COOLDOWN,
            punishment: DEFAULT_PUNISHMENT,
            presence_grace: DEFAULT_PRESENCE_GRACE,
            round_duration: RoundDuration::default(),
            timekeeper: TimekeeperRole::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Set the seat count of newly created lobbies, clamped to
    /// `1..=max_seat_count`.
    #[must_use]
    pub fn with_default_seat_count(mut self, seats: u32) -> Self {
        self.default_seat_count = seats.clamp(1, self.max_seat_count.max(1));
        self
    }

    #[must_use]
    pub fn with_seat_block(mut self, block: Duration) -> Self {
        self.seat_block = block;
        self
    }

    #[must_use]
    pub fn with_pass_cooldown(mut self, cooldown: Duration) -> Self {
        self.pass_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_punishment(mut self, punishment: Duration) -> Self {
        self.punishment = punishment;
        self
    }

    #[must_use]
    pub fn with_presence_grace(mut self, grace: Duration) -> Self {
        self.presence_grace = grace;
        self
    }

    #[must_use]
    pub fn with_round_duration(mut self, duration: RoundDuration) -> Self {
        self.round_duration = duration;
        self
    }

    #[must_use]
    pub fn with_timekeeper(mut self, role: TimekeeperRole) -> Self {
        self.timekeeper = role;
        self
    }

    /// Set the timer check interval. Zero is raised to one millisecond.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown. A zero timeout aborts the
    /// session loop immediately.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub(crate) fn seat_block_ms(&self) -> i64 {
        millis(self.seat_block)
    }

    pub(crate) fn pass_cooldown_ms(&self) -> i64 {
        millis(self.pass_cooldown)
    }

    pub(crate) fn punishment_ms(&self) -> i64 {
        millis(self.punishment)
    }
}

pub(crate) fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
