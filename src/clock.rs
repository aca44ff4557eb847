//! Server-synchronized clock.
//!
//! Every participant judges round timers, pass cooldowns and seat blocks
//! against the store's clock rather than its own. [`ClockSync`] adds the
//! latest offset pushed by the store to a local wall clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;

use crate::document::Timestamp;

/// A local source of wall-clock time in epoch milliseconds.
pub trait WallClock: Send + Sync + 'static {
    /// Current local time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> Timestamp;
}

/// Wall clock anchored to the system time at construction and advanced by
/// the tokio clock.
///
/// Advancing with the tokio clock keeps it monotonic and lets paused-time
/// tests (`tokio::time::pause`) drive it together with every timer.
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_ms: Timestamp,
    origin: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let anchor_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or_default();
        Self {
            anchor_ms,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for SystemClock {
    fn now_ms(&self) -> Timestamp {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.anchor_ms.saturating_add(elapsed)
    }
}

/// A wall clock that only moves when told to. Useful for replaying a session
/// or driving the coordinator step by step.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: Timestamp) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_ms(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Local wall clock plus the store's server-time offset.
///
/// Cloning is cheap; every clone follows the same offset feed. The feed is
/// never unsubscribed. If it has not delivered a value yet, or its sender is
/// gone, the last known offset (initially zero) is used.
#[derive(Clone)]
pub struct ClockSync {
    local: Arc<dyn WallClock>,
    offset: watch::Receiver<i64>,
}

impl ClockSync {
    /// Combine a local clock with an offset feed.
    pub fn new(local: Arc<dyn WallClock>, offset: watch::Receiver<i64>) -> Self {
        Self { local, offset }
    }

    /// Use the system clock with the given offset feed.
    pub fn system(offset: watch::Receiver<i64>) -> Self {
        Self::new(Arc::new(SystemClock::new()), offset)
    }

    /// A clock with a constant offset and no feed.
    pub fn with_fixed_offset(local: Arc<dyn WallClock>, offset_ms: i64) -> Self {
        let (_tx, rx) = watch::channel(offset_ms);
        Self::new(local, rx)
    }

    /// Estimated server time in epoch milliseconds.
    pub fn now(&self) -> Timestamp {
        self.local.now_ms().saturating_add(self.offset())
    }

    /// The most recent server-time offset in milliseconds.
    pub fn offset(&self) -> i64 {
        *self.offset.borrow()
    }
}

impl std::fmt::Debug for ClockSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockSync")
            .field("local_ms", &self.local.now_ms())
            .field("offset_ms", &self.offset())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_defaults_to_zero() {
        let (_tx, rx) = watch::channel(0);
        let clock = ClockSync::new(Arc::new(ManualClock::new(1_000)), rx);
        assert_eq!(clock.now(), 1_000);
    }

    #[test]
    fn follows_offset_feed() {
        let (tx, rx) = watch::channel(0);
        let local = Arc::new(ManualClock::new(1_000));
        let clock = ClockSync::new(local.clone(), rx);

        tx.send_replace(250);
        assert_eq!(clock.now(), 1_250);

        tx.send_replace(-500);
        local.advance(Duration::from_millis(100));
        assert_eq!(clock.now(), 600);
    }

    #[test]
    fn keeps_last_offset_after_feed_closes() {
        let (tx, rx) = watch::channel(0);
        let clock = ClockSync::new(Arc::new(ManualClock::new(0)), rx);
        tx.send_replace(40);
        drop(tx);
        assert_eq!(clock.now(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn system_clock_moves_with_tokio_time() {
        let clock = SystemClock::new();
        let before = clock.now_ms();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(clock.now_ms() - before, 3_000);
    }
}
