//! Presence tracking and delayed cleanup of abandoned lobbies.
//!
//! Each connected participant keeps a presence marker under
//! `presence/{code}`. When the last marker disappears the [`PresenceTracker`]
//! waits out a grace window, re-reads presence, and only then tears down the
//! round. Anyone reconnecting within the window cancels the cleanup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::document::{
    decode, lobby_path, presence_path, round_path, round_reset_writes, Lobby,
};
use crate::error::Result;
use crate::lobby_code::LobbyCode;
use crate::store::DocumentStore;

/// Number of participants present according to a presence snapshot.
pub fn count_present(value: Option<&Value>) -> usize {
    value.and_then(Value::as_object).map_or(0, Map::len)
}

/// What the tracker does once the grace window has elapsed.
#[async_trait]
pub trait PresenceCleanup: Send + Sync + 'static {
    /// Re-read how many participants are present right now.
    async fn active_count(&self) -> Result<usize>;

    /// Tear down the abandoned round.
    async fn cleanup(&self) -> Result<()>;
}

/// [`PresenceCleanup`] against a [`DocumentStore`]: removes the round, clears
/// the lobby's `gameStarted` flag and every `done` flag in one write.
pub struct StoreCleanup<S: DocumentStore + ?Sized> {
    store: Arc<S>,
    code: LobbyCode,
}

impl<S: DocumentStore + ?Sized> StoreCleanup<S> {
    pub fn new(store: Arc<S>, code: LobbyCode) -> Self {
        Self { store, code }
    }
}

#[async_trait]
impl<S: DocumentStore + ?Sized> PresenceCleanup for StoreCleanup<S> {
    async fn active_count(&self) -> Result<usize> {
        let presence = self.store.get(&presence_path(&self.code)).await?;
        Ok(count_present(presence.as_ref()))
    }

    async fn cleanup(&self) -> Result<()> {
        let lobby_doc = lobby_path(&self.code);
        let round = round_path(&self.code);
        // A closed lobby must not come back as a `gameStarted` stub.
        match decode::<Lobby>(self.store.get(&lobby_doc).await?)? {
            None => self.store.remove(&round).await?,
            Some(lobby) => {
                let fields = round_reset_writes(&self.code, &lobby);
                self.store.update("", fields).await?;
            }
        }
        info!(lobby = %self.code, "abandoned lobby cleaned up");
        Ok(())
    }
}

/// Result of feeding a presence count to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceDecision {
    /// Nobody is present; a cleanup was scheduled.
    Scheduled,
    /// Someone came back; the pending cleanup was cancelled.
    Cancelled,
    /// Nothing to do.
    Unchanged,
}

/// Schedules and cancels the delayed cleanup for one lobby.
///
/// At most one cleanup is outstanding at a time. Dropping the tracker
/// cancels any pending cleanup.
pub struct PresenceTracker {
    grace: Duration,
    cleanup: Arc<dyn PresenceCleanup>,
    pending: Option<JoinHandle<()>>,
}

impl PresenceTracker {
    pub fn new(grace: Duration, cleanup: Arc<dyn PresenceCleanup>) -> Self {
        Self {
            grace,
            cleanup,
            pending: None,
        }
    }

    /// Returns `true` while a cleanup is waiting for its grace window.
    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// React to a new presence count. Must be called from within a tokio
    /// runtime.
    pub fn observe(&mut self, active: usize) -> PresenceDecision {
        let pending = self.is_pending();
        match (active, pending) {
            (0, false) => {
                debug!(grace_ms = self.grace.as_millis(), "nobody present, cleanup scheduled");
                self.pending = Some(tokio::spawn(run_cleanup(
                    self.grace,
                    Arc::clone(&self.cleanup),
                )));
                PresenceDecision::Scheduled
            }
            (0, true) => PresenceDecision::Unchanged,
            (_, true) => {
                self.cancel();
                debug!(active, "participant returned, cleanup cancelled");
                PresenceDecision::Cancelled
            }
            (_, false) => {
                self.pending = None;
                PresenceDecision::Unchanged
            }
        }
    }

    /// Cancel the pending cleanup, if any.
    pub fn cancel(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("grace", &self.grace)
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_cleanup(grace: Duration, cleanup: Arc<dyn PresenceCleanup>) {
    tokio::time::sleep(grace).await;
    match cleanup.active_count().await {
        Ok(0) => {
            if let Err(e) = cleanup.cleanup().await {
                warn!("presence cleanup failed: {e}");
            }
        }
        Ok(active) => debug!(active, "presence recovered during grace window, cleanup skipped"),
        Err(e) => warn!("could not re-read presence, cleanup skipped: {e}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeCleanup {
        active: AtomicUsize,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl PresenceCleanup for FakeCleanup {
        async fn active_count(&self) -> Result<usize> {
            Ok(self.active.load(Ordering::SeqCst))
        }

        async fn cleanup(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn tracker() -> (PresenceTracker, Arc<FakeCleanup>) {
        let fake = Arc::new(FakeCleanup::default());
        let tracker = PresenceTracker::new(Duration::from_secs(10), fake.clone());
        (tracker, fake)
    }

    #[test]
    fn counts_entries() {
        assert_eq!(count_present(None), 0);
        assert_eq!(count_present(Some(&serde_json::json!({ "a": true, "b": true }))), 2);
        assert_eq!(count_present(Some(&serde_json::json!(true))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_runs_once_after_grace() {
        let (mut tracker, fake) = tracker();
        assert_eq!(tracker.observe(0), PresenceDecision::Scheduled);
        assert_eq!(tracker.observe(0), PresenceDecision::Unchanged);

        tokio::time::sleep(Duration::from_millis(9_999)).await;
        assert_eq!(fake.runs.load(Ordering::SeqCst), 0);
        assert!(tracker.is_pending());

        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fake.runs.load(Ordering::SeqCst), 1);
        assert!(!tracker.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_grace_cancels() {
        let (mut tracker, fake) = tracker();
        tracker.observe(0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(tracker.observe(1), PresenceDecision::Cancelled);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recheck_skips_cleanup_when_someone_is_back() {
        let (mut tracker, fake) = tracker();
        tracker.observe(0);
        fake.active.store(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fake.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_tracker_cancels() {
        let (mut tracker, fake) = tracker();
        tracker.observe(0);
        drop(tracker);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fake.runs.load(Ordering::SeqCst), 0);
    }
}
