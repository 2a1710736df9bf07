//! Match Queue
//!
//! Shared queue of players waiting for an opponent. One mutex covers the
//! store, so a pairing tick's scan and commit can never interleave with a
//! concurrent join or leave.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::matchmaking::entry::{MatchFound, QueueEntry, TimeControl, UserId};
use crate::matchmaking::pairing::{find_first_pair, DEFAULT_SKILL_WINDOW};
use crate::matchmaking::store::{MemoryQueueStore, QueueStore, StoreError};

/// Matchmaking errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchmakingError {
    /// User already has a Waiting entry.
    #[error("user {0} is already queued")]
    AlreadyQueued(UserId),

    /// Backing storage failed; nothing was applied.
    #[error("queue storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
}

struct QueueInner<S> {
    store: S,
    next_id: u64,
}

/// The matchmaking queue.
pub struct MatchQueue<S = MemoryQueueStore> {
    inner: Mutex<QueueInner<S>>,
    skill_window: u32,
}

impl MatchQueue<MemoryQueueStore> {
    /// Create an in-memory queue.
    pub fn new(skill_window: u32) -> Self {
        Self::with_store(MemoryQueueStore::new(), skill_window)
    }
}

impl Default for MatchQueue<MemoryQueueStore> {
    fn default() -> Self {
        Self::new(DEFAULT_SKILL_WINDOW)
    }
}

impl<S: QueueStore> MatchQueue<S> {
    /// Create a queue over an existing store.
    pub fn with_store(store: S, skill_window: u32) -> Self {
        Self {
            inner: Mutex::new(QueueInner { store, next_id: 1 }),
            skill_window,
        }
    }

    /// Maximum rating gap used when pairing.
    pub fn skill_window(&self) -> u32 {
        self.skill_window
    }

    /// Add a user to the queue.
    ///
    /// Fails with [`MatchmakingError::AlreadyQueued`] if the user already
    /// has a Waiting entry. The new entry is visible to the next tick.
    pub async fn join(
        &self,
        user_id: UserId,
        time_control: TimeControl,
        skill_level: i32,
    ) -> Result<QueueEntry, MatchmakingError> {
        let mut inner = self.inner.lock().await;

        if inner.store.find_waiting(user_id)?.is_some() {
            debug!("User {} rejected: already queued", user_id);
            return Err(MatchmakingError::AlreadyQueued(user_id));
        }

        let entry = QueueEntry::waiting(inner.next_id, user_id, time_control, skill_level, Utc::now());
        inner.store.insert(entry.clone())?;
        inner.next_id += 1;

        info!(
            "User {} joined queue (time_control: {}, skill: {})",
            user_id, entry.time_control, entry.skill_level
        );
        Ok(entry)
    }

    /// Cancel a user's Waiting entry. Silent if there is none.
    pub async fn leave(&self, user_id: UserId) -> Result<(), MatchmakingError> {
        let mut inner = self.inner.lock().await;

        if let Some(entry) = inner.store.find_waiting(user_id)? {
            inner.store.update_all(&[entry.cancelled(Utc::now())])?;
            info!("User {} left queue", user_id);
        }

        Ok(())
    }

    /// Current Waiting entry for a user.
    pub async fn status(&self, user_id: UserId) -> Result<Option<QueueEntry>, MatchmakingError> {
        let inner = self.inner.lock().await;
        Ok(inner.store.find_waiting(user_id)?)
    }

    /// Number of Waiting entries.
    pub async fn waiting_count(&self) -> Result<usize, MatchmakingError> {
        let inner = self.inner.lock().await;
        Ok(inner.store.waiting()?.len())
    }

    /// Run one pairing pass.
    ///
    /// Matches at most one pair: the first compatible pair in insertion
    /// order. Both entries move to Matched in a single store update, or
    /// neither does.
    pub async fn tick(&self) -> Result<Option<MatchFound>, MatchmakingError> {
        let mut inner = self.inner.lock().await;

        let waiting = inner.store.waiting()?;
        let Some((i, j)) = find_first_pair(&waiting, self.skill_window) else {
            return Ok(None);
        };

        let (first, second) = (&waiting[i], &waiting[j]);
        let now = Utc::now();
        inner.store.update_all(&[
            first.matched_with(second.user_id, now),
            second.matched_with(first.user_id, now),
        ])?;

        info!(
            "Matched users {} and {} ({})",
            first.user_id, second.user_id, first.time_control
        );

        Ok(Some(MatchFound {
            player1: first.user_id,
            player2: second.user_id,
            time_control: first.time_control.clone(),
            matched_at: now,
        }))
    }

    /// Purge terminal entries older than `retention`.
    pub async fn prune(&self, retention: Duration) -> Result<usize, MatchmakingError> {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return Ok(0);
        };
        let Some(before) = Utc::now().checked_sub_signed(retention) else {
            return Ok(0);
        };

        let mut inner = self.inner.lock().await;
        let removed = inner.store.purge_terminal(before)?;
        if removed > 0 {
            debug!("Pruned {} terminal queue entries", removed);
        }
        Ok(removed)
    }

    /// Run a read-only closure against the store.
    pub async fn inspect_store<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let inner = self.inner.lock().await;
        f(&inner.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use crate::matchmaking::entry::QueueStatus;
    use crate::matchmaking::store::testing::FlakyStore;

    fn user(id: u64) -> UserId {
        UserId::new(id)
    }

    fn memory_queue() -> MatchQueue {
        MatchQueue::new(DEFAULT_SKILL_WINDOW)
    }

    fn flaky_queue() -> (MatchQueue<FlakyStore>, Arc<AtomicBool>) {
        let (store, down) = FlakyStore::new();
        (MatchQueue::with_store(store, DEFAULT_SKILL_WINDOW), down)
    }

    #[tokio::test]
    async fn test_join_creates_waiting_entry() {
        let queue = memory_queue();
        let entry = queue.join(user(1), "rapid".into(), 1500).await.unwrap();

        assert_eq!(entry.status, QueueStatus::Waiting);
        assert_eq!(queue.status(user(1)).await.unwrap(), Some(entry));
        assert_eq!(queue.waiting_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_join_twice_rejected() {
        let queue = memory_queue();
        queue.join(user(1), "rapid".into(), 1500).await.unwrap();

        let result = queue.join(user(1), "blitz".into(), 1500).await;
        assert_eq!(result, Err(MatchmakingError::AlreadyQueued(user(1))));
        assert_eq!(queue.waiting_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_leave_cancels_and_allows_rejoin() {
        let queue = memory_queue();
        let first = queue.join(user(1), "rapid".into(), 1500).await.unwrap();

        queue.leave(user(1)).await.unwrap();
        assert_eq!(queue.status(user(1)).await.unwrap(), None);

        let second = queue.join(user(1), "rapid".into(), 1500).await.unwrap();
        assert_ne!(first.id, second.id);

        let old_status = queue.inspect_store(|s| s.get(first.id).map(|e| e.status)).await;
        assert_eq!(old_status, Some(QueueStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_leave_without_entry_is_silent() {
        let queue = memory_queue();
        assert!(queue.leave(user(42)).await.is_ok());
    }

    #[tokio::test]
    async fn test_leave_after_match_keeps_match() {
        let queue = memory_queue();
        let a = queue.join(user(1), "rapid".into(), 1500).await.unwrap();
        queue.join(user(2), "rapid".into(), 1500).await.unwrap();
        queue.tick().await.unwrap().unwrap();

        queue.leave(user(1)).await.unwrap();
        let status = queue.inspect_store(|s| s.get(a.id).map(|e| e.status)).await;
        assert_eq!(status, Some(QueueStatus::Matched));
    }

    #[tokio::test]
    async fn test_tick_mixed_time_controls() {
        let queue = memory_queue();
        let a = queue.join(user(1), "rapid".into(), 1200).await.unwrap();
        queue.join(user(2), "blitz".into(), 1210).await.unwrap();
        let c = queue.join(user(3), "rapid".into(), 1380).await.unwrap();

        let event = queue.tick().await.unwrap().unwrap();
        assert_eq!((event.player1, event.player2), (user(1), user(3)));
        assert_eq!(event.time_control.as_str(), "rapid");

        // B is still waiting, A and C are not
        assert!(queue.status(user(2)).await.unwrap().is_some());
        assert!(queue.status(user(1)).await.unwrap().is_none());
        assert!(queue.status(user(3)).await.unwrap().is_none());

        let (ea, ec) = queue
            .inspect_store(|s| (s.get(a.id).cloned().unwrap(), s.get(c.id).cloned().unwrap()))
            .await;
        assert_eq!(ea.matched_opponent_id, Some(user(3)));
        assert_eq!(ec.matched_opponent_id, Some(user(1)));
        assert_eq!(ea.matched_at, Some(event.matched_at));
        assert_eq!(ec.matched_at, Some(event.matched_at));
    }

    #[tokio::test]
    async fn test_tick_makes_one_match_per_call() {
        // First-fit, one pair per tick: four compatible players need two ticks
        let queue = memory_queue();
        for id in 1..=4 {
            queue.join(user(id), "blitz".into(), 1500).await.unwrap();
        }

        let first = queue.tick().await.unwrap().unwrap();
        assert_eq!((first.player1, first.player2), (user(1), user(2)));
        assert_eq!(queue.waiting_count().await.unwrap(), 2);

        let second = queue.tick().await.unwrap().unwrap();
        assert_eq!((second.player1, second.player2), (user(3), user(4)));

        assert_eq!(queue.tick().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_leave_before_tick_is_never_matched() {
        let queue = memory_queue();
        queue.join(user(1), "rapid".into(), 1500).await.unwrap();
        queue.join(user(2), "rapid".into(), 1500).await.unwrap();

        queue.leave(user(1)).await.unwrap();

        assert_eq!(queue.tick().await.unwrap(), None);
        assert!(queue.status(user(2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_queue_unchanged() {
        let (queue, down) = flaky_queue();
        queue.join(user(1), "rapid".into(), 1500).await.unwrap();
        queue.join(user(2), "rapid".into(), 1500).await.unwrap();

        down.store(true, Ordering::SeqCst);
        assert!(matches!(
            queue.tick().await,
            Err(MatchmakingError::StorageUnavailable(StoreError::Unavailable(_)))
        ));
        assert!(queue.join(user(3), "rapid".into(), 1500).await.is_err());

        down.store(false, Ordering::SeqCst);
        assert_eq!(queue.waiting_count().await.unwrap(), 2);

        let event = queue.tick().await.unwrap().unwrap();
        assert_eq!((event.player1, event.player2), (user(1), user(2)));
    }

    #[tokio::test]
    async fn test_prune_keeps_waiting_entries() {
        let queue = memory_queue();
        queue.join(user(1), "rapid".into(), 1500).await.unwrap();
        queue.join(user(2), "rapid".into(), 1500).await.unwrap();
        queue.join(user(3), "bullet".into(), 900).await.unwrap();
        queue.tick().await.unwrap().unwrap();

        // Zero retention: every terminal entry is old enough
        tokio::time::sleep(Duration::from_millis(5)).await;
        let removed = queue.prune(Duration::ZERO).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(queue.inspect_store(|s| s.len()).await, 1);
        assert!(queue.status(user(3)).await.unwrap().is_some());

        // Long retention removes nothing
        queue.leave(user(3)).await.unwrap();
        assert_eq!(queue.prune(Duration::from_secs(3600)).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_join_same_user() {
        let queue = Arc::new(memory_queue());

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.join(user(7), "rapid".into(), 1500).await })
            })
            .collect();

        let mut ok = 0;
        let mut already = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(MatchmakingError::AlreadyQueued(id)) => {
                    assert_eq!(id, user(7));
                    already += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!((ok, already), (1, 1));
        assert_eq!(queue.waiting_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_traffic_keeps_matches_consistent() {
        let queue = Arc::new(memory_queue());
        let users = 12u64;

        let workers: Vec<_> = (0..8u64)
            .map(|seed| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut rng = StdRng::seed_from_u64(seed);
                    for _ in 0..200 {
                        let id = user(rng.gen_range(0..users));
                        if rng.gen_bool(0.6) {
                            let tc = if rng.gen_bool(0.5) { "rapid" } else { "blitz" };
                            let _ = queue.join(id, tc.into(), rng.gen_range(1000..1600)).await;
                        } else {
                            queue.leave(id).await.unwrap();
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let ticker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut events = Vec::new();
                for _ in 0..300 {
                    if let Some(event) = queue.tick().await.unwrap() {
                        events.push(event);
                    }
                    tokio::task::yield_now().await;
                }
                events
            })
        };

        for worker in workers {
            worker.await.unwrap();
        }
        let events = ticker.await.unwrap();

        let entries: Vec<QueueEntry> = queue
            .inspect_store(|s| (1..=10_000).filter_map(|id| s.get(id).cloned()).collect())
            .await;

        // At most one Waiting entry per user
        let mut waiting = BTreeMap::new();
        for e in entries.iter().filter(|e| e.is_waiting()) {
            *waiting.entry(e.user_id).or_insert(0) += 1;
        }
        assert!(waiting.values().all(|&n| n == 1));

        // Every match is backed by two Matched entries pointing at each other
        for event in &events {
            let side = |me: UserId, opponent: UserId| -> Vec<&QueueEntry> {
                entries
                    .iter()
                    .filter(|e| {
                        e.user_id == me
                            && e.matched_opponent_id == Some(opponent)
                            && e.matched_at == Some(event.matched_at)
                    })
                    .collect()
            };
            let first = side(event.player1, event.player2);
            let second = side(event.player2, event.player1);
            assert_eq!((first.len(), second.len()), (1, 1));
            assert_eq!(first[0].status, QueueStatus::Matched);
            assert_eq!(second[0].status, QueueStatus::Matched);
            assert_eq!(first[0].time_control, second[0].time_control);
            assert!(first[0].id < second[0].id);
            assert!(first[0].skill_level.abs_diff(second[0].skill_level) <= DEFAULT_SKILL_WINDOW);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Join(u64, bool, i32),
        Leave(u64),
        Tick,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..6u64, any::<bool>(), 1000..1600i32).prop_map(|(u, blitz, s)| Op::Join(u, blitz, s)),
            (0..6u64).prop_map(Op::Leave),
            Just(Op::Tick),
        ]
    }

    proptest! {
        #[test]
        fn prop_one_waiting_entry_per_user(ops in proptest::collection::vec(op(), 1..60)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let queue = memory_queue();
                for op in ops {
                    match op {
                        Op::Join(u, blitz, skill) => {
                            let tc = if blitz { "blitz" } else { "rapid" };
                            let _ = queue.join(user(u), tc.into(), skill).await;
                        }
                        Op::Leave(u) => queue.leave(user(u)).await.unwrap(),
                        Op::Tick => {
                            if let Some(event) = queue.tick().await.unwrap() {
                                assert_ne!(event.player1, event.player2);
                            }
                        }
                    }

                    let waiting = queue.inspect_store(|s| s.waiting().unwrap()).await;
                    let mut seen = std::collections::BTreeSet::new();
                    for entry in &waiting {
                        assert!(seen.insert(entry.user_id), "duplicate waiting entry");
                    }
                }
            });
        }
    }
}
