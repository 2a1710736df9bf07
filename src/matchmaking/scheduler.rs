//! Pairing Scheduler
//!
//! The single background task that drives [`MatchQueue::tick`] on a fixed
//! period and prunes terminal entries. Match events leave through an
//! unbounded channel so a slow consumer never stalls the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::MatchmakingConfig;
use crate::matchmaking::entry::MatchFound;
use crate::matchmaking::queue::MatchQueue;
use crate::matchmaking::store::{MemoryQueueStore, QueueStore};

/// Shortest period either timer runs at.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Periodically pairs waiting players.
pub struct PairingScheduler<S = MemoryQueueStore> {
    queue: Arc<MatchQueue<S>>,
    config: MatchmakingConfig,
    events: mpsc::UnboundedSender<MatchFound>,
}

impl<S: QueueStore + 'static> PairingScheduler<S> {
    /// Create a scheduler that forwards match events to `events`.
    pub fn new(
        queue: Arc<MatchQueue<S>>,
        config: MatchmakingConfig,
        events: mpsc::UnboundedSender<MatchFound>,
    ) -> Self {
        Self { queue, config, events }
    }

    /// Spawn the scheduler loop onto the runtime.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        // A zero period would panic inside the timer
        let mut tick_interval = interval(self.config.tick_interval.max(MIN_PERIOD));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut retention_interval = interval(self.config.retention_interval.max(MIN_PERIOD));
        retention_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Pairing scheduler started (period: {:?}, skill window: {})",
            self.config.tick_interval,
            self.queue.skill_window()
        );

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.run_period().await;
                }
                _ = retention_interval.tick() => {
                    if let Err(e) = self.queue.prune(self.config.retention).await {
                        warn!("Queue pruning skipped: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Pairing scheduler stopping");
                    break;
                }
            }
        }
    }

    /// One scheduling period: tick until no match is found, up to the
    /// burst limit. Returns the number of matches forwarded.
    pub async fn run_period(&self) -> usize {
        let mut matched = 0;

        for _ in 0..self.config.burst_limit.max(1) {
            match self.queue.tick().await {
                Ok(Some(event)) => {
                    matched += 1;
                    if self.events.send(event).is_err() {
                        warn!("Match event dropped: dispatcher is gone");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // Retried next period; the failed tick committed nothing
                    warn!("Pairing tick skipped: {}", e);
                    break;
                }
            }
        }

        if matched > 0 {
            debug!("Pairing period produced {} matches", matched);
        }
        matched
    }
}
