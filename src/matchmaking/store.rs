//! Queue Storage
//!
//! The persistence seam behind [`MatchQueue`](super::queue::MatchQueue).
//! Calls are synchronous and made while the queue lock is held, so
//! implementations must not block on remote I/O.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::matchmaking::entry::{QueueEntry, UserId};

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Backing storage cannot be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// An update referenced an entry the store does not hold.
    #[error("unknown queue entry {0}")]
    UnknownEntry(u64),
}

/// Load/save operations for queue entries.
pub trait QueueStore: Send {
    /// Store a new entry.
    fn insert(&mut self, entry: QueueEntry) -> Result<(), StoreError>;

    /// Current Waiting entry for a user.
    fn find_waiting(&self, user_id: UserId) -> Result<Option<QueueEntry>, StoreError>;

    /// All Waiting entries in insertion order.
    fn waiting(&self) -> Result<Vec<QueueEntry>, StoreError>;

    /// Replace entries by id. All-or-nothing: either every entry is
    /// written or none is.
    fn update_all(&mut self, entries: &[QueueEntry]) -> Result<(), StoreError>;

    /// Remove terminal entries that ended before `before`.
    /// Returns the number removed.
    fn purge_terminal(&mut self, before: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// In-memory arena of queue entries.
///
/// Entries are keyed by sequence id (BTreeMap gives insertion order for
/// free); a second index maps users to their Waiting entry.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    entries: BTreeMap<u64, QueueEntry>,
    waiting_index: BTreeMap<UserId, u64>,
}

impl MemoryQueueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries held, terminal ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up any entry by id, terminal ones included.
    pub fn get(&self, id: u64) -> Option<&QueueEntry> {
        self.entries.get(&id)
    }
}

impl QueueStore for MemoryQueueStore {
    fn insert(&mut self, entry: QueueEntry) -> Result<(), StoreError> {
        if entry.is_waiting() {
            self.waiting_index.insert(entry.user_id, entry.id);
        }
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    fn find_waiting(&self, user_id: UserId) -> Result<Option<QueueEntry>, StoreError> {
        Ok(self
            .waiting_index
            .get(&user_id)
            .and_then(|id| self.entries.get(id))
            .cloned())
    }

    fn waiting(&self) -> Result<Vec<QueueEntry>, StoreError> {
        Ok(self
            .entries
            .values()
            .filter(|e| e.is_waiting())
            .cloned()
            .collect())
    }

    fn update_all(&mut self, entries: &[QueueEntry]) -> Result<(), StoreError> {
        // Validate first so a bad id leaves the store untouched
        if let Some(missing) = entries.iter().find(|e| !self.entries.contains_key(&e.id)) {
            return Err(StoreError::UnknownEntry(missing.id));
        }

        for entry in entries {
            if entry.is_waiting() {
                self.waiting_index.insert(entry.user_id, entry.id);
            } else if self.waiting_index.get(&entry.user_id) == Some(&entry.id) {
                self.waiting_index.remove(&entry.user_id);
            }
            self.entries.insert(entry.id, entry.clone());
        }

        Ok(())
    }

    fn purge_terminal(&mut self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let before_len = self.entries.len();
        self.entries
            .retain(|_, e| !matches!(e.terminal_at(), Some(at) if at < before));
        Ok(before_len - self.entries.len())
    }
}
