//! Queue Entry Definitions
//!
//! Identity and lifecycle types for the matchmaking queue.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// USER ID
// =============================================================================

/// Opaque user identity, as supplied by the auth layer.
///
/// Implements Ord so it can key BTreeMap indexes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    /// Create from a raw numeric id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw numeric id.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// TIME CONTROL
// =============================================================================

/// Time control tag. Entries only pair within an identical tag.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeControl(String);

impl TimeControl {
    /// Tag used when a client does not name one.
    pub const DEFAULT: &'static str = "rapid";

    /// Create from any string tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Borrow the tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TimeControl {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TimeControl {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

// =============================================================================
// QUEUE ENTRY
// =============================================================================

/// Lifecycle state of a queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be paired.
    Waiting,
    /// Paired with an opponent (terminal).
    Matched,
    /// Left the queue before pairing (terminal).
    Cancelled,
}

impl QueueStatus {
    /// Matched and Cancelled never return to Waiting.
    pub fn is_terminal(self) -> bool {
        !matches!(self, QueueStatus::Waiting)
    }
}

/// A single matchmaking request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Insertion sequence number; defines scan order.
    pub id: u64,
    /// Requesting user.
    pub user_id: UserId,
    /// Requested time control.
    pub time_control: TimeControl,
    /// Rating used for pairing.
    pub skill_level: i32,
    /// Current lifecycle state.
    pub status: QueueStatus,
    /// When the entry was created.
    pub joined_at: DateTime<Utc>,
    /// Opponent, once matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_opponent_id: Option<UserId>,
    /// When the match was made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_at: Option<DateTime<Utc>>,
    /// When the entry was cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Create a new Waiting entry.
    pub fn waiting(
        id: u64,
        user_id: UserId,
        time_control: TimeControl,
        skill_level: i32,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            time_control,
            skill_level,
            status: QueueStatus::Waiting,
            joined_at,
            matched_opponent_id: None,
            matched_at: None,
            cancelled_at: None,
        }
    }

    /// Check if the entry is still waiting.
    pub fn is_waiting(&self) -> bool {
        self.status == QueueStatus::Waiting
    }

    /// Copy of this entry transitioned to Matched against `opponent`.
    pub fn matched_with(&self, opponent: UserId, at: DateTime<Utc>) -> Self {
        Self {
            status: QueueStatus::Matched,
            matched_opponent_id: Some(opponent),
            matched_at: Some(at),
            ..self.clone()
        }
    }

    /// Copy of this entry transitioned to Cancelled.
    pub fn cancelled(&self, at: DateTime<Utc>) -> Self {
        Self {
            status: QueueStatus::Cancelled,
            cancelled_at: Some(at),
            ..self.clone()
        }
    }

    /// When the entry reached a terminal state, if it has.
    pub fn terminal_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            QueueStatus::Waiting => None,
            QueueStatus::Matched => self.matched_at,
            QueueStatus::Cancelled => self.cancelled_at,
        }
    }
}

/// Emitted by a pairing tick when two entries are matched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFound {
    /// Earlier-joined player (anchor of the pair).
    pub player1: UserId,
    /// Later-joined partner.
    pub player2: UserId,
    /// Shared time control.
    pub time_control: TimeControl,
    /// Commit time of the match.
    pub matched_at: DateTime<Utc>,
}

impl MatchFound {
    /// Check if a user is part of this match.
    pub fn involves(&self, user_id: UserId) -> bool {
        self.player1 == user_id || self.player2 == user_id
    }

    /// The other player of the pair, if `user_id` is in it.
    pub fn opponent_of(&self, user_id: UserId) -> Option<UserId> {
        if self.player1 == user_id {
            Some(self.player2)
        } else if self.player2 == user_id {
            Some(self.player1)
        } else {
            None
        }
    }
}
