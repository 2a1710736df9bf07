//! Matchmaking
//!
//! Queue of waiting players and the periodic pairing that drains it.
//!
//! ## Module Structure
//!
//! - `entry`: User ids, time controls, queue entries, match events
//! - `store`: Storage seam and the in-memory arena
//! - `pairing`: First-fit pairing rule
//! - `queue`: The shared, lock-guarded queue
//! - `scheduler`: Background task driving pairing ticks

pub mod entry;
pub mod pairing;
pub mod queue;
pub mod scheduler;
pub mod store;

// Re-export key types
pub use entry::{MatchFound, QueueEntry, QueueStatus, TimeControl, UserId};
pub use pairing::{find_first_pair, is_compatible, DEFAULT_SKILL_WINDOW};
pub use queue::{MatchQueue, MatchmakingError};
pub use scheduler::PairingScheduler;
pub use store::{MemoryQueueStore, QueueStore, StoreError};
