//! # Chess Matchmaker
//!
//! Matchmaking queue and live game session relay for online chess.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CHESS MATCHMAKER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  config.rs       - Environment-driven tunables               │
//! │                                                              │
//! │  matchmaking/    - Waiting players and pairing               │
//! │  ├── entry.rs    - User ids, time controls, queue entries    │
//! │  ├── store.rs    - Storage seam and in-memory arena          │
//! │  ├── pairing.rs  - First-fit pairing rule                    │
//! │  ├── queue.rs    - Lock-guarded join/leave/status/tick       │
//! │  └── scheduler.rs- Periodic pairing task                     │
//! │                                                              │
//! │  session/        - Live game rooms                           │
//! │  ├── event.rs    - Game ids and relayed events               │
//! │  └── registry.rs - Attach, detach, ordered relay             │
//! │                                                              │
//! │  network/        - WebSocket gateway                         │
//! │  ├── server.rs   - Accept loop, connections, match dispatch  │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── auth.rs     - JWT validation                            │
//! │  └── records.rs  - Game creation seam                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - A user has at most one Waiting queue entry.
//! - A pairing tick matches at most one pair, and either both entries
//!   become Matched or neither does.
//! - Every attached player of a game sees that game's events in the same
//!   order.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod matchmaking;
pub mod network;
pub mod session;

// Re-export commonly used types
pub use config::{ConfigError, MatchmakingConfig};
pub use matchmaking::{MatchFound, MatchQueue, MatchmakingError, QueueEntry, QueueStatus, TimeControl, UserId};
pub use session::{GameId, RelayEvent, SessionError, SessionEvent, SessionRegistry};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
