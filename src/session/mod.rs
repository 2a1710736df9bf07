//! Game Sessions
//!
//! Live game rooms: which players are attached, and ordered relay of
//! their events.

pub mod event;
pub mod registry;

pub use event::{GameId, RelayEvent, SessionEvent, SessionEventKind};
pub use registry::{GameSession, PlayerSender, SessionError, SessionRegistry};
