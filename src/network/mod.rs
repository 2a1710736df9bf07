//! Network Layer
//!
//! WebSocket gateway that puts the matchmaking queue and the session
//! registry on the wire.

pub mod auth;
pub mod protocol;
pub mod records;
pub mod server;

pub use auth::{authenticate, validate_token, AuthConfig, AuthError, TokenClaims};
pub use protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
pub use records::{GameRecord, GameRecords, MemoryGameRecords, RecordsError};
pub use server::{GameServer, GameServerError, ServerConfig};
