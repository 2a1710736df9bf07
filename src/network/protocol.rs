//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON object tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::matchmaking::entry::{QueueEntry, TimeControl, UserId};
use crate::matchmaking::queue::MatchmakingError;
use crate::session::event::{GameId, RelayEvent, SessionEvent};
use crate::session::registry::SessionError;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with the server.
    Auth(AuthRequest),

    /// Enter the matchmaking queue.
    JoinQueue(JoinQueueRequest),

    /// Leave the matchmaking queue.
    LeaveQueue,

    /// Ask for the current queue entry.
    QueueStatus,

    /// Attach to a live game session.
    JoinGame {
        /// Game to attach to.
        game_id: GameId,
    },

    /// Relay a move to the game.
    Move {
        /// Target game.
        game_id: GameId,
        /// Opaque move payload.
        payload: serde_json::Value,
    },

    /// Offer a draw.
    OfferDraw {
        /// Target game.
        game_id: GameId,
    },

    /// Resign the game.
    Resign {
        /// Target game.
        game_id: GameId,
    },

    /// Detach from a game session.
    LeaveGame {
        /// Game to leave.
        game_id: GameId,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// JWT issued by the identity provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Claimed user id. Only honored when anonymous auth is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// Queue join request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinQueueRequest {
    /// Requested time control; `rapid` when omitted.
    #[serde(default)]
    pub time_control: TimeControl,
    /// Player rating.
    pub skill_level: i32,
}

impl ClientMessage {
    /// The game event this message relays, if it is one.
    pub fn relay_event(&self) -> Option<(&GameId, RelayEvent)> {
        match self {
            ClientMessage::Move { game_id, payload } => {
                Some((game_id, RelayEvent::Move(payload.clone())))
            }
            ClientMessage::OfferDraw { game_id } => Some((game_id, RelayEvent::OfferDraw)),
            ClientMessage::Resign { game_id } => Some((game_id, RelayEvent::Resign)),
            _ => None,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Queue entry created.
    Queued {
        /// The new Waiting entry.
        entry: QueueEntry,
    },

    /// Queue entry cancelled (or there was none).
    QueueLeft,

    /// Current queue entry.
    QueueStatus {
        /// The user's Waiting entry.
        entry: QueueEntry,
    },

    /// Opponent found and a game created.
    MatchFound(MatchFoundInfo),

    /// Event from an attached game session.
    Game {
        /// The session event.
        event: SessionEvent,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time in Unix milliseconds.
        server_time: i64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Authenticated user, if successful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Failure code if failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Error message if failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Information about a found match, from one player's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFoundInfo {
    /// Created game.
    pub game_id: GameId,
    /// The other player.
    pub opponent_id: UserId,
    /// Agreed time control.
    pub time_control: TimeControl,
    /// Whether this player has the white pieces.
    pub white: bool,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Build an error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Malformed message.
    InvalidInput,
    /// User already has a Waiting entry.
    AlreadyQueued,
    /// No such queue entry or game session.
    NotFound,
    /// Player is not attached to the game.
    NotInGame,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl From<&MatchmakingError> for ServerError {
    fn from(err: &MatchmakingError) -> Self {
        let code = match err {
            MatchmakingError::AlreadyQueued(_) => ErrorCode::AlreadyQueued,
            MatchmakingError::StorageUnavailable(_) => ErrorCode::InternalError,
        };
        ServerError::new(code, err.to_string())
    }
}

impl From<&SessionError> for ServerError {
    fn from(err: &SessionError) -> Self {
        let code = match err {
            SessionError::SessionNotFound(_) => ErrorCode::NotFound,
            SessionError::PlayerNotAttached { .. } => ErrorCode::NotInGame,
        };
        ServerError::new(code, err.to_string())
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Shorthand for an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError::new(code, message))
    }
}
