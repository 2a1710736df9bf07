//! Session Events
//!
//! What attached players receive. Move payloads are opaque JSON and are
//! relayed verbatim; no chess rules are checked here.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::matchmaking::entry::UserId;

/// Game identifier issued by the game-record store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    /// Wrap an id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for GameId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Event kinds broadcast to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    /// A player attached. Carries the full player set.
    Join {
        /// Attached players after the join.
        players: Vec<UserId>,
    },

    /// A player detached. Carries the remaining player set.
    Leave {
        /// Attached players after the leave.
        players: Vec<UserId>,
    },

    /// A move, relayed verbatim.
    Move {
        /// Opaque move payload.
        payload: serde_json::Value,
    },

    /// Draw offer.
    OfferDraw,

    /// Resignation.
    Resign,

    /// Session was closed explicitly.
    Closed {
        /// Why the session closed.
        reason: String,
    },
}

/// A stamped event as delivered to each attached player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Session the event belongs to.
    pub game_id: GameId,
    /// Acting player (None for server-initiated events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<UserId>,
    /// Server time in Unix milliseconds.
    pub timestamp: i64,
    /// Event body.
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

/// Player-originated events that a session relays.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A move.
    Move(serde_json::Value),
    /// Draw offer.
    OfferDraw,
    /// Resignation.
    Resign,
}

impl From<RelayEvent> for SessionEventKind {
    fn from(event: RelayEvent) -> Self {
        match event {
            RelayEvent::Move(payload) => SessionEventKind::Move { payload },
            RelayEvent::OfferDraw => SessionEventKind::OfferDraw,
            RelayEvent::Resign => SessionEventKind::Resign,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_json_is_flat() {
        let event = SessionEvent {
            game_id: GameId::from("g-1"),
            player: Some(UserId::new(7)),
            timestamp: 1_700_000_000_000,
            kind: SessionEventKind::Move {
                payload: json!({"from": "e2", "to": "e4", "piece": "pawn"}),
            },
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "move");
        assert_eq!(value["game_id"], "g-1");
        assert_eq!(value["player"], 7);
        assert_eq!(value["payload"]["to"], "e4");

        let parsed: SessionEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_server_event_omits_player() {
        let event = SessionEvent {
            game_id: GameId::from("g-2"),
            player: None,
            timestamp: 0,
            kind: SessionEventKind::Closed { reason: "game over".into() },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "closed");
        assert!(value.get("player").is_none());
    }

    #[test]
    fn test_relay_event_kinds() {
        assert_eq!(SessionEventKind::from(RelayEvent::OfferDraw), SessionEventKind::OfferDraw);
        assert_eq!(SessionEventKind::from(RelayEvent::Resign), SessionEventKind::Resign);
        assert_eq!(
            SessionEventKind::from(RelayEvent::Move(json!("e2e4"))),
            SessionEventKind::Move { payload: json!("e2e4") }
        );
    }
}
