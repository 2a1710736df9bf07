//! Game Records
//!
//! Creates the persistent game a match turns into. The server only needs
//! the new game's id; the record itself lives with whatever backs this
//! trait.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::matchmaking::entry::{TimeControl, UserId};
use crate::session::event::GameId;

/// Game record errors.
#[derive(Debug, Error)]
pub enum RecordsError {
    /// Backing store failed.
    #[error("game records unavailable: {0}")]
    Unavailable(String),
}

/// A created game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecord {
    /// Game identifier.
    pub game_id: GameId,
    /// Player with the white pieces.
    pub white: UserId,
    /// Player with the black pieces.
    pub black: UserId,
    /// Agreed time control.
    pub time_control: TimeControl,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Game creation seam.
pub trait GameRecords: Send + Sync {
    /// Create a game between two players and return its id.
    fn create_game(
        &self,
        white: UserId,
        black: UserId,
        time_control: &TimeControl,
    ) -> Result<GameId, RecordsError>;

    /// Look up a created game.
    fn get(&self, game_id: &GameId) -> Result<Option<GameRecord>, RecordsError>;
}

/// In-memory game records with UUID v4 ids.
#[derive(Debug, Default)]
pub struct MemoryGameRecords {
    games: RwLock<BTreeMap<GameId, GameRecord>>,
}

impl MemoryGameRecords {
    /// Create an empty record store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl GameRecords for MemoryGameRecords {
    fn create_game(
        &self,
        white: UserId,
        black: UserId,
        time_control: &TimeControl,
    ) -> Result<GameId, RecordsError> {
        let game_id = GameId::new(Uuid::new_v4().to_string());
        let record = GameRecord {
            game_id: game_id.clone(),
            white,
            black,
            time_control: time_control.clone(),
            created_at: Utc::now(),
        };

        self.games
            .write()
            .map_err(|_| RecordsError::Unavailable("lock poisoned".into()))?
            .insert(game_id.clone(), record);
        Ok(game_id)
    }

    fn get(&self, game_id: &GameId) -> Result<Option<GameRecord>, RecordsError> {
        let games = self
            .games
            .read()
            .map_err(|_| RecordsError::Unavailable("lock poisoned".into()))?;
        Ok(games.get(game_id).cloned())
    }
}
