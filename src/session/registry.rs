//! Game Session Registry
//!
//! Tracks which players are attached to which live game and relays events
//! between them. Each session has its own lock, held while the player set
//! is mutated and the resulting event is queued to every attached player,
//! so all players of a game see that game's events in one order.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::matchmaking::entry::UserId;
use crate::session::event::{GameId, RelayEvent, SessionEvent, SessionEventKind};

/// Delivery channel to one attached player.
pub type PlayerSender = mpsc::UnboundedSender<SessionEvent>;

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No live session for this game.
    #[error("session {0} not found")]
    SessionNotFound(GameId),

    /// Player is not attached to the session.
    #[error("player {player} is not attached to session {game_id}")]
    PlayerNotAttached {
        /// Session addressed.
        game_id: GameId,
        /// Player that tried to act.
        player: UserId,
    },
}

/// A live game session.
#[derive(Debug)]
pub struct GameSession {
    /// Game identifier.
    pub game_id: GameId,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Attached players and their channels.
    players: BTreeMap<UserId, PlayerSender>,
    /// Set once the session has been removed from the registry.
    closed: bool,
}

impl GameSession {
    fn new(game_id: GameId) -> Self {
        Self {
            game_id,
            created_at: Utc::now(),
            players: BTreeMap::new(),
            closed: false,
        }
    }

    /// Attached player ids, sorted.
    pub fn player_ids(&self) -> Vec<UserId> {
        self.players.keys().copied().collect()
    }

    /// Check if a player is attached.
    pub fn contains(&self, user_id: UserId) -> bool {
        self.players.contains_key(&user_id)
    }

    /// Queue an event to every attached player. Returns recipients reached.
    fn broadcast(&self, player: Option<UserId>, kind: SessionEventKind) -> usize {
        let event = SessionEvent {
            game_id: self.game_id.clone(),
            player,
            timestamp: Utc::now().timestamp_millis(),
            kind,
        };

        let mut delivered = 0;
        for (id, sender) in &self.players {
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!("Player {} channel closed, event for {} skipped", id, self.game_id);
            }
        }
        delivered
    }
}

/// Registry of all live sessions.
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<GameId, Arc<Mutex<GameSession>>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    async fn get(&self, game_id: &GameId) -> Option<Arc<Mutex<GameSession>>> {
        self.sessions.read().await.get(game_id).cloned()
    }

    async fn get_or_create(&self, game_id: &GameId) -> Arc<Mutex<GameSession>> {
        if let Some(session) = self.get(game_id).await {
            return session;
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(game_id.clone())
            .or_insert_with(|| {
                info!("Session {} created", game_id);
                Arc::new(Mutex::new(GameSession::new(game_id.clone())))
            })
            .clone()
    }

    /// Remove `session` from the map unless it was already replaced.
    async fn remove_if_current(&self, game_id: &GameId, session: &Arc<Mutex<GameSession>>) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(game_id).is_some_and(|current| Arc::ptr_eq(current, session)) {
            sessions.remove(game_id);
        }
    }

    /// Attach a player to a game, creating the session if needed.
    ///
    /// Re-attaching keeps the player set unchanged and replaces the
    /// delivery channel. Every attach broadcasts `Join` with the full
    /// player set, the newcomer included.
    pub async fn attach(&self, game_id: &GameId, user_id: UserId, sender: PlayerSender) {
        loop {
            let session = self.get_or_create(game_id).await;
            let mut guard = session.lock().await;

            if guard.closed {
                // Lost a race with the last detach; retry on a fresh session
                drop(guard);
                self.remove_if_current(game_id, &session).await;
                continue;
            }

            if guard.players.insert(user_id, sender.clone()).is_some() {
                debug!("Player {} re-attached to {}", user_id, game_id);
            } else {
                info!("Player {} joined session {}", user_id, game_id);
            }

            let players = guard.player_ids();
            guard.broadcast(Some(user_id), SessionEventKind::Join { players });
            return;
        }
    }

    /// Detach a player. Deletes the session once it is empty.
    pub async fn detach(&self, game_id: &GameId, user_id: UserId) {
        self.detach_matching(game_id, user_id, None).await;
    }

    /// Detach a player only if `sender` is still its delivery channel.
    ///
    /// A connection that was superseded by a re-attach from another
    /// connection of the same user leaves the player in place. Returns
    /// whether the player was detached.
    pub async fn detach_if(&self, game_id: &GameId, user_id: UserId, sender: &PlayerSender) -> bool {
        self.detach_matching(game_id, user_id, Some(sender)).await
    }

    async fn detach_matching(
        &self,
        game_id: &GameId,
        user_id: UserId,
        sender: Option<&PlayerSender>,
    ) -> bool {
        let Some(session) = self.get(game_id).await else {
            return false;
        };

        let mut guard = session.lock().await;
        if guard.closed {
            return false;
        }
        match guard.players.get(&user_id) {
            Some(current) if sender.map_or(true, |s| s.same_channel(current)) => {}
            Some(_) => {
                debug!("Player {} in {} is served by another connection", user_id, game_id);
                return false;
            }
            None => return false,
        }
        guard.players.remove(&user_id);

        let players = guard.player_ids();
        guard.broadcast(Some(user_id), SessionEventKind::Leave { players });
        info!("Player {} left session {}", user_id, game_id);

        if guard.players.is_empty() {
            guard.closed = true;
            drop(guard);
            self.remove_if_current(game_id, &session).await;
            info!("Session {} ended", game_id);
        }
        true
    }

    /// Broadcast an event to every attached player.
    ///
    /// `player` stamps the event with its originator; `None` marks a
    /// server-originated event. A relay to a missing session is dropped.
    /// Returns recipients reached.
    pub async fn relay(&self, game_id: &GameId, player: Option<UserId>, event: RelayEvent) -> usize {
        let Some(session) = self.get(game_id).await else {
            warn!("Relay from {:?} to unknown session {} dropped", player, game_id);
            return 0;
        };

        let guard = session.lock().await;
        if guard.closed {
            warn!("Relay from {:?} to closed session {} dropped", player, game_id);
            return 0;
        }
        guard.broadcast(player, event.into())
    }

    /// Like [`relay`](Self::relay), but only for a player attached to the
    /// session. The membership check and the broadcast share one lock.
    pub async fn relay_from(
        &self,
        game_id: &GameId,
        user_id: UserId,
        event: RelayEvent,
    ) -> Result<usize, SessionError> {
        let session = self
            .get(game_id)
            .await
            .ok_or_else(|| SessionError::SessionNotFound(game_id.clone()))?;

        let guard = session.lock().await;
        if guard.closed {
            return Err(SessionError::SessionNotFound(game_id.clone()));
        }
        if !guard.contains(user_id) {
            return Err(SessionError::PlayerNotAttached {
                game_id: game_id.clone(),
                player: user_id,
            });
        }
        Ok(guard.broadcast(Some(user_id), event.into()))
    }

    /// Close a session explicitly, notifying every attached player.
    /// Returns false if there was no live session.
    pub async fn close(&self, game_id: &GameId, reason: &str) -> bool {
        let Some(session) = self.get(game_id).await else {
            return false;
        };

        let mut guard = session.lock().await;
        if guard.closed {
            return false;
        }
        guard.broadcast(None, SessionEventKind::Closed { reason: reason.to_string() });
        guard.closed = true;
        drop(guard);

        self.remove_if_current(game_id, &session).await;
        info!("Session {} closed: {}", game_id, reason);
        true
    }

    /// Attached players of a game, if it has a live session.
    pub async fn players(&self, game_id: &GameId) -> Option<Vec<UserId>> {
        let session = self.get(game_id).await?;
        let guard = session.lock().await;
        (!guard.closed).then(|| guard.player_ids())
    }

    /// Check if a player is attached to a game.
    pub async fn is_attached(&self, game_id: &GameId, user_id: UserId) -> bool {
        match self.get(game_id).await {
            Some(session) => {
                let guard = session.lock().await;
                !guard.closed && guard.contains(user_id)
            }
            None => false,
        }
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
