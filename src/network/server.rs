//! WebSocket Game Server
//!
//! Async WebSocket gateway in front of the matchmaking queue and the
//! session registry. Handles authentication, queue requests, match
//! dispatch, and routing of game messages to live sessions.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{env_parse, env_period, ConfigError, MatchmakingConfig};
use crate::matchmaking::{MatchFound, MatchQueue, MatchmakingError, PairingScheduler, UserId};
use crate::network::auth::{authenticate, AuthConfig};
use crate::network::protocol::{
    AuthRequest, AuthResult, ClientMessage, ErrorCode, JoinQueueRequest, MatchFoundInfo,
    ServerError, ServerMessage,
};
use crate::network::records::{GameRecords, MemoryGameRecords, RecordsError};
use crate::session::{GameId, PlayerSender, SessionEvent, SessionRegistry};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle time after which a silent connection is closed.
    pub connection_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            connection_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: env_parse("BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            max_connections: env_parse("MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections),
            connection_timeout: env_period("CONNECTION_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.connection_timeout),
            version: defaults.version,
        })
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Game could not be created for a match.
    #[error("Game records error: {0}")]
    Records(#[from] RecordsError),
}

/// How long a rejected client gets to finish the handshake.
const REJECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// CONNECTION STATE
// =============================================================================

/// Registry entry for a connected client, visible to the match dispatcher.
struct ConnectedClient {
    /// User (after auth).
    user_id: Option<UserId>,
    /// Message sender (for direct messaging to client).
    sender: mpsc::Sender<ServerMessage>,
    /// Connection time.
    connected_at: DateTime<Utc>,
}

/// State owned by one connection's reader loop.
struct Connection {
    addr: SocketAddr,
    user_id: Option<UserId>,
    /// Games this connection attached to.
    games: BTreeSet<GameId>,
    sender: mpsc::Sender<ServerMessage>,
    game_events: PlayerSender,
}

impl Connection {
    fn new(addr: SocketAddr, sender: mpsc::Sender<ServerMessage>, game_events: PlayerSender) -> Self {
        Self {
            addr,
            user_id: None,
            games: BTreeSet::new(),
            sender,
            game_events,
        }
    }

    async fn send(&self, msg: ServerMessage) {
        if self.sender.send(msg).await.is_err() {
            debug!("Writer for {} is gone, message dropped", self.addr);
        }
    }
}

// =============================================================================
// SHARED STATE
// =============================================================================

/// Everything connection tasks and the dispatcher share.
struct ServerState {
    config: ServerConfig,
    auth: AuthConfig,
    queue: Arc<MatchQueue>,
    sessions: Arc<SessionRegistry>,
    records: Arc<dyn GameRecords>,
    clients: RwLock<BTreeMap<SocketAddr, ConnectedClient>>,
}

impl ServerState {
    fn new(config: ServerConfig, auth: AuthConfig, skill_window: u32, records: Arc<dyn GameRecords>) -> Self {
        Self {
            config,
            auth,
            queue: Arc::new(MatchQueue::new(skill_window)),
            sessions: Arc::new(SessionRegistry::new()),
            records,
            clients: RwLock::new(BTreeMap::new()),
        }
    }

    async fn register(&self, addr: SocketAddr, sender: mpsc::Sender<ServerMessage>) {
        self.clients.write().await.insert(
            addr,
            ConnectedClient {
                user_id: None,
                sender,
                connected_at: Utc::now(),
            },
        );
    }

    /// Handle a client message.
    async fn handle_client_message(&self, conn: &mut Connection, msg: ClientMessage) {
        match msg {
            ClientMessage::Auth(request) => self.handle_auth(conn, request).await,
            ClientMessage::Ping { timestamp } => {
                conn.send(ServerMessage::Pong {
                    timestamp,
                    server_time: Utc::now().timestamp_millis(),
                })
                .await;
            }
            msg => {
                let Some(user_id) = conn.user_id else {
                    conn.send(ServerMessage::error(
                        ErrorCode::NotAuthenticated,
                        "Must authenticate first",
                    ))
                    .await;
                    return;
                };

                match msg {
                    ClientMessage::JoinQueue(request) => {
                        self.handle_join_queue(conn, user_id, request).await
                    }
                    ClientMessage::LeaveQueue => match self.queue.leave(user_id).await {
                        Ok(()) => conn.send(ServerMessage::QueueLeft).await,
                        Err(e) => self.send_queue_error(conn, &e).await,
                    },
                    ClientMessage::QueueStatus => match self.queue.status(user_id).await {
                        Ok(Some(entry)) => conn.send(ServerMessage::QueueStatus { entry }).await,
                        Ok(None) => {
                            conn.send(ServerMessage::error(ErrorCode::NotFound, "Not in queue"))
                                .await
                        }
                        Err(e) => self.send_queue_error(conn, &e).await,
                    },
                    ClientMessage::JoinGame { game_id } => {
                        self.sessions
                            .attach(&game_id, user_id, conn.game_events.clone())
                            .await;
                        conn.games.insert(game_id);
                    }
                    ClientMessage::LeaveGame { game_id } => {
                        if conn.games.remove(&game_id) {
                            self.sessions.detach(&game_id, user_id).await;
                        } else {
                            conn.send(ServerMessage::error(
                                ErrorCode::NotInGame,
                                format!("Not attached to game {}", game_id),
                            ))
                            .await;
                        }
                    }
                    other => self.handle_relay(conn, user_id, &other).await,
                }
            }
        }
    }

    /// Handle authentication.
    async fn handle_auth(&self, conn: &mut Connection, request: AuthRequest) {
        if let Some(current) = conn.user_id {
            conn.send(ServerMessage::error(
                ErrorCode::InvalidInput,
                format!("Already authenticated as {}", current),
            ))
            .await;
            return;
        }

        let result = match authenticate(&request, &self.auth) {
            Ok(user_id) => {
                conn.user_id = Some(user_id);
                if let Some(client) = self.clients.write().await.get_mut(&conn.addr) {
                    client.user_id = Some(user_id);
                }
                info!("Client {} authenticated as user {}", conn.addr, user_id);
                AuthResult {
                    success: true,
                    user_id: Some(user_id),
                    code: None,
                    error: None,
                    server_version: self.config.version.clone(),
                }
            }
            Err(e) => {
                warn!("Authentication failed for {}: {}", conn.addr, e);
                AuthResult {
                    success: false,
                    user_id: None,
                    code: Some(e.code()),
                    error: Some(e.to_string()),
                    server_version: self.config.version.clone(),
                }
            }
        };

        conn.send(ServerMessage::AuthResult(result)).await;
    }

    async fn handle_join_queue(&self, conn: &Connection, user_id: UserId, request: JoinQueueRequest) {
        match self
            .queue
            .join(user_id, request.time_control, request.skill_level)
            .await
        {
            Ok(entry) => conn.send(ServerMessage::Queued { entry }).await,
            Err(e) => self.send_queue_error(conn, &e).await,
        }
    }

    async fn send_queue_error(&self, conn: &Connection, err: &MatchmakingError) {
        if let MatchmakingError::StorageUnavailable(_) = err {
            error!("Queue request from {} failed: {}", conn.addr, err);
        }
        conn.send(ServerMessage::Error(ServerError::from(err))).await;
    }

    /// Relay a move, draw offer or resignation.
    async fn handle_relay(&self, conn: &Connection, user_id: UserId, msg: &ClientMessage) {
        let Some((game_id, event)) = msg.relay_event() else {
            debug!("Unhandled message type from {}", conn.addr);
            return;
        };

        match self.sessions.relay_from(game_id, user_id, event).await {
            Ok(delivered) => debug!("Relayed event in {} to {} players", game_id, delivered),
            Err(e) => conn.send(ServerMessage::Error(ServerError::from(&e))).await,
        }
    }

    /// Release everything a closed connection held.
    async fn disconnect(&self, conn: &mut Connection) {
        let still_online = {
            let mut clients = self.clients.write().await;
            clients.remove(&conn.addr);
            conn.user_id
                .is_some_and(|user_id| clients.values().any(|c| c.user_id == Some(user_id)))
        };

        let Some(user_id) = conn.user_id else {
            return;
        };

        // Another live connection keeps the queue entry
        if !still_online {
            if let Err(e) = self.queue.leave(user_id).await {
                warn!("Could not cancel queue entry of user {}: {}", user_id, e);
            }
        }

        // A newer connection of the same user may own the seat by now
        for game_id in std::mem::take(&mut conn.games) {
            self.sessions.detach_if(&game_id, user_id, &conn.game_events).await;
        }
    }

    /// Send a message to every connection of a user without waiting on
    /// any of them. Returns how many got it.
    async fn notify_user(&self, user_id: UserId, msg: ServerMessage) -> usize {
        let senders: Vec<_> = self
            .clients
            .read()
            .await
            .values()
            .filter(|c| c.user_id == Some(user_id))
            .map(|c| c.sender.clone())
            .collect();

        let mut delivered = 0;
        for sender in senders {
            match sender.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Outbox of user {} is full, notice dropped", user_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Turn a match into a game and tell both players. The first player
    /// of the pair gets white.
    async fn dispatch_match(&self, event: MatchFound) -> Result<GameId, GameServerError> {
        let game_id = self
            .records
            .create_game(event.player1, event.player2, &event.time_control)?;

        info!(
            "Game {} created: {} (white) vs {} (black), {}",
            game_id, event.player1, event.player2, event.time_control
        );

        let seats = [
            (event.player1, event.player2, true),
            (event.player2, event.player1, false),
        ];
        for (player, opponent, white) in seats {
            let notice = ServerMessage::MatchFound(MatchFoundInfo {
                game_id: game_id.clone(),
                opponent_id: opponent,
                time_control: event.time_control.clone(),
                white,
            });
            if self.notify_user(player, notice).await == 0 {
                debug!("Match notice for {} not delivered to user {}", game_id, player);
            }
        }

        Ok(game_id)
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// The game server.
pub struct GameServer {
    state: Arc<ServerState>,
    matchmaking: MatchmakingConfig,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server with in-memory game records.
    pub fn new(config: ServerConfig, matchmaking: MatchmakingConfig, auth: AuthConfig) -> Self {
        Self::with_records(config, matchmaking, auth, Arc::new(MemoryGameRecords::new()))
    }

    /// Create a server over an existing game-record store.
    pub fn with_records(
        config: ServerConfig,
        matchmaking: MatchmakingConfig,
        auth: AuthConfig,
        records: Arc<dyn GameRecords>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = ServerState::new(config, auth, matchmaking.skill_window, records);

        Self {
            state: Arc::new(state),
            matchmaking,
            shutdown_tx,
        }
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.state.config.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Run on an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);

        let (match_tx, match_rx) = mpsc::unbounded_channel();
        let scheduler = PairingScheduler::new(
            self.state.queue.clone(),
            self.matchmaking.clone(),
            match_tx,
        )
        .spawn(self.shutdown_tx.subscribe());

        // Ends once the scheduler drops its sender
        let dispatcher = tokio::spawn(Self::run_match_dispatcher(self.state.clone(), match_rx));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.state.clients.read().await.len();
                            if clients_count >= self.state.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(Self::reject_connection(stream, addr));
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = scheduler.await {
            error!("Pairing scheduler failed: {}", e);
        }
        if let Err(e) = dispatcher.await {
            error!("Match dispatcher failed: {}", e);
        }
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let state = self.state.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = Self::serve_connection(state, stream, addr, shutdown_rx).await {
                error!("Connection {} failed: {}", addr, e);
            }
        });
    }

    /// Tell a client over the connection limit why it is dropped.
    async fn reject_connection(stream: TcpStream, addr: SocketAddr) {
        let notice = ServerMessage::error(ErrorCode::ServerOverloaded, "Too many connections");
        let result = async {
            let mut ws = timeout(REJECT_TIMEOUT, accept_async(stream))
                .await
                .map_err(|_| tokio_tungstenite::tungstenite::Error::ConnectionClosed)??;
            if let Ok(text) = notice.to_json() {
                ws.send(Message::Text(text)).await?;
            }
            ws.close(None).await
        }
        .await;

        if let Err(e) = result {
            debug!("Rejected client {} went away early: {}", addr, e);
        }
    }

    async fn serve_connection(
        state: Arc<ServerState>,
        stream: TcpStream,
        addr: SocketAddr,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), GameServerError> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);
        let (game_tx, mut game_rx) = mpsc::unbounded_channel::<SessionEvent>();

        state.register(addr, msg_tx.clone()).await;

        // Writer: drains direct replies and session events until every
        // sender is gone
        let mut writer = tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    Some(msg) = msg_rx.recv() => msg,
                    Some(event) = game_rx.recv() => ServerMessage::Game { event },
                    else => break,
                };
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let mut conn = Connection::new(addr, msg_tx, game_tx);
        let idle_timeout = state.config.connection_timeout;
        let mut deadline = Instant::now() + idle_timeout;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            deadline = Instant::now() + idle_timeout;
                            match ClientMessage::from_json(&text) {
                                Ok(client_msg) => state.handle_client_message(&mut conn, client_msg).await,
                                Err(e) => {
                                    debug!("Invalid message from {}: {}", addr, e);
                                    conn.send(ServerMessage::error(
                                        ErrorCode::InvalidInput,
                                        "Invalid message format",
                                    ))
                                    .await;
                                }
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            deadline = Instant::now() + idle_timeout;
                            conn.send(ServerMessage::error(
                                ErrorCode::InvalidInput,
                                "Binary frames are not supported",
                            ))
                            .await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", addr);
                            break;
                        }
                        Some(Ok(_)) => {
                            deadline = Instant::now() + idle_timeout;
                        }
                        Some(Err(e)) => {
                            warn!("WebSocket error for {}: {}", addr, e);
                            break;
                        }
                    }
                }
                _ = sleep_until(deadline) => {
                    info!("Client {} idle for {:?}, closing", addr, idle_timeout);
                    break;
                }
                _ = shutdown_rx.recv() => {
                    conn.send(ServerMessage::Shutdown {
                        reason: "Server shutting down".to_string(),
                    })
                    .await;
                    break;
                }
            }
        }

        state.disconnect(&mut conn).await;
        drop(conn);

        // Let the writer flush what is queued, then give up on it
        if timeout(Duration::from_secs(1), &mut writer).await.is_err() {
            writer.abort();
        }

        info!("Client {} cleaned up", addr);
        Ok(())
    }

    /// Create games for matches and notify the players, one task per match.
    async fn run_match_dispatcher(state: Arc<ServerState>, mut matches: mpsc::UnboundedReceiver<MatchFound>) {
        while let Some(event) = matches.recv().await {
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = state.dispatch_match(event.clone()).await {
                    error!(
                        "Match of users {} and {} was not dispatched: {}",
                        event.player1, event.player2, e
                    );
                }
            });
        }
        debug!("Match dispatcher stopped");
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// The matchmaking queue.
    pub fn queue(&self) -> &Arc<MatchQueue> {
        &self.state.queue
    }

    /// The session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.state.sessions
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.state.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.state.sessions.session_count().await
    }

    /// Get matchmaking queue size.
    pub async fn queue_size(&self) -> usize {
        self.state.queue.waiting_count().await.unwrap_or(0)
    }

    /// Oldest connection time, if any client is connected.
    pub async fn oldest_connection(&self) -> Option<DateTime<Utc>> {
        self.state.clients.read().await.values().map(|c| c.connected_at).min()
    }
}
