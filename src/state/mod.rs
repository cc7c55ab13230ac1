//! Client-side synchronization state.
//!
//! - `connection` - the single transport, reconnection, heartbeat, queueing
//! - `dedup` - replay protection for inbound message ids
//! - `game` - game snapshot types
//! - `role` - derivation of the local user's role and permissions
//! - `store` - per-game snapshot cache, event logs, action gatekeeping
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             SyncClient                               │
//! │                                                                      │
//! │   host events                                                        │
//! │   open/frame/close/error ─▶ ┌───────────────────┐                    │
//! │   poll_timers(now) ───────▶ │ ConnectionManager │ ◀── Transport      │
//! │                             │                   │                    │
//! │                             │ dedup → dispatch  │ ── send ──┐        │
//! │                             └─────────┬─────────┘           │        │
//! │                      typed handlers   │                     │        │
//! │                                       ▼                     │        │
//! │                             ┌───────────────────┐           │        │
//! │                             │     GameStore     │ ──────────┘        │
//! │                             │                   │  send_action       │
//! │                             │ game_id →         │  (role-gated)      │
//! │                             │   GameState       │                    │
//! │                             │   event log       │                    │
//! │                             │   listeners       │                    │
//! │                             └───────────────────┘                    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything is single-threaded. Listeners run synchronously and may call
//! back into the client.

pub mod connection;
pub mod dedup;
pub mod game;
pub mod role;
pub mod store;

use std::rc::Rc;
use std::time::Instant;

pub use connection::{
    backoff_delay, ConnectionManager, ConnectionState, Delivery, Identity, LinkStatus,
};
pub use dedup::ProcessedMessages;
pub use game::{
    Clocks, Color, EventLogEntry, GameEvent, GameState, HistoryEntry, Phase, PlayerInfo, Players,
    TimeControl,
};
pub use role::{derive_role, Role, UserRole};
pub use store::{GameStore, LocalUser};

use crate::config::SyncConfig;
use crate::error::SendActionError;
use crate::protocol::action::Action;
use crate::protocol::message::{ClientMessage, ServerMessage, Topic};
use crate::subscription::Subscription;
use crate::transport::{CloseFrame, Transport};

/// One connection and the game store listening to it.
///
/// This is the usual entry point. Both halves are also reachable on their
/// own through [`connection`](Self::connection) and [`games`](Self::games).
#[derive(Clone)]
pub struct SyncClient {
    connection: ConnectionManager,
    games: GameStore,
}

impl SyncClient {
    pub fn new(config: SyncConfig, transport: impl Transport + 'static) -> Self {
        let connection = ConnectionManager::new(config.clone(), transport);
        let games = GameStore::new(connection.clone(), &config);
        Self { connection, games }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn games(&self) -> &GameStore {
        &self.games
    }

    /// Connect as `identity`. The store uses the same identity for roles
    /// until the server confirms it.
    pub fn connect(&self, identity: Identity) {
        self.games
            .set_user(identity.user_id.clone(), Some(identity.username.clone()));
        self.connection.connect(identity);
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn send(&self, message: ClientMessage) -> Delivery {
        self.connection.send(message)
    }

    pub fn subscribe(
        &self,
        topic: impl Into<Topic>,
        handler: impl Fn(&ServerMessage) + 'static,
    ) -> Subscription {
        self.connection.subscribe(topic, handler)
    }

    pub fn subscribe_to_connection_state(
        &self,
        handler: impl Fn(&ConnectionState) + 'static,
    ) -> Subscription {
        self.connection.subscribe_to_connection_state(handler)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn join_game(&self, game_id: &str) -> Delivery {
        self.games.join_game(game_id)
    }

    pub fn leave_game(&self) {
        self.games.leave_game();
    }

    pub fn join_queue(&self) -> Delivery {
        self.games.join_queue()
    }

    pub fn leave_queue(&self) -> Delivery {
        self.games.leave_queue()
    }

    pub fn create_solo_game(&self) -> Delivery {
        self.games.create_solo_game()
    }

    pub fn give_time(&self, game_id: &str, seconds: u32) -> Delivery {
        self.games.give_time(game_id, seconds)
    }

    pub fn send_action(&self, game_id: &str, action: Action) -> Result<Delivery, SendActionError> {
        self.games.send_action(game_id, action)
    }

    pub fn game_state(&self, game_id: &str) -> Option<Rc<GameState>> {
        self.games.game_state(game_id)
    }

    pub fn user_role(&self, game_id: &str) -> UserRole {
        self.games.user_role(game_id)
    }

    pub fn events(&self, game_id: &str) -> Vec<EventLogEntry> {
        self.games.events(game_id)
    }

    pub fn current_game(&self) -> Option<String> {
        self.games.current_game()
    }

    pub fn subscribe_to_game(
        &self,
        game_id: &str,
        listener: impl Fn(&GameState) + 'static,
    ) -> Subscription {
        self.games.subscribe_to_game(game_id, listener)
    }

    pub fn subscribe_to_role(
        &self,
        game_id: &str,
        listener: impl Fn(&UserRole) + 'static,
    ) -> Subscription {
        self.games.subscribe_to_role(game_id, listener)
    }

    pub fn subscribe_to_all(&self, listener: impl Fn(&GameState) + 'static) -> Subscription {
        self.games.subscribe_to_all(listener)
    }

    pub fn handle_open(&self) {
        self.connection.handle_open();
    }

    pub fn handle_frame(&self, text: &str) {
        self.connection.handle_frame(text);
    }

    pub fn handle_close(&self, frame: CloseFrame) {
        self.connection.handle_close(frame);
    }

    pub fn handle_error(&self, reason: &str) {
        self.connection.handle_error(reason);
    }

    pub fn poll_timers(&self, now: Instant) {
        self.connection.poll_timers(now);
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.connection.next_deadline()
    }
}
