//! Game state store.
//!
//! One registry of the latest authoritative snapshot per game. It listens to
//! the connection manager's typed message stream, keeps the cache current,
//! derives the local user's role on demand, and gates outgoing actions on
//! that role.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SendActionError;
use crate::protocol::action::{self, Action};
use crate::protocol::message::{ClientMessage, MessageKind, ServerMessage};
use crate::state::connection::{ConnectionManager, Delivery};
use crate::state::game::{Clocks, EventLogEntry, GameEvent, GameState};
use crate::state::role::{derive_role, UserRole};
use crate::subscription::{guarded, KeyedListeners, Subscription};

/// How many evicted games keep their last ply for stale-snapshot checks.
const EVICTED_PLY_MEMORY: usize = 1024;

/// Listener for one game's snapshots, or for every game's.
pub type GameListener = dyn Fn(&GameState);

/// Listener for one game's derived role.
pub type RoleListener = dyn Fn(&UserRole);

/// The local user as far as role derivation is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub user_id: String,
    pub username: Option<String>,
}

#[derive(Debug)]
struct CachedGame {
    state: Rc<GameState>,
    /// Store-wide update counter at the last write, for eviction order.
    touched: u64,
}

#[derive(Debug)]
struct StoreCore {
    games: HashMap<String, CachedGame>,
    events: HashMap<String, VecDeque<EventLogEntry>>,
    /// Last ply of evicted games, so a late snapshot cannot roll them back.
    evicted_plies: HashMap<String, u32>,
    evicted_order: VecDeque<String>,
    user: Option<LocalUser>,
    current_game: Option<String>,
    event_log_capacity: usize,
    max_cached_games: Option<usize>,
    updates: u64,
}

impl StoreCore {
    fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.user_id.as_str())
    }

    fn role_for(&self, game_id: &str) -> UserRole {
        derive_role(
            self.games.get(game_id).map(|g| g.state.as_ref()),
            self.user_id(),
        )
    }

    /// Highest ply this store has accepted for `game_id`, cached or evicted.
    fn known_ply(&self, game_id: &str) -> Option<u32> {
        self.games
            .get(game_id)
            .map(|g| g.state.ply)
            .or_else(|| self.evicted_plies.get(game_id).copied())
    }

    fn remember_evicted(&mut self, game_id: String, ply: u32) {
        if self.evicted_plies.insert(game_id.clone(), ply).is_none() {
            self.evicted_order.push_back(game_id);
        }
        while self.evicted_order.len() > EVICTED_PLY_MEMORY {
            if let Some(oldest) = self.evicted_order.pop_front() {
                self.evicted_plies.remove(&oldest);
            }
        }
    }

    fn touch(&mut self) -> u64 {
        self.updates += 1;
        self.updates
    }
}

struct StoreShared {
    core: RefCell<StoreCore>,
    game_listeners: RefCell<KeyedListeners<String, GameListener>>,
    role_listeners: RefCell<KeyedListeners<String, RoleListener>>,
    all_listeners: RefCell<KeyedListeners<(), GameListener>>,
    /// Handlers registered on the connection; removed when the store drops.
    handlers: RefCell<Vec<Subscription>>,
}

impl StoreShared {
    fn on_state(&self, incoming: &GameState) {
        let game_id = incoming.game_id.as_str();
        {
            let mut core = self.core.borrow_mut();
            if let Some(known_ply) = core.known_ply(game_id) {
                if incoming.ply < known_ply {
                    warn!(
                        game_id,
                        known_ply,
                        incoming_ply = incoming.ply,
                        "rejecting stale snapshot"
                    );
                    return;
                }
            }

            let touched = core.touch();
            core.games.insert(
                game_id.to_string(),
                CachedGame {
                    state: Rc::new(incoming.clone()),
                    touched,
                },
            );
            debug!(game_id, ply = incoming.ply, "snapshot applied");
            self.evict_unobserved(&mut core, game_id);
        }
        self.notify(game_id, true);
    }

    fn on_clock_update(&self, game_id: &str, clocks: Clocks) {
        {
            let mut core = self.core.borrow_mut();
            let touched = core.touch();
            let Some(cached) = core.games.get_mut(game_id) else {
                debug!(game_id, "clock update for untracked game");
                return;
            };
            Rc::make_mut(&mut cached.state).apply_clocks(clocks);
            cached.touched = touched;
        }
        self.notify(game_id, false);
    }

    fn on_game_ended(&self, game_id: &str, result: Option<String>, reason: Option<String>) {
        {
            let mut core = self.core.borrow_mut();
            let touched = core.touch();
            let Some(cached) = core.games.get_mut(game_id) else {
                debug!(game_id, "game end for untracked game");
                return;
            };
            info!(game_id, result = ?result, reason = ?reason, "game ended");
            Rc::make_mut(&mut cached.state).apply_end(result, reason);
            cached.touched = touched;
        }
        self.notify(game_id, true);
    }

    fn on_game_event(&self, game_id: &str, event: &GameEvent) {
        let mut core = self.core.borrow_mut();
        let capacity = core.event_log_capacity;
        let log = core.events.entry(game_id.to_string()).or_default();
        log.push_back(EventLogEntry {
            event: event.clone(),
            received_at: Utc::now(),
        });
        while log.len() > capacity {
            log.pop_front();
        }
    }

    fn on_joined(&self, game_id: &str) {
        debug!(game_id, "joined");
        self.core.borrow_mut().current_game = Some(game_id.to_string());
    }

    fn set_user(&self, user: LocalUser) {
        let game_ids: Vec<String> = {
            let mut core = self.core.borrow_mut();
            core.user = Some(user);
            core.games.keys().cloned().collect()
        };
        for game_id in game_ids {
            self.notify_role(&game_id);
        }
    }

    /// Drop least recently updated games nobody is watching until the cache
    /// fits. `keep` is never evicted.
    fn evict_unobserved(&self, core: &mut StoreCore, keep: &str) {
        let Some(limit) = core.max_cached_games else {
            return;
        };

        let game_listeners = self.game_listeners.borrow();
        let role_listeners = self.role_listeners.borrow();
        while core.games.len() > limit {
            let victim = core
                .games
                .iter()
                .filter(|(id, _)| {
                    id.as_str() != keep
                        && core.current_game.as_deref() != Some(id.as_str())
                        && !game_listeners.has_listeners(*id)
                        && !role_listeners.has_listeners(*id)
                })
                .min_by_key(|(_, cached)| cached.touched)
                .map(|(id, _)| id.clone());

            let Some(victim) = victim else {
                break;
            };
            debug!(game_id = %victim, "evicting unobserved game");
            core.events.remove(&victim);
            if let Some(evicted) = core.games.remove(&victim) {
                core.remember_evicted(victim, evicted.state.ply);
            }
        }
    }

    fn notify(&self, game_id: &str, with_role: bool) {
        let Some(state) = self.core.borrow().games.get(game_id).map(|g| Rc::clone(&g.state)) else {
            return;
        };

        let key = game_id.to_string();
        let listeners = self.game_listeners.borrow().snapshot(&key);
        let all = self.all_listeners.borrow().snapshot(&());
        for listener in listeners.iter().chain(all.iter()) {
            guarded("game", || listener(&state));
        }

        if with_role {
            self.notify_role(game_id);
        }
    }

    fn notify_role(&self, game_id: &str) {
        let key = game_id.to_string();
        let listeners = self.role_listeners.borrow().snapshot(&key);
        if listeners.is_empty() {
            return;
        }
        let role = self.core.borrow().role_for(game_id);
        for listener in listeners {
            guarded("role", || listener(&role));
        }
    }
}

/// Handle to the game registry. Clones refer to the same registry.
#[derive(Clone)]
pub struct GameStore {
    shared: Rc<StoreShared>,
    connection: ConnectionManager,
}

impl GameStore {
    /// Create the store and register its handlers on `connection`.
    pub fn new(connection: ConnectionManager, config: &SyncConfig) -> Self {
        let store = Self {
            shared: Rc::new(StoreShared {
                core: RefCell::new(StoreCore {
                    games: HashMap::new(),
                    events: HashMap::new(),
                    evicted_plies: HashMap::new(),
                    evicted_order: VecDeque::new(),
                    user: None,
                    current_game: None,
                    event_log_capacity: config.event_log_capacity,
                    max_cached_games: config.max_cached_games,
                    updates: 0,
                }),
                game_listeners: RefCell::new(KeyedListeners::default()),
                role_listeners: RefCell::new(KeyedListeners::default()),
                all_listeners: RefCell::new(KeyedListeners::default()),
                handlers: RefCell::new(Vec::new()),
            }),
            connection,
        };
        store.register_handlers();
        store
    }

    fn register_handlers(&self) {
        let handlers = vec![
            self.on(MessageKind::State, |store, msg| {
                if let ServerMessage::State(state) = msg {
                    store.on_state(state);
                }
            }),
            self.on(MessageKind::ClockUpdate, |store, msg| {
                if let ServerMessage::ClockUpdate { game_id, clocks } = msg {
                    store.on_clock_update(game_id, *clocks);
                }
            }),
            self.on(MessageKind::GameEnded, |store, msg| {
                if let ServerMessage::GameEnded {
                    game_id,
                    result,
                    reason,
                } = msg
                {
                    store.on_game_ended(game_id, result.clone(), reason.clone());
                }
            }),
            self.on(MessageKind::GameEvent, |store, msg| {
                if let ServerMessage::GameEvent { game_id, event } = msg {
                    store.on_game_event(game_id, event);
                }
            }),
            self.on(MessageKind::Joined, |store, msg| {
                if let ServerMessage::Joined { game_id, .. } = msg {
                    store.on_joined(game_id);
                }
            }),
            self.on(MessageKind::Authenticated, |store, msg| {
                if let ServerMessage::Authenticated { user_id, username } = msg {
                    store.set_user(LocalUser {
                        user_id: user_id.clone(),
                        username: username.clone(),
                    });
                }
            }),
        ];
        *self.shared.handlers.borrow_mut() = handlers;
    }

    fn on(
        &self,
        kind: MessageKind,
        handler: impl Fn(&StoreShared, &ServerMessage) + 'static,
    ) -> Subscription {
        let weak: Weak<StoreShared> = Rc::downgrade(&self.shared);
        self.connection.subscribe(kind, move |msg| {
            if let Some(shared) = weak.upgrade() {
                handler(&*shared, msg);
            }
        })
    }

    /// Set the local identity used for role derivation and re-derive every
    /// tracked game's role.
    pub fn set_user(&self, user_id: impl Into<String>, username: Option<String>) {
        self.shared.set_user(LocalUser {
            user_id: user_id.into(),
            username,
        });
    }

    /// Identity used for role derivation, if known.
    pub fn user(&self) -> Option<LocalUser> {
        self.shared.core.borrow().user.clone()
    }

    /// Latest snapshot of `game_id`, if tracked.
    pub fn game_state(&self, game_id: &str) -> Option<Rc<GameState>> {
        self.shared
            .core
            .borrow()
            .games
            .get(game_id)
            .map(|g| Rc::clone(&g.state))
    }

    /// Role of the local user in `game_id`, derived from the cached snapshot.
    pub fn user_role(&self, game_id: &str) -> UserRole {
        self.shared.core.borrow().role_for(game_id)
    }

    /// Activity log for `game_id`, oldest first.
    pub fn events(&self, game_id: &str) -> Vec<EventLogEntry> {
        self.shared
            .core
            .borrow()
            .events
            .get(game_id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Game most recently confirmed by a `joined` reply.
    pub fn current_game(&self) -> Option<String> {
        self.shared.core.borrow().current_game.clone()
    }

    /// Ids of every cached game, in no particular order.
    pub fn tracked_games(&self) -> Vec<String> {
        self.shared.core.borrow().games.keys().cloned().collect()
    }

    /// Ask the server for the latest snapshot of `game_id`. Always sent, even
    /// when a cached copy exists, since the cache may be stale after a
    /// reconnect.
    pub fn join_game(&self, game_id: &str) -> Delivery {
        self.connection.send(ClientMessage::JoinGame {
            game_id: game_id.to_string(),
        })
    }

    /// Forget the current game. The cached snapshot is kept.
    pub fn leave_game(&self) {
        self.shared.core.borrow_mut().current_game = None;
    }

    /// Enter matchmaking.
    pub fn join_queue(&self) -> Delivery {
        self.connection.send(ClientMessage::JoinQueue)
    }

    pub fn leave_queue(&self) -> Delivery {
        self.connection.send(ClientMessage::LeaveQueue)
    }

    pub fn create_solo_game(&self) -> Delivery {
        self.connection.send(ClientMessage::CreateSoloGame)
    }

    pub fn give_time(&self, game_id: &str, seconds: u32) -> Delivery {
        self.connection.send(ClientMessage::GiveTime {
            game_id: game_id.to_string(),
            seconds,
        })
    }

    /// Send `action` if the local user may play it right now.
    ///
    /// The role is re-derived from the cached snapshot at call time. A
    /// rejected action is logged and never reaches the connection.
    pub fn send_action(&self, game_id: &str, action: Action) -> Result<Delivery, SendActionError> {
        let role = self.user_role(game_id);
        let kind = action.kind();
        if !role.permits(kind) {
            warn!(game_id, action = %action, role = %role.role, "action rejected locally");
            return Err(SendActionError::NotPermitted {
                game_id: game_id.to_string(),
                action: kind,
                role: role.role,
            });
        }

        Ok(self.connection.send(ClientMessage::Action {
            game_id: game_id.to_string(),
            action: action::encode(&action),
        }))
    }

    /// Like [`send_action`](Self::send_action), starting from a BCN token.
    pub fn send_action_token(&self, game_id: &str, token: &str) -> Result<Delivery, SendActionError> {
        let action = action::decode(token)?;
        self.send_action(game_id, action)
    }

    /// Listen to `game_id`'s snapshots. Called immediately if cached.
    pub fn subscribe_to_game(
        &self,
        game_id: &str,
        listener: impl Fn(&GameState) + 'static,
    ) -> Subscription {
        let listener: Rc<GameListener> = Rc::new(listener);
        let key = game_id.to_string();
        let id = self
            .shared
            .game_listeners
            .borrow_mut()
            .insert(key.clone(), Rc::clone(&listener));

        if let Some(state) = self.game_state(game_id) {
            guarded("game", || listener(&state));
        }

        let weak = Rc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.game_listeners.borrow_mut().remove(&key, id);
            }
        })
    }

    /// Listen to `game_id`'s derived role. Called immediately if cached.
    pub fn subscribe_to_role(
        &self,
        game_id: &str,
        listener: impl Fn(&UserRole) + 'static,
    ) -> Subscription {
        let listener: Rc<RoleListener> = Rc::new(listener);
        let key = game_id.to_string();
        let id = self
            .shared
            .role_listeners
            .borrow_mut()
            .insert(key.clone(), Rc::clone(&listener));

        if self.game_state(game_id).is_some() {
            let role = self.user_role(game_id);
            guarded("role", || listener(&role));
        }

        let weak = Rc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.role_listeners.borrow_mut().remove(&key, id);
            }
        })
    }

    /// Listen to snapshot updates of every game.
    pub fn subscribe_to_all(&self, listener: impl Fn(&GameState) + 'static) -> Subscription {
        let id = self
            .shared
            .all_listeners
            .borrow_mut()
            .insert((), Rc::new(listener));

        let weak = Rc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.all_listeners.borrow_mut().remove(&(), id);
            }
        })
    }

    /// Whether anyone is listening to `game_id`.
    pub fn is_observed(&self, game_id: &str) -> bool {
        let key = game_id.to_string();
        self.shared.game_listeners.borrow().has_listeners(&key)
            || self.shared.role_listeners.borrow().has_listeners(&key)
    }
}
