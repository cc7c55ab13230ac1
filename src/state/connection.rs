//! Connection management.
//!
//! Owns the single transport shared by the whole client: lifecycle, backoff
//! reconnection, heartbeat, the offline queue, inbound deduplication and
//! fan-out of decoded messages to subscribers.
//!
//! # Lifecycle
//!
//! ```text
//!                connect()
//! ┌──────────────┐ ─────────────▶ ┌────────────┐  handle_open   ┌─────────────────┐
//! │ Disconnected │                │ Connecting │ ─────────────▶ │ Connected       │
//! └──────────────┘ ◀───────────── └────────────┘                │ (authenticated?)│
//!        ▲   │      open failed          ▲                      └────────┬────────┘
//!        │   │                           │ reconnect timer               │
//!        │   └───────────────────────────┘                               │
//!        └───────────────────────── close / error ───────────────────────┘
//! ```
//!
//! Every close or error that the client did not ask for bumps the attempt
//! counter and arms a reconnect after `min(2^attempts * base, max)`. A
//! successful open resets the counter. The host drives time through
//! [`ConnectionManager::poll_timers`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::protocol::message::{self, ClientMessage, ServerMessage, Topic};
use crate::state::dedup::ProcessedMessages;
use crate::subscription::{guarded, KeyedListeners, Subscription};
use crate::transport::{CloseFrame, Transport, NORMAL_CLOSURE};

/// Handler for decoded inbound messages.
pub type MessageHandler = dyn Fn(&ServerMessage);

/// Handler for connection state changes.
pub type ConnectionStateHandler = dyn Fn(&ConnectionState);

/// Who the client connects as. Replayed on every reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id, matched against `players` to derive roles
    pub user_id: String,
    /// Display name
    pub username: String,
    /// Session token forwarded in `authenticate`, if the server wants one
    pub token: Option<String>,
}

impl Identity {
    /// Identity without a session token.
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            token: None,
        }
    }

    /// Attach a session token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn authenticate_message(&self) -> ClientMessage {
        ClientMessage::Authenticate {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            token: self.token.clone(),
        }
    }
}

/// Transport lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStatus {
    #[default]
    Disconnected,
    /// `Transport::open` was called; waiting for `handle_open`
    Connecting,
    /// Open. `authenticated` flips once the server confirms the identity.
    Connected {
        authenticated: bool,
    },
}

impl LinkStatus {
    /// Whether frames can be written.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Snapshot of the connection, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: LinkStatus,
    /// Transport is open
    pub connected: bool,
    /// Server confirmed the identity on this connection
    pub authenticated: bool,
    /// Consecutive failed cycles since the last successful open
    pub reconnect_attempts: u32,
    /// Most recent transport error, cleared on open
    pub last_error: Option<String>,
    /// When the transport last opened
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// Whether [`ConnectionManager::send`] wrote the message or queued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the transport
    Sent,
    /// Held in the outbound queue until it can be written in order
    Queued,
    /// Discarded because queueing is disabled
    Dropped,
}

/// Reconnect delay for the given attempt count, capped at `max`.
pub fn backoff_delay(attempts: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u64.checked_pow(attempts).unwrap_or(u64::MAX);
    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

/// "Equal jitter": a delay drawn from `[backoff/2, backoff]`.
fn jittered(rng: &mut impl Rng, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }
    let half_ms = backoff_ms / 2;
    Duration::from_millis(half_ms.saturating_add(rng.gen_range(0..=half_ms)))
}

#[derive(Debug, Clone, Copy)]
struct ReconnectTimer {
    due: Instant,
    delay: Duration,
}

struct Core {
    config: SyncConfig,
    transport: Box<dyn Transport>,
    state: ConnectionState,
    identity: Option<Identity>,
    /// Set by `connect`, cleared by `disconnect`. Reconnects only while set.
    wants_connection: bool,
    outbound: VecDeque<ClientMessage>,
    processed: ProcessedMessages,
    reconnect: Option<ReconnectTimer>,
    next_heartbeat: Option<Instant>,
    last_pong_at: Option<Instant>,
}

impl Core {
    fn set_link(&mut self, status: LinkStatus) {
        self.state.status = status;
        self.state.connected = status.is_open();
        self.state.authenticated = matches!(status, LinkStatus::Connected { authenticated: true });
    }

    fn open_transport(&mut self) {
        self.reconnect = None;
        self.set_link(LinkStatus::Connecting);

        let url = self.config.url.clone();
        info!(url = %url, attempts = self.state.reconnect_attempts, "opening connection");

        if let Err(err) = self.transport.open(&url) {
            warn!(url = %url, error = %err, "connection attempt failed");
            self.state.last_error = Some(err.to_string());
            self.drop_link();
        }
    }

    /// Transition to Disconnected after an unrequested close or error.
    fn drop_link(&mut self) {
        self.set_link(LinkStatus::Disconnected);
        self.next_heartbeat = None;
        if self.wants_connection && self.reconnect.is_none() {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        self.state.reconnect_attempts = self.state.reconnect_attempts.saturating_add(1);
        let attempts = self.state.reconnect_attempts;

        let mut delay = backoff_delay(
            attempts,
            self.config.reconnect_base_delay(),
            self.config.reconnect_max_delay(),
        );
        if self.config.reconnect_jitter {
            delay = jittered(&mut rand::thread_rng(), delay);
        }

        info!(attempts, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        self.reconnect = Some(ReconnectTimer {
            due: Instant::now() + delay,
            delay,
        });
    }

    /// Write one message. Returns `false` if the transport refused it.
    fn write(&mut self, message: &ClientMessage) -> bool {
        let frame = match message::encode_message(message) {
            Ok(frame) => frame,
            Err(err) => {
                error!(kind = message.as_str(), error = %err, "dropping unencodable message");
                return true;
            }
        };

        match self.transport.send(&frame) {
            Ok(()) => {
                debug!(kind = message.as_str(), "sent");
                true
            }
            Err(err) => {
                warn!(kind = message.as_str(), error = %err, "write failed");
                self.state.last_error = Some(err.to_string());
                false
            }
        }
    }

    fn enqueue(&mut self, message: ClientMessage) -> Delivery {
        if let Some(limit) = self.config.outbound_queue_limit {
            if limit == 0 {
                warn!(kind = message.as_str(), "outbound queue disabled, dropping message");
                return Delivery::Dropped;
            }
            while self.outbound.len() >= limit {
                if let Some(dropped) = self.outbound.pop_front() {
                    warn!(kind = dropped.as_str(), limit, "outbound queue full, dropping oldest");
                }
            }
        }
        debug!(kind = message.as_str(), queued = self.outbound.len() + 1, "queued while offline");
        self.outbound.push_back(message);
        Delivery::Queued
    }

    /// Send everything queued, oldest first. Returns `false` if a write
    /// failed and messages remain queued.
    fn drain_outbound(&mut self) -> bool {
        while let Some(message) = self.outbound.pop_front() {
            if !self.write(&message) {
                self.outbound.push_front(message);
                return false;
            }
        }
        true
    }

    /// Write `authenticate` ahead of anything queued. On failure it is put at
    /// the head of the queue so it goes out before any later message.
    fn write_auth(&mut self, auth: ClientMessage) {
        if !self.write(&auth) {
            self.outbound.push_front(auth);
        }
    }
}

struct Shared {
    core: RefCell<Core>,
    handlers: RefCell<KeyedListeners<Topic, MessageHandler>>,
    state_listeners: RefCell<KeyedListeners<(), ConnectionStateHandler>>,
}

/// Handle to the one shared connection. Clones refer to the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Rc<Shared>,
}

impl ConnectionManager {
    /// Create a disconnected manager writing through `transport`.
    pub fn new(config: SyncConfig, transport: impl Transport + 'static) -> Self {
        let processed = ProcessedMessages::new(config.dedup_high_water, config.dedup_retain);
        let core = Core {
            config,
            transport: Box::new(transport),
            state: ConnectionState::default(),
            identity: None,
            wants_connection: false,
            outbound: VecDeque::new(),
            processed,
            reconnect: None,
            next_heartbeat: None,
            last_pong_at: None,
        };
        Self {
            shared: Rc::new(Shared {
                core: RefCell::new(core),
                handlers: RefCell::new(KeyedListeners::default()),
                state_listeners: RefCell::new(KeyedListeners::default()),
            }),
        }
    }

    /// Start connecting as `identity`. The identity is kept and replayed on
    /// every reconnect. When already connected, re-authenticates instead.
    pub fn connect(&self, identity: Identity) {
        {
            let mut core = self.shared.core.borrow_mut();
            core.identity = Some(identity.clone());
            core.wants_connection = true;

            match core.state.status {
                LinkStatus::Connected { .. } => {
                    debug!(user_id = %identity.user_id, "already connected, re-authenticating");
                    core.write_auth(identity.authenticate_message());
                    return;
                }
                LinkStatus::Connecting => {
                    debug!("connection already in progress");
                    return;
                }
                LinkStatus::Disconnected => core.open_transport(),
            }
        }
        self.notify_state();
    }

    /// Close the connection on purpose. No reconnect is scheduled.
    pub fn disconnect(&self) {
        {
            let mut core = self.shared.core.borrow_mut();
            core.wants_connection = false;
            core.reconnect = None;
            core.next_heartbeat = None;
            if core.state.status != LinkStatus::Disconnected {
                core.transport.close(NORMAL_CLOSURE, "client disconnect");
            }
            core.set_link(LinkStatus::Disconnected);
            core.state.reconnect_attempts = 0;
            info!("disconnected by client");
        }
        self.notify_state();
    }

    /// Send now if connected and nothing is waiting ahead of it, otherwise
    /// queue until it can be written in order.
    pub fn send(&self, message: ClientMessage) -> Delivery {
        let (delivery, failed) = {
            let mut core = self.shared.core.borrow_mut();
            if !core.state.status.is_open() {
                (core.enqueue(message), false)
            } else if core.outbound.is_empty() {
                if core.write(&message) {
                    (Delivery::Sent, false)
                } else {
                    (core.enqueue(message), true)
                }
            } else {
                // Earlier messages are still waiting; never overtake them.
                let delivery = core.enqueue(message);
                let flushed = core.drain_outbound();
                match delivery {
                    Delivery::Queued if flushed => (Delivery::Sent, false),
                    other => (other, !flushed),
                }
            }
        };
        if failed {
            self.notify_state();
        }
        delivery
    }

    /// Register `handler` for one message kind or for everything.
    pub fn subscribe(
        &self,
        topic: impl Into<Topic>,
        handler: impl Fn(&ServerMessage) + 'static,
    ) -> Subscription {
        let topic = topic.into();
        let id = self
            .shared
            .handlers
            .borrow_mut()
            .insert(topic, Rc::new(handler));

        let weak: Weak<Shared> = Rc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.handlers.borrow_mut().remove(&topic, id);
            }
        })
    }

    /// Register `handler` for state changes. It is called once immediately.
    pub fn subscribe_to_connection_state(
        &self,
        handler: impl Fn(&ConnectionState) + 'static,
    ) -> Subscription {
        let handler: Rc<ConnectionStateHandler> = Rc::new(handler);
        let id = self
            .shared
            .state_listeners
            .borrow_mut()
            .insert((), Rc::clone(&handler));

        let current = self.connection_state();
        guarded("connection-state", || handler(&current));

        let weak: Weak<Shared> = Rc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.state_listeners.borrow_mut().remove(&(), id);
            }
        })
    }

    /// Current connection state, cloned.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.core.borrow().state.clone()
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        self.shared.core.borrow().state.connected
    }

    /// Identity given to the last `connect`.
    pub fn identity(&self) -> Option<Identity> {
        self.shared.core.borrow().identity.clone()
    }

    /// Messages waiting in the outbound queue.
    pub fn queued_len(&self) -> usize {
        self.shared.core.borrow().outbound.len()
    }

    /// Delay the pending reconnect was scheduled with, if one is armed.
    pub fn pending_reconnect_delay(&self) -> Option<Duration> {
        self.shared.core.borrow().reconnect.map(|t| t.delay)
    }

    /// Configured delay for the given attempt count, before jitter.
    pub fn reconnect_delay(&self, attempts: u32) -> Duration {
        let core = self.shared.core.borrow();
        backoff_delay(
            attempts,
            core.config.reconnect_base_delay(),
            core.config.reconnect_max_delay(),
        )
    }

    /// Earliest instant at which `poll_timers` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let core = self.shared.core.borrow();
        match (core.reconnect.map(|t| t.due), core.next_heartbeat) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// When the last `pong` arrived.
    pub fn last_pong_at(&self) -> Option<Instant> {
        self.shared.core.borrow().last_pong_at
    }

    /// Fire whichever of the reconnect and heartbeat timers are due at `now`.
    pub fn poll_timers(&self, now: Instant) {
        let changed = {
            let mut core = self.shared.core.borrow_mut();
            let mut changed = false;

            if let Some(timer) = core.reconnect {
                if now >= timer.due {
                    core.reconnect = None;
                    if core.wants_connection && core.state.status == LinkStatus::Disconnected {
                        core.open_transport();
                        changed = true;
                    }
                }
            }

            if let Some(due) = core.next_heartbeat {
                if core.state.status.is_open() && now >= due {
                    let interval = core.config.heartbeat_interval();
                    core.next_heartbeat = Some(now + interval);
                    if !core.drain_outbound() || !core.write(&ClientMessage::Ping) {
                        changed = true;
                    }
                }
            }

            changed
        };

        if changed {
            self.notify_state();
        }
    }

    /// The transport finished opening.
    pub fn handle_open(&self) {
        {
            let mut core = self.shared.core.borrow_mut();
            if !core.wants_connection {
                debug!("open after disconnect, closing");
                core.transport.close(NORMAL_CLOSURE, "client disconnect");
                return;
            }

            core.set_link(LinkStatus::Connected {
                authenticated: false,
            });
            core.reconnect = None;
            core.state.reconnect_attempts = 0;
            core.state.last_error = None;
            core.state.last_connected_at = Some(Utc::now());
            info!(queued = core.outbound.len(), "connection open");

            if let Some(auth) = core.identity.as_ref().map(Identity::authenticate_message) {
                core.write_auth(auth);
            }
            core.drain_outbound();

            let interval = core.config.heartbeat_interval();
            core.next_heartbeat = Some(Instant::now() + interval);
        }
        self.notify_state();
    }

    /// One inbound text frame arrived.
    pub fn handle_frame(&self, text: &str) {
        let envelope = match message::decode_frame(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "dropping malformed frame");
                return;
            }
        };

        let auth_changed = {
            let mut core = self.shared.core.borrow_mut();

            if let Some(id) = envelope.message_id.as_deref() {
                if !core.processed.insert(id) {
                    debug!(message_id = id, kind = %envelope.message.kind(), "duplicate dropped");
                    return;
                }
            }

            match &envelope.message {
                ServerMessage::Pong => {
                    core.last_pong_at = Some(Instant::now());
                    return;
                }
                ServerMessage::Authenticated { user_id, .. } if core.state.status.is_open() => {
                    info!(user_id = %user_id, "authenticated");
                    core.set_link(LinkStatus::Connected {
                        authenticated: true,
                    });
                    true
                }
                _ => false,
            }
        };

        if auth_changed {
            self.notify_state();
        }
        self.dispatch(&envelope.message);
    }

    /// The transport closed.
    pub fn handle_close(&self, frame: CloseFrame) {
        {
            let mut core = self.shared.core.borrow_mut();
            if !core.wants_connection {
                core.set_link(LinkStatus::Disconnected);
                core.next_heartbeat = None;
                debug!(code = frame.code, "closed after disconnect");
            } else if core.state.status == LinkStatus::Disconnected && core.reconnect.is_some() {
                debug!(code = frame.code, "close after error, reconnect already armed");
            } else {
                info!(
                    code = frame.code,
                    reason = %frame.reason,
                    clean = frame.was_clean,
                    "connection closed"
                );
                core.drop_link();
            }
        }
        self.notify_state();
    }

    /// The transport reported an error.
    pub fn handle_error(&self, reason: &str) {
        {
            let mut core = self.shared.core.borrow_mut();
            warn!(error = reason, "transport error");
            core.state.last_error = Some(reason.to_string());
            if core.state.status != LinkStatus::Disconnected {
                core.drop_link();
            }
        }
        self.notify_state();
    }

    fn dispatch(&self, message: &ServerMessage) {
        let kind = message.kind();
        let handlers = {
            let registry = self.shared.handlers.borrow();
            let mut handlers = registry.snapshot(&Topic::Kind(kind));
            handlers.extend(registry.snapshot(&Topic::All));
            handlers
        };

        debug!(kind = %kind, handlers = handlers.len(), "dispatching");
        for handler in handlers {
            guarded(kind.as_str(), || handler(message));
        }
    }

    fn notify_state(&self) {
        let state = self.connection_state();
        let listeners = self.shared.state_listeners.borrow().snapshot(&());
        for listener in listeners {
            guarded("connection-state", || listener(&state));
        }
    }
}
