//! BanChess Sync Library
//!
//! Client-side synchronization for BanChess, a chess variant where every turn
//! is a ban by one side followed by a move by the other.
//!
//! # Overview
//!
//! - **Action Codec** - Encodes and decodes the compact BCN token
//!   (`b:e2e4`, `m:e7e8q`) used for bans and moves on the wire.
//!
//! - **Connection Management** - One transport per client with backoff
//!   reconnection, heartbeat, an offline queue, replay deduplication and
//!   typed pub/sub for server messages.
//!
//! - **Game State Store** - Latest authoritative snapshot per game, derived
//!   user roles, bounded event logs, and local gatekeeping of actions.
//!
//! # Design Principles
//!
//! 1. **The server is authoritative** - Snapshots replace local state
//!    wholesale; nothing is predicted or merged.
//!
//! 2. **No networking** - The host owns the socket and drives the client
//!    through [`Transport`] and the `handle_*` / `poll_timers` entry points.
//!
//! 3. **Roles are derived, never stored** - Permissions are recomputed from
//!    the current snapshot each time they are read.
//!
//! 4. **Listeners are isolated** - A panicking listener is logged and the
//!    remaining listeners still run.
//!
//! # Example
//!
//! ```rust
//! use banchess_sync::{Identity, MemoryTransport, SyncClient, SyncConfig};
//!
//! let transport = MemoryTransport::new();
//! let client = SyncClient::new(SyncConfig::new("ws://localhost:3001"), transport.clone());
//!
//! client.connect(Identity::new("user-1", "alice"));
//! client.handle_open();
//! assert!(client.is_connected());
//!
//! let _sub = client.subscribe_to_role("game-1", |role| {
//!     println!("can ban: {}, can move: {}", role.can_ban, role.can_move);
//! });
//! client.join_game("game-1");
//! assert_eq!(transport.frame_types(), vec!["authenticate", "join-game"]);
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod state;
pub mod subscription;
pub mod transport;

pub use config::SyncConfig;
pub use error::{CodecError, ConfigError, ProtocolError, SendActionError, TransportError};
pub use protocol::*;
pub use state::*;
pub use subscription::Subscription;
pub use transport::{CloseFrame, MemoryTransport, Transport, NORMAL_CLOSURE};
