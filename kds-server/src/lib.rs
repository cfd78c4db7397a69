//! Kitchen ticket sync server
//!
//! Bridges the system of record to kitchen display and printer clients:
//!
//! - **Change relay** (`relay`): one long-lived listener on the database's
//!   change-notification channels, decoding trigger payloads and fanning
//!   them out to the matching store room.
//! - **Room registry** (`rooms`): actor owning all connection/room
//!   membership; the only mutable copy of routing state.
//! - **Push transport** (`net`): TCP server speaking the framed bus
//!   protocol; handshake, per-connection forwarding, command dispatch.
//! - **Command paths** (`commands`): authoritative status mutations with
//!   room-wide canonical re-broadcast.
//!
//! ```text
//! DB trigger ──NOTIFY──▶ ChangeRelay ──▶ RoomRegistry ──▶ kds:{store} sockets
//!                                           ▲
//! client command ──▶ PushServer ──▶ dispatch ┘ (update DB, broadcast, ack)
//! ```

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod net;
pub mod relay;
pub mod rooms;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use net::PushServer;
pub use relay::ChangeRelay;
pub use rooms::{RegistryHandle, RoomRegistry};
