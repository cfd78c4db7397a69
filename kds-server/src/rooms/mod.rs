//! Room registry — connection and audience membership
//!
//! A single actor task owns ALL membership state; everything else talks to
//! it through [`RegistryHandle`]. No other component holds a mutable copy of
//! routing state, so membership mutations are serialized by construction.
//!
//! ```text
//!              RegistryHandle (mpsc)
//!                      │
//!                      ▼
//!              ┌───────────────┐        per-connection mpsc
//!              │ RoomRegistry  │ ──────▶ outbound writer task
//!              │  conns, rooms │ ──────▶ outbound writer task
//!              └───────────────┘
//! ```
//!
//! Rooms hold routing membership only, no business data; an empty room is
//! dropped from the map.

use std::collections::{HashMap, HashSet};

use shared::message::BusMessage;
use tokio::sync::{mpsc, oneshot};

use crate::error::{AppError, AppResult};

/// Commands accepted by the registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    /// A new connection finished its handshake
    Register {
        conn_id: String,
        sender: mpsc::Sender<BusMessage>,
    },
    /// Connection closed — silent cleanup of membership only
    Deregister { conn_id: String },
    /// Idempotent room join; replies with the room size after joining
    Join {
        conn_id: String,
        room: String,
        reply: oneshot::Sender<usize>,
    },
    /// Idempotent room leave
    Leave { conn_id: String, room: String },
    /// Deliver a message to every member of a room
    Broadcast { room: String, message: BusMessage },
    /// Deliver a message to one connection
    SendTo { conn_id: String, message: BusMessage },
    /// Current size of a room (0 if absent)
    RoomSize {
        room: String,
        reply: oneshot::Sender<usize>,
    },
}

struct Connection {
    sender: mpsc::Sender<BusMessage>,
    rooms: HashSet<String>,
}

/// The membership actor. Create with [`RoomRegistry::new`], then spawn
/// [`RoomRegistry::run`].
pub struct RoomRegistry {
    rx: mpsc::Receiver<RegistryCommand>,
    connections: HashMap<String, Connection>,
    rooms: HashMap<String, HashSet<String>>,
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> (RegistryHandle, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            RegistryHandle { tx },
            Self {
                rx,
                connections: HashMap::new(),
                rooms: HashMap::new(),
            },
        )
    }

    /// Run the actor until every handle is dropped
    pub async fn run(mut self) {
        tracing::info!("Room registry started");

        while let Some(cmd) = self.rx.recv().await {
            self.apply(cmd);
        }

        tracing::info!("Room registry stopped");
    }

    fn apply(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register { conn_id, sender } => {
                tracing::debug!(conn_id = %conn_id, "Connection registered");
                self.connections.insert(
                    conn_id,
                    Connection {
                        sender,
                        rooms: HashSet::new(),
                    },
                );
            }

            RegistryCommand::Deregister { conn_id } => {
                if let Some(conn) = self.connections.remove(&conn_id) {
                    for room in conn.rooms {
                        self.remove_member(&room, &conn_id);
                    }
                    tracing::debug!(conn_id = %conn_id, "Connection removed from registry");
                }
            }

            RegistryCommand::Join {
                conn_id,
                room,
                reply,
            } => {
                let size = self.join(&conn_id, &room);
                let _ = reply.send(size);
            }

            RegistryCommand::Leave { conn_id, room } => {
                if let Some(conn) = self.connections.get_mut(&conn_id) {
                    conn.rooms.remove(&room);
                }
                self.remove_member(&room, &conn_id);
                tracing::debug!(conn_id = %conn_id, room = %room, "Left room");
            }

            RegistryCommand::Broadcast { room, message } => {
                self.broadcast(&room, message);
            }

            RegistryCommand::SendTo { conn_id, message } => {
                if let Some(conn) = self.connections.get(&conn_id)
                    && conn.sender.try_send(message).is_err()
                {
                    tracing::debug!(conn_id = %conn_id, "Direct send failed, connection gone or backed up");
                }
            }

            RegistryCommand::RoomSize { room, reply } => {
                let size = self.rooms.get(&room).map_or(0, HashSet::len);
                let _ = reply.send(size);
            }
        }
    }

    fn join(&mut self, conn_id: &str, room: &str) -> usize {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            tracing::warn!(conn_id = %conn_id, room = %room, "Join from unregistered connection");
            return self.rooms.get(room).map_or(0, HashSet::len);
        };

        conn.rooms.insert(room.to_string());
        let members = self.rooms.entry(room.to_string()).or_default();
        members.insert(conn_id.to_string());

        tracing::debug!(conn_id = %conn_id, room = %room, members = members.len(), "Joined room");
        members.len()
    }

    fn broadcast(&mut self, room: &str, message: BusMessage) {
        let Some(members) = self.rooms.get(room) else {
            tracing::debug!(room = %room, "Broadcast to empty room dropped");
            return;
        };

        let mut dead: Vec<String> = Vec::new();

        for conn_id in members {
            let Some(conn) = self.connections.get(conn_id) else {
                continue;
            };

            match conn.sender.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow consumer: drop the frame. Clients tolerate missed
                    // deltas — the periodic snapshot reload converges them.
                    tracing::warn!(
                        conn_id = %conn_id,
                        room = %room,
                        "Outbound queue full, dropping push frame"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(conn_id.clone());
                }
            }
        }

        for conn_id in dead {
            tracing::debug!(conn_id = %conn_id, "Pruning closed connection during broadcast");
            if let Some(conn) = self.connections.remove(&conn_id) {
                for joined in conn.rooms {
                    self.remove_member(&joined, &conn_id);
                }
            }
        }
    }

    fn remove_member(&mut self, room: &str, conn_id: &str) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(conn_id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Cheap cloneable handle to the registry actor
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub async fn register(
        &self,
        conn_id: impl Into<String>,
        sender: mpsc::Sender<BusMessage>,
    ) -> AppResult<()> {
        self.send(RegistryCommand::Register {
            conn_id: conn_id.into(),
            sender,
        })
        .await
    }

    pub async fn deregister(&self, conn_id: impl Into<String>) -> AppResult<()> {
        self.send(RegistryCommand::Deregister {
            conn_id: conn_id.into(),
        })
        .await
    }

    /// Join a room; returns the room size after the join
    pub async fn join(&self, conn_id: impl Into<String>, room: impl Into<String>) -> AppResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::Join {
            conn_id: conn_id.into(),
            room: room.into(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| AppError::internal("Room registry dropped join reply"))
    }

    pub async fn leave(&self, conn_id: impl Into<String>, room: impl Into<String>) -> AppResult<()> {
        self.send(RegistryCommand::Leave {
            conn_id: conn_id.into(),
            room: room.into(),
        })
        .await
    }

    pub async fn broadcast(&self, room: impl Into<String>, message: BusMessage) -> AppResult<()> {
        self.send(RegistryCommand::Broadcast {
            room: room.into(),
            message,
        })
        .await
    }

    pub async fn send_to(&self, conn_id: impl Into<String>, message: BusMessage) -> AppResult<()> {
        self.send(RegistryCommand::SendTo {
            conn_id: conn_id.into(),
            message,
        })
        .await
    }

    pub async fn room_size(&self, room: impl Into<String>) -> AppResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::RoomSize {
            room: room.into(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| AppError::internal("Room registry dropped size reply"))
    }

    async fn send(&self, cmd: RegistryCommand) -> AppResult<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| AppError::internal("Room registry unavailable"))
    }
}
