use serde::{Deserialize, Serialize};

use crate::model::{
    ItemId, ItemStatus, RoomRole, StoreId, TicketId, TicketStatus,
};

// ==================== Handshake ====================

/// Declared role of a connecting client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    KitchenDisplay,
    Printer,
    PointOfSale,
}

/// Handshake payload (client -> server)
///
/// Kitchen display hardware often carries no user credentials, so the
/// handshake requires only the protocol version and a declared role —
/// anonymous connections are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {
    /// Protocol version
    pub version: u16,
    /// Declared role
    pub role: ClientRole,
    /// Client name/identifier (free-form, for logs)
    pub client_name: Option<String>,
    /// Client unique identifier; the server generates one if absent
    pub client_id: Option<String>,
}

// ==================== Client Commands ====================

/// Actor classification for audit fields on status mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Staff,
    Pos,
    System,
}

/// Who initiated a status mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_type: ActorType,
    pub actor_id: String,
}

/// Client request commands, a closed set
///
/// Tagged `{action, params}` so the dispatch is an exhaustive match; the
/// server acknowledges every command with a [`ResponsePayload`] carrying the
/// request's correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "params")]
pub enum ClientCommand {
    /// Join a store's audience room (idempotent; ack carries room size)
    #[serde(rename = "room.join")]
    JoinRoom { role: RoomRole, store_id: StoreId },

    /// Leave a store's audience room (idempotent)
    #[serde(rename = "room.leave")]
    LeaveRoom { role: RoomRole, store_id: StoreId },

    /// Authoritative item status mutation; canonical state is re-broadcast
    /// to the whole room on success
    #[serde(rename = "item.set_status")]
    SetItemStatus {
        item_id: ItemId,
        next: ItemStatus,
        reason: Option<String>,
        actor: Option<Actor>,
    },

    /// Authoritative ticket status mutation with optional optimistic
    /// concurrency check
    #[serde(rename = "ticket.set_status")]
    SetTicketStatus {
        ticket_id: TicketId,
        next: TicketStatus,
        reason: Option<String>,
        /// When present, the update is rejected unless the stored row
        /// version matches
        if_version: Option<i64>,
        actor: Option<Actor>,
    },

    /// Hide a ticket from displays without changing its status
    #[serde(rename = "ticket.hide")]
    HideTicket { ticket_id: TicketId },

    /// Printer client finished a print job; relayed to the store's
    /// printer room
    #[serde(rename = "print.completed")]
    PrintCompleted { store_id: StoreId, ticket_id: TicketId },
}

// ==================== Acks ====================

/// Generic command acknowledgement (server -> requesting client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ResponsePayload {
    pub fn ok(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            error_code: None,
        }
    }

    pub fn error(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error_code: code,
        }
    }
}

/// Join acknowledgement data — the room size lets the caller verify it is
/// actually wired up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinAck {
    pub room: String,
    pub members: usize,
}

/// Ticket status mutation acknowledgement data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketStatusAck {
    pub ticket_id: TicketId,
    pub old_status: TicketStatus,
    pub new_status: TicketStatus,
}

/// Item status mutation acknowledgement data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStatusAck {
    pub item_id: ItemId,
    pub old_status: ItemStatus,
    pub new_status: ItemStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_action_tags() {
        let cmd = ClientCommand::SetItemStatus {
            item_id: 11,
            next: ItemStatus::Done,
            reason: None,
            actor: Some(Actor {
                actor_type: ActorType::Staff,
                actor_id: "kds_user".into(),
            }),
        };

        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["action"], "item.set_status");
        assert_eq!(json["params"]["next"], "DONE");
    }

    #[test]
    fn test_join_command_round_trip() {
        let cmd = ClientCommand::JoinRoom {
            role: RoomRole::Krp,
            store_id: 3,
        };
        let bytes = serde_json::to_vec(&cmd).unwrap();
        let parsed: ClientCommand = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, cmd);
    }
}
