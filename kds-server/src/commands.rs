//! Direct command paths
//!
//! Staff-initiated state changes must be visible room-wide immediately,
//! without waiting for the change-notification round trip. Each mutation
//! command performs the authoritative update against the system of record,
//! re-broadcasts the resulting canonical state to the store's room on
//! success, and acknowledges the caller. Failures are acknowledged to the
//! caller only — never broadcast.

use std::sync::Arc;

use shared::event::PushEvent;
use shared::message::{
    BusMessage, ClientCommand, ItemStatusAck, JoinAck, ResponsePayload, TicketStatusAck,
};
use shared::model::{RoomRole, room_name};

use crate::db::tickets::StatusStore;
use crate::error::{AppError, AppResult};
use crate::rooms::RegistryHandle;

/// Everything a command needs: the room registry and the write path to the
/// system of record
#[derive(Clone)]
pub struct CommandContext {
    pub registry: RegistryHandle,
    pub store: Arc<dyn StatusStore>,
}

/// Handle one client command and build its acknowledgement
///
/// Always returns an ack frame carrying the request's correlation id, even
/// on failure — the caller must be able to resolve its pending request.
pub async fn handle_command(ctx: &CommandContext, conn_id: &str, msg: &BusMessage) -> BusMessage {
    let payload = match msg.parse_payload::<ClientCommand>() {
        Ok(cmd) => match dispatch(ctx, conn_id, cmd).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "Command rejected");
                ResponsePayload::error(e.to_string(), Some(e.error_code().to_string()))
            }
        },
        Err(e) => {
            let err = AppError::invalid(format!("Malformed command payload: {e}"));
            ResponsePayload::error(err.to_string(), Some(err.error_code().to_string()))
        }
    };

    BusMessage::response(&payload).with_correlation_id(msg.request_id)
}

async fn dispatch(
    ctx: &CommandContext,
    conn_id: &str,
    cmd: ClientCommand,
) -> AppResult<ResponsePayload> {
    match cmd {
        ClientCommand::JoinRoom { role, store_id } => {
            let room = room_name(role, store_id);
            let members = ctx.registry.join(conn_id, room.clone()).await?;
            tracing::info!(conn_id = %conn_id, room = %room, members, "Client joined room");

            Ok(ResponsePayload::ok(
                format!("Joined {room}"),
                Some(serde_json::to_value(JoinAck { room, members }).unwrap_or_default()),
            ))
        }

        ClientCommand::LeaveRoom { role, store_id } => {
            let room = room_name(role, store_id);
            ctx.registry.leave(conn_id, room.clone()).await?;
            Ok(ResponsePayload::ok(format!("Left {room}"), None))
        }

        ClientCommand::SetItemStatus {
            item_id,
            next,
            reason,
            actor,
        } => {
            tracing::info!(
                conn_id = %conn_id,
                item_id = %item_id,
                next = %next,
                reason = reason.as_deref().unwrap_or(""),
                actor = actor.as_ref().map(|a| a.actor_id.as_str()).unwrap_or("anonymous"),
                "Item status change requested"
            );

            let update = ctx.store.set_item_status(item_id, next).await?;

            // Canonical state to the whole room, not just the caller
            let event = PushEvent::ItemUpdated {
                item_id: update.item_id,
                ticket_id: update.ticket_id,
                item_status: update.new_status,
                menu_name: update.menu_name.clone(),
                quantity: update.quantity,
                cook_station: update.cook_station,
            };
            ctx.registry
                .broadcast(room_name(RoomRole::Kds, update.store_id), BusMessage::push(&event))
                .await?;

            Ok(ResponsePayload::ok(
                "Item status updated",
                Some(
                    serde_json::to_value(ItemStatusAck {
                        item_id: update.item_id,
                        old_status: update.old_status,
                        new_status: update.new_status,
                    })
                    .unwrap_or_default(),
                ),
            ))
        }

        ClientCommand::SetTicketStatus {
            ticket_id,
            next,
            reason,
            if_version,
            actor,
        } => {
            tracing::info!(
                conn_id = %conn_id,
                ticket_id = %ticket_id,
                next = %next,
                reason = reason.as_deref().unwrap_or(""),
                actor = actor.as_ref().map(|a| a.actor_id.as_str()).unwrap_or("anonymous"),
                "Ticket status change requested"
            );

            let update = ctx.store.set_ticket_status(ticket_id, next, if_version).await?;

            let event = PushEvent::TicketUpdated {
                ticket_id: update.ticket_id,
                order_id: update.order_id,
                status: update.new_status,
                table_number: update.table_number,
                updated_at: update.updated_at,
            };
            ctx.registry
                .broadcast(room_name(RoomRole::Kds, update.store_id), BusMessage::push(&event))
                .await?;

            Ok(ResponsePayload::ok(
                "Ticket status updated",
                Some(
                    serde_json::to_value(TicketStatusAck {
                        ticket_id: update.ticket_id,
                        old_status: update.old_status,
                        new_status: update.new_status,
                    })
                    .unwrap_or_default(),
                ),
            ))
        }

        ClientCommand::HideTicket { ticket_id } => {
            let store_id = ctx.store.ticket_store(ticket_id).await?;

            ctx.registry
                .broadcast(
                    room_name(RoomRole::Kds, store_id),
                    BusMessage::push(&PushEvent::TicketHidden { ticket_id }),
                )
                .await?;

            tracing::info!(conn_id = %conn_id, ticket_id = %ticket_id, "Ticket hidden");
            Ok(ResponsePayload::ok("Ticket hidden", None))
        }

        ClientCommand::PrintCompleted { store_id, ticket_id } => {
            // Relayed to the rest of the store's printer room so every
            // printer client can clear the pending job
            ctx.registry
                .broadcast(
                    room_name(RoomRole::Krp, store_id),
                    BusMessage::push(&PushEvent::PrintCompleted { ticket_id }),
                )
                .await?;

            Ok(ResponsePayload::ok("Print completion relayed", None))
        }
    }
}
