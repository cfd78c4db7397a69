//! Change relay: database change notifications to room fanout
//!
//! One long-lived `PgListener` subscribes to the four channels the order
//! system's triggers notify on. Each payload is decoded, classified by
//! channel, and re-published as [`PushEvent`]s to the kitchen-display room
//! for its store. A malformed payload is logged and dropped; it must never
//! take down fanout for the whole store base.
//!
//! No event is replayed after a reconnect; clients self-heal through
//! snapshot re-fetch, so missed notifications are a bounded-staleness risk,
//! not a fatal condition.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::postgres::PgListener;
use tokio_util::sync::CancellationToken;

use shared::event::{EventSource, PushEvent};
use shared::message::BusMessage;
use shared::model::{ItemStatus, RoomRole, StoreId, TicketId, TicketStatus, room_name};

use crate::error::{AppError, AppResult};
use crate::rooms::RegistryHandle;

/// Notification channels, one per entity family
pub const CHANNELS: [&str; 4] = [
    "kds_order_events",
    "kds_ticket_events",
    "kds_item_events",
    "kds_payment_events",
];

/// Events to fan out for one notification, all scoped to one store room
#[derive(Debug, PartialEq)]
pub struct Fanout {
    pub room: String,
    pub events: Vec<PushEvent>,
}

// Trigger payload shapes. Numeric ids may arrive as JSON strings from older
// trigger versions, hence the lenient id type.

#[derive(Debug, Deserialize)]
struct OrderNotification {
    action: String,
    order_id: LenientId,
    store_id: LenientId,
    table_num: i32,
    status: String,
}

#[derive(Debug, Deserialize)]
struct TicketNotification {
    action: String,
    ticket_id: LenientId,
    order_id: LenientId,
    store_id: LenientId,
    status: TicketStatus,
}

#[derive(Debug, Deserialize)]
struct ItemNotification {
    action: String,
    item_id: LenientId,
    ticket_id: LenientId,
    store_id: LenientId,
    item_status: ItemStatus,
    menu_name: String,
}

#[derive(Debug, Deserialize)]
struct PaymentNotification {
    action: String,
    payment_id: LenientId,
    store_id: LenientId,
    table_number: i32,
    final_amount: i64,
}

/// An id that may be a JSON number or a numeric string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LenientId {
    Number(i64),
    Text(String),
}

impl LenientId {
    fn value(&self) -> Result<i64, AppError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(s) => s
                .parse()
                .map_err(|_| AppError::invalid(format!("Non-numeric id: {s:?}"))),
        }
    }
}

/// Classify one notification into the events to fan out
///
/// Pure, so it is testable without a database. Returns the target room and the
/// events for it; a ticket reaching a finished status gets a second,
/// explicit `ticket.completed` removal event so displays retire the card
/// immediately instead of waiting for a refresh.
pub fn events_for_notification(
    channel: &str,
    payload: &str,
    timestamp: DateTime<Utc>,
) -> AppResult<Fanout> {
    let decode = |e: serde_json::Error| {
        AppError::invalid(format!("Malformed {channel} payload: {e}"))
    };

    match channel {
        "kds_order_events" => {
            let n: OrderNotification = serde_json::from_str(payload).map_err(decode)?;
            Ok(Fanout {
                room: room_name(RoomRole::Kds, n.store_id.value()?),
                events: vec![PushEvent::DbOrderChange {
                    action: n.action,
                    order_id: n.order_id.value()?,
                    table_number: n.table_num,
                    status: n.status,
                    timestamp,
                    source: EventSource::DbTrigger,
                }],
            })
        }

        "kds_ticket_events" => {
            let n: TicketNotification = serde_json::from_str(payload).map_err(decode)?;
            let ticket_id = n.ticket_id.value()?;

            let mut events = vec![PushEvent::DbTicketChange {
                action: n.action,
                ticket_id,
                order_id: n.order_id.value()?,
                status: n.status,
                timestamp,
                source: EventSource::DbTrigger,
            }];

            if n.status.is_complete() {
                events.push(PushEvent::TicketCompleted {
                    ticket_id,
                    status: n.status,
                });
            }

            Ok(Fanout {
                room: room_name(RoomRole::Kds, n.store_id.value()?),
                events,
            })
        }

        "kds_item_events" => {
            let n: ItemNotification = serde_json::from_str(payload).map_err(decode)?;
            Ok(Fanout {
                room: room_name(RoomRole::Kds, n.store_id.value()?),
                events: vec![PushEvent::DbItemChange {
                    action: n.action,
                    item_id: n.item_id.value()?,
                    ticket_id: n.ticket_id.value()?,
                    item_status: n.item_status,
                    menu_name: n.menu_name,
                    timestamp,
                    source: EventSource::DbTrigger,
                }],
            })
        }

        "kds_payment_events" => {
            let n: PaymentNotification = serde_json::from_str(payload).map_err(decode)?;
            Ok(Fanout {
                room: room_name(RoomRole::Kds, n.store_id.value()?),
                events: vec![PushEvent::DbPaymentChange {
                    action: n.action,
                    payment_id: n.payment_id.value()?,
                    table_number: n.table_number,
                    final_amount: n.final_amount,
                    timestamp,
                    source: EventSource::DbTrigger,
                }],
            })
        }

        other => Err(AppError::invalid(format!("Unknown channel: {other}"))),
    }
}

/// How a listening session ended
enum ListenEnd {
    /// Could not connect at all, which implies a structural problem
    ConnectFailed(AppError),
    /// Connected, then the connection dropped, likely a transient blip
    ConnectionLost(AppError),
}

/// The relay process. Create once, then spawn [`ChangeRelay::run`].
pub struct ChangeRelay {
    database_url: String,
    registry: RegistryHandle,
    reconnect_delay: Duration,
    initial_retry_delay: Duration,
}

impl ChangeRelay {
    pub fn new(
        database_url: impl Into<String>,
        registry: RegistryHandle,
        reconnect_delay: Duration,
        initial_retry_delay: Duration,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            registry,
            reconnect_delay,
            initial_retry_delay,
        }
    }

    /// Listen and fan out until shutdown, reconnecting indefinitely
    ///
    /// Borrows the relay so the owner keeps the print-dispatch entry point
    /// while the listener loop runs.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!("Change relay started");

        loop {
            let end = tokio::select! {
                _ = shutdown.cancelled() => break,
                end = self.listen() => end,
            };

            let delay = match end {
                ListenEnd::ConnectFailed(e) => {
                    tracing::error!(error = %e, "Change listener failed to connect");
                    self.initial_retry_delay
                }
                ListenEnd::ConnectionLost(e) => {
                    tracing::warn!(error = %e, "Change listener connection lost");
                    self.reconnect_delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Change relay stopped");
    }

    /// One listening session; returns how it ended
    async fn listen(&self) -> ListenEnd {
        let mut listener = match PgListener::connect(&self.database_url).await {
            Ok(l) => l,
            Err(e) => return ListenEnd::ConnectFailed(e.into()),
        };

        if let Err(e) = listener.listen_all(CHANNELS).await {
            return ListenEnd::ConnectFailed(e.into());
        }

        tracing::info!(channels = CHANNELS.len(), "Change listener subscribed");

        loop {
            let notification = match listener.recv().await {
                Ok(n) => n,
                Err(e) => return ListenEnd::ConnectionLost(e.into()),
            };

            self.handle_notification(notification.channel(), notification.payload())
                .await;
        }
    }

    /// Decode, classify and fan out one notification. Errors are logged and
    /// dropped; one bad payload must not stop the relay.
    async fn handle_notification(&self, channel: &str, payload: &str) {
        let fanout = match events_for_notification(channel, payload, Utc::now()) {
            Ok(fanout) => fanout,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "Dropping undecodable notification");
                return;
            }
        };

        tracing::debug!(
            channel = %channel,
            room = %fanout.room,
            events = fanout.events.len(),
            "Relaying change notification"
        );

        for event in &fanout.events {
            if let Err(e) = self
                .registry
                .broadcast(fanout.room.clone(), BusMessage::push(event))
                .await
            {
                tracing::error!(room = %fanout.room, error = %e, "Relay broadcast failed");
            }
        }
    }

    /// Direct server-to-room print dispatch, for commands that do not
    /// originate from a row change. Broadcast redundantly to both candidate
    /// rooms, since printer clients have been observed joining either.
    pub async fn broadcast_print_job(
        &self,
        store_id: StoreId,
        ticket_id: TicketId,
        table_number: i32,
        content: serde_json::Value,
    ) -> AppResult<()> {
        let event = PushEvent::PrintJob {
            ticket_id,
            table_number,
            content,
        };

        for role in [RoomRole::Krp, RoomRole::Kds] {
            self.registry
                .broadcast(room_name(role, store_id), BusMessage::push(&event))
                .await?;
        }

        tracing::info!(store_id = %store_id, ticket_id = %ticket_id, "Print job dispatched");
        Ok(())
    }
}
