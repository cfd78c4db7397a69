//! Push-event catalog
//!
//! Every event delivered over the push transport is one variant of
//! [`PushEvent`] — a tagged `{type, data}` union, so event handling is a
//! closed, exhaustiveness-checked match instead of duck typing on payload
//! shape.
//!
//! `db_*` events are produced by the change relay from database trigger
//! notifications; the dotted `ticket.*` / `item.*` events are canonical-state
//! broadcasts (relay terminal-status removal, or direct command paths).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    CookStation, ItemId, ItemStatus, OrderId, StoreId, TicketId, TicketStatus,
};

/// Where an event originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Change-capture trigger in the system of record
    DbTrigger,
    /// Direct server-side broadcast (command paths, print dispatch)
    Server,
}

/// Room-scoped push event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushEvent {
    /// Order row changed in the system of record
    #[serde(rename = "db_order_change")]
    DbOrderChange {
        action: String,
        order_id: OrderId,
        table_number: i32,
        /// Order-level status belongs to the order system's vocabulary,
        /// passed through opaquely
        status: String,
        timestamp: DateTime<Utc>,
        source: EventSource,
    },

    /// Ticket row changed in the system of record
    #[serde(rename = "db_ticket_change")]
    DbTicketChange {
        action: String,
        ticket_id: TicketId,
        order_id: OrderId,
        status: TicketStatus,
        timestamp: DateTime<Utc>,
        source: EventSource,
    },

    /// Ticket item row changed in the system of record
    #[serde(rename = "db_item_change")]
    DbItemChange {
        action: String,
        item_id: ItemId,
        ticket_id: TicketId,
        item_status: ItemStatus,
        menu_name: String,
        timestamp: DateTime<Utc>,
        source: EventSource,
    },

    /// Payment row changed in the system of record
    #[serde(rename = "db_payment_change")]
    DbPaymentChange {
        action: String,
        payment_id: i64,
        table_number: i32,
        final_amount: i64,
        timestamp: DateTime<Utc>,
        source: EventSource,
    },

    /// One or more tickets arrived for the store — clients re-fetch rather
    /// than patch, new arrivals are rare and cheap to reload
    #[serde(rename = "new_tickets")]
    NewTickets {
        store_id: StoreId,
        order_id: OrderId,
        table_number: i32,
        timestamp: DateTime<Utc>,
    },

    /// A single new ticket row was inserted
    #[serde(rename = "ticket.created")]
    TicketCreated {
        ticket_id: TicketId,
        order_id: OrderId,
        status: TicketStatus,
        timestamp: DateTime<Utc>,
    },

    /// Canonical ticket state after an authoritative update
    #[serde(rename = "ticket.updated")]
    TicketUpdated {
        ticket_id: TicketId,
        order_id: OrderId,
        status: TicketStatus,
        table_number: i32,
        updated_at: DateTime<Utc>,
    },

    /// Explicit removal signal: the ticket reached a finished status and
    /// display clients should retire the card immediately
    #[serde(rename = "ticket.completed")]
    TicketCompleted {
        ticket_id: TicketId,
        status: TicketStatus,
    },

    /// Staff hid the ticket from the display
    #[serde(rename = "ticket.hidden")]
    TicketHidden { ticket_id: TicketId },

    /// Canonical item state after an authoritative update
    #[serde(rename = "item.updated")]
    ItemUpdated {
        item_id: ItemId,
        ticket_id: TicketId,
        item_status: ItemStatus,
        menu_name: String,
        quantity: i64,
        cook_station: CookStation,
    },

    /// Print-job dispatch to printer clients
    #[serde(rename = "print.job")]
    PrintJob {
        ticket_id: TicketId,
        table_number: i32,
        /// Opaque render payload for the printer client
        content: serde_json::Value,
    },

    /// A printer client finished printing a ticket
    #[serde(rename = "print.completed")]
    PrintCompleted { ticket_id: TicketId },
}

impl PushEvent {
    /// Wire name of the event, as carried in the `type` tag
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DbOrderChange { .. } => "db_order_change",
            Self::DbTicketChange { .. } => "db_ticket_change",
            Self::DbItemChange { .. } => "db_item_change",
            Self::DbPaymentChange { .. } => "db_payment_change",
            Self::NewTickets { .. } => "new_tickets",
            Self::TicketCreated { .. } => "ticket.created",
            Self::TicketUpdated { .. } => "ticket.updated",
            Self::TicketCompleted { .. } => "ticket.completed",
            Self::TicketHidden { .. } => "ticket.hidden",
            Self::ItemUpdated { .. } => "item.updated",
            Self::PrintJob { .. } => "print.job",
            Self::PrintCompleted { .. } => "print.completed",
        }
    }
}
