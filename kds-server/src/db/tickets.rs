//! Authoritative ticket/item status mutations
//!
//! [`StatusStore`] is the seam between the command paths and the system of
//! record: production wires [`PgStatusStore`], tests implement the trait
//! over an in-memory map. Every mutation returns the canonical row state so
//! the caller can re-broadcast it to the room without a second read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use shared::model::{
    CookStation, ItemId, ItemStatus, OrderId, StoreId, TicketId, TicketStatus,
};

use crate::error::{AppError, AppResult};

/// Canonical ticket state after an authoritative status update
#[derive(Debug, Clone)]
pub struct TicketUpdate {
    pub ticket_id: TicketId,
    pub order_id: OrderId,
    pub store_id: StoreId,
    pub table_number: i32,
    pub old_status: TicketStatus,
    pub new_status: TicketStatus,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Canonical item state after an authoritative status update
#[derive(Debug, Clone)]
pub struct ItemUpdate {
    pub item_id: ItemId,
    pub ticket_id: TicketId,
    pub store_id: StoreId,
    pub old_status: ItemStatus,
    pub new_status: ItemStatus,
    pub menu_name: String,
    pub quantity: i64,
    pub cook_station: CookStation,
}

/// Authoritative write path against the system of record
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Update a ticket's status. When `if_version` is present the update is
    /// rejected with [`AppError::Conflict`] unless the stored row version
    /// matches; a version mismatch is never a silent overwrite.
    async fn set_ticket_status(
        &self,
        ticket_id: TicketId,
        next: TicketStatus,
        if_version: Option<i64>,
    ) -> AppResult<TicketUpdate>;

    /// Update an item's status
    async fn set_item_status(&self, item_id: ItemId, next: ItemStatus) -> AppResult<ItemUpdate>;

    /// Store that owns a ticket (room scoping for commands that do not
    /// mutate status, e.g. hide)
    async fn ticket_store(&self, ticket_id: TicketId) -> AppResult<StoreId>;
}

/// PostgreSQL implementation over the order system's tables
#[derive(Debug, Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn set_ticket_status(
        &self,
        ticket_id: TicketId,
        next: TicketStatus,
        if_version: Option<i64>,
    ) -> AppResult<TicketUpdate> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT status, version FROM tickets WHERE id = $1 FOR UPDATE",
        )
        .bind(ticket_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((old_status_raw, version)) = row else {
            return Err(AppError::not_found(format!("Ticket {ticket_id}")));
        };

        let old_status: TicketStatus = old_status_raw
            .parse()
            .map_err(|e| AppError::database(format!("Ticket {ticket_id}: {e}")))?;

        if let Some(expected) = if_version
            && expected != version
        {
            return Err(AppError::conflict(format!(
                "Ticket {ticket_id} version is {version}, caller expected {expected}"
            )));
        }

        let (order_id, store_id, table_number, new_version, updated_at): (
            OrderId,
            StoreId,
            i32,
            i64,
            DateTime<Utc>,
        ) = sqlx::query_as(
            "UPDATE tickets
             SET status = $1, version = version + 1, updated_at = NOW()
             WHERE id = $2
             RETURNING order_id, store_id, table_number, version, updated_at",
        )
        .bind(next.to_string())
        .bind(ticket_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            ticket_id = %ticket_id,
            old_status = %old_status,
            new_status = %next,
            version = new_version,
            "Ticket status updated"
        );

        Ok(TicketUpdate {
            ticket_id,
            order_id,
            store_id,
            table_number,
            old_status,
            new_status: next,
            version: new_version,
            updated_at,
        })
    }

    async fn set_item_status(&self, item_id: ItemId, next: ItemStatus) -> AppResult<ItemUpdate> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM order_items WHERE id = $1 FOR UPDATE",
        )
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((old_status_raw,)) = row else {
            return Err(AppError::not_found(format!("Item {item_id}")));
        };

        let old_status: ItemStatus = old_status_raw
            .parse()
            .map_err(|e| AppError::database(format!("Item {item_id}: {e}")))?;

        let (ticket_id, store_id, menu_name, quantity, cook_station_raw): (
            TicketId,
            StoreId,
            String,
            i64,
            String,
        ) = sqlx::query_as(
            "UPDATE order_items oi
             SET status = $1, updated_at = NOW()
             FROM tickets t
             WHERE oi.id = $2 AND t.id = oi.ticket_id
             RETURNING oi.ticket_id, t.store_id, oi.menu_name, oi.quantity, oi.cook_station",
        )
        .bind(next.to_string())
        .bind(item_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        // Stations added upstream decode as Other rather than failing the ack
        let cook_station: CookStation =
            serde_json::from_value(serde_json::Value::String(cook_station_raw))
                .unwrap_or_default();

        tracing::info!(
            item_id = %item_id,
            ticket_id = %ticket_id,
            old_status = %old_status,
            new_status = %next,
            "Item status updated"
        );

        Ok(ItemUpdate {
            item_id,
            ticket_id,
            store_id,
            old_status,
            new_status: next,
            menu_name,
            quantity,
            cook_station,
        })
    }

    async fn ticket_store(&self, ticket_id: TicketId) -> AppResult<StoreId> {
        let row: Option<(StoreId,)> =
            sqlx::query_as("SELECT store_id FROM tickets WHERE id = $1")
                .bind(ticket_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(store_id,)| store_id)
            .ok_or_else(|| AppError::not_found(format!("Ticket {ticket_id}")))
    }
}
