//! Domain model shared between the sync server and display clients
//!
//! Status enums are serialized SCREAMING_SNAKE_CASE so they match the
//! payloads emitted by the database change triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type StoreId = i64;
pub type OrderId = i64;
pub type TicketId = i64;
pub type ItemId = i64;
pub type StationId = i64;

// ============================================================================
// Status Enums
// ============================================================================

/// Ticket lifecycle status
///
/// Transitions are monotonic (PENDING → COOKING → DONE → SERVED) except for
/// explicit cancellation and explicit re-open by staff action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Pending,
    Cooking,
    Done,
    Served,
    Canceled,
}

impl TicketStatus {
    /// Terminal states: no further kitchen work expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Served | Self::Canceled)
    }

    /// Finished cooking — triggers the explicit removal event so display
    /// clients can retire the card immediately
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Done | Self::Served)
    }

    /// Display sort key: COOKING before PENDING before DONE
    pub fn display_priority(&self) -> u8 {
        match self {
            Self::Cooking => 0,
            Self::Pending => 1,
            Self::Done => 2,
            Self::Served => 3,
            Self::Canceled => 4,
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Cooking => write!(f, "COOKING"),
            Self::Done => write!(f, "DONE"),
            Self::Served => write!(f, "SERVED"),
            Self::Canceled => write!(f, "CANCELED"),
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COOKING" => Ok(Self::Cooking),
            "DONE" => Ok(Self::Done),
            "SERVED" => Ok(Self::Served),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Per-item preparation status (mirrors a subset of the ticket status)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Pending,
    Cooking,
    Done,
    Canceled,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Cooking => write!(f, "COOKING"),
            Self::Done => write!(f, "DONE"),
            Self::Canceled => write!(f, "CANCELED"),
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COOKING" => Ok(Self::Cooking),
            "DONE" => Ok(Self::Done),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A status string outside the shared vocabulary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// Kitchen sub-station an item is routed to
///
/// `Other` absorbs stations this build does not know about, so a new station
/// added upstream never breaks payload decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CookStation {
    #[default]
    Kitchen,
    Grill,
    Fry,
    ColdStation,
    Bar,
    #[serde(other)]
    Other,
}

impl CookStation {
    /// Whether items at this station appear on kitchen display tickets
    pub fn is_kitchen(&self) -> bool {
        matches!(self, Self::Kitchen | Self::Grill | Self::Fry | Self::ColdStation)
    }
}

// ============================================================================
// Core Entities
// ============================================================================

/// One ticket line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketItem {
    pub id: ItemId,
    pub ticket_id: TicketId,
    pub menu_name: String,
    pub quantity: i64,
    /// Unit price in minor currency units
    pub unit_price: i64,
    pub item_status: ItemStatus,
    #[serde(default)]
    pub cook_station: CookStation,
    #[serde(default)]
    pub note: Option<String>,
}

/// One kitchen work-unit: a card on the display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: TicketId,
    pub order_id: OrderId,
    pub store_id: StoreId,
    pub table_number: i32,
    #[serde(default)]
    pub customer_label: Option<String>,
    #[serde(default)]
    pub station_id: Option<StationId>,
    pub status: TicketStatus,
    /// Course ordering hint (lower fires first)
    #[serde(default)]
    pub course_number: i32,
    /// Optimistic-concurrency token, bumped on every authoritative update
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<TicketItem>,
}

impl Ticket {
    /// Time the ticket entered the kitchen queue (fire time, falling back to
    /// creation time)
    pub fn queued_at(&self) -> DateTime<Utc> {
        self.fired_at.unwrap_or(self.created_at)
    }
}

/// Kitchen sub-queue
///
/// `active_item_count` is derived — recomputed from the ticket set on every
/// snapshot, never incrementally drifted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    #[serde(default)]
    pub is_expo: bool,
    #[serde(default)]
    pub active_item_count: i64,
}

/// Aggregate counts for the store dashboard view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub pending_tickets: i64,
    pub cooking_tickets: i64,
    pub done_tickets: i64,
    /// Age of the oldest still-open ticket, if any
    #[serde(default)]
    pub oldest_open_minutes: Option<i64>,
}

/// Raw unpaid order-item row as returned by the table view endpoint
///
/// Input to the order-line consolidator. `quantity` is optional because
/// upstream rows have been observed with missing or zero quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpaidItemRow {
    pub item_id: ItemId,
    pub ticket_id: TicketId,
    pub menu_name: String,
    pub unit_price: i64,
    #[serde(default)]
    pub quantity: Option<i64>,
}

// ============================================================================
// Rooms
// ============================================================================

/// Audience role for room fanout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomRole {
    /// Kitchen display terminals
    Kds,
    /// Kitchen receipt printers
    Krp,
}

impl RoomRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kds => "kds",
            Self::Krp => "krp",
        }
    }
}

/// Canonical room name for one store's audience, e.g. `kds:42`
pub fn room_name(role: RoomRole, store_id: StoreId) -> String {
    format!("{}:{}", role.as_str(), store_id)
}
