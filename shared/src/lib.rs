//! Shared types for the kitchen ticket synchronization system
//!
//! Common types used across the sync server and display clients:
//! the domain model (tickets, items, stations), the push-event catalog,
//! message bus types, and the order-line consolidator.

pub mod event;
pub mod message;
pub mod model;
pub mod order;

// Re-exports
pub use serde::{Deserialize, Serialize};

// Message bus re-exports (for convenient access)
pub use event::PushEvent;
pub use message::{BusMessage, EventType};
