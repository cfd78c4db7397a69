//! Order display aggregation

mod consolidate;

pub use consolidate::{ConsolidatedLine, consolidate_order_items};
