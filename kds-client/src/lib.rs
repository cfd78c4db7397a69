//! Kitchen display client
//!
//! The client half of the ticket synchronization system:
//!
//! - **Bus client** (`connection`): framed TCP connection to the sync
//!   server with RPC acknowledgements and a push-event subscription bus.
//! - **Snapshot API** (`api`): the external snapshot endpoints behind a
//!   trait seam.
//! - **Sync engine** (`engine`): the local ticket model, snapshot/delta
//!   reconciliation, reconnect state machine and subscriber notification.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use kds_client::{EngineConfig, HttpSnapshotApi, SyncEngine, TcpConnector, TicketFilter};
//! use shared::message::ClientRole;
//!
//! # async fn run() -> Result<(), kds_client::ClientError> {
//! let engine = SyncEngine::new(
//!     EngineConfig::new(42),
//!     Arc::new(HttpSnapshotApi::new("http://pos.local:3000/api/kds")),
//!     Arc::new(TcpConnector::new("pos.local:8081", ClientRole::KitchenDisplay)),
//! );
//! engine.start();
//! engine.load_stations(Duration::from_secs(5)).await?;
//! engine.load_tickets(TicketFilter::open(), Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod connection;
pub mod engine;
pub mod error;

pub use api::{HttpSnapshotApi, SnapshotSource, TicketFilter};
pub use connection::{BusClient, BusConnector, TcpConnector};
pub use engine::{
    ConnectionState, EngineConfig, EngineUpdate, PushOutcome, ReconnectPolicy, SyncEngine,
    TicketStore,
};
pub use error::ClientError;
