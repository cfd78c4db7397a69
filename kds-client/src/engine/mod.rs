//! Client synchronization engine
//!
//! Owns the local ticket model and keeps it converged with the system of
//! record through two paths that may interleave freely:
//!
//! - **Snapshots**: authoritative loads over HTTP that replace (all scope)
//!   or merge (filtered scope) the local collections.
//! - **Push deltas**: room-scoped events from the sync server, applied
//!   idempotently: absolute-field patches only, never creation from a delta.
//!
//! The transport connection runs a `Disconnected → Connecting → Connected`
//! state machine with capped exponential backoff; after the attempt bound
//! is exceeded the engine stays `Disconnected` rather than retrying
//! forever. The rendering layer reads through the engine's query methods
//! and reacts to [`EngineUpdate`] notifications; it never holds a second
//! mutable copy of ticket state.

mod store;

pub use store::TicketStore;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use shared::event::PushEvent;
use shared::message::{Actor, ActorType, ClientCommand, ItemStatusAck, TicketStatusAck};
use shared::model::{
    DashboardSummary, ItemId, ItemStatus, RoomRole, Station, StoreId, Ticket, TicketId,
    TicketStatus,
};
use shared::order::{ConsolidatedLine, consolidate_order_items};

use crate::api::{SnapshotSource, TicketFilter};
use crate::connection::{BusClient, BusConnector};
use crate::error::ClientError;

/// Transport connection state, always visible to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Reconnect policy: backoff doubling per attempt up to a ceiling, bounded
/// attempt count
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    /// LAN defaults: first retry after 500ms, ceiling 10s, give up after 20
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_attempts: 20,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
        doubled.min(self.max_delay)
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub store_id: StoreId,
    /// Timeout for bus commands (status mutations, room joins)
    pub request_timeout: Duration,
    /// Default timeout for snapshot loads triggered by push events
    pub snapshot_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Audit identity attached to status mutations
    pub actor_id: String,
}

impl EngineConfig {
    pub fn new(store_id: StoreId) -> Self {
        Self {
            store_id,
            request_timeout: Duration::from_secs(3),
            snapshot_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            actor_id: "kds_user".into(),
        }
    }
}

/// Typed notifications to the rendering layer
///
/// Delivered over a broadcast channel; dropping the receiver returned by
/// [`SyncEngine::subscribe`] unsubscribes.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineUpdate {
    Connection(ConnectionState),
    TicketsUpdated,
    StationsUpdated,
    DashboardUpdated,
    TicketPatched(TicketId),
    TicketRemoved(TicketId),
    /// A scoped failure tied to one operation, never a global banner
    Error { context: &'static str, message: String },
}

/// What applying one push event did to the local model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// A field patch was applied in place
    Patched,
    /// The patch carried a finished status: state was patched and the
    /// ticket retired through the explicit removal path
    PatchedAndRemoved,
    /// The ticket was retired without a status patch
    Removed,
    /// New arrivals are rare and cheap to reload, so re-fetch instead of
    /// patching
    RefetchTickets,
    /// Not applicable to this display's local model
    Ignored,
}

pub struct SyncEngine {
    /// Self-handle for the background tasks the engine spawns
    me: Weak<Self>,
    config: EngineConfig,
    api: Arc<dyn SnapshotSource>,
    connector: Arc<dyn BusConnector>,
    store: RwLock<TicketStore>,
    state: Mutex<ConnectionState>,
    updates: broadcast::Sender<EngineUpdate>,
    bus: tokio::sync::Mutex<Option<BusClient>>,
    /// Generation counter for ticket loads: a completed load whose
    /// generation is no longer current is stale and discarded
    load_seq: AtomicU64,
    latest_filter: Mutex<TicketFilter>,
    shutdown: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        config: EngineConfig,
        api: Arc<dyn SnapshotSource>,
        connector: Arc<dyn BusConnector>,
    ) -> Arc<Self> {
        let (updates, _) = broadcast::channel(256);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            api,
            connector,
            store: RwLock::new(TicketStore::new()),
            state: Mutex::new(ConnectionState::Disconnected),
            updates,
            bus: tokio::sync::Mutex::new(None),
            load_seq: AtomicU64::new(0),
            latest_filter: Mutex::new(TicketFilter::all()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Start the connection maintenance loop
    pub fn start(&self) {
        let Some(engine) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move { engine.maintain_connection().await });
    }

    // ==================== Subscriptions & queries ====================

    /// Subscribe to engine updates; drop the receiver to unsubscribe
    pub fn subscribe(&self) -> broadcast::Receiver<EngineUpdate> {
        self.updates.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// Active tickets in display order
    pub fn tickets(&self) -> Vec<Ticket> {
        self.store.read().unwrap().display_tickets()
    }

    pub fn ticket(&self, ticket_id: TicketId) -> Option<Ticket> {
        self.store.read().unwrap().ticket(ticket_id).cloned()
    }

    pub fn stations(&self) -> Vec<Station> {
        self.store.read().unwrap().stations()
    }

    pub fn dashboard(&self) -> DashboardSummary {
        self.store.read().unwrap().dashboard()
    }

    // ==================== Snapshot loads ====================

    /// Load the station list, replacing the local collection
    pub async fn load_stations(&self, timeout: Duration) -> Result<(), ClientError> {
        let stations = self
            .with_timeout("load_stations", timeout, self.api.stations(self.config.store_id))
            .await?;

        self.store.write().unwrap().replace_stations(stations);
        self.emit(EngineUpdate::StationsUpdated);
        Ok(())
    }

    /// Load tickets for a filter
    ///
    /// The whole-store scope replaces the local collection; a filtered
    /// scope merges. Each load is tagged with a generation; a response
    /// arriving after a newer load has started is discarded, so a fast
    /// station-switch never resurrects stale data.
    pub async fn load_tickets(
        &self,
        filter: TicketFilter,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let seq = self.load_seq.fetch_add(1, Ordering::SeqCst) + 1;
        *self.latest_filter.lock().unwrap() = filter.clone();

        let tickets = self
            .with_timeout(
                "load_tickets",
                timeout,
                self.api.tickets(self.config.store_id, &filter),
            )
            .await?;

        {
            let mut store = self.store.write().unwrap();
            // Re-check under the write lock: a newer load may have finished
            // while this one was in flight
            if self.load_seq.load(Ordering::SeqCst) != seq {
                tracing::debug!(?filter, "Discarding stale ticket load");
                return Ok(());
            }
            if filter.is_all() {
                store.replace_tickets(tickets);
            } else {
                store.merge_tickets(tickets);
            }
        }

        self.emit(EngineUpdate::TicketsUpdated);
        Ok(())
    }

    /// Load the dashboard aggregate
    pub async fn load_dashboard(&self, timeout: Duration) -> Result<(), ClientError> {
        let dashboard = self
            .with_timeout("load_dashboard", timeout, self.api.dashboard(self.config.store_id))
            .await?;

        self.store.write().unwrap().set_dashboard(dashboard);
        self.emit(EngineUpdate::DashboardUpdated);
        Ok(())
    }

    /// Consolidated unpaid lines for a table: raw rows from the snapshot
    /// API, rebuilt from scratch on every call so the sums always match the
    /// current source rows
    pub async fn consolidated_unpaid(
        &self,
        table_number: i32,
        timeout: Duration,
    ) -> Result<Vec<ConsolidatedLine>, ClientError> {
        let rows = self
            .with_timeout(
                "load_unpaid_items",
                timeout,
                self.api.unpaid_items(self.config.store_id, table_number),
            )
            .await?;
        Ok(consolidate_order_items(&rows))
    }

    /// Run a snapshot future under a deadline, mapping expiry to a timeout
    /// error (retry policy differs from transport errors) and surfacing
    /// failures as scoped error events
    async fn with_timeout<T>(
        &self,
        context: &'static str,
        timeout: Duration,
        fut: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        let result = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(format!(
                "{context} exceeded {timeout:?}"
            ))),
        };

        if let Err(e) = &result {
            self.emit(EngineUpdate::Error {
                context,
                message: e.to_string(),
            });
        }
        result
    }

    // ==================== Mutations ====================

    /// Authoritative ticket status change
    ///
    /// On success the local ticket is patched speculatively (status and
    /// timestamp) before the relay echo arrives, so the initiating display
    /// never waits on round-trip latency; the echo or next snapshot
    /// reconciles it. On failure local state is untouched.
    pub async fn update_ticket_status(
        &self,
        ticket_id: TicketId,
        next: TicketStatus,
        reason: Option<String>,
        if_version: Option<i64>,
    ) -> Result<TicketStatusAck, ClientError> {
        let command = ClientCommand::SetTicketStatus {
            ticket_id,
            next,
            reason,
            if_version,
            actor: Some(self.actor()),
        };

        let ack: TicketStatusAck = self.send_mutation("update_ticket_status", &command).await?;

        self.store
            .write()
            .unwrap()
            .patch_ticket_status(ticket_id, next, Utc::now());
        self.emit(EngineUpdate::TicketPatched(ticket_id));
        Ok(ack)
    }

    /// Authoritative item status change, with the same speculative patch
    pub async fn update_item_status(
        &self,
        item_id: ItemId,
        next: ItemStatus,
        reason: Option<String>,
    ) -> Result<ItemStatusAck, ClientError> {
        let command = ClientCommand::SetItemStatus {
            item_id,
            next,
            reason,
            actor: Some(self.actor()),
        };

        let ack: ItemStatusAck = self.send_mutation("update_item_status", &command).await?;

        self.store.write().unwrap().patch_item_status(item_id, next);
        self.emit(EngineUpdate::TicketsUpdated);
        Ok(ack)
    }

    /// Hide a ticket from displays without changing its status
    pub async fn hide_ticket(&self, ticket_id: TicketId) -> Result<(), ClientError> {
        let command = ClientCommand::HideTicket { ticket_id };
        let bus = self.connected_bus().await?;
        let payload = bus.request(&command, self.config.request_timeout).await?;
        BusClient::expect_success(payload)?;

        if self.store.write().unwrap().remove_ticket(ticket_id) {
            self.emit(EngineUpdate::TicketRemoved(ticket_id));
        }
        Ok(())
    }

    async fn send_mutation<T: serde::de::DeserializeOwned>(
        &self,
        context: &'static str,
        command: &ClientCommand,
    ) -> Result<T, ClientError> {
        let bus = self.connected_bus().await?;

        let result = bus
            .request(command, self.config.request_timeout)
            .await
            .and_then(BusClient::expect_success);

        match result {
            Ok(data) => {
                let data =
                    data.ok_or_else(|| ClientError::Decode("Ack carried no data".into()))?;
                Ok(serde_json::from_value(data)?)
            }
            Err(e) => {
                // Failure is scoped to the initiating caller; local state
                // stays untouched
                self.emit(EngineUpdate::Error {
                    context,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn connected_bus(&self) -> Result<BusClient, ClientError> {
        self.bus
            .lock()
            .await
            .clone()
            .ok_or_else(|| ClientError::Transport("Not connected".into()))
    }

    fn actor(&self) -> Actor {
        Actor {
            actor_type: ActorType::Staff,
            actor_id: self.config.actor_id.clone(),
        }
    }

    // ==================== Push-event dispatch ====================

    /// Apply one push event to the local model
    ///
    /// A closed match over the event catalog. Deltas set absolute fields
    /// only and never create a ticket: a status change for an unknown id
    /// means a stale local view that the next full refresh will correct.
    pub fn apply_push_event(&self, event: &PushEvent) -> PushOutcome {
        match event {
            PushEvent::NewTickets { .. } | PushEvent::TicketCreated { .. } => {
                PushOutcome::RefetchTickets
            }

            PushEvent::DbTicketChange {
                ticket_id,
                status,
                timestamp,
                ..
            } => self.apply_ticket_patch(*ticket_id, *status, *timestamp),

            PushEvent::TicketUpdated {
                ticket_id,
                status,
                updated_at,
                ..
            } => self.apply_ticket_patch(*ticket_id, *status, *updated_at),

            PushEvent::TicketCompleted { ticket_id, .. }
            | PushEvent::TicketHidden { ticket_id } => {
                if self.store.write().unwrap().remove_ticket(*ticket_id) {
                    self.emit(EngineUpdate::TicketRemoved(*ticket_id));
                    PushOutcome::Removed
                } else {
                    PushOutcome::Ignored
                }
            }

            PushEvent::DbItemChange {
                item_id,
                item_status,
                ..
            } => {
                if self.store.write().unwrap().patch_item_status(*item_id, *item_status) {
                    self.emit(EngineUpdate::TicketsUpdated);
                    PushOutcome::Patched
                } else {
                    PushOutcome::Ignored
                }
            }

            PushEvent::ItemUpdated {
                item_id,
                item_status,
                ..
            } => {
                if self.store.write().unwrap().patch_item_status(*item_id, *item_status) {
                    self.emit(EngineUpdate::TicketsUpdated);
                    PushOutcome::Patched
                } else {
                    PushOutcome::Ignored
                }
            }

            // Order/payment changes and print traffic carry no ticket-map
            // state for a display client
            PushEvent::DbOrderChange { .. }
            | PushEvent::DbPaymentChange { .. }
            | PushEvent::PrintJob { .. }
            | PushEvent::PrintCompleted { .. } => PushOutcome::Ignored,
        }
    }

    fn apply_ticket_patch(
        &self,
        ticket_id: TicketId,
        status: TicketStatus,
        updated_at: chrono::DateTime<Utc>,
    ) -> PushOutcome {
        let (patched, removed) = {
            let mut store = self.store.write().unwrap();
            let patched = store.patch_ticket_status(ticket_id, status, updated_at);
            // Finished tickets retire through the explicit removal path so
            // the card disappears immediately
            let removed = patched && status.is_complete() && store.remove_ticket(ticket_id);
            (patched, removed)
        };

        if removed {
            self.emit(EngineUpdate::TicketRemoved(ticket_id));
            PushOutcome::PatchedAndRemoved
        } else if patched {
            self.emit(EngineUpdate::TicketPatched(ticket_id));
            PushOutcome::Patched
        } else {
            PushOutcome::Ignored
        }
    }

    // ==================== Connection maintenance ====================

    async fn maintain_connection(self: Arc<Self>) {
        let mut attempts: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);

            match self.connect_session().await {
                Ok(bus) => {
                    attempts = 0;
                    self.set_state(ConnectionState::Connected);
                    *self.bus.lock().await = Some(bus.clone());

                    self.run_event_loop(&bus).await;

                    *self.bus.lock().await = None;
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    self.set_state(ConnectionState::Disconnected);
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt = attempts + 1, "Bus connect failed");
                    self.set_state(ConnectionState::Disconnected);
                }
            }

            attempts += 1;
            if attempts > self.config.reconnect.max_attempts {
                tracing::error!(
                    attempts = attempts - 1,
                    "Reconnect attempts exhausted, staying disconnected"
                );
                break;
            }

            let delay = self.config.reconnect.delay_for(attempts);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// Connect and join the store's display room; a join failure counts as
    /// a failed session, not a live one
    async fn connect_session(&self) -> Result<BusClient, ClientError> {
        let bus = self.connector.connect().await?;

        match bus
            .join_room(RoomRole::Kds, self.config.store_id, self.config.request_timeout)
            .await
        {
            Ok(ack) => {
                tracing::info!(room = %ack.room, members = ack.members, "Joined display room");
                Ok(bus)
            }
            Err(e) => {
                bus.close().await;
                Err(e)
            }
        }
    }

    async fn run_event_loop(&self, bus: &BusClient) {
        let mut rx = bus.subscribe();
        let closed = bus.closed();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    bus.close().await;
                    break;
                }
                _ = closed.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event) => {
                        if self.apply_push_event(&event) == PushOutcome::RefetchTickets {
                            self.spawn_refetch();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Missed deltas: converge through a fresh snapshot
                        tracing::warn!(dropped = n, "Push events lagged, re-fetching");
                        self.spawn_refetch();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    fn spawn_refetch(&self) {
        let Some(engine) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let filter = engine.latest_filter.lock().unwrap().clone();
            // Failures already surfaced as error events
            let _ = engine.load_tickets(filter, engine.config.snapshot_timeout).await;
        });
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap();
        if *state != next {
            *state = next;
            drop(state);
            self.emit(EngineUpdate::Connection(next));
        }
    }

    fn emit(&self, update: EngineUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    // ==================== Teardown ====================

    /// Stop the connection loop, close the transport and clear all local
    /// collections. Safe to call multiple times; leaves no dangling tasks.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(bus) = self.bus.lock().await.take() {
            bus.close().await;
        }
        self.store.write().unwrap().clear();
        self.set_state(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_attempts: 20,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(8));
        assert_eq!(policy.delay_for(6), Duration::from_secs(10));
        assert_eq!(policy.delay_for(60), Duration::from_secs(10));
    }
}
