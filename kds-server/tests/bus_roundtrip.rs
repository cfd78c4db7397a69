//! Full command/broadcast round trips over in-memory transports
//!
//! A real `PushServer` and room registry, with the system of record behind
//! an in-memory `StatusStore` — exercises the handshake, room membership,
//! the direct command paths with their room-wide canonical re-broadcasts,
//! and the failure acks that go to the caller only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use kds_client::{
    BusClient, BusConnector, ClientError, ConnectionState, EngineConfig, SnapshotSource,
    SyncEngine, TicketFilter,
};
use kds_server::commands::CommandContext;
use kds_server::db::tickets::{ItemUpdate, StatusStore, TicketUpdate};
use kds_server::error::{AppError, AppResult};
use kds_server::{PushServer, RoomRegistry};
use shared::event::PushEvent;
use shared::message::{
    BusMessage, ClientCommand, ClientRole, EventType, HandshakePayload, MemoryTransport,
    ResponsePayload, TicketStatusAck, Transport,
};
use shared::model::{
    CookStation, DashboardSummary, ItemId, ItemStatus, RoomRole, Station, StoreId, Ticket,
    TicketId, TicketItem, TicketStatus, UnpaidItemRow,
};

const RPC_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct TicketRow {
    order_id: i64,
    store_id: StoreId,
    table_number: i32,
    status: TicketStatus,
    version: i64,
}

#[derive(Clone)]
struct ItemRow {
    ticket_id: TicketId,
    store_id: StoreId,
    status: ItemStatus,
    menu_name: String,
    quantity: i64,
}

/// In-memory stand-in for the PostgreSQL write path
#[derive(Default)]
struct MemoryStatusStore {
    tickets: Mutex<HashMap<TicketId, TicketRow>>,
    items: Mutex<HashMap<ItemId, ItemRow>>,
}

impl MemoryStatusStore {
    fn with_ticket(self, ticket_id: TicketId, store_id: StoreId, status: TicketStatus) -> Self {
        self.tickets.lock().unwrap().insert(
            ticket_id,
            TicketRow {
                order_id: ticket_id * 10,
                store_id,
                table_number: 4,
                status,
                version: 1,
            },
        );
        self
    }

    fn with_item(self, item_id: ItemId, ticket_id: TicketId, store_id: StoreId) -> Self {
        self.items.lock().unwrap().insert(
            item_id,
            ItemRow {
                ticket_id,
                store_id,
                status: ItemStatus::Pending,
                menu_name: "Kimchi Stew".into(),
                quantity: 1,
            },
        );
        self
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn set_ticket_status(
        &self,
        ticket_id: TicketId,
        next: TicketStatus,
        if_version: Option<i64>,
    ) -> AppResult<TicketUpdate> {
        let mut tickets = self.tickets.lock().unwrap();
        let row = tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| AppError::not_found(format!("Ticket {ticket_id}")))?;

        if let Some(expected) = if_version
            && expected != row.version
        {
            return Err(AppError::conflict(format!(
                "Ticket {ticket_id} version is {}, caller expected {expected}",
                row.version
            )));
        }

        let old_status = row.status;
        row.status = next;
        row.version += 1;

        Ok(TicketUpdate {
            ticket_id,
            order_id: row.order_id,
            store_id: row.store_id,
            table_number: row.table_number,
            old_status,
            new_status: next,
            version: row.version,
            updated_at: Utc::now(),
        })
    }

    async fn set_item_status(&self, item_id: ItemId, next: ItemStatus) -> AppResult<ItemUpdate> {
        let mut items = self.items.lock().unwrap();
        let row = items
            .get_mut(&item_id)
            .ok_or_else(|| AppError::not_found(format!("Item {item_id}")))?;

        let old_status = row.status;
        row.status = next;

        Ok(ItemUpdate {
            item_id,
            ticket_id: row.ticket_id,
            store_id: row.store_id,
            old_status,
            new_status: next,
            menu_name: row.menu_name.clone(),
            quantity: row.quantity,
            cook_station: CookStation::Kitchen,
        })
    }

    async fn ticket_store(&self, ticket_id: TicketId) -> AppResult<StoreId> {
        self.tickets
            .lock()
            .unwrap()
            .get(&ticket_id)
            .map(|row| row.store_id)
            .ok_or_else(|| AppError::not_found(format!("Ticket {ticket_id}")))
    }
}

fn start_server(store: MemoryStatusStore) -> PushServer {
    let (registry_handle, registry) = RoomRegistry::new(64);
    tokio::spawn(registry.run());

    let ctx = CommandContext {
        registry: registry_handle,
        store: Arc::new(store),
    };
    PushServer::new(ctx, 64, CancellationToken::new())
}

async fn connect(server: &PushServer, role: ClientRole) -> BusClient {
    let (server_end, client_end) = MemoryTransport::pair(64 * 1024);
    server.attach(server_end);
    BusClient::from_transport(client_end, role, Some("test-client".into()), RPC_TIMEOUT)
        .await
        .expect("handshake failed")
}

async fn join(client: &BusClient, role: RoomRole, store_id: StoreId) -> usize {
    client
        .join_room(role, store_id, RPC_TIMEOUT)
        .await
        .expect("join failed")
        .members
}

async fn next_event(rx: &mut broadcast::Receiver<PushEvent>) -> PushEvent {
    tokio::time::timeout(RPC_TIMEOUT, rx.recv())
        .await
        .expect("no event within timeout")
        .expect("event bus closed")
}

async fn assert_no_event(rx: &mut broadcast::Receiver<PushEvent>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "unexpected event was broadcast");
}

#[tokio::test]
async fn test_join_ack_reports_room_size() {
    let server = start_server(MemoryStatusStore::default());

    let a = connect(&server, ClientRole::KitchenDisplay).await;
    let b = connect(&server, ClientRole::KitchenDisplay).await;

    assert_eq!(join(&a, RoomRole::Kds, 1).await, 1);
    // Idempotent re-join does not inflate the count
    assert_eq!(join(&a, RoomRole::Kds, 1).await, 1);
    assert_eq!(join(&b, RoomRole::Kds, 1).await, 2);
}

#[tokio::test]
async fn test_ticket_status_command_broadcasts_canonical_state() {
    let store = MemoryStatusStore::default().with_ticket(7, 1, TicketStatus::Pending);
    let server = start_server(store);

    let actor = connect(&server, ClientRole::KitchenDisplay).await;
    let observer = connect(&server, ClientRole::KitchenDisplay).await;
    join(&actor, RoomRole::Kds, 1).await;
    join(&observer, RoomRole::Kds, 1).await;

    let mut actor_events = actor.subscribe();
    let mut observer_events = observer.subscribe();

    let ack = actor
        .request(
            &ClientCommand::SetTicketStatus {
                ticket_id: 7,
                next: TicketStatus::Cooking,
                reason: None,
                if_version: None,
                actor: None,
            },
            RPC_TIMEOUT,
        )
        .await
        .unwrap();

    assert!(ack.success);
    let data: TicketStatusAck = serde_json::from_value(ack.data.unwrap()).unwrap();
    assert_eq!(data.old_status, TicketStatus::Pending);
    assert_eq!(data.new_status, TicketStatus::Cooking);

    // Canonical state reaches every room member, the actor included
    for events in [&mut actor_events, &mut observer_events] {
        match next_event(events).await {
            PushEvent::TicketUpdated { ticket_id, status, .. } => {
                assert_eq!(ticket_id, 7);
                assert_eq!(status, TicketStatus::Cooking);
            }
            other => panic!("Expected ticket.updated, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_version_conflict_is_acked_to_caller_only() {
    let store = MemoryStatusStore::default().with_ticket(7, 1, TicketStatus::Pending);
    let server = start_server(store);

    let actor = connect(&server, ClientRole::KitchenDisplay).await;
    let observer = connect(&server, ClientRole::KitchenDisplay).await;
    join(&actor, RoomRole::Kds, 1).await;
    join(&observer, RoomRole::Kds, 1).await;
    let mut observer_events = observer.subscribe();

    let ack = actor
        .request(
            &ClientCommand::SetTicketStatus {
                ticket_id: 7,
                next: TicketStatus::Cooking,
                reason: None,
                if_version: Some(99),
                actor: None,
            },
            RPC_TIMEOUT,
        )
        .await
        .unwrap();

    assert!(!ack.success);
    assert_eq!(ack.error_code.as_deref(), Some("E0004"));

    // A rejected mutation is never broadcast
    assert_no_event(&mut observer_events).await;
}

#[tokio::test]
async fn test_unknown_ticket_is_not_found() {
    let server = start_server(MemoryStatusStore::default());
    let client = connect(&server, ClientRole::KitchenDisplay).await;

    let ack = client
        .request(
            &ClientCommand::SetTicketStatus {
                ticket_id: 404,
                next: TicketStatus::Cooking,
                reason: None,
                if_version: None,
                actor: None,
            },
            RPC_TIMEOUT,
        )
        .await
        .unwrap();

    assert!(!ack.success);
    assert_eq!(ack.error_code.as_deref(), Some("E0003"));
}

#[tokio::test]
async fn test_item_status_command_broadcasts_item_updated() {
    let store = MemoryStatusStore::default()
        .with_ticket(7, 1, TicketStatus::Cooking)
        .with_item(70, 7, 1);
    let server = start_server(store);

    let actor = connect(&server, ClientRole::KitchenDisplay).await;
    join(&actor, RoomRole::Kds, 1).await;
    let mut events = actor.subscribe();

    let ack = actor
        .request(
            &ClientCommand::SetItemStatus {
                item_id: 70,
                next: ItemStatus::Done,
                reason: None,
                actor: None,
            },
            RPC_TIMEOUT,
        )
        .await
        .unwrap();
    assert!(ack.success);

    match next_event(&mut events).await {
        PushEvent::ItemUpdated { item_id, item_status, ticket_id, .. } => {
            assert_eq!(item_id, 70);
            assert_eq!(ticket_id, 7);
            assert_eq!(item_status, ItemStatus::Done);
        }
        other => panic!("Expected item.updated, got {other:?}"),
    }
}

#[tokio::test]
async fn test_hide_broadcasts_to_display_room() {
    let store = MemoryStatusStore::default().with_ticket(7, 1, TicketStatus::Done);
    let server = start_server(store);

    let actor = connect(&server, ClientRole::KitchenDisplay).await;
    let observer = connect(&server, ClientRole::KitchenDisplay).await;
    join(&actor, RoomRole::Kds, 1).await;
    join(&observer, RoomRole::Kds, 1).await;
    let mut observer_events = observer.subscribe();

    let ack = actor
        .request(&ClientCommand::HideTicket { ticket_id: 7 }, RPC_TIMEOUT)
        .await
        .unwrap();
    assert!(ack.success);

    assert_eq!(
        next_event(&mut observer_events).await,
        PushEvent::TicketHidden { ticket_id: 7 }
    );
}

#[tokio::test]
async fn test_print_completed_scoped_to_printer_room() {
    let server = start_server(MemoryStatusStore::default());

    let printer = connect(&server, ClientRole::Printer).await;
    let other_printer = connect(&server, ClientRole::Printer).await;
    let display = connect(&server, ClientRole::KitchenDisplay).await;
    join(&printer, RoomRole::Krp, 1).await;
    join(&other_printer, RoomRole::Krp, 1).await;
    join(&display, RoomRole::Kds, 1).await;

    let mut printer_events = other_printer.subscribe();
    let mut display_events = display.subscribe();

    let ack = printer
        .request(
            &ClientCommand::PrintCompleted { store_id: 1, ticket_id: 7 },
            RPC_TIMEOUT,
        )
        .await
        .unwrap();
    assert!(ack.success);

    assert_eq!(
        next_event(&mut printer_events).await,
        PushEvent::PrintCompleted { ticket_id: 7 }
    );
    assert_no_event(&mut display_events).await;
}

#[tokio::test]
async fn test_handshake_version_mismatch_is_rejected() {
    let server = start_server(MemoryStatusStore::default());

    let (server_end, client_end) = MemoryTransport::pair(4096);
    server.attach(server_end);

    let handshake = BusMessage::handshake(&HandshakePayload {
        version: 99,
        role: ClientRole::KitchenDisplay,
        client_name: None,
        client_id: None,
    });
    client_end.write_message(&handshake).await.unwrap();

    let reply = client_end.read_message().await.unwrap();
    assert_eq!(reply.event_type, EventType::Response);
    assert_eq!(reply.correlation_id, Some(handshake.request_id));

    let payload: ResponsePayload = reply.parse_payload().unwrap();
    assert!(!payload.success);
    assert!(payload.message.contains("version mismatch"));
}

// ==================== Engine end-to-end ====================

/// Snapshot stub for the engine test: one PENDING ticket
struct StubApi;

#[async_trait]
impl SnapshotSource for StubApi {
    async fn stations(&self, _store_id: StoreId) -> Result<Vec<Station>, ClientError> {
        Ok(vec![])
    }

    async fn tickets(
        &self,
        store_id: StoreId,
        _filter: &TicketFilter,
    ) -> Result<Vec<Ticket>, ClientError> {
        let created = Utc::now();
        Ok(vec![Ticket {
            ticket_id: 7,
            order_id: 70,
            store_id,
            table_number: 4,
            customer_label: None,
            station_id: None,
            status: TicketStatus::Pending,
            course_number: 1,
            version: 1,
            fired_at: None,
            created_at: created,
            updated_at: created,
            items: vec![TicketItem {
                id: 700,
                ticket_id: 7,
                menu_name: "Kimchi Stew".into(),
                quantity: 1,
                unit_price: 8000,
                item_status: ItemStatus::Pending,
                cook_station: CookStation::Kitchen,
                note: None,
            }],
        }])
    }

    async fn dashboard(&self, _store_id: StoreId) -> Result<DashboardSummary, ClientError> {
        Ok(DashboardSummary::default())
    }

    async fn unpaid_items(
        &self,
        _store_id: StoreId,
        _table_number: i32,
    ) -> Result<Vec<UnpaidItemRow>, ClientError> {
        Ok(vec![])
    }
}

struct MemoryConnector {
    server: PushServer,
}

#[async_trait]
impl BusConnector for MemoryConnector {
    async fn connect(&self) -> Result<BusClient, ClientError> {
        let (server_end, client_end) = MemoryTransport::pair(64 * 1024);
        self.server.attach(server_end);
        BusClient::from_transport(
            client_end,
            ClientRole::KitchenDisplay,
            Some("e2e-display".into()),
            RPC_TIMEOUT,
        )
        .await
    }
}

#[tokio::test]
async fn test_engine_mutation_patches_locally_and_broadcasts() {
    let store = MemoryStatusStore::default().with_ticket(7, 1, TicketStatus::Pending);
    let server = start_server(store);

    let engine = SyncEngine::new(
        EngineConfig::new(1),
        Arc::new(StubApi),
        Arc::new(MemoryConnector { server: server.clone() }),
    );
    engine.start();

    for _ in 0..100 {
        if engine.connection_state() == ConnectionState::Connected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(engine.connection_state(), ConnectionState::Connected);

    engine
        .load_tickets(TicketFilter::all(), RPC_TIMEOUT)
        .await
        .unwrap();

    // A second display in the same room must observe the canonical state
    let observer = connect(&server, ClientRole::KitchenDisplay).await;
    join(&observer, RoomRole::Kds, 1).await;
    let mut observer_events = observer.subscribe();

    let ack = engine
        .update_ticket_status(7, TicketStatus::Cooking, None, None)
        .await
        .unwrap();
    assert_eq!(ack.old_status, TicketStatus::Pending);

    // Optimistic local patch, before any echo is processed
    assert_eq!(engine.ticket(7).unwrap().status, TicketStatus::Cooking);

    match next_event(&mut observer_events).await {
        PushEvent::TicketUpdated { ticket_id, status, .. } => {
            assert_eq!(ticket_id, 7);
            assert_eq!(status, TicketStatus::Cooking);
        }
        other => panic!("Expected ticket.updated, got {other:?}"),
    }

    engine.shutdown().await;
}
