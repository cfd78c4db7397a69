//! Local ticket model
//!
//! The single mutable copy of ticket state on a display client. Snapshots
//! replace collections wholesale; deltas set absolute fields in place.
//! Applying the same delta twice, or a delta and then a snapshot carrying
//! the same final state, converges — no operation has increment semantics.
//!
//! Station `active_item_count` is derived: recomputed from the ticket set
//! after every mutation, never incrementally drifted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use shared::model::{
    DashboardSummary, ItemId, ItemStatus, Station, Ticket, TicketId, TicketStatus,
};

/// In-memory ticket/station table owned by the sync engine
#[derive(Debug, Default)]
pub struct TicketStore {
    tickets: HashMap<TicketId, Ticket>,
    stations: Vec<Station>,
    dashboard: DashboardSummary,
}

impl TicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Snapshots ====================

    /// Whole-store snapshot: replaces the collection
    pub fn replace_tickets(&mut self, tickets: Vec<Ticket>) {
        self.tickets = tickets.into_iter().map(|t| (t.ticket_id, t)).collect();
        self.recompute_station_counts();
    }

    /// Filtered snapshot: merges by ticket id, leaving tickets outside the
    /// filter untouched
    pub fn merge_tickets(&mut self, tickets: Vec<Ticket>) {
        for ticket in tickets {
            self.tickets.insert(ticket.ticket_id, ticket);
        }
        self.recompute_station_counts();
    }

    pub fn replace_stations(&mut self, stations: Vec<Station>) {
        self.stations = stations;
        self.recompute_station_counts();
    }

    pub fn set_dashboard(&mut self, dashboard: DashboardSummary) {
        self.dashboard = dashboard;
    }

    // ==================== Deltas ====================

    /// Patch one ticket's status and timestamp in place
    ///
    /// Returns false if the ticket is unknown locally — a delta never
    /// creates a ticket; the next full refresh corrects a stale view.
    pub fn patch_ticket_status(
        &mut self,
        ticket_id: TicketId,
        status: TicketStatus,
        updated_at: DateTime<Utc>,
    ) -> bool {
        let Some(ticket) = self.tickets.get_mut(&ticket_id) else {
            return false;
        };
        ticket.status = status;
        ticket.updated_at = updated_at;
        self.recompute_station_counts();
        true
    }

    /// Patch one item's status, wherever its ticket is
    pub fn patch_item_status(&mut self, item_id: ItemId, status: ItemStatus) -> bool {
        for ticket in self.tickets.values_mut() {
            if let Some(item) = ticket.items.iter_mut().find(|i| i.id == item_id) {
                item.item_status = status;
                self.recompute_station_counts();
                return true;
            }
        }
        false
    }

    /// Retire a ticket from the display (terminal status or hidden)
    pub fn remove_ticket(&mut self, ticket_id: TicketId) -> bool {
        let removed = self.tickets.remove(&ticket_id).is_some();
        if removed {
            self.recompute_station_counts();
        }
        removed
    }

    /// Drop everything (engine teardown)
    pub fn clear(&mut self) {
        self.tickets.clear();
        self.stations.clear();
        self.dashboard = DashboardSummary::default();
    }

    // ==================== Queries ====================

    pub fn ticket(&self, ticket_id: TicketId) -> Option<&Ticket> {
        self.tickets.get(&ticket_id)
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets.len()
    }

    /// Active tickets in display order: status priority (COOKING before
    /// PENDING before DONE), then course number, then fire/creation time.
    /// Mirrors kitchen workflow priority, not arrival order.
    pub fn display_tickets(&self) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .tickets
            .values()
            .filter(|t| !matches!(t.status, TicketStatus::Served | TicketStatus::Canceled))
            .cloned()
            .collect();

        tickets.sort_by(|a, b| {
            a.status
                .display_priority()
                .cmp(&b.status.display_priority())
                .then(a.course_number.cmp(&b.course_number))
                .then(a.queued_at().cmp(&b.queued_at()))
                .then(a.ticket_id.cmp(&b.ticket_id))
        });
        tickets
    }

    pub fn stations(&self) -> Vec<Station> {
        self.stations.clone()
    }

    pub fn dashboard(&self) -> DashboardSummary {
        self.dashboard.clone()
    }

    /// Count of items still being worked, per station
    fn recompute_station_counts(&mut self) {
        for station in &mut self.stations {
            station.active_item_count = self
                .tickets
                .values()
                .filter(|t| t.station_id == Some(station.id) && !t.status.is_terminal())
                .flat_map(|t| &t.items)
                .filter(|i| matches!(i.item_status, ItemStatus::Pending | ItemStatus::Cooking))
                .count() as i64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::model::TicketItem;

    fn ticket(id: TicketId, status: TicketStatus) -> Ticket {
        let created: DateTime<Utc> = "2026-03-01T10:00:00Z".parse().unwrap();
        Ticket {
            ticket_id: id,
            order_id: id * 10,
            store_id: 1,
            table_number: 4,
            customer_label: None,
            station_id: Some(1),
            status,
            course_number: 1,
            version: 1,
            fired_at: None,
            created_at: created,
            updated_at: created,
            items: vec![TicketItem {
                id: id * 100,
                ticket_id: id,
                menu_name: "Kimchi Stew".into(),
                quantity: 1,
                unit_price: 8000,
                item_status: ItemStatus::Pending,
                cook_station: Default::default(),
                note: None,
            }],
        }
    }

    #[test]
    fn test_delta_is_idempotent() {
        let mut store = TicketStore::new();
        store.replace_tickets(vec![ticket(1, TicketStatus::Pending)]);

        let at: DateTime<Utc> = "2026-03-01T10:05:00Z".parse().unwrap();
        assert!(store.patch_ticket_status(1, TicketStatus::Cooking, at));
        let once = store.ticket(1).unwrap().clone();

        assert!(store.patch_ticket_status(1, TicketStatus::Cooking, at));
        assert_eq!(store.ticket(1).unwrap(), &once);
    }

    #[test]
    fn test_unknown_ticket_delta_creates_nothing() {
        let mut store = TicketStore::new();
        store.replace_tickets(vec![ticket(1, TicketStatus::Pending)]);

        assert!(!store.patch_ticket_status(99, TicketStatus::Cooking, Utc::now()));
        assert_eq!(store.ticket_count(), 1);
        assert!(store.ticket(99).is_none());
    }

    #[test]
    fn test_snapshot_replaces_wholesale() {
        let mut store = TicketStore::new();
        store.replace_tickets(vec![ticket(1, TicketStatus::Pending), ticket(2, TicketStatus::Cooking)]);
        store.replace_tickets(vec![ticket(3, TicketStatus::Pending)]);

        assert_eq!(store.ticket_count(), 1);
        assert!(store.ticket(1).is_none());
        assert!(store.ticket(3).is_some());
    }

    #[test]
    fn test_filtered_snapshot_merges() {
        let mut store = TicketStore::new();
        store.replace_tickets(vec![ticket(1, TicketStatus::Pending)]);

        let mut updated = ticket(1, TicketStatus::Cooking);
        updated.version = 2;
        store.merge_tickets(vec![updated, ticket(2, TicketStatus::Pending)]);

        assert_eq!(store.ticket_count(), 2);
        assert_eq!(store.ticket(1).unwrap().status, TicketStatus::Cooking);
    }

    #[test]
    fn test_display_order_cooking_pending_done() {
        let mut store = TicketStore::new();
        store.replace_tickets(vec![
            ticket(1, TicketStatus::Done),
            ticket(2, TicketStatus::Pending),
            ticket(3, TicketStatus::Cooking),
        ]);

        let statuses: Vec<TicketStatus> =
            store.display_tickets().iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![TicketStatus::Cooking, TicketStatus::Pending, TicketStatus::Done]
        );
    }

    #[test]
    fn test_display_order_breaks_ties_by_course_then_time() {
        let mut store = TicketStore::new();
        let mut early = ticket(1, TicketStatus::Pending);
        early.course_number = 2;
        let mut late = ticket(2, TicketStatus::Pending);
        late.course_number = 1;
        let mut fired_first = ticket(3, TicketStatus::Pending);
        fired_first.course_number = 1;
        fired_first.fired_at = Some("2026-03-01T09:00:00Z".parse().unwrap());
        store.replace_tickets(vec![early, late, fired_first]);

        let ids: Vec<TicketId> = store.display_tickets().iter().map(|t| t.ticket_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_served_and_canceled_not_displayed() {
        let mut store = TicketStore::new();
        store.replace_tickets(vec![
            ticket(1, TicketStatus::Served),
            ticket(2, TicketStatus::Canceled),
            ticket(3, TicketStatus::Pending),
        ]);

        let ids: Vec<TicketId> = store.display_tickets().iter().map(|t| t.ticket_id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_station_counts_recomputed_not_drifted() {
        let mut store = TicketStore::new();
        store.replace_stations(vec![Station {
            id: 1,
            name: "Grill".into(),
            is_expo: false,
            active_item_count: 999, // stale upstream value must be overwritten
        }]);
        store.replace_tickets(vec![ticket(1, TicketStatus::Pending), ticket(2, TicketStatus::Cooking)]);

        assert_eq!(store.stations()[0].active_item_count, 2);

        store.remove_ticket(2);
        assert_eq!(store.stations()[0].active_item_count, 1);
    }

    #[test]
    fn test_item_patch_only_touches_its_row() {
        let mut store = TicketStore::new();
        store.replace_tickets(vec![ticket(1, TicketStatus::Cooking)]);

        assert!(store.patch_item_status(100, ItemStatus::Done));
        assert_eq!(store.ticket(1).unwrap().items[0].item_status, ItemStatus::Done);
        assert_eq!(store.ticket(1).unwrap().status, TicketStatus::Cooking);

        assert!(!store.patch_item_status(555, ItemStatus::Done));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut store = TicketStore::new();
        store.replace_tickets(vec![ticket(1, TicketStatus::Pending)]);
        store.clear();
        store.clear();
        assert_eq!(store.ticket_count(), 0);
        assert!(store.stations().is_empty());
    }
}
