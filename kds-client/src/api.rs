//! Snapshot endpoints
//!
//! The snapshot API is an external collaborator — this module only consumes
//! its `{success, ...payload, message?}` envelopes. [`SnapshotSource`] is
//! the seam: production uses [`HttpSnapshotApi`], engine tests implement
//! the trait over fixture data.

use async_trait::async_trait;
use serde::Deserialize;

use shared::model::{
    DashboardSummary, Station, StationId, StoreId, Ticket, TicketStatus, UnpaidItemRow,
};

use crate::error::ClientError;

/// Scope of a ticket snapshot load
///
/// An empty filter loads everything and replaces the local collection; a
/// filtered load merges into it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketFilter {
    pub station: Option<StationId>,
    pub statuses: Vec<TicketStatus>,
}

impl TicketFilter {
    /// The whole-store scope: snapshot replaces, never merges
    pub fn all() -> Self {
        Self::default()
    }

    /// The kitchen's default working view
    pub fn open() -> Self {
        Self {
            station: None,
            statuses: vec![TicketStatus::Pending, TicketStatus::Cooking],
        }
    }

    pub fn is_all(&self) -> bool {
        self.station.is_none() && self.statuses.is_empty()
    }

    fn status_param(&self) -> Option<String> {
        if self.statuses.is_empty() {
            return None;
        }
        Some(
            self.statuses
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Authoritative snapshot reads
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn stations(&self, store_id: StoreId) -> Result<Vec<Station>, ClientError>;

    async fn tickets(
        &self,
        store_id: StoreId,
        filter: &TicketFilter,
    ) -> Result<Vec<Ticket>, ClientError>;

    async fn dashboard(&self, store_id: StoreId) -> Result<DashboardSummary, ClientError>;

    /// Raw unpaid item rows for one table, input to the consolidator
    async fn unpaid_items(
        &self,
        store_id: StoreId,
        table_number: i32,
    ) -> Result<Vec<UnpaidItemRow>, ClientError>;
}

// Response envelopes. Payload fields default so an unsuccessful envelope
// still decodes and surfaces its message.

#[derive(Debug, Deserialize)]
struct StationsEnvelope {
    success: bool,
    #[serde(default)]
    stations: Vec<Station>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TicketsEnvelope {
    success: bool,
    #[serde(default)]
    tickets: Vec<Ticket>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DashboardEnvelope {
    success: bool,
    #[serde(default)]
    dashboard: DashboardSummary,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnpaidItemsEnvelope {
    success: bool,
    #[serde(default)]
    items: Vec<UnpaidItemRow>,
    #[serde(default)]
    message: Option<String>,
}

fn envelope_error(message: Option<String>) -> ClientError {
    ClientError::Api(message.unwrap_or_else(|| "Request was not successful".into()))
}

/// HTTP implementation against the order system's API
#[derive(Debug, Clone)]
pub struct HttpSnapshotApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpSnapshotApi {
    /// `base_url` up to and including the API prefix, e.g.
    /// `http://pos.local:3000/api/kds`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotApi {
    async fn stations(&self, store_id: StoreId) -> Result<Vec<Station>, ClientError> {
        let envelope: StationsEnvelope = self
            .http
            .get(format!("{}/stations", self.base_url))
            .query(&[("store_id", store_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !envelope.success {
            return Err(envelope_error(envelope.message));
        }
        Ok(envelope.stations)
    }

    async fn tickets(
        &self,
        store_id: StoreId,
        filter: &TicketFilter,
    ) -> Result<Vec<Ticket>, ClientError> {
        let mut query: Vec<(&str, String)> = vec![("store_id", store_id.to_string())];
        if let Some(status) = filter.status_param() {
            query.push(("status", status));
        }
        if let Some(station) = filter.station {
            query.push(("station", station.to_string()));
        }

        let envelope: TicketsEnvelope = self
            .http
            .get(format!("{}/tickets", self.base_url))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !envelope.success {
            return Err(envelope_error(envelope.message));
        }
        Ok(envelope.tickets)
    }

    async fn dashboard(&self, store_id: StoreId) -> Result<DashboardSummary, ClientError> {
        let envelope: DashboardEnvelope = self
            .http
            .get(format!("{}/dashboard", self.base_url))
            .query(&[("store_id", store_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !envelope.success {
            return Err(envelope_error(envelope.message));
        }
        Ok(envelope.dashboard)
    }

    async fn unpaid_items(
        &self,
        store_id: StoreId,
        table_number: i32,
    ) -> Result<Vec<UnpaidItemRow>, ClientError> {
        let envelope: UnpaidItemsEnvelope = self
            .http
            .get(format!("{}/tables/{table_number}/unpaid-items", self.base_url))
            .query(&[("store_id", store_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !envelope.success {
            return Err(envelope_error(envelope.message));
        }
        Ok(envelope.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_scope() {
        assert!(TicketFilter::all().is_all());
        assert!(!TicketFilter::open().is_all());
        assert!(
            !TicketFilter {
                station: Some(2),
                statuses: vec![],
            }
            .is_all()
        );
    }

    #[test]
    fn test_status_param_is_csv() {
        assert_eq!(TicketFilter::open().status_param().unwrap(), "PENDING,COOKING");
        assert_eq!(TicketFilter::all().status_param(), None);
    }

    #[test]
    fn test_unsuccessful_envelope_decodes_without_payload() {
        let envelope: TicketsEnvelope =
            serde_json::from_str(r#"{"success":false,"message":"store not found"}"#).unwrap();
        assert!(!envelope.success);
        assert!(envelope.tickets.is_empty());
        assert_eq!(envelope.message.as_deref(), Some("store not found"));
    }
}
