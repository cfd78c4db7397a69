//! Message bus types shared between the sync server and clients
//!
//! One [`BusMessage`] is one frame on the push transport. The wire layout is
//! fixed and versioned:
//!
//! ```text
//! ┌──────┬────────────┬────────────────┬─────────┬─────────────┐
//! │ type │ request_id │ correlation_id │ len     │ payload     │
//! │ 1 B  │ 16 B       │ 16 B (nil=None)│ 4 B LE  │ len B JSON  │
//! └──────┴────────────┴────────────────┴─────────┴─────────────┘
//! ```
//!
//! `correlation_id` links a [`EventType::Response`] back to the request it
//! acknowledges (RPC pattern).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod payload;
pub mod transport;
pub use payload::*;
pub use transport::{MemoryTransport, TcpTransport, Transport, TransportError};

use crate::event::PushEvent;

/// Protocol version, checked during handshake
pub const PROTOCOL_VERSION: u16 = 1;

/// Message bus event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// First frame on every connection: declared role + protocol version
    Handshake = 0,
    /// Client request (room control, status mutations)
    RequestCommand = 1,
    /// Server acknowledgement of a request (carries correlation_id)
    Response = 2,
    /// Room-scoped push event
    Push = 3,
}

impl TryFrom<u8> for EventType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventType::Handshake),
            1 => Ok(EventType::RequestCommand),
            2 => Ok(EventType::Response),
            3 => Ok(EventType::Push),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Handshake => write!(f, "handshake"),
            EventType::RequestCommand => write!(f, "request_command"),
            EventType::Response => write!(f, "response"),
            EventType::Push => write!(f, "push"),
        }
    }
}

/// One frame on the message bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub request_id: Uuid,
    pub event_type: EventType,
    /// Connection id of the sender — injected by the server on inbound
    /// frames, never trusted from the wire
    pub source: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(event_type: EventType, payload: Vec<u8>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            event_type,
            source: None,
            correlation_id: None,
            payload,
        }
    }

    /// Link this message to a request (RPC response)
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Create a handshake frame
    pub fn handshake(payload: &HandshakePayload) -> Self {
        Self::new(
            EventType::Handshake,
            serde_json::to_vec(payload).expect("Failed to serialize handshake payload"),
        )
    }

    /// Create a client command frame
    pub fn command(command: &ClientCommand) -> Self {
        Self::new(
            EventType::RequestCommand,
            serde_json::to_vec(command).expect("Failed to serialize command"),
        )
    }

    /// Create a response frame
    pub fn response(payload: &ResponsePayload) -> Self {
        Self::new(
            EventType::Response,
            serde_json::to_vec(payload).expect("Failed to serialize response payload"),
        )
    }

    /// Create a push-event frame
    pub fn push(event: &PushEvent) -> Self {
        Self::new(
            EventType::Push,
            serde_json::to_vec(event).expect("Failed to serialize push event"),
        )
    }

    /// Parse the payload as a specific type
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TicketStatus;

    #[test]
    fn test_event_type_round_trip() {
        for raw in 0u8..=3 {
            let event_type = EventType::try_from(raw).unwrap();
            assert_eq!(event_type as u8, raw);
        }
        assert!(EventType::try_from(9).is_err());
    }

    #[test]
    fn test_push_frame_payload() {
        let event = PushEvent::TicketHidden { ticket_id: 5 };
        let msg = BusMessage::push(&event);

        assert_eq!(msg.event_type, EventType::Push);
        assert!(!msg.request_id.is_nil());
        assert!(msg.correlation_id.is_none());

        let parsed: PushEvent = msg.parse_payload().unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_response_correlation() {
        let cmd = BusMessage::command(&ClientCommand::SetTicketStatus {
            ticket_id: 1,
            next: TicketStatus::Cooking,
            reason: None,
            if_version: None,
            actor: None,
        });

        let ack_payload = ResponsePayload::ok("Status updated", None);
        let ack = BusMessage::response(&ack_payload).with_correlation_id(cmd.request_id);
        assert_eq!(ack.correlation_id, Some(cmd.request_id));
    }
}
