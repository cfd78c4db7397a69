//! Pluggable transport layer for the message bus
//!
//! ```text
//!         ┌────────────────────┐
//!         │   Transport Trait  │
//!         └────────┬───────────┘
//!                  │
//!          ┌───────┴────────┐
//!          ▼                ▼
//!     TcpTransport    MemoryTransport
//!     (network)       (same-process, tests)
//! ```
//!
//! The wire layout is documented on [`crate::message::BusMessage`]; the
//! framing helpers here are the only code that touches raw bytes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BusMessage, EventType};

/// Transport-level failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Peer closed the connection; expected during normal client churn
    #[error("Peer disconnected")]
    Disconnected,

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Bidirectional message transport
///
/// Reads and writes take `&self` so one connection can be read and written
/// from different tasks; implementations lock each half independently.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn read_message(&self) -> Result<BusMessage, TransportError>;

    async fn write_message(&self, msg: &BusMessage) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    /// Peer address, where the transport has one
    fn peer_addr(&self) -> Option<String> {
        None
    }
}

// ========== Framing helpers ==========

/// Read one framed [`BusMessage`] from an async stream
pub(crate) async fn read_from_stream<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<BusMessage, TransportError> {
    // Event type (1 byte)
    let mut type_buf = [0u8; 1];
    match reader.read_exact(&mut type_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransportError::Disconnected);
        }
        Err(e) => return Err(TransportError::Io(format!("Read type failed: {e}"))),
    }

    let event_type = EventType::try_from(type_buf[0])
        .map_err(|_| TransportError::InvalidFrame(format!("Unknown event type {}", type_buf[0])))?;

    // Request ID (16 bytes)
    let mut uuid_buf = [0u8; 16];
    reader
        .read_exact(&mut uuid_buf)
        .await
        .map_err(|e| TransportError::Io(format!("Read request id failed: {e}")))?;
    let request_id = Uuid::from_bytes(uuid_buf);

    // Correlation ID (16 bytes, nil = None)
    let mut correlation_buf = [0u8; 16];
    reader
        .read_exact(&mut correlation_buf)
        .await
        .map_err(|e| TransportError::Io(format!("Read correlation id failed: {e}")))?;
    let correlation_raw = Uuid::from_bytes(correlation_buf);
    let correlation_id = (!correlation_raw.is_nil()).then_some(correlation_raw);

    // Payload length (4 bytes LE)
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| TransportError::Io(format!("Read len failed: {e}")))?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| TransportError::Io(format!("Read payload failed: {e}")))?;

    Ok(BusMessage {
        request_id,
        event_type,
        source: None,
        correlation_id,
        payload,
    })
}

/// Write one framed [`BusMessage`] to an async stream
pub(crate) async fn write_to_stream<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &BusMessage,
) -> Result<(), TransportError> {
    let mut data = Vec::with_capacity(1 + 16 + 16 + 4 + msg.payload.len());
    data.push(msg.event_type as u8);
    data.extend_from_slice(msg.request_id.as_bytes());
    data.extend_from_slice(msg.correlation_id.unwrap_or(Uuid::nil()).as_bytes());
    data.extend_from_slice(&(msg.payload.len() as u32).to_le_bytes());
    data.extend_from_slice(&msg.payload);

    writer
        .write_all(&data)
        .await
        .map_err(|e| TransportError::Io(format!("Write failed: {e}")))
}

// ========== TCP ==========

/// TCP transport
#[derive(Debug)]
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    addr: Option<String>,
}

impl TcpTransport {
    /// Connect to a listening bus server
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Connect(format!("TCP connect to {addr} failed: {e}")))?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an accepted stream
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok().map(|a| a.to_string());
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            addr: peer_addr,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_message(&self) -> Result<BusMessage, TransportError> {
        let mut reader = self.reader.lock().await;
        read_from_stream(&mut *reader).await
    }

    async fn write_message(&self, msg: &BusMessage) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        write_to_stream(&mut *writer, msg).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|e| TransportError::Io(format!("TCP close failed: {e}")))
    }

    fn peer_addr(&self) -> Option<String> {
        self.addr.clone()
    }
}

// ========== Memory ==========

/// In-process transport for same-process communication and tests
///
/// A [`MemoryTransport::pair`] behaves like the two ends of a socket: frames
/// written on one end are read on the other, with the same wire framing as
/// TCP.
#[derive(Debug)]
pub struct MemoryTransport {
    reader: Mutex<ReadHalf<tokio::io::DuplexStream>>,
    writer: Mutex<WriteHalf<tokio::io::DuplexStream>>,
}

impl MemoryTransport {
    /// Create a connected pair of transports
    pub fn pair(capacity: usize) -> (Arc<Self>, Arc<Self>) {
        let (a, b) = tokio::io::duplex(capacity);
        (Arc::new(Self::from_duplex(a)), Arc::new(Self::from_duplex(b)))
    }

    fn from_duplex(stream: tokio::io::DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn read_message(&self) -> Result<BusMessage, TransportError> {
        let mut reader = self.reader.lock().await;
        read_from_stream(&mut *reader).await
    }

    async fn write_message(&self, msg: &BusMessage) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        write_to_stream(&mut *writer, msg).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|e| TransportError::Io(format!("Memory close failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PushEvent;

    #[tokio::test]
    async fn test_frame_round_trip_over_memory_pair() {
        let (a, b) = MemoryTransport::pair(4096);

        let msg = BusMessage::push(&PushEvent::TicketHidden { ticket_id: 3 });
        a.write_message(&msg).await.unwrap();

        let received = b.read_message().await.unwrap();
        assert_eq!(received.request_id, msg.request_id);
        assert_eq!(received.event_type, EventType::Push);
        assert_eq!(received.payload, msg.payload);
        assert!(received.correlation_id.is_none());
    }

    #[tokio::test]
    async fn test_correlation_id_survives_framing() {
        let (a, b) = MemoryTransport::pair(4096);

        let id = Uuid::new_v4();
        let msg = BusMessage::response(&crate::message::ResponsePayload::ok("ok", None))
            .with_correlation_id(id);
        a.write_message(&msg).await.unwrap();

        let received = b.read_message().await.unwrap();
        assert_eq!(received.correlation_id, Some(id));
    }

    #[tokio::test]
    async fn test_closed_peer_reads_as_disconnected() {
        let (a, b) = MemoryTransport::pair(64);
        a.close().await.unwrap();
        drop(a);

        match b.read_message().await {
            Err(TransportError::Disconnected) => {}
            other => panic!("Expected Disconnected, got {other:?}"),
        }
    }
}
