//! Bus client: framed connection to the push transport
//!
//! One background read task dispatches every inbound frame: responses
//! resolve their pending request by correlation id (RPC pattern), push
//! events go to a broadcast bus any number of consumers can subscribe to.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shared::event::PushEvent;
use shared::message::{
    BusMessage, ClientCommand, ClientRole, EventType, HandshakePayload, JoinAck,
    PROTOCOL_VERSION, ResponsePayload, TcpTransport, Transport,
};
use shared::model::{RoomRole, StoreId};

use crate::error::ClientError;

/// How the engine obtains a bus connection, and the seam that lets the
/// reconnect loop be tested without a server
#[async_trait::async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> Result<BusClient, ClientError>;
}

/// Production connector: TCP to the sync server
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub addr: String,
    pub role: ClientRole,
    pub client_name: Option<String>,
    pub handshake_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>, role: ClientRole) -> Self {
        Self {
            addr: addr.into(),
            role,
            client_name: None,
            handshake_timeout: Duration::from_secs(3),
        }
    }
}

#[async_trait::async_trait]
impl BusConnector for TcpConnector {
    async fn connect(&self) -> Result<BusClient, ClientError> {
        let transport = Arc::new(TcpTransport::connect(&self.addr).await?);
        BusClient::from_transport(
            transport,
            self.role,
            self.client_name.clone(),
            self.handshake_timeout,
        )
        .await
    }
}

/// A connected, handshaken bus client
#[derive(Debug, Clone)]
pub struct BusClient {
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<PushEvent>,
    pending: Arc<DashMap<Uuid, oneshot::Sender<BusMessage>>>,
    closed: CancellationToken,
}

impl BusClient {
    /// Connect over TCP and perform the protocol handshake
    pub async fn connect(
        addr: &str,
        role: ClientRole,
        client_name: Option<String>,
        handshake_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let transport = Arc::new(TcpTransport::connect(addr).await?);
        Self::from_transport(transport, role, client_name, handshake_timeout).await
    }

    /// Handshake over an already-established transport (memory pairs in
    /// tests, TCP in production)
    pub async fn from_transport(
        transport: Arc<dyn Transport>,
        role: ClientRole,
        client_name: Option<String>,
        handshake_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let (events, _) = broadcast::channel(1024);
        let client = Self {
            transport,
            events,
            pending: Arc::new(DashMap::new()),
            closed: CancellationToken::new(),
        };
        client.spawn_read_loop();

        let handshake = BusMessage::handshake(&HandshakePayload {
            version: PROTOCOL_VERSION,
            role,
            client_name,
            client_id: None,
        });

        let ack = client.request_raw(handshake, handshake_timeout).await?;
        let payload: ResponsePayload = ack.parse_payload()?;
        if !payload.success {
            return Err(ClientError::Rejected {
                message: payload.message,
                code: payload.error_code,
            });
        }

        tracing::debug!(message = %payload.message, "Bus handshake accepted");
        Ok(client)
    }

    fn spawn_read_loop(&self) {
        let transport = self.transport.clone();
        let events = self.events.clone();
        let pending = self.pending.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = closed.cancelled() => break,
                    read = transport.read_message() => match read {
                        Ok(msg) => msg,
                        Err(e) => {
                            tracing::debug!(error = %e, "Bus read loop ending");
                            break;
                        }
                    },
                };

                match msg.event_type {
                    EventType::Response => {
                        let Some(correlation_id) = msg.correlation_id else {
                            tracing::debug!("Response without correlation id dropped");
                            continue;
                        };
                        if let Some((_, tx)) = pending.remove(&correlation_id) {
                            let _ = tx.send(msg);
                        }
                    }
                    EventType::Push => match msg.parse_payload::<PushEvent>() {
                        Ok(event) => {
                            // No subscribers is fine; the engine may not have
                            // started its event loop yet
                            let _ = events.send(event);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Undecodable push event dropped");
                        }
                    },
                    other => {
                        tracing::debug!(event_type = %other, "Unexpected frame dropped");
                    }
                }
            }

            // Wake the engine's reconnect loop
            closed.cancel();
        });
    }

    /// Subscribe to push events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.events.subscribe()
    }

    /// Token cancelled when the transport drops
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Send a command and await its acknowledgement
    ///
    /// Returns the ack payload whether or not it reports success; use
    /// [`BusClient::expect_success`] to convert a failure ack into an error.
    pub async fn request(
        &self,
        command: &ClientCommand,
        timeout: Duration,
    ) -> Result<ResponsePayload, ClientError> {
        let msg = BusMessage::command(command);
        let ack = self.request_raw(msg, timeout).await?;
        Ok(ack.parse_payload()?)
    }

    async fn request_raw(
        &self,
        msg: BusMessage,
        timeout: Duration,
    ) -> Result<BusMessage, ClientError> {
        let request_id = msg.request_id;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        if let Err(e) = self.transport.write_message(&msg).await {
            self.pending.remove(&request_id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.remove(&request_id);
                Err(ClientError::Transport("Connection closed mid-request".into()))
            }
            Err(_) => {
                self.pending.remove(&request_id);
                Err(ClientError::Timeout(format!(
                    "No acknowledgement within {timeout:?}"
                )))
            }
        }
    }

    /// Map a failure ack to [`ClientError::Rejected`] and return its data
    pub fn expect_success(
        payload: ResponsePayload,
    ) -> Result<Option<serde_json::Value>, ClientError> {
        if payload.success {
            Ok(payload.data)
        } else {
            Err(ClientError::Rejected {
                message: payload.message,
                code: payload.error_code,
            })
        }
    }

    /// Join a store's audience room; the returned ack carries the room size
    /// so the caller can verify it is actually wired up
    pub async fn join_room(
        &self,
        role: RoomRole,
        store_id: StoreId,
        timeout: Duration,
    ) -> Result<JoinAck, ClientError> {
        let payload = self
            .request(&ClientCommand::JoinRoom { role, store_id }, timeout)
            .await?;
        let data = Self::expect_success(payload)?
            .ok_or_else(|| ClientError::Decode("Join ack carried no data".into()))?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn leave_room(
        &self,
        role: RoomRole,
        store_id: StoreId,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let payload = self
            .request(&ClientCommand::LeaveRoom { role, store_id }, timeout)
            .await?;
        Self::expect_success(payload)?;
        Ok(())
    }

    /// Close the connection. Safe to call multiple times.
    pub async fn close(&self) {
        self.closed.cancel();
        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "Transport close");
        }
    }
}
