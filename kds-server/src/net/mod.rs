//! Push transport — TCP server for display and printer clients
//!
//! Connection lifecycle, in the order it happens:
//!
//! 1. Protocol handshake: first frame must be a `Handshake` with a matching
//!    protocol version and a declared role. Anonymous kitchen-display
//!    connections are accepted — a store's kitchen hardware may not carry
//!    user credentials.
//! 2. The connection is registered with the room registry under its
//!    connection id, with a bounded outbound queue.
//! 3. Two tasks per connection: an outbound forwarder draining that queue,
//!    and an inbound reader dispatching client commands. Both stop on the
//!    shared disconnect token.
//! 4. Disconnect is silent cleanup only; membership is routing metadata,
//!    not business state.

use std::sync::Arc;

use shared::message::{
    BusMessage, EventType, HandshakePayload, PROTOCOL_VERSION, ResponsePayload, TcpTransport,
    Transport, TransportError,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::commands::{self, CommandContext};
use crate::error::{AppError, AppResult};

/// Delay before closing a connection after a handshake error, so the client
/// receives the reason instead of a bare reset
const HANDSHAKE_ERROR_DELAY_MS: u64 = 100;

/// The push transport server
#[derive(Clone)]
pub struct PushServer {
    ctx: CommandContext,
    outbound_capacity: usize,
    shutdown: CancellationToken,
}

impl PushServer {
    pub fn new(ctx: CommandContext, outbound_capacity: usize, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            outbound_capacity,
            shutdown,
        }
    }

    /// Bind the listen socket. Separate from [`PushServer::serve`] so tests
    /// can bind port 0 and read the assigned address.
    pub async fn bind(addr: &str) -> AppResult<TcpListener> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::internal(format!("Failed to bind {addr}: {e}")))
    }

    /// Accept connections until shutdown
    pub async fn serve(&self, listener: TcpListener) {
        let local = listener.local_addr().ok();
        tracing::info!(addr = ?local, "Push transport listening");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Push transport shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!(peer = %addr, "Client connected");
                            self.attach(Arc::new(TcpTransport::from_stream(stream)));
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Accept failed");
                        }
                    }
                }
            }
        }
    }

    /// Run the full connection lifecycle for an already-established
    /// transport. The accept loop uses this for every TCP stream; tests
    /// attach one end of a memory pair.
    pub fn attach(&self, transport: Arc<dyn Transport>) {
        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.handle_connection(transport).await {
                tracing::debug!(error = %e, "Connection handler finished");
            }
        });
    }

    async fn handle_connection(&self, transport: Arc<dyn Transport>) -> AppResult<()> {
        let conn_id = perform_handshake(&transport).await?;

        let (conn_tx, conn_rx) = mpsc::channel(self.outbound_capacity);
        let registry = self.ctx.registry.clone();
        registry.register(conn_id.clone(), conn_tx).await?;

        let disconnect = CancellationToken::new();
        let forwarder = spawn_forwarder(
            transport.clone(),
            conn_rx,
            self.shutdown.clone(),
            disconnect.clone(),
            conn_id.clone(),
        );

        self.read_loop(&transport, &conn_id, &disconnect).await;

        // Silent cleanup: membership only, no compensating events
        disconnect.cancel();
        forwarder.abort();
        let _ = transport.close().await;
        registry.deregister(conn_id.clone()).await?;
        tracing::debug!(conn_id = %conn_id, "Connection cleaned up");

        Ok(())
    }

    /// Read client frames until disconnect or shutdown
    async fn read_loop(
        &self,
        transport: &Arc<dyn Transport>,
        conn_id: &str,
        disconnect: &CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                read = transport.read_message() => match read {
                    Ok(msg) => msg,
                    Err(TransportError::Disconnected) => {
                        tracing::debug!(conn_id = %conn_id, "Client disconnected");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(conn_id = %conn_id, error = %e, "Client read error");
                        break;
                    }
                },
            };

            match msg.event_type {
                EventType::RequestCommand => {
                    // Source is injected server-side, never trusted from the wire
                    let mut msg = msg;
                    msg.source = Some(conn_id.to_string());

                    let ack = commands::handle_command(&self.ctx, conn_id, &msg).await;
                    if let Err(e) = transport.write_message(&ack).await {
                        tracing::debug!(conn_id = %conn_id, error = %e, "Ack write failed");
                        break;
                    }
                }
                other => {
                    tracing::debug!(
                        conn_id = %conn_id,
                        event_type = %other,
                        "Dropping unexpected client frame"
                    );
                }
            }
        }

        disconnect.cancel();
    }
}

/// Validate the first frame and derive the connection id
async fn perform_handshake(transport: &Arc<dyn Transport>) -> AppResult<String> {
    let msg = transport.read_message().await?;

    if msg.event_type != EventType::Handshake {
        return Err(AppError::invalid(format!(
            "Expected handshake, got {}",
            msg.event_type
        )));
    }

    let payload: HandshakePayload = msg
        .parse_payload()
        .map_err(|e| AppError::invalid(format!("Invalid handshake payload: {e}")))?;

    if payload.version != PROTOCOL_VERSION {
        let reason = format!(
            "Protocol version mismatch: server={}, client={}",
            PROTOCOL_VERSION, payload.version
        );
        send_handshake_error(transport, &msg, &reason).await;
        return Err(AppError::invalid(reason));
    }

    let conn_id = payload
        .client_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    tracing::debug!(
        conn_id = %conn_id,
        role = ?payload.role,
        client = payload.client_name.as_deref().unwrap_or("anonymous"),
        peer = transport.peer_addr().as_deref().unwrap_or("local"),
        "Handshake accepted"
    );

    let ack = ResponsePayload::ok(
        format!("Connected as {conn_id}"),
        Some(serde_json::json!({ "client_id": conn_id })),
    );
    transport
        .write_message(&BusMessage::response(&ack).with_correlation_id(msg.request_id))
        .await?;

    Ok(conn_id)
}

async fn send_handshake_error(transport: &Arc<dyn Transport>, msg: &BusMessage, reason: &str) {
    let ack = ResponsePayload::error(reason, None);
    if let Err(e) = transport
        .write_message(&BusMessage::response(&ack).with_correlation_id(msg.request_id))
        .await
    {
        tracing::debug!(error = %e, "Failed to send handshake error");
        return;
    }

    tokio::time::sleep(std::time::Duration::from_millis(HANDSHAKE_ERROR_DELAY_MS)).await;
}

/// Drain the connection's outbound queue onto the transport
fn spawn_forwarder(
    transport: Arc<dyn Transport>,
    mut rx: mpsc::Receiver<BusMessage>,
    shutdown: CancellationToken,
    disconnect: CancellationToken,
    conn_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = disconnect.cancelled() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(e) = transport.write_message(&msg).await {
                        tracing::debug!(conn_id = %conn_id, error = %e, "Forward write failed");
                        disconnect.cancel();
                        break;
                    }
                }
            }
        }

        tracing::debug!(conn_id = %conn_id, "Forwarder stopped");
    })
}
