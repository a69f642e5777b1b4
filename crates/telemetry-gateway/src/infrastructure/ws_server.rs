//! WebSocket server: accept loop and per-session tasks for push-channel
//! clients.
//!
//! Each accepted TCP connection is upgraded to a WebSocket, attached to the
//! [`BroadcastHub`], and served by its own task:
//!
//! - hub outbox → client: every broadcast envelope as one text frame.
//! - client → hub: `command` / `getStatus` requests; the reply is written
//!   straight back on the same socket, so no other session can see it.
//! - keepalive: a WebSocket ping every `ping_interval`; a session that has
//!   sent nothing (not even a pong) for `ping_interval + ping_timeout` is
//!   dropped.
//!
//! The accept loop and every session stop when the cancellation token fires.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use telemetry_core::{ClientRequest, HubEvent};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::config::GatewayConfig;
use crate::infrastructure::hub::BroadcastHub;

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the push-channel listener.
///
/// # Errors
///
/// Returns an error if the address is in use or cannot be bound.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind push-channel listener on {addr}"))
}

/// Accepts sessions on `listener` until `cancel` fires.
///
/// # Errors
///
/// Currently infallible once the listener is bound; accept errors are logged
/// and the loop continues.
pub async fn run_server(
    listener: TcpListener,
    hub: Arc<BroadcastHub>,
    config: Arc<GatewayConfig>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("push channel listening on {addr}");
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("shutdown requested; stopping accept loop");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("new connection from {peer}");
                    let hub = Arc::clone(&hub);
                    let config = Arc::clone(&config);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        handle_session(stream, peer, hub, config, cancel).await;
                    });
                }
                Err(e) => error!("accept error: {e}"),
            },
        }
    }

    Ok(())
}

// ── Per-session handler ───────────────────────────────────────────────────────

async fn handle_session(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<BroadcastHub>,
    config: Arc<GatewayConfig>,
    cancel: CancellationToken,
) {
    match run_session(stream, peer, hub, config, cancel).await {
        Ok(()) => info!("session {peer} closed"),
        Err(e) => warn!("session {peer} closed with error: {e:#}"),
    }
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<BroadcastHub>,
    config: Arc<GatewayConfig>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let ws = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer}"))?;

    let id = Uuid::new_v4();
    let mut session = hub.attach(id);
    info!("session {id} established from {peer}");

    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut ticker = interval(config.ping_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut last_heard = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                break;
            }

            outgoing = session.outbox.recv() => match outgoing {
                Some(event) => send_event(&mut ws_tx, &event)
                    .await
                    .with_context(|| format!("session {id}: send failed"))?,
                None => break,
            },

            incoming = ws_rx.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) | None => {
                        debug!("session {id}: client went away");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("session {id}: WebSocket error: {e}");
                        break;
                    }
                };
                last_heard = Instant::now();

                match msg {
                    WsMessage::Text(text) => match serde_json::from_str::<ClientRequest>(&text) {
                        Ok(request) => {
                            debug!("session {id}: request {}", request_name(&request));
                            let reply = hub.handle_request(request).await;
                            send_event(&mut ws_tx, &reply)
                                .await
                                .with_context(|| format!("session {id}: reply failed"))?;
                        }
                        Err(e) => warn!("session {id}: unrecognised message ignored: {e}"),
                    },
                    WsMessage::Close(_) => {
                        debug!("session {id}: Close frame received");
                        break;
                    }
                    WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                    WsMessage::Binary(_) | WsMessage::Frame(_) => {
                        warn!("session {id}: non-text frame ignored");
                    }
                }
            }

            _ = ticker.tick() => {
                if last_heard.elapsed() > config.idle_limit() {
                    warn!("session {id}: silent for {:?}; dropping", last_heard.elapsed());
                    break;
                }
                ws_tx
                    .send(WsMessage::Ping(Vec::new()))
                    .await
                    .with_context(|| format!("session {id}: keepalive ping failed"))?;
            }
        }
    }

    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn send_event(sink: &mut WsSink, event: &HubEvent) -> anyhow::Result<()> {
    let text = serde_json::to_string(event).context("failed to serialize hub event")?;
    sink.send(WsMessage::Text(text)).await?;
    Ok(())
}

/// Wire name of a request, for logs.  Never includes the payload.
fn request_name(request: &ClientRequest) -> &'static str {
    match request {
        ClientRequest::Command(_) => "command",
        ClientRequest::GetStatus => "getStatus",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_core::CommandRequest;

    #[test]
    fn test_request_name_command_hides_payload() {
        let request = ClientRequest::Command(CommandRequest {
            id: None,
            payload: serde_json::json!({"secret": "x"}),
        });
        let name = request_name(&request);
        assert_eq!(name, "command");
        assert!(!name.contains("secret"));
    }

    #[test]
    fn test_request_name_get_status() {
        assert_eq!(request_name(&ClientRequest::GetStatus), "getStatus");
    }
}
