//! Push channel: a WebSocket client to the gateway hub.
//!
//! Reconnects forever on a fixed delay.  Each incoming text frame is one
//! `{"event", "data"}` envelope; frames that are not a known envelope are
//! dropped with a warning.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use telemetry_core::{HubEvent, LinkEvent, TransportTag};
use thiserror::Error;
use tokio::time;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, info, warn};
use url::Url;

use crate::application::transport::{Outbound, Transport, TransportLink, TransportSignal};
use crate::domain::config::PushConfig;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("handshake with {url} failed: {source}")]
    Handshake {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("no handshake response from {0} within {1:?}")]
    HandshakeTimeout(String, Duration),

    #[error("WebSocket read failed: {0}")]
    Socket(#[source] tungstenite::Error),

    #[error("WebSocket write failed: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("request could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct PushTransport {
    url: Url,
    reconnect: Duration,
    handshake_timeout: Duration,
}

impl PushTransport {
    pub fn new(url: Url, config: &PushConfig) -> Self {
        Self {
            url,
            reconnect: config.reconnect_period(),
            handshake_timeout: config.handshake_timeout(),
        }
    }

    /// One connection: handshake, then relay until it drops.  Reports its
    /// own link events.
    async fn connect_and_relay(&self, link: &mut TransportLink) -> Result<(), PushError> {
        link.report(LinkEvent::OpenStarted).await;
        info!("push: connecting to {}", self.url);

        let handshake = time::timeout(
            self.handshake_timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        )
        .await;
        let ws = match handshake {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(source)) => {
                let err = PushError::Handshake {
                    url: self.url.to_string(),
                    source,
                };
                link.report(LinkEvent::OpenFailed(err.to_string())).await;
                return Err(err);
            }
            Err(_) => {
                let err = PushError::HandshakeTimeout(self.url.to_string(), self.handshake_timeout);
                link.report(LinkEvent::OpenFailed(err.to_string())).await;
                return Err(err);
            }
        };
        link.report(LinkEvent::OpenSucceeded).await;

        let result = relay(ws, link).await;
        if let Err(PushError::Send(e)) = &result {
            link.report(LinkEvent::WriteFailed(e.to_string())).await;
        }
        link.report(LinkEvent::Closed).await;
        result
    }
}

async fn relay<S>(ws: S, link: &mut TransportLink) -> Result<(), PushError>
where
    S: futures_util::Stream<Item = Result<WsMessage, tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            request = link.outbound.recv() => match request {
                Some(Outbound::Request(request)) => {
                    let text = serde_json::to_string(&request)?;
                    sink.send(WsMessage::Text(text)).await.map_err(PushError::Send)?;
                }
                Some(Outbound::Publish { topic, .. }) => {
                    debug!("push: ignoring broker publish to {topic}");
                }
                None => return Ok(()),
            },
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<HubEvent>(&text) {
                    Ok(event) => link.deliver(TransportSignal::Hub(event)).await,
                    Err(e) => warn!("push: dropping unrecognised message: {e}"),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    info!("push: closed by gateway ({frame:?})");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(PushError::Socket(e)),
                None => {
                    info!("push: stream ended");
                    return Ok(());
                }
            },
        }
    }
}

#[async_trait]
impl Transport for PushTransport {
    fn tag(&self) -> TransportTag {
        TransportTag::Push
    }

    async fn run(self: Box<Self>, mut link: TransportLink) {
        let cancel = link.cancel.clone();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.connect_and_relay(&mut link) => match result {
                    Ok(()) => info!("push: disconnected"),
                    Err(e) => warn!("push: {e}"),
                },
            }
            debug!("push: retrying in {:?}", self.reconnect);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = time::sleep(self.reconnect) => {}
            }
        }
        link.report(LinkEvent::Closed).await;
        debug!("push transport stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
