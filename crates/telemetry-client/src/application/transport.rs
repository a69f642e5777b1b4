//! The seam between the client and its two transports.
//!
//! A [`Transport`] runs as its own task for the client's whole lifetime,
//! reconnecting on its own schedule.  It talks to the client only through a
//! [`TransportLink`]: link events and received messages go up one shared
//! queue (so the dispatcher sees them in arrival order), outbound requests
//! come down a private queue.

use async_trait::async_trait;
use telemetry_core::{ClientRequest, HubEvent, LinkEvent, TransportTag};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::events::SensorEvent;

/// Something a transport reports to the dispatcher.
#[derive(Debug, Clone)]
pub enum TransportSignal {
    Link(TransportTag, LinkEvent),
    /// A validated broker message.
    Sensor(SensorEvent),
    /// A push-channel envelope.
    Hub(HubEvent),
}

/// Something the client asks a transport to send.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Broker only.
    Publish { topic: String, payload: Vec<u8> },
    /// Push channel only.
    Request(ClientRequest),
}

/// A transport's end of the connection to the client.
pub struct TransportLink {
    tag: TransportTag,
    signals: mpsc::Sender<TransportSignal>,
    pub outbound: mpsc::Receiver<Outbound>,
    pub cancel: CancellationToken,
}

impl TransportLink {
    pub fn new(
        tag: TransportTag,
        signals: mpsc::Sender<TransportSignal>,
        outbound: mpsc::Receiver<Outbound>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tag,
            signals,
            outbound,
            cancel,
        }
    }

    pub fn tag(&self) -> TransportTag {
        self.tag
    }

    /// Reports a connection state change.
    pub async fn report(&self, event: LinkEvent) {
        self.send(TransportSignal::Link(self.tag, event)).await;
    }

    /// Hands a received message to the dispatcher.
    pub async fn deliver(&self, signal: TransportSignal) {
        self.send(signal).await;
    }

    async fn send(&self, signal: TransportSignal) {
        if self.signals.send(signal).await.is_err() {
            debug!("{} transport: dispatcher gone", self.tag);
        }
    }
}

/// One independently reconnecting transport.
#[async_trait]
pub trait Transport: Send + 'static {
    fn tag(&self) -> TransportTag;

    /// Runs until `link.cancel` fires.  Must report `LinkEvent::Closed` on
    /// the way out if it was connected.
    async fn run(self: Box<Self>, link: TransportLink);
}
