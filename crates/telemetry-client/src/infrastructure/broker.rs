//! Broker transport: an MQTT subscription to `sensors/#`.
//!
//! The rumqttc event loop reconnects by being polled again after an error;
//! this task spaces those attempts by the configured reconnect period.  The
//! subscription is re-sent on every ConnAck since sessions are clean.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport as MqttWire};
use telemetry_core::{LinkEvent, TransportTag};
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::inbound::parse_broker_message;
use crate::application::transport::{Outbound, Transport, TransportLink, TransportSignal};
use crate::domain::config::{BrokerConfig, BrokerWire};

/// Depth of rumqttc's request queue.
const REQUEST_QUEUE: usize = 64;

/// rumqttc rejects very short keep-alive intervals.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

pub struct MqttTransport {
    config: BrokerConfig,
}

impl MqttTransport {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    /// Connection options with a fresh random client id.
    pub fn options(&self) -> MqttOptions {
        let client_id = format!("{}-{}", self.config.client_id_prefix, Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, self.config.address(), self.config.port);
        options.set_keep_alive(self.config.keep_alive().max(MIN_KEEP_ALIVE));
        options.set_clean_session(true);
        if self.config.transport == BrokerWire::Ws {
            options.set_transport(MqttWire::Ws);
        }
        options
    }

    async fn pause(&self, link: &TransportLink) -> bool {
        tokio::select! {
            biased;
            _ = link.cancel.cancelled() => false,
            _ = time::sleep(self.config.reconnect_period()) => true,
        }
    }
}

/// Validates one broker message and hands it on.  Invalid messages are
/// dropped with a warning.  Returns whether it was delivered.
pub async fn on_publish(link: &TransportLink, topic: &str, payload: &[u8]) -> bool {
    match parse_broker_message(topic, payload, Utc::now()) {
        Ok(event) => {
            link.deliver(TransportSignal::Sensor(event)).await;
            true
        }
        Err(e) => {
            warn!("broker: dropping message on {topic}: {e}");
            false
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn tag(&self) -> TransportTag {
        TransportTag::Broker
    }

    async fn run(self: Box<Self>, mut link: TransportLink) {
        let cancel = link.cancel.clone();
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_QUEUE);
        let mut connected = false;

        info!(
            "broker: connecting to {}:{} ({:?})",
            self.config.host, self.config.port, self.config.transport
        );
        link.report(LinkEvent::OpenStarted).await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = link.outbound.recv() => match request {
                    Some(Outbound::Publish { topic, payload }) => {
                        if let Err(e) = client.try_publish(topic.as_str(), QoS::AtMostOnce, false, payload) {
                            warn!("broker: publish to {topic} failed: {e}");
                        }
                    }
                    Some(Outbound::Request(request)) => {
                        debug!("broker: ignoring push request {request:?}");
                    }
                    None => break,
                },
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!("broker: connected ({:?})", ack.code);
                        connected = true;
                        link.report(LinkEvent::OpenSucceeded).await;
                        if let Err(e) = client.try_subscribe(self.config.topic_filter.as_str(), QoS::AtMostOnce) {
                            warn!("broker: subscribe to {} failed: {e}", self.config.topic_filter);
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        debug!("broker: subscribed to {}", self.config.topic_filter);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        on_publish(&link, &publish.topic, &publish.payload).await;
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        info!("broker: disconnected by server");
                        if connected {
                            connected = false;
                            link.report(LinkEvent::Closed).await;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connected {
                            warn!("broker: connection lost: {e}");
                            link.report(LinkEvent::Closed).await;
                        } else {
                            warn!("broker: connect failed: {e}");
                            link.report(LinkEvent::OpenFailed(e.to_string())).await;
                        }
                        connected = false;
                        if !self.pause(&link).await {
                            break;
                        }
                        link.report(LinkEvent::OpenStarted).await;
                    }
                },
            }
        }

        if let Err(e) = client.try_disconnect() {
            debug!("broker: disconnect request not queued: {e}");
        }
        link.report(LinkEvent::Closed).await;
        debug!("broker transport stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
