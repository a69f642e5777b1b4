//! Broadcast hub: fans gateway events out to every live session.
//!
//! Each session owns a bounded outbox.  The hub registers one callback per
//! [`HubTopic`] that does a non-blocking `try_send` into that outbox, so a
//! stalled session loses events instead of holding up the others.  Dropping
//! the [`HubSession`] removes it from the fan-out set.
//!
//! Gateway events are published from a single pump task
//! ([`BroadcastHub::run_pump`]), which keeps per-topic delivery order equal to
//! serial arrival order.
//!
//! Status broadcasts and session attach are serialized on one lock, so a new
//! session's first message is the last status broadcast, and every later flip
//! reaches it exactly once.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use telemetry_core::{ClientRequest, HubEvent, SubscriberRegistry, Subscription};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::{command_reply, route_event, status_reply, HubTopic};
use crate::domain::events::GatewayEvent;
use crate::infrastructure::serial_link::GatewayHandle;

/// One attached downstream connection.
pub struct HubSession {
    pub id: Uuid,
    /// Everything broadcast to this session, oldest first.
    pub outbox: mpsc::Receiver<HubEvent>,
    _subscriptions: Vec<Subscription>,
}

pub struct BroadcastHub {
    registry: SubscriberRegistry<HubTopic, HubEvent>,
    gateway: GatewayHandle,
    session_buffer: usize,
    /// The serial status most recently broadcast.
    last_status: Mutex<bool>,
}

impl BroadcastHub {
    pub fn new(gateway: GatewayHandle, session_buffer: usize) -> Self {
        Self {
            registry: SubscriberRegistry::new(),
            gateway,
            session_buffer,
            last_status: Mutex::new(false),
        }
    }

    /// Adds a session to the fan-out set.
    ///
    /// The outbox starts with the current `serialStatus`; nobody else sees
    /// that message.  Earlier events are not replayed.
    pub fn attach(&self, id: Uuid) -> HubSession {
        let (tx, outbox) = mpsc::channel(self.session_buffer.max(1));
        let status = self.last_status.lock().unwrap_or_else(PoisonError::into_inner);

        let subscriptions = HubTopic::ALL
            .iter()
            .map(|topic| {
                let tx = tx.clone();
                self.registry.subscribe(*topic, move |event: &HubEvent| {
                    match tx.try_send(event.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("session {id} is lagging; dropped {}", event.name());
                        }
                        Err(TrySendError::Closed(_)) => {}
                    }
                })
            })
            .collect();

        if tx.try_send(HubEvent::SerialStatus { connected: *status }).is_err() {
            warn!("session {id}: could not queue initial status");
        }
        drop(status);

        info!("session {id} attached ({} live)", self.session_count());
        HubSession {
            id,
            outbox,
            _subscriptions: subscriptions,
        }
    }

    /// Number of attached sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len(&HubTopic::Status)
    }

    /// Pushes one gateway event to every session.  Returns how many sessions
    /// it was handed to.
    pub fn publish(&self, event: GatewayEvent) -> usize {
        let (topic, message) = route_event(event);
        let reached = match &message {
            HubEvent::SerialStatus { connected } => {
                let mut status = self.last_status.lock().unwrap_or_else(PoisonError::into_inner);
                *status = *connected;
                self.registry.notify(&topic, &message)
            }
            _ => self.registry.notify(&topic, &message),
        };
        debug!("{} fanned out to {reached} session(s)", message.name());
        reached
    }

    /// Answers one client request.  The reply goes back to the caller only.
    pub async fn handle_request(&self, request: ClientRequest) -> HubEvent {
        match request {
            ClientRequest::Command(command) => {
                let result = self.gateway.send_command(command.payload).await;
                command_reply(command.id, result)
            }
            ClientRequest::GetStatus => status_reply(self.gateway.is_connected(), Utc::now()),
        }
    }

    /// Publishes gateway events until the channel closes or `cancel` fires.
    pub async fn run_pump(&self, mut events: mpsc::Receiver<GatewayEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.publish(event);
                    }
                    None => break,
                },
            }
        }
        debug!("hub pump stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
