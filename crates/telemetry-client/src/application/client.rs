//! The transport client: two independently reconnecting transports behind
//! one subscription API.
//!
//! # Task layout
//!
//! ```text
//!   broker task ──┐                       ┌──> SourceTag subscribers
//!                 ├─ TransportSignal ──> dispatcher ──> status listeners
//!   push task  ───┘   (one queue)         └──> pending command / status waiters
//! ```
//!
//! Only the dispatcher updates the status board and calls subscribers, so
//! per-tag delivery order is the order the transports received things in.
//!
//! # Connect semantics
//!
//! [`TransportClient::connect`] spawns the transports on first use and
//! waits until every transport has reported `OpenSucceeded` at least once.
//! If that takes longer than the connect timeout the call fails with
//! [`ClientError::ConnectTimeout`]; the transports keep retrying and the
//! status board keeps tracking them.  A later `connect()` waits again on the
//! same latch.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use telemetry_core::{
    AggregatedStatus, ClientRequest, CommandRequest, ConnectionState, HubEvent, LinkEvent,
    StatusBoard, StatusReport, SubscriberRegistry, Subscription, TransportTag,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::inbound::{classify_push, unclaimed_reply, PushInbound};
use crate::application::transport::{Outbound, Transport, TransportLink, TransportSignal};
use crate::domain::config::ClientConfig;
use crate::domain::events::{ClientError, ClientEvent, CommandResult, SourceTag};

const SIGNAL_QUEUE: usize = 1024;
const OUTBOUND_QUEUE: usize = 64;

enum Lifecycle {
    Idle(Vec<Box<dyn Transport>>),
    Running {
        ready: watch::Receiver<bool>,
        tasks: Vec<JoinHandle<()>>,
    },
    Closed,
}

#[derive(Default)]
struct Pending {
    commands: HashMap<u64, oneshot::Sender<CommandResult>>,
    status: HashMap<u64, oneshot::Sender<StatusReport>>,
}

struct Shared {
    tags: Vec<TransportTag>,
    events: SubscriberRegistry<SourceTag, ClientEvent>,
    status_listeners: SubscriberRegistry<(), AggregatedStatus>,
    board: Mutex<StatusBoard>,
    /// Held across "apply + notify" and "snapshot + subscribe + initial
    /// call", so a status listener never ends on a stale value.
    status_gate: Mutex<()>,
    pending: Mutex<Pending>,
    outbound: Mutex<HashMap<TransportTag, mpsc::Sender<Outbound>>>,
    lifecycle: Mutex<Lifecycle>,
    closed: Arc<AtomicBool>,
    next_request_id: AtomicU64,
    cancel: CancellationToken,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Cheap to clone; all clones drive the same connections.  Dropping the last
/// clone stops the transports.
#[derive(Clone)]
pub struct TransportClient {
    shared: Arc<Shared>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TransportClient {
    /// Builds a client over `transports`.  Nothing connects until
    /// [`connect`](Self::connect).
    pub fn new(transports: Vec<Box<dyn Transport>>, config: &ClientConfig) -> Self {
        let tags: Vec<TransportTag> = transports.iter().map(|t| t.tag()).collect();
        Self {
            shared: Arc::new(Shared {
                board: Mutex::new(StatusBoard::new(&tags)),
                tags,
                events: SubscriberRegistry::new(),
                status_listeners: SubscriberRegistry::new(),
                status_gate: Mutex::new(()),
                pending: Mutex::new(Pending::default()),
                outbound: Mutex::new(HashMap::new()),
                lifecycle: Mutex::new(Lifecycle::Idle(transports)),
                closed: Arc::new(AtomicBool::new(false)),
                next_request_id: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                connect_timeout: config.connect_timeout(),
                command_timeout: config.command_timeout(),
            }),
        }
    }

    // ── Connection lifecycle ──────────────────────────────────────────────────

    /// Starts every transport (first call only) and waits until each has
    /// connected at least once.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ConnectTimeout`] after the connect timeout.  Retries
    ///   continue in the background.
    /// - [`ClientError::Closed`] after [`disconnect`](Self::disconnect).
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut ready = self.start()?;
        let limit = self.shared.connect_timeout;
        let latched = time::timeout(limit, ready.wait_for(|all| *all))
            .await
            .map(|r| r.is_ok());
        match latched {
            Ok(true) => {
                info!("all transports connected");
                Ok(())
            }
            Ok(false) => Err(ClientError::Closed),
            Err(_) => {
                warn!("transports not all connected after {limit:?}: {:?}", self.status());
                Err(ClientError::ConnectTimeout(limit))
            }
        }
    }

    fn start(&self) -> Result<watch::Receiver<bool>, ClientError> {
        let mut lifecycle = lock(&self.shared.lifecycle);
        let transports = match &mut *lifecycle {
            Lifecycle::Closed => return Err(ClientError::Closed),
            Lifecycle::Running { ready, .. } => return Ok(ready.clone()),
            Lifecycle::Idle(transports) => std::mem::take(transports),
        };

        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE);
        let (ready_tx, ready_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(transports.len() + 1);
        {
            let mut outbound = lock(&self.shared.outbound);
            for transport in transports {
                let tag = transport.tag();
                let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
                outbound.insert(tag, tx);
                let link =
                    TransportLink::new(tag, signal_tx.clone(), rx, self.shared.cancel.child_token());
                info!("starting {tag} transport");
                tasks.push(tokio::spawn(transport.run(link)));
            }
        }
        drop(signal_tx);

        tasks.push(tokio::spawn(run_dispatcher(
            Arc::downgrade(&self.shared),
            self.shared.cancel.clone(),
            self.shared.tags.clone(),
            signal_rx,
            ready_tx,
        )));

        *lifecycle = Lifecycle::Running {
            ready: ready_rx.clone(),
            tasks,
        };
        Ok(ready_rx)
    }

    /// Closes both transports and stops all delivery.  Safe to call more
    /// than once, and before [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            debug!("disconnect: already closed");
            return;
        }
        self.shared.cancel.cancel();

        let previous = std::mem::replace(&mut *lock(&self.shared.lifecycle), Lifecycle::Closed);
        lock(&self.shared.outbound).clear();
        *lock(&self.shared.pending) = Pending::default();

        if let Lifecycle::Running { tasks, .. } = previous {
            for task in tasks {
                if task.await.is_err() {
                    debug!("transport task ended abnormally");
                }
            }
        }

        {
            let _gate = lock(&self.shared.status_gate);
            *lock(&self.shared.board) = StatusBoard::new(&self.shared.tags);
        }
        info!("client disconnected");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    // ── Status ────────────────────────────────────────────────────────────────

    /// The current per-transport connected flags.
    pub fn status(&self) -> AggregatedStatus {
        lock(&self.shared.board).snapshot()
    }

    pub fn transport_state(&self, tag: TransportTag) -> Option<ConnectionState> {
        lock(&self.shared.board).state(tag)
    }

    /// Calls `listener` now with the current status, then on every change.
    ///
    /// Must not be called from inside a status listener.
    pub fn subscribe_status<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AggregatedStatus) + Send + Sync + 'static,
    {
        let listener = Arc::new(listener);
        let closed = Arc::clone(&self.shared.closed);
        let _gate = lock(&self.shared.status_gate);
        let current = self.status();
        let subscription = self.shared.status_listeners.subscribe((), {
            let listener = Arc::clone(&listener);
            move |status: &AggregatedStatus| {
                if !closed.load(Ordering::SeqCst) {
                    listener(status);
                }
            }
        });
        listener(&current);
        subscription
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// Registers `callback` for events under `tag`.  Allowed at any time,
    /// including before [`connect`](Self::connect).
    pub fn subscribe<F>(&self, tag: SourceTag, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let closed = Arc::clone(&self.shared.closed);
        self.shared.events.subscribe(tag, move |event: &ClientEvent| {
            if !closed.load(Ordering::SeqCst) {
                callback(event);
            }
        })
    }

    /// Like [`subscribe`](Self::subscribe) but delivers into a bounded
    /// channel.  Events are dropped, with a warning, while it is full.
    pub fn subscribe_channel(
        &self,
        tag: SourceTag,
        capacity: usize,
    ) -> (Subscription, mpsc::Receiver<ClientEvent>) {
        self.shared.events.subscribe_channel(tag, capacity)
    }

    /// Removes subscriber `id` from `tag`.  Returns `false` if it was not
    /// there.
    pub fn unsubscribe(&self, tag: SourceTag, id: u64) -> bool {
        self.shared.events.unsubscribe(&tag, id)
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    /// Sends a command to the device through the gateway and waits for the
    /// gateway's verdict.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotConnected`] if the push channel is down.
    /// - [`ClientError::ReplyTimeout`] if no verdict arrives in time.
    /// - [`ClientError::Closed`] if the client is disconnected meanwhile.
    pub async fn send_command(&self, payload: Value) -> Result<CommandResult, ClientError> {
        let sender = self.connected_sender(TransportTag::Push)?;
        let id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).commands.insert(id, tx);

        let request = ClientRequest::Command(CommandRequest {
            id: Some(id),
            payload,
        });
        if sender.send(Outbound::Request(request)).await.is_err() {
            lock(&self.shared.pending).commands.remove(&id);
            return Err(ClientError::Closed);
        }
        debug!("command {id} sent");

        let limit = self.shared.command_timeout;
        match time::timeout(limit, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                lock(&self.shared.pending).commands.remove(&id);
                Err(ClientError::ReplyTimeout(limit))
            }
        }
    }

    /// Asks the gateway whether the hardware link is up.
    ///
    /// # Errors
    ///
    /// Same as [`send_command`](Self::send_command).
    pub async fn request_hardware_status(&self) -> Result<StatusReport, ClientError> {
        let sender = self.connected_sender(TransportTag::Push)?;
        let id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).status.insert(id, tx);

        if sender
            .send(Outbound::Request(ClientRequest::GetStatus))
            .await
            .is_err()
        {
            lock(&self.shared.pending).status.remove(&id);
            return Err(ClientError::Closed);
        }

        let limit = self.shared.command_timeout;
        match time::timeout(limit, rx).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                lock(&self.shared.pending).status.remove(&id);
                Err(ClientError::ReplyTimeout(limit))
            }
        }
    }

    /// Publishes `message` as JSON on the broker.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] if the broker is down,
    /// [`ClientError::Encode`] if `message` does not serialize.
    pub async fn publish<T>(&self, topic: &str, message: &T) -> Result<(), ClientError>
    where
        T: Serialize + ?Sized,
    {
        let sender = self.connected_sender(TransportTag::Broker)?;
        let payload = serde_json::to_vec(message)?;
        sender
            .send(Outbound::Publish {
                topic: topic.to_string(),
                payload,
            })
            .await
            .map_err(|_| ClientError::Closed)
    }

    fn connected_sender(&self, tag: TransportTag) -> Result<mpsc::Sender<Outbound>, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if !self.status().is_connected(tag) {
            return Err(ClientError::NotConnected(tag));
        }
        lock(&self.shared.outbound)
            .get(&tag)
            .cloned()
            .ok_or(ClientError::NotConnected(tag))
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

async fn run_dispatcher(
    shared: Weak<Shared>,
    cancel: CancellationToken,
    tags: Vec<TransportTag>,
    mut signals: mpsc::Receiver<TransportSignal>,
    ready: watch::Sender<bool>,
) {
    let mut reached: HashSet<TransportTag> = HashSet::new();
    loop {
        let signal = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };
        let Some(strong) = shared.upgrade() else { break };
        if strong.closed.load(Ordering::SeqCst) {
            break;
        }

        match signal {
            TransportSignal::Link(tag, event) => {
                let opened = matches!(event, LinkEvent::OpenSucceeded);
                strong.apply_link(tag, event);
                if opened && reached.insert(tag) && tags.iter().all(|t| reached.contains(t)) {
                    ready.send_replace(true);
                }
            }
            TransportSignal::Sensor(event) => strong.deliver(ClientEvent::Sensor(event)),
            TransportSignal::Hub(event) => strong.on_hub_event(event),
        }
    }
    debug!("dispatcher stopped");
}

impl Shared {
    fn apply_link(&self, tag: TransportTag, event: LinkEvent) {
        match &event {
            LinkEvent::OpenStarted => debug!("{tag} transport connecting"),
            LinkEvent::OpenSucceeded => info!("{tag} transport connected"),
            LinkEvent::OpenFailed(reason) => warn!("{tag} transport failed to connect: {reason}"),
            LinkEvent::Closed => info!("{tag} transport closed"),
            LinkEvent::WriteFailed(reason) => warn!("{tag} transport write failed: {reason}"),
        }

        let _gate = lock(&self.status_gate);
        let changed = lock(&self.board).apply(tag, event);
        if let Some(status) = changed {
            self.status_listeners.notify(&(), &status);
        }
    }

    fn deliver(&self, event: ClientEvent) {
        let tag = event.source_tag();
        let reached = self.events.notify(&tag, &event);
        if reached == 0 {
            debug!("no {tag} subscribers; event dropped");
        }
    }

    fn on_hub_event(&self, event: HubEvent) {
        debug!("push: {}", event.name());
        match classify_push(event, Utc::now()) {
            PushInbound::Deliver(event) => self.deliver(event),
            PushInbound::CommandReply { id, result } => {
                let waiter = id.and_then(|id| lock(&self.pending).commands.remove(&id));
                let unclaimed = match waiter {
                    Some(waiter) => waiter.send(result).err(),
                    None => Some(result),
                };
                if let Some(result) = unclaimed {
                    match unclaimed_reply(result) {
                        Some(event) => self.deliver(event),
                        None => debug!("unclaimed command reply {id:?}"),
                    }
                }
            }
            PushInbound::StatusReply(report) => {
                let waiters = std::mem::take(&mut lock(&self.pending).status);
                if waiters.is_empty() {
                    debug!("unsolicited status reply");
                }
                for waiter in waiters.into_values() {
                    if waiter.send(report.clone()).is_err() {
                        debug!("status waiter gone");
                    }
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
