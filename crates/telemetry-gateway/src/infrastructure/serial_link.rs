//! The serial actor: sole owner and sole writer of the hardware link.
//!
//! One task owns the port, the [`Connection`] state machine, the line framer
//! and the reconnect timer.  Everything else talks to it through a
//! [`GatewayHandle`]:
//!
//! ```text
//!   GatewayHandle::send_command ──mpsc──┐
//!                                       ▼
//!            ┌──────────── SerialGateway::run ─────────────┐
//!            │ select! { port read | command | timer | stop }│
//!            └──────┬───────────────────────────┬───────────┘
//!                   │ GatewayEvent (mpsc)       │ ConnectionState (watch)
//!                   ▼                           ▼
//!                  hub                  GatewayHandle::is_connected
//! ```
//!
//! # Reconnect policy
//!
//! Any close or open failure schedules exactly one retry after the configured
//! delay.  [`ReconnectTimer`] holds at most one deadline, so a second failure
//! while a retry is pending does not add another.  Retries never stop until
//! the cancellation token fires.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use telemetry_core::{Connection, ConnectionState, LineFramer, LinkEvent, TransportTag};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::{decode_frame, encode_command};
use crate::domain::config::SerialSettings;
use crate::domain::events::{CommandError, GatewayEvent, LinkFault};

/// Bytes requested per port read.
const READ_CHUNK: usize = 4096;

/// Queue depth for commands waiting on the actor.
const COMMAND_QUEUE: usize = 32;

// ── Device seam ───────────────────────────────────────────────────────────────

/// A bidirectional byte stream to the device.
pub trait DeviceStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DeviceStream for T {}

/// Opens the device.  Production uses [`SerialOpener`]; tests hand out
/// in-memory duplex streams.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceOpener: Send + Sync {
    async fn open(&self, settings: &SerialSettings) -> io::Result<Box<dyn DeviceStream>>;
}

/// Opens a real serial port with `tokio-serial`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

#[async_trait]
impl DeviceOpener for SerialOpener {
    async fn open(&self, settings: &SerialSettings) -> io::Result<Box<dyn DeviceStream>> {
        let port = tokio_serial::new(settings.path.as_str(), settings.baud_rate)
            .open_native_async()
            .map_err(io::Error::from)?;
        Ok(Box::new(port))
    }
}

// ── Reconnect timer ───────────────────────────────────────────────────────────

/// A single-slot, cancellable retry deadline.
#[derive(Debug)]
pub struct ReconnectTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl ReconnectTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Arms the timer.  Returns `false`, and leaves the existing deadline
    /// alone, if a retry is already pending.
    pub fn schedule(&mut self) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(Instant::now() + self.delay);
        true
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarms the timer.  Returns whether a retry was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Resolves when the pending deadline passes, then disarms.  Never
    /// resolves while disarmed.  Cancel-safe: dropping the future early keeps
    /// the deadline.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

struct CommandJob {
    payload: Value,
    reply: oneshot::Sender<Result<(), CommandError>>,
}

/// Cloneable access to the serial actor.
#[derive(Clone)]
pub struct GatewayHandle {
    commands: mpsc::Sender<CommandJob>,
    state: watch::Receiver<ConnectionState>,
}

impl GatewayHandle {
    /// Writes `payload` to the device as one frame.
    ///
    /// # Errors
    ///
    /// [`CommandError::NotConnected`] without touching the port when the link
    /// is down; [`CommandError::WriteFailed`] when the write itself fails;
    /// [`CommandError::Closed`] once the actor has stopped.
    pub async fn send_command(&self, payload: Value) -> Result<(), CommandError> {
        if !self.is_connected() {
            return Err(CommandError::NotConnected);
        }
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(CommandJob { payload, reply })
            .await
            .map_err(|_| CommandError::Closed)?;
        rx.await.map_err(|_| CommandError::Closed)?
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

/// The serial actor.  Build with [`SerialGateway::new`], then drive with
/// [`SerialGateway::run`] on its own task.
pub struct SerialGateway {
    opener: Arc<dyn DeviceOpener>,
    settings: SerialSettings,
    commands: mpsc::Receiver<CommandJob>,
    link: Link,
    cancel: CancellationToken,
}

/// Mutable link state, kept apart from the command receiver so `select!` can
/// borrow both at once.
struct Link {
    connection: Connection,
    port: Option<Box<dyn DeviceStream>>,
    framer: LineFramer,
    timer: ReconnectTimer,
    events: mpsc::Sender<GatewayEvent>,
    state: watch::Sender<ConnectionState>,
}

impl SerialGateway {
    pub fn new(
        opener: Arc<dyn DeviceOpener>,
        settings: SerialSettings,
        events: mpsc::Sender<GatewayEvent>,
        cancel: CancellationToken,
    ) -> (Self, GatewayHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let link = Link {
            connection: Connection::new(TransportTag::Serial),
            port: None,
            framer: LineFramer::new(settings.max_frame_len),
            timer: ReconnectTimer::new(settings.reconnect_delay),
            events,
            state: state_tx,
        };
        let gateway = Self {
            opener,
            settings,
            commands: command_rx,
            link,
            cancel,
        };
        let handle = GatewayHandle {
            commands: command_tx,
            state: state_rx,
        };
        (gateway, handle)
    }

    /// Opens the device, then serves reads, commands and retries until
    /// cancelled.
    pub async fn run(self) {
        let SerialGateway {
            opener,
            settings,
            mut commands,
            mut link,
            cancel,
        } = self;

        link.open(opener.as_ref(), &settings).await;
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                job = commands.recv() => match job {
                    Some(job) => link.serve_command(job).await,
                    None => break,
                },
                _ = link.timer.fired() => {
                    debug!("reconnect timer fired for {}", settings.path);
                    link.open(opener.as_ref(), &settings).await;
                }
                read = read_chunk(&mut link.port, &mut buf) => link.on_read(read, &buf).await,
            }
        }

        link.shutdown(&settings.path);
    }
}

async fn read_chunk(port: &mut Option<Box<dyn DeviceStream>>, buf: &mut [u8]) -> io::Result<usize> {
    match port {
        Some(port) => port.read(buf).await,
        None => std::future::pending().await,
    }
}

impl Link {
    async fn open(&mut self, opener: &dyn DeviceOpener, settings: &SerialSettings) {
        self.transition(LinkEvent::OpenStarted).await;
        match opener.open(settings).await {
            Ok(port) => {
                info!("serial port {} open at {} baud", settings.path, settings.baud_rate);
                self.port = Some(port);
                self.framer.reset();
                self.transition(LinkEvent::OpenSucceeded).await;
            }
            Err(e) => {
                warn!("failed to open serial port {}: {e}", settings.path);
                self.transition(LinkEvent::OpenFailed(e.to_string())).await;
                self.emit(GatewayEvent::LinkError {
                    fault: LinkFault::OpenFailed,
                    detail: e.to_string(),
                })
                .await;
                self.schedule_reconnect();
            }
        }
    }

    async fn on_read(&mut self, read: io::Result<usize>, buf: &[u8]) {
        match read {
            Ok(0) => {
                warn!("serial port closed by device");
                self.close(LinkFault::ConnectionLost, "end of stream".to_string())
                    .await;
            }
            Ok(n) => {
                for frame in self.framer.push(&buf[..n]) {
                    let event = decode_frame(frame);
                    if let GatewayEvent::ParseFailure { reason } = &event {
                        warn!("dropping unparseable frame: {reason}");
                    }
                    self.emit(event).await;
                }
            }
            Err(e) => {
                warn!("serial read error: {e}");
                self.close(LinkFault::PortError, e.to_string()).await;
            }
        }
    }

    async fn close(&mut self, fault: LinkFault, detail: String) {
        self.port = None;
        self.framer.reset();
        self.emit(GatewayEvent::LinkError { fault, detail }).await;
        self.transition(LinkEvent::Closed).await;
        self.schedule_reconnect();
    }

    async fn serve_command(&mut self, job: CommandJob) {
        let result = self.write_frame(&job.payload).await;
        match &result {
            Ok(()) => debug!("command written to device"),
            Err(e) => warn!("command not written: {e}"),
        }
        // The caller may have given up waiting; that is not our failure.
        let _ = job.reply.send(result);
    }

    async fn write_frame(&mut self, payload: &Value) -> Result<(), CommandError> {
        if !self.connection.is_connected() {
            return Err(CommandError::NotConnected);
        }
        let port = self.port.as_mut().ok_or(CommandError::NotConnected)?;
        let bytes = encode_command(payload)?;
        port.write_all(&bytes)
            .await
            .map_err(|e| CommandError::WriteFailed(e.to_string()))?;
        port.flush()
            .await
            .map_err(|e| CommandError::WriteFailed(e.to_string()))
    }

    /// Applies `event`, publishes the new state, and reports a status flip to
    /// the hub when the connected flag changed.
    async fn transition(&mut self, event: LinkEvent) {
        let was_connected = self.connection.is_connected();
        if !self.connection.apply(event) {
            return;
        }
        self.state.send_replace(self.connection.state());

        let connected = self.connection.is_connected();
        if connected != was_connected {
            self.emit(GatewayEvent::LinkStatus { connected }).await;
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.timer.schedule() {
            info!("serial reconnect in {:?}", self.timer.delay);
        } else {
            debug!("serial reconnect already pending");
        }
    }

    async fn emit(&mut self, event: GatewayEvent) {
        if self.events.send(event).await.is_err() {
            debug!("hub has stopped; gateway event dropped");
        }
    }

    fn shutdown(&mut self, path: &str) {
        if self.timer.cancel() {
            debug!("pending serial reconnect cancelled");
        }
        if self.port.take().is_some() {
            info!("closing serial port {path}");
        }
        if self.connection.apply(LinkEvent::Closed) {
            self.state.send_replace(self.connection.state());
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
