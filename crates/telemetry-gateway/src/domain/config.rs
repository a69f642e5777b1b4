//! Gateway configuration.
//!
//! [`GatewayConfig`] is a plain struct with no environment reads of its own.
//! `main.rs` fills it from CLI arguments and `TELEMETRY_*` variables; tests
//! build it directly or start from [`GatewayConfig::default`].

use std::net::SocketAddr;
use std::time::Duration;

use telemetry_core::DEFAULT_MAX_FRAME_LEN;

/// Serial device opened when none is configured.
#[cfg(windows)]
pub const DEFAULT_SERIAL_PATH: &str = "COM3";
/// Serial device opened when none is configured.
#[cfg(not(windows))]
pub const DEFAULT_SERIAL_PATH: &str = "/dev/ttyUSB0";

/// Serial link settings, owned by the gateway actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Device path (`COM3`, `/dev/ttyUSB0`, ...).
    pub path: String,
    pub baud_rate: u32,
    /// Fixed delay between a close/open failure and the next open attempt.
    pub reconnect_delay: Duration,
    /// Longest accepted line, in bytes, excluding the delimiter.
    pub max_frame_len: usize,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_SERIAL_PATH.to_string(),
            baud_rate: 115_200,
            reconnect_delay: Duration::from_secs(5),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// All runtime configuration for the gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub serial: SerialSettings,

    /// Address the push-channel WebSocket server binds to.
    pub bind_addr: SocketAddr,

    /// How often the hub pings each session.
    pub ping_interval: Duration,

    /// Extra grace after a missed ping before the session is dropped.
    ///
    /// A session silent for `ping_interval + ping_timeout` is closed.
    pub ping_timeout: Duration,

    /// Outbound queue depth per session.  A session whose queue is full
    /// misses events rather than slowing the others down.
    pub session_buffer: usize,
}

/// Shortest keepalive period a session will use.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(100);

impl GatewayConfig {
    /// The keepalive period actually used, never below [`MIN_PING_INTERVAL`].
    pub fn ping_period(&self) -> Duration {
        self.ping_interval.max(MIN_PING_INTERVAL)
    }

    /// Longest a session may stay silent before it is dropped.
    pub fn idle_limit(&self) -> Duration {
        self.ping_period() + self.ping_timeout
    }
}

impl Default for GatewayConfig {
    /// | Field          | Default          |
    /// |----------------|------------------|
    /// | serial         | see [`SerialSettings`] (115200 baud, 5 s retry) |
    /// | bind_addr      | `0.0.0.0:3001`   |
    /// | ping_interval  | 10 seconds       |
    /// | ping_timeout   | 5 seconds        |
    /// | session_buffer | 256              |
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            ping_interval: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(5),
            session_buffer: 256,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
