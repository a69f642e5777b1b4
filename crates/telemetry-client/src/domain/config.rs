//! Client configuration, persisted as TOML.
//!
//! ```toml
//! connect_timeout_secs = 10
//! command_timeout_secs = 10
//!
//! [broker]
//! host = "broker.hivemq.com"
//! port = 1883
//! transport = "tcp"          # or "ws" (MQTT over WebSocket, uses `path`)
//! path = "/mqtt"
//! keep_alive_secs = 60
//! reconnect_secs = 5
//! topic_filter = "sensors/#"
//! client_id_prefix = "telemetry-monitor"
//!
//! [push]
//! url = "ws://127.0.0.1:3001"
//! reconnect_secs = 5
//! handshake_timeout_secs = 10
//! ```
//!
//! Every field has a `#[serde(default = ...)]`, so an empty or partial file is
//! valid and a missing file loads as [`ClientConfig::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid push channel URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The push channel must be a WebSocket endpoint.
    #[error("push channel URL must use ws:// or wss://, got '{0}'")]
    UnsupportedScheme(String),
}

/// How the broker connection is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerWire {
    /// Plain MQTT over TCP.
    Tcp,
    /// MQTT over WebSocket (`ws://host:port/path`).
    Ws,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_broker_wire")]
    pub transport: BrokerWire,
    /// WebSocket path; ignored for `tcp`.
    #[serde(default = "default_broker_path")]
    pub path: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_reconnect")]
    pub reconnect_secs: u64,
    #[serde(default = "default_topic_filter")]
    pub topic_filter: String,
    /// A random suffix is appended per connection.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_push_url")]
    pub url: String,
    #[serde(default = "default_reconnect")]
    pub reconnect_secs: u64,
    #[serde(default = "default_timeout")]
    pub handshake_timeout_secs: u64,
}

/// Top-level client configuration.
///
/// | Field                  | Default               |
/// |------------------------|-----------------------|
/// | `broker.host`          | `broker.hivemq.com`   |
/// | `broker.port`          | `1883`                |
/// | `broker.transport`     | `tcp`                 |
/// | `broker.keep_alive`    | 60 s                  |
/// | `broker.reconnect`     | 5 s                   |
/// | `broker.topic_filter`  | `sensors/#`           |
/// | `push.url`             | `ws://127.0.0.1:3001` |
/// | `push.reconnect`       | 5 s                   |
/// | `connect_timeout`      | 10 s                  |
/// | `command_timeout`      | 10 s                  |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub push: PushConfig,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_broker_host() -> String {
    "broker.hivemq.com".to_string()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_broker_wire() -> BrokerWire {
    BrokerWire::Tcp
}
fn default_broker_path() -> String {
    "/mqtt".to_string()
}
fn default_keep_alive() -> u64 {
    60
}
fn default_reconnect() -> u64 {
    5
}
fn default_topic_filter() -> String {
    "sensors/#".to_string()
}
fn default_client_id_prefix() -> String {
    "telemetry-monitor".to_string()
}
fn default_push_url() -> String {
    "ws://127.0.0.1:3001".to_string()
}
fn default_timeout() -> u64 {
    10
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            transport: default_broker_wire(),
            path: default_broker_path(),
            keep_alive_secs: default_keep_alive(),
            reconnect_secs: default_reconnect(),
            topic_filter: default_topic_filter(),
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: default_push_url(),
            reconnect_secs: default_reconnect(),
            handshake_timeout_secs: default_timeout(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_timeout(),
            command_timeout_secs: default_timeout(),
            broker: BrokerConfig::default(),
            push: PushConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_period(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    /// The address handed to the MQTT client: `host` for TCP, a full
    /// `ws://host:port/path` URL for WebSocket.
    pub fn address(&self) -> String {
        match self.transport {
            BrokerWire::Tcp => self.host.clone(),
            BrokerWire::Ws => {
                let path = if self.path.starts_with('/') {
                    self.path.clone()
                } else {
                    format!("/{}", self.path)
                };
                format!("ws://{}:{}{}", self.host, self.port, path)
            }
        }
    }
}

impl PushConfig {
    pub fn reconnect_period(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Parses and checks the push channel URL.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidUrl`] or [`ConfigError::UnsupportedScheme`].
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.url).map_err(|source| ConfigError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Loads a config file, returning [`ClientConfig::default`] if it does
    /// not exist.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] for file-system errors other than "not found",
    /// [`ConfigError::Parse`] for malformed TOML.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Writes the config to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] or [`ConfigError::Serialize`].
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("telemetry_client_cfg_{}", Uuid::new_v4()))
    }

    #[test]
    fn test_defaults_match_reference_deployment() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.broker.host, "broker.hivemq.com");
        assert_eq!(cfg.broker.port, 1883);
        assert_eq!(cfg.broker.keep_alive(), Duration::from_secs(60));
        assert_eq!(cfg.broker.reconnect_period(), Duration::from_secs(5));
        assert_eq!(cfg.broker.topic_filter, "sensors/#");
        assert_eq!(cfg.push.url, "ws://127.0.0.1:3001");
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        // Act
        let cfg: ClientConfig = toml::from_str("").expect("deserialize empty");

        // Assert
        assert_eq!(cfg, ClientConfig::default());
    }

    #[test]
    fn test_partial_broker_section_keeps_other_defaults() {
        // Arrange
        let toml_str = r#"
[broker]
host = "mqtt.local"
transport = "ws"
port = 8000
"#;

        // Act
        let cfg: ClientConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.broker.host, "mqtt.local");
        assert_eq!(cfg.broker.transport, BrokerWire::Ws);
        assert_eq!(cfg.broker.topic_filter, "sensors/#");
        assert_eq!(cfg.push, PushConfig::default());
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let result: Result<ClientConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_tcp_address_is_bare_host() {
        assert_eq!(BrokerConfig::default().address(), "broker.hivemq.com");
    }

    #[test]
    fn test_ws_address_includes_port_and_path() {
        let broker = BrokerConfig {
            transport: BrokerWire::Ws,
            port: 8000,
            path: "mqtt".into(),
            ..BrokerConfig::default()
        };
        assert_eq!(broker.address(), "ws://broker.hivemq.com:8000/mqtt");
    }

    #[test]
    fn test_endpoint_accepts_ws_and_rejects_http() {
        assert!(PushConfig::default().endpoint().is_ok());

        let http = PushConfig {
            url: "http://127.0.0.1:3001".into(),
            ..PushConfig::default()
        };
        assert!(matches!(http.endpoint(), Err(ConfigError::UnsupportedScheme(s)) if s == "http"));

        let junk = PushConfig {
            url: "not a url".into(),
            ..PushConfig::default()
        };
        assert!(matches!(junk.endpoint(), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let path = scratch_dir().join("absent.toml");
        let cfg = ClientConfig::load_from(&path).expect("missing file is not an error");
        assert_eq!(cfg, ClientConfig::default());
    }

    #[test]
    fn test_save_then_load_preserves_overrides() {
        // Arrange
        let dir = scratch_dir();
        let path = dir.join("nested").join("client.toml");
        let mut cfg = ClientConfig::default();
        cfg.push.url = "ws://10.0.0.5:3001".into();
        cfg.broker.reconnect_secs = 2;

        // Act
        cfg.save_to(&path).expect("save");
        let loaded = ClientConfig::load_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
