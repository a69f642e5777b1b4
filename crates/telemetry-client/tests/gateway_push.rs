//! The client's push transport against a real gateway on loopback, with an
//! in-memory serial device behind it.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use telemetry_client::application::Transport;
use telemetry_client::domain::{ClientConfig, ClientEvent, CommandResult, PushConfig, SourceTag};
use telemetry_client::infrastructure::PushTransport;
use telemetry_client::TransportClient;
use telemetry_core::{ParamId, TransportTag};
use telemetry_gateway::domain::{GatewayConfig, SerialSettings};
use telemetry_gateway::infrastructure::{serve, DeviceOpener, DeviceStream};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use url::Url;

struct OneDevice {
    port: Mutex<VecDeque<DuplexStream>>,
}

#[async_trait]
impl DeviceOpener for OneDevice {
    async fn open(&self, _settings: &SerialSettings) -> io::Result<Box<dyn DeviceStream>> {
        match self.port.lock().unwrap().pop_front() {
            Some(port) => Ok(Box::new(port)),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no device")),
        }
    }
}

async fn next_event(rx: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event feed closed")
}

#[tokio::test]
async fn test_push_client_round_trip_through_gateway() {
    // Arrange: gateway with one in-memory device
    let (gateway_end, device_end) = duplex(4096);
    let opener = Arc::new(OneDevice {
        port: Mutex::new(VecDeque::from([gateway_end])),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let gateway = tokio::spawn(serve(
        listener,
        GatewayConfig {
            ping_interval: Duration::from_secs(30),
            ..GatewayConfig::default()
        },
        opener as Arc<dyn DeviceOpener>,
        cancel.clone(),
    ));

    let url = Url::parse(&format!("ws://{addr}")).unwrap();
    let push: Box<dyn Transport> = Box::new(PushTransport::new(url, &PushConfig::default()));
    let client = TransportClient::new(vec![push], &ClientConfig::default());
    let (_sub, mut events) = client.subscribe_channel(SourceTag::Push, 32);

    // Act: connect and wait for the hub to say the hardware is up
    client.connect().await.unwrap();
    assert!(client.status().is_connected(TransportTag::Push));
    loop {
        if let ClientEvent::HardwareStatus { connected: true } = next_event(&mut events).await {
            break;
        }
    }

    // Assert: a device line reaches the subscriber
    let (device_read, mut device_write) = tokio::io::split(device_end);
    device_write
        .write_all(b"{\"paramId\":7,\"value\":21.5,\"unit\":\"C\"}\n")
        .await
        .unwrap();
    match next_event(&mut events).await {
        ClientEvent::Sensor(event) => {
            assert_eq!(event.source, TransportTag::Push);
            assert_eq!(event.param_id, ParamId::from(7));
            assert_eq!(event.extra.get("unit"), Some(&json!("C")));
        }
        other => panic!("unexpected {other:?}"),
    }

    // Assert: a command is written to the device and confirmed
    let verdict = client.send_command(json!({"relay": 1})).await.unwrap();
    assert_eq!(
        verdict,
        CommandResult::Sent {
            message: "Command sent successfully".into()
        }
    );
    let mut line = String::new();
    BufReader::new(device_read).read_line(&mut line).await.unwrap();
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&line).unwrap(),
        json!({"relay": 1})
    );

    // Assert: the status poll sees the hardware
    let report = client.request_hardware_status().await.unwrap();
    assert!(report.serial);

    client.disconnect().await;
    cancel.cancel();
    gateway.await.unwrap().unwrap();
}
