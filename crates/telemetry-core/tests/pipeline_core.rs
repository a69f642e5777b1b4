//! Integration tests for telemetry-core through its public API.
//!
//! These exercise the framer, the reading schema, the push envelopes, the
//! status board and the registry together, the way the gateway and the client
//! use them.

use std::sync::{Arc, Mutex};

use serde_json::json;
use telemetry_core::{
    AggregatedStatus, HubEvent, LineFramer, LinkEvent, SensorReading, StatusBoard,
    SubscriberRegistry, TransportTag,
};

/// Runs raw device bytes through the same steps the gateway takes and returns
/// the envelopes it would broadcast.
fn envelopes_for(bytes: &[u8]) -> Vec<HubEvent> {
    let mut framer = LineFramer::default();
    framer
        .push(bytes)
        .into_iter()
        .map(|frame| match frame.ok().and_then(|t| SensorReading::from_json(&t).ok()) {
            Some(reading) => HubEvent::SensorData(reading),
            None => HubEvent::DataError(telemetry_core::Notice::new("Failed to parse sensor data")),
        })
        .collect()
}

#[test]
fn test_device_line_becomes_sensor_data_envelope() {
    // Arrange
    let bytes = b"{\"paramId\":1,\"value\":85}\n";

    // Act
    let events = envelopes_for(bytes);

    // Assert
    assert_eq!(events.len(), 1);
    assert_eq!(
        serde_json::to_value(&events[0]).unwrap(),
        json!({"event": "sensorData", "data": {"paramId": 1, "value": 85}})
    );
}

#[test]
fn test_bad_line_between_good_lines_yields_exactly_one_diagnostic() {
    let bytes = b"{\"paramId\":1,\"value\":1}\nnot json\n{\"paramId\":2,\"value\":2}\n";

    let events = envelopes_for(bytes);

    let names: Vec<_> = events.iter().map(HubEvent::name).collect();
    assert_eq!(names, vec!["sensorData", "dataError", "sensorData"]);
}

#[test]
fn test_flipping_one_transport_updates_only_its_field() {
    // Arrange
    let mut board = StatusBoard::new(&[TransportTag::Broker, TransportTag::Push]);
    board.apply(TransportTag::Push, LinkEvent::OpenSucceeded);

    // Act
    let after = board
        .apply(TransportTag::Broker, LinkEvent::OpenSucceeded)
        .expect("broker flip must produce a new status");

    // Assert
    assert!(after.is_connected(TransportTag::Broker));
    assert!(after.is_connected(TransportTag::Push));
    assert_eq!(serde_json::to_value(&after).unwrap(), json!({"broker": true, "push": true}));
}

#[test]
fn test_registry_broadcasts_status_to_every_listener() {
    // Arrange
    let registry: SubscriberRegistry<(), AggregatedStatus> = SubscriberRegistry::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut subs = Vec::new();
    for n in 0..3 {
        let seen = Arc::clone(&seen);
        subs.push(registry.subscribe((), move |s: &AggregatedStatus| {
            seen.lock().unwrap().push((n, s.all_connected()));
        }));
    }
    let mut board = StatusBoard::new(&[TransportTag::Broker, TransportTag::Push]);

    // Act
    if let Some(status) = board.apply(TransportTag::Broker, LinkEvent::OpenSucceeded) {
        registry.notify(&(), &status);
    }

    // Assert
    assert_eq!(*seen.lock().unwrap(), vec![(0, false), (1, false), (2, false)]);
}

#[tokio::test]
async fn test_channel_subscription_carries_envelopes() {
    let registry: SubscriberRegistry<TransportTag, HubEvent> = SubscriberRegistry::new();
    let (_sub, mut rx) = registry.subscribe_channel(TransportTag::Serial, 4);

    for event in envelopes_for(b"{\"paramId\":\"co2\",\"value\":412}\n") {
        registry.notify(&TransportTag::Serial, &event);
    }

    let got = rx.recv().await.unwrap();
    assert_eq!(got.name(), "sensorData");
}
