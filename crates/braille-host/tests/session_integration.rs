//! Integration tests for the display session and the consumer facade.
//!
//! # Purpose
//!
//! These tests start from a connected link and verify what happens above
//! it:
//!
//! - The codec is started on the session worker and the display properties
//!   reach listeners.
//! - Dots written by the consumer arrive on the channel, and packets from
//!   the channel come back as decoded input.
//! - Stopping is idempotent, and a failed codec start drops the link.
//! - The facade delivers callbacks only while the service is active.
//! - The discovery keep-alive window, under paused tokio time.

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use braille_core::{BrailleInputEvent, DeviceDescriptor, DeviceFilter, DisplayProperties};
use braille_host::application::connectioneer::{LifecycleEvent, UserCommand};
use braille_host::application::display_manager::{BrailleDisplayConsumer, BrailleDisplayManager};
use braille_host::application::transport::TransportError;
use braille_host::infrastructure::storage::registry::MemoryRegistry;
use braille_host::infrastructure::transport::mock::{
    display_properties, MockBluetoothAdapter, MockUsbHost, RecordingCodec,
};
use braille_host::infrastructure::transport::platform::PlatformConnectors;
use braille_host::infrastructure::transport::TransportSettings;
use braille_host::{BrailleService, Connectioneer};

use common::{focus, wait_until, Harness, WAIT};

fn connected_harness() -> Harness {
    let mut h = Harness::new(Arc::new(MemoryRegistry::new()));
    h.adapter.add_bonded(focus(), false);
    h.send(LifecycleEvent::ServiceStarted);
    h
}

fn display_ready(c: &Connectioneer) -> bool {
    c.displayer().is_some_and(|d| d.is_ready())
}

// ── Session start ─────────────────────────────────────────────────────────────

#[test]
fn test_connected_display_becomes_ready() {
    // Arrange
    let mut h = connected_harness();
    let recorder = h.subscribe_session();

    // Act
    h.send(UserCommand::Connect(focus()));
    h.pump_until("display ready", display_ready);

    // Assert
    assert_eq!(
        recorder.properties.lock().unwrap().as_slice(),
        [Some(display_properties(40))]
    );
    assert_eq!(h.spy.starts(), 1);
    let properties = h.conn.displayer().and_then(|d| d.properties()).cloned();
    assert_eq!(properties.map(|p| p.total_text_cells()), Some(40));
}

#[test]
fn test_late_properties_subscriber_gets_current_state() {
    let mut h = connected_harness();
    h.send(UserCommand::Connect(focus()));
    h.pump_until("display ready", display_ready);

    let recorder = h.subscribe_session();

    assert_eq!(
        recorder.properties.lock().unwrap().as_slice(),
        [Some(display_properties(40))]
    );
}

#[test]
fn test_failed_codec_start_drops_the_link() {
    // Arrange
    let mut h = Harness::build_with(
        Arc::new(MemoryRegistry::new()),
        MockBluetoothAdapter::new(),
        MockUsbHost::new(),
        None,
    );
    h.adapter.add_bonded(focus(), false);
    let connection = h.subscribe_connection();
    let session = h.subscribe_session();
    h.send(LifecycleEvent::ServiceStarted);

    // Act
    h.send(UserCommand::Connect(focus()));
    h.pump_until("link dropped", |_| {
        !connection.lost.lock().unwrap().is_empty()
    });

    // Assert
    assert!(matches!(
        connection.lost.lock().unwrap().as_slice(),
        [TransportError::SessionStartFailed]
    ));
    assert!(session.properties.lock().unwrap().is_empty());
    assert!(!h.conn.manager().is_connected());
    assert!(h.conn.displayer().is_none());
    assert_eq!(h.adapter.channels()[0].close_count(), 1);
}

// ── Traffic ───────────────────────────────────────────────────────────────────

#[test]
fn test_written_dots_reach_the_channel() {
    // Arrange
    let mut h = connected_harness();
    let recorder = h.subscribe_session();
    h.send(UserCommand::Connect(focus()));
    h.pump_until("display ready", display_ready);

    // Act
    h.send(UserCommand::WriteDots(vec![0x01, 0x03, 0x07]));
    h.pump_until("packet sent", |_| !recorder.sent.lock().unwrap().is_empty());

    // Assert
    assert_eq!(h.spy.writes(), vec![vec![0x01, 0x03, 0x07]]);
    assert_eq!(h.adapter.channels()[0].written(), vec![vec![0x01, 0x03, 0x07]]);
    assert_eq!(
        recorder.sent.lock().unwrap().as_slice(),
        [vec![0x01, 0x03, 0x07]]
    );
}

#[test]
fn test_dots_before_ready_are_dropped() {
    let mut h = connected_harness();
    h.adapter.set_open_delay(Duration::from_millis(50));
    h.send(UserCommand::Connect(focus()));

    h.send(UserCommand::WriteDots(vec![0xFF]));
    h.pump_until("display ready", display_ready);
    h.pump_for(Duration::from_millis(30));

    assert!(h.spy.writes().is_empty());
    assert!(h.adapter.channels()[0].written().is_empty());
}

#[test]
fn test_incoming_packet_is_decoded_into_input() {
    // Arrange
    let mut h = connected_harness();
    let recorder = h.subscribe_session();
    h.send(UserCommand::Connect(focus()));
    h.pump_until("display ready", display_ready);

    // Act
    h.adapter.channels()[0].feed(&[0x20, 0x01, 0x02]);
    h.pump_until("input event", |_| !recorder.input.lock().unwrap().is_empty());

    // Assert
    assert_eq!(
        recorder.received.lock().unwrap().as_slice(),
        [vec![0x20, 0x01, 0x02]]
    );
    assert_eq!(
        recorder.input.lock().unwrap().as_slice(),
        [BrailleInputEvent {
            command: 0x20,
            argument: 3
        }]
    );
}

// ── Stop ──────────────────────────────────────────────────────────────────────

#[test]
fn test_disconnect_twice_stops_codec_once() {
    // Arrange
    let mut h = connected_harness();
    let recorder = h.subscribe_session();
    h.send(UserCommand::Connect(focus()));
    h.pump_until("display ready", display_ready);

    // Act
    h.send(UserCommand::Disconnect);
    h.send(UserCommand::Disconnect);
    wait_until("codec stop", || h.spy.stops() == 1);
    h.pump_for(Duration::from_millis(50));

    // Assert
    assert_eq!(h.spy.stops(), 1);
    assert_eq!(h.adapter.channels()[0].close_count(), 1);
    assert_eq!(
        recorder.properties.lock().unwrap().last(),
        Some(&None),
        "listeners learn the display is gone"
    );
    assert!(!display_ready(&h.conn));
}

#[test]
fn test_traffic_after_disconnect_is_not_reported() {
    let mut h = connected_harness();
    let recorder = h.subscribe_session();
    h.send(UserCommand::Connect(focus()));
    h.pump_until("display ready", display_ready);
    let channel = h.adapter.channels()[0].clone();

    h.send(UserCommand::Disconnect);
    channel.feed(&[0x42]);
    h.pump_for(Duration::from_millis(50));

    assert!(recorder.input.lock().unwrap().is_empty());
}

// ── Facade ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingConsumer {
    log: Mutex<Vec<String>>,
    input: Mutex<Vec<BrailleInputEvent>>,
}

impl RecordingConsumer {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl BrailleDisplayConsumer for RecordingConsumer {
    fn on_connection_changed(&self, connected: bool, _device: Option<&DeviceDescriptor>) {
        self.log.lock().unwrap().push(format!("connected:{connected}"));
    }

    fn on_display_ready(&self, properties: Option<&DisplayProperties>) {
        let cells = properties.map_or(0, DisplayProperties::total_text_cells);
        self.log.lock().unwrap().push(format!("ready:{cells}"));
    }

    fn on_input_event(&self, event: &BrailleInputEvent) {
        self.input.lock().unwrap().push(*event);
    }
}

async fn eventually(what: &str, done: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Drives the whole stack through the spawned foreground loop, the way a
/// host would.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_display_manager_end_to_end() {
    // Arrange
    common::init_tracing();
    let service = BrailleService::new();
    let adapter = MockBluetoothAdapter::new();
    adapter.add_bonded(focus(), false);
    let connectors = PlatformConnectors::new(
        service.foreground(),
        adapter.clone(),
        MockUsbHost::new(),
        DeviceFilter::default(),
        TransportSettings::default(),
    );
    let (codec_factory, _spy) = RecordingCodec::factory(Some(display_properties(40)));
    let (handle, task) = service.spawn(
        Arc::new(MemoryRegistry::new()),
        Box::new(connectors),
        codec_factory,
    );
    let consumer = Arc::new(RecordingConsumer::default());
    let manager = BrailleDisplayManager::new(handle.clone(), consumer.clone());

    // Act: start, connect, render, receive a key.
    manager.on_service_started();
    handle.send_command(UserCommand::Connect(focus()));
    eventually("display ready", || manager.is_ready()).await;
    assert!(manager.write_braille_dots(&[0x0F, 0xF0]));
    eventually("dots written", || {
        adapter
            .channels()
            .first()
            .is_some_and(|c| !c.written().is_empty())
    })
    .await;
    adapter.channels()[0].feed(&[0x05]);
    eventually("input delivered", || !consumer.input.lock().unwrap().is_empty()).await;

    // Act: stop the service; nothing more reaches the consumer.
    manager.on_service_stopped();
    eventually("link closed", || adapter.channels()[0].is_closed()).await;
    assert!(!manager.write_braille_dots(&[0x01]));

    handle.shutdown();
    let conn = tokio_test::assert_ok!(task.await);

    // Assert
    assert_eq!(consumer.log(), ["connected:true", "ready:40"]);
    assert_eq!(
        consumer.input.lock().unwrap().as_slice(),
        [BrailleInputEvent {
            command: 0x05,
            argument: 1
        }]
    );
    assert_eq!(adapter.channels()[0].written(), vec![vec![0x0F, 0xF0]]);
    assert!(!conn.is_enabled());
    assert!(!conn.manager().is_connected());
}

// ── Discovery window ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_discovery_stops_when_keep_alive_window_expires() {
    // Arrange
    let mut h = Harness::new(Arc::new(MemoryRegistry::new()));
    let recorder = h.subscribe_connection();
    h.send(LifecycleEvent::ServiceStarted);
    assert!(h.conn.manager().is_scanning());

    // Act / Assert: still scanning just before the window closes.
    tokio::time::sleep(Duration::from_secs(29)).await;
    h.pump_ready();
    assert!(h.conn.manager().is_scanning());

    tokio::time::sleep(Duration::from_secs(2)).await;
    h.pump_ready();

    assert!(!h.conn.manager().is_scanning());
    assert_eq!(h.adapter.count("cancel_discovery"), 1);
    assert_eq!(recorder.scanning.lock().unwrap().last(), Some(&false));
}

#[tokio::test(start_paused = true)]
async fn test_screen_on_restarts_keep_alive_window() {
    // Arrange
    let mut h = Harness::new(Arc::new(MemoryRegistry::new()));
    h.send(LifecycleEvent::ServiceStarted);
    tokio::time::sleep(Duration::from_secs(20)).await;

    // Act
    h.send(LifecycleEvent::ScreenOn);
    tokio::time::sleep(Duration::from_secs(15)).await;
    h.pump_ready();

    // Assert: the first window's expiry is stale.
    assert!(h.conn.manager().is_scanning());
    tokio::time::sleep(Duration::from_secs(16)).await;
    h.pump_ready();
    assert!(!h.conn.manager().is_scanning());
}
