//! Shared harness for the integration tests.
//!
//! Builds a coordinator over the mock platform adapters and drives it by
//! hand: events posted by attempt threads, link readers and session workers
//! are pulled from the foreground queue and fed to
//! [`Connectioneer::handle`] until a condition holds.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use braille_core::{
    BrailleInputEvent, DeviceDescriptor, DeviceFilter, DeviceRegistry, DisplayProperties,
};
use braille_host::application::aspects::{
    ConnectStatus, ConnectionListener, DisplayPropertiesListener, ListenerId, Subscription,
    TrafficListener,
};
use braille_host::application::transport::TransportError;
use braille_host::infrastructure::transport::mock::{
    display_properties, CodecSpy, MockBluetoothAdapter, MockUsbHost, RecordingCodec,
};
use braille_host::infrastructure::transport::platform::PlatformConnectors;
use braille_host::infrastructure::transport::TransportSettings;
use braille_host::{BrailleService, Connectioneer, ForegroundEvent};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(3);

/// Routes `tracing` output through the test harness.  Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Polls `done` on the calling thread until it holds.
pub fn wait_until(what: &str, done: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

pub fn focus() -> DeviceDescriptor {
    DeviceDescriptor::bluetooth(Some("Focus 40 Blue"), "AA:BB").unwrap()
}

pub fn brailliant() -> DeviceDescriptor {
    DeviceDescriptor::bluetooth(Some("Brailliant BI 40X"), "CC:DD").unwrap()
}

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct Harness {
    pub conn: Connectioneer,
    pub rx: UnboundedReceiver<ForegroundEvent>,
    pub adapter: Arc<MockBluetoothAdapter>,
    pub usb: Arc<MockUsbHost>,
    pub spy: Arc<CodecSpy>,
}

impl Harness {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self::build(registry, MockBluetoothAdapter::new(), MockUsbHost::new())
    }

    pub fn build(
        registry: Arc<dyn DeviceRegistry>,
        adapter: Arc<MockBluetoothAdapter>,
        usb: Arc<MockUsbHost>,
    ) -> Self {
        Self::build_with(registry, adapter, usb, Some(display_properties(40)))
    }

    /// `properties` is what every codec answers to `start`; `None` fails it.
    pub fn build_with(
        registry: Arc<dyn DeviceRegistry>,
        adapter: Arc<MockBluetoothAdapter>,
        usb: Arc<MockUsbHost>,
        properties: Option<DisplayProperties>,
    ) -> Self {
        init_tracing();
        let service = BrailleService::new();
        let settings = TransportSettings {
            connect_timeout: Duration::from_secs(2),
            ..TransportSettings::default()
        };
        let connectors = PlatformConnectors::new(
            service.foreground(),
            adapter.clone(),
            usb.clone(),
            DeviceFilter::default(),
            settings,
        );
        let (codec_factory, spy) = RecordingCodec::factory(properties);
        let (conn, rx) = service.build(registry, Box::new(connectors), codec_factory);
        Self {
            conn,
            rx,
            adapter,
            usb,
            spy,
        }
    }

    pub fn send(&mut self, event: impl Into<ForegroundEvent>) {
        self.conn.handle(event.into());
    }

    /// Feeds queued events to the coordinator until `done` holds.
    pub fn pump_until(&mut self, what: &str, done: impl Fn(&Connectioneer) -> bool) {
        let deadline = Instant::now() + WAIT;
        while !done(&self.conn) {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            match self.rx.try_recv() {
                Ok(event) => {
                    self.conn.handle(event);
                }
                Err(_) => std::thread::sleep(Duration::from_millis(5)),
            }
        }
    }

    /// Feeds queued events to the coordinator for `duration`.
    pub fn pump_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            match self.rx.try_recv() {
                Ok(event) => {
                    self.conn.handle(event);
                }
                Err(_) => std::thread::sleep(Duration::from_millis(5)),
            }
        }
    }

    /// Feeds whatever is queued right now, without waiting.
    pub fn pump_ready(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.conn.handle(event);
        }
    }

    pub fn subscribe_connection(&mut self) -> Arc<ConnectionRecorder> {
        let recorder = Arc::new(ConnectionRecorder::default());
        self.send(ForegroundEvent::Subscribe(Subscription::Connection(
            ListenerId::next(),
            recorder.clone(),
        )));
        recorder
    }

    pub fn subscribe_session(&mut self) -> Arc<SessionRecorder> {
        let recorder = Arc::new(SessionRecorder::default());
        self.send(ForegroundEvent::Subscribe(Subscription::DisplayProperties(
            ListenerId::next(),
            recorder.clone(),
        )));
        self.send(ForegroundEvent::Subscribe(Subscription::Traffic(
            ListenerId::next(),
            recorder.clone(),
        )));
        recorder
    }

    /// Number of channel opens the Bluetooth adapter was asked for.
    pub fn bluetooth_opens(&self) -> Vec<String> {
        self.adapter
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("open_"))
            .collect()
    }
}

// ── Recorders ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ConnectionRecorder {
    pub statuses: Mutex<Vec<ConnectStatus>>,
    pub device_lists: Mutex<Vec<Vec<DeviceDescriptor>>>,
    pub failures: Mutex<Vec<TransportError>>,
    pub lost: Mutex<Vec<TransportError>>,
    pub scanning: Mutex<Vec<bool>>,
}

impl ConnectionRecorder {
    pub fn statuses(&self) -> Vec<ConnectStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn last_device_list(&self) -> Vec<DeviceDescriptor> {
        self.device_lists
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

impl ConnectionListener for ConnectionRecorder {
    fn on_connection_status_changed(
        &self,
        status: ConnectStatus,
        _device: Option<&DeviceDescriptor>,
    ) {
        self.statuses.lock().unwrap().push(status);
    }

    fn on_device_list_changed(&self, devices: &[DeviceDescriptor]) {
        self.device_lists.lock().unwrap().push(devices.to_vec());
    }

    fn on_scanning_changed(&self, scanning: bool) {
        self.scanning.lock().unwrap().push(scanning);
    }

    fn on_connect_failed(
        &self,
        _device: Option<&DeviceDescriptor>,
        _manual: bool,
        error: &TransportError,
    ) {
        self.failures.lock().unwrap().push(error.clone());
    }

    fn on_link_lost(&self, _device: Option<&DeviceDescriptor>, error: &TransportError) {
        self.lost.lock().unwrap().push(error.clone());
    }
}

#[derive(Default)]
pub struct SessionRecorder {
    pub properties: Mutex<Vec<Option<DisplayProperties>>>,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub received: Mutex<Vec<Vec<u8>>>,
    pub input: Mutex<Vec<BrailleInputEvent>>,
}

impl DisplayPropertiesListener for SessionRecorder {
    fn on_display_properties(&self, properties: Option<&DisplayProperties>) {
        self.properties.lock().unwrap().push(properties.cloned());
    }
}

impl TrafficListener for SessionRecorder {
    fn on_packet_sent(&self, packet: &[u8]) {
        self.sent.lock().unwrap().push(packet.to_vec());
    }

    fn on_packet_received(&self, packet: &[u8]) {
        self.received.lock().unwrap().push(packet.to_vec());
    }

    fn on_input_event(&self, event: &BrailleInputEvent) {
        self.input.lock().unwrap().push(*event);
    }
}
