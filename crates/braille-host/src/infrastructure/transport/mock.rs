//! Scriptable platform doubles.
//!
//! Always compiled so that integration tests and downstream crates can drive
//! the connection core without a radio or a display attached.  Each double
//! records what was asked of it; the `calls()` lists contain only actions
//! (scans, bonds, opens), never state queries.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use braille_core::{
    BrailleInputEvent, CodecFactory, CodecHost, DeviceDescriptor, DeviceParameters,
    DisplayProperties, PacketConsumer, SessionCodec,
};
use parking_lot::{Condvar, Mutex};

use crate::application::transport::{BluetoothPeer, RawChannel, UsbDeviceInfo};
use crate::infrastructure::transport::bluetooth::BluetoothAdapter;
use crate::infrastructure::transport::usb::UsbHost;
use crate::infrastructure::transport::PlatformError;

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Properties of a single-row display with `cells` text cells.
pub fn display_properties(cells: u16) -> DisplayProperties {
    DisplayProperties {
        driver_name: "mock".to_string(),
        text_cells: cells,
        rows: 1,
        status_cells: 0,
    }
}

pub fn bluetooth_peer(device: DeviceDescriptor, bonded: bool, hid_capable: bool) -> BluetoothPeer {
    BluetoothPeer {
        device,
        bonded,
        hid_capable,
    }
}

// ── MockChannel ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct ChannelState {
    incoming: VecDeque<Vec<u8>>,
    read_error: Option<io::ErrorKind>,
    written: Vec<Vec<u8>>,
    closed: bool,
    close_count: usize,
}

/// In-memory [`RawChannel`].  `read` blocks until bytes are fed, an error is
/// injected, or the channel is closed (which reads as end of stream).
#[derive(Default)]
pub struct MockChannel {
    state: Mutex<ChannelState>,
    readable: Condvar,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues `bytes` as one packet for the reader.
    pub fn feed(&self, bytes: &[u8]) {
        self.state.lock().incoming.push_back(bytes.to_vec());
        self.readable.notify_all();
    }

    /// Makes the next read fail with `kind`.
    pub fn fail_read(&self, kind: io::ErrorKind) {
        self.state.lock().read_error = Some(kind);
        self.readable.notify_all();
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl std::fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockChannel")
            .field("pending", &state.incoming.len())
            .field("written", &state.written.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl RawChannel for MockChannel {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        loop {
            if let Some(kind) = state.read_error.take() {
                return Err(io::Error::new(kind, "injected read failure"));
            }
            if let Some(packet) = state.incoming.pop_front() {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            self.readable.wait(&mut state);
        }
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
        }
        state.written.push(bytes.to_vec());
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.close_count += 1;
        drop(state);
        self.readable.notify_all();
    }
}

// ── MockBluetoothAdapter ──────────────────────────────────────────────────────

struct AdapterState {
    enabled: bool,
    hid_host: bool,
    bonded: Vec<BluetoothPeer>,
    fail_hid: HashSet<String>,
    fail_rfcomm: HashSet<String>,
    open_delay: Duration,
    deny_permissions: bool,
    fail_discovery: bool,
    calls: Vec<String>,
    channels: Vec<Arc<MockChannel>>,
}

/// Bluetooth adapter that is on, supports HID and opens every channel
/// unless told otherwise.
pub struct MockBluetoothAdapter {
    state: Mutex<AdapterState>,
}

impl MockBluetoothAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(AdapterState {
                enabled: true,
                hid_host: true,
                bonded: Vec::new(),
                fail_hid: HashSet::new(),
                fail_rfcomm: HashSet::new(),
                open_delay: Duration::ZERO,
                deny_permissions: false,
                fail_discovery: false,
                calls: Vec::new(),
                channels: Vec::new(),
            }),
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    pub fn set_hid_support(&self, supported: bool) {
        self.state.lock().hid_host = supported;
    }

    pub fn add_bonded(&self, device: DeviceDescriptor, hid_capable: bool) {
        let mut state = self.state.lock();
        state.bonded.retain(|p| p.device != device);
        state.bonded.push(bluetooth_peer(device, true, hid_capable));
    }

    /// Makes HID opens to `address` fail.
    pub fn fail_hid(&self, address: &str) {
        self.state
            .lock()
            .fail_hid
            .insert(braille_core::domain::device::normalize_address(address));
    }

    /// Makes RFCOMM opens to `address` fail.
    pub fn fail_rfcomm(&self, address: &str) {
        self.state
            .lock()
            .fail_rfcomm
            .insert(braille_core::domain::device::normalize_address(address));
    }

    /// Delays every open call.
    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().open_delay = delay;
    }

    /// Every call from now on fails with a permission error.
    pub fn deny_permissions(&self) {
        self.state.lock().deny_permissions = true;
    }

    pub fn fail_discovery(&self, fail: bool) {
        self.state.lock().fail_discovery = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Channels handed out so far, oldest first.
    pub fn channels(&self) -> Vec<Arc<MockChannel>> {
        self.state.lock().channels.clone()
    }

    fn denied(&self, operation: &str) -> Result<(), PlatformError> {
        if self.state.lock().deny_permissions {
            Err(PlatformError::PermissionDenied(operation.to_string()))
        } else {
            Ok(())
        }
    }

    fn open(&self, profile: &str, device: &DeviceDescriptor) -> Result<Arc<dyn RawChannel>, PlatformError> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(format!("open_{} {}", profile, device.address()));
            state.open_delay
        };
        self.denied("connect")?;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.state.lock();
        let failing = match profile {
            "hid" => &state.fail_hid,
            _ => &state.fail_rfcomm,
        };
        if failing.contains(device.address()) {
            return Err(PlatformError::Io(format!("{} connect refused", profile)));
        }
        let channel = MockChannel::new();
        state.channels.push(Arc::clone(&channel));
        Ok(channel)
    }
}

impl BluetoothAdapter for MockBluetoothAdapter {
    fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    fn supports_hid_host(&self) -> bool {
        self.state.lock().hid_host
    }

    fn start_discovery(&self) -> Result<(), PlatformError> {
        self.state.lock().calls.push("start_discovery".to_string());
        self.denied("scan")?;
        if self.state.lock().fail_discovery {
            return Err(PlatformError::Unavailable("discovery".to_string()));
        }
        Ok(())
    }

    fn cancel_discovery(&self) -> Result<(), PlatformError> {
        self.state.lock().calls.push("cancel_discovery".to_string());
        self.denied("scan")
    }

    fn bonded_devices(&self) -> Result<Vec<BluetoothPeer>, PlatformError> {
        self.denied("bonded devices")?;
        Ok(self.state.lock().bonded.clone())
    }

    fn create_bond(&self, address: &str) -> Result<(), PlatformError> {
        self.state.lock().calls.push(format!("create_bond {}", address));
        self.denied("bond")
    }

    fn open_hid(&self, device: &DeviceDescriptor) -> Result<Arc<dyn RawChannel>, PlatformError> {
        self.open("hid", device)
    }

    fn open_rfcomm(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Arc<dyn RawChannel>, PlatformError> {
        self.open("rfcomm", device)
    }
}

// ── MockUsbHost ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct UsbState {
    attached: Vec<UsbDeviceInfo>,
    require_permission: bool,
    granted: HashSet<String>,
    fail_open: HashSet<String>,
    calls: Vec<String>,
    channels: Vec<Arc<MockChannel>>,
}

/// USB host with nothing attached.  Permission is implicit unless
/// [`require_permission`](Self::require_permission) is called.
#[derive(Default)]
pub struct MockUsbHost {
    state: Mutex<UsbState>,
}

impl MockUsbHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(&self, info: UsbDeviceInfo) {
        let mut state = self.state.lock();
        state.attached.retain(|d| d.device != info.device);
        state.attached.push(info);
    }

    pub fn detach(&self, address: &str) {
        self.state
            .lock()
            .attached
            .retain(|d| !d.device.has_address(address));
    }

    pub fn require_permission(&self) {
        self.state.lock().require_permission = true;
    }

    pub fn grant(&self, address: &str) {
        self.state
            .lock()
            .granted
            .insert(braille_core::domain::device::normalize_address(address));
    }

    pub fn fail_open(&self, address: &str) {
        self.state
            .lock()
            .fail_open
            .insert(braille_core::domain::device::normalize_address(address));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn channels(&self) -> Vec<Arc<MockChannel>> {
        self.state.lock().channels.clone()
    }
}

impl UsbHost for MockUsbHost {
    fn attached_devices(&self) -> Result<Vec<UsbDeviceInfo>, PlatformError> {
        Ok(self.state.lock().attached.clone())
    }

    fn has_permission(&self, address: &str) -> bool {
        let state = self.state.lock();
        !state.require_permission
            || state
                .granted
                .contains(&braille_core::domain::device::normalize_address(address))
    }

    fn request_permission(&self, address: &str) -> Result<(), PlatformError> {
        self.state
            .lock()
            .calls
            .push(format!("request_permission {}", address));
        Ok(())
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Arc<dyn RawChannel>, PlatformError> {
        let mut state = self.state.lock();
        state.calls.push(format!("open_usb {}", device.address()));
        if state.fail_open.contains(device.address()) {
            return Err(PlatformError::Io("usb open refused".to_string()));
        }
        if !state.attached.iter().any(|d| d.device == *device) {
            return Err(PlatformError::Unavailable(device.address().to_string()));
        }
        let channel = MockChannel::new();
        state.channels.push(Arc::clone(&channel));
        Ok(channel)
    }
}

// ── RecordingCodec ────────────────────────────────────────────────────────────

#[derive(Default)]
struct SpyState {
    starts: usize,
    stops: usize,
    writes: Vec<Vec<u8>>,
    received: Vec<Vec<u8>>,
    input: VecDeque<BrailleInputEvent>,
    reads: usize,
}

/// Observes every [`RecordingCodec`] made from it.
///
/// Also the codec's packet consumer: each received packet is decoded as one
/// input event whose command is the first byte and whose argument is the
/// packet length.
#[derive(Default)]
pub struct CodecSpy {
    state: Mutex<SpyState>,
}

impl CodecSpy {
    pub fn starts(&self) -> usize {
        self.state.lock().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.state.lock().received.clone()
    }

    /// Number of `read_command` calls, including those that found nothing.
    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    pub fn queue_input(&self, event: BrailleInputEvent) {
        self.state.lock().input.push_back(event);
    }
}

impl PacketConsumer for CodecSpy {
    fn consume_packet_from_device(&self, packet: &[u8]) {
        let mut state = self.state.lock();
        state.received.push(packet.to_vec());
        if let Some(&first) = packet.first() {
            state.input.push_back(BrailleInputEvent {
                command: u32::from(first),
                argument: i32::try_from(packet.len()).unwrap_or(i32::MAX),
            });
        }
    }
}

/// Codec that answers `start` with fixed properties (or `None` to fail) and
/// echoes written dots to the device as a single packet.
pub struct RecordingCodec {
    properties: Option<DisplayProperties>,
    spy: Arc<CodecSpy>,
    host: Option<Arc<dyn CodecHost>>,
    read_delays: Vec<Duration>,
}

impl RecordingCodec {
    pub fn new(properties: Option<DisplayProperties>) -> (Self, Arc<CodecSpy>) {
        let spy = Arc::new(CodecSpy::default());
        (Self::with_spy(properties, Arc::clone(&spy)), spy)
    }

    pub fn with_spy(properties: Option<DisplayProperties>, spy: Arc<CodecSpy>) -> Self {
        Self {
            properties,
            spy,
            host: None,
            read_delays: Vec::new(),
        }
    }

    /// Asks the host for a deferred read with each of `delays` during a
    /// successful `start`, in order.
    pub fn with_read_delays(mut self, delays: Vec<Duration>) -> Self {
        self.read_delays = delays;
        self
    }

    /// A factory whose codecs all share one spy.
    pub fn factory(
        properties: Option<DisplayProperties>,
    ) -> (Arc<dyn CodecFactory>, Arc<CodecSpy>) {
        let spy = Arc::new(CodecSpy::default());
        let shared = Arc::clone(&spy);
        let factory: Arc<dyn CodecFactory> = Arc::new(move || -> Box<dyn SessionCodec> {
            Box::new(RecordingCodec::with_spy(
                properties.clone(),
                Arc::clone(&shared),
            ))
        });
        (factory, spy)
    }
}

impl SessionCodec for RecordingCodec {
    fn start(
        &mut self,
        _parameters: &DeviceParameters,
        host: Arc<dyn CodecHost>,
    ) -> Option<DisplayProperties> {
        self.spy.state.lock().starts += 1;
        if self.properties.is_some() {
            for delay in &self.read_delays {
                host.read_after_delay(*delay);
            }
        }
        self.host = Some(host);
        self.properties.clone()
    }

    fn stop(&mut self) {
        self.spy.state.lock().stops += 1;
        self.host = None;
    }

    fn write_braille_dots(&mut self, dots: &[u8]) {
        self.spy.state.lock().writes.push(dots.to_vec());
        if let Some(host) = &self.host {
            host.send_packet_to_device(dots);
        }
    }

    fn read_command(&mut self) -> Option<BrailleInputEvent> {
        let mut state = self.spy.state.lock();
        state.reads += 1;
        state.input.pop_front()
    }

    fn packet_consumer(&self) -> Arc<dyn PacketConsumer> {
        Arc::clone(&self.spy) as Arc<dyn PacketConsumer>
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
