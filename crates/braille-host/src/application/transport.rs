//! Transport contracts and the normalised connection event vocabulary.
//!
//! Concrete transports (Bluetooth, USB) live in
//! [`crate::infrastructure::transport`].  The application layer only sees
//! the traits and enums defined here:
//!
//! - [`TransportConnector`] discovers peers and opens one link.
//! - [`DuplexLink`] is an open byte channel bound to one device.
//! - [`RawChannel`] is the platform socket or HID handle underneath a link.
//! - [`TransportEvent`] is what the platform and connect-attempt threads
//!   post to the foreground for the active connector to interpret.
//! - [`ConnectionEvent`] is what a connector reports back, in one
//!   transport-agnostic vocabulary.
//!
//! Connectors never call back into the application directly.  They queue
//! [`ConnectionEvent`]s in an outbox that the connection manager drains with
//! [`TransportConnector::take_events`] after every call, so a connector is
//! never re-entered while it is in the middle of a state change.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use braille_core::{ConnectType, DeviceDescriptor, TransportKind};
use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a connect attempt failed or an open link was lost.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The platform denied the capability (scan, bond, connect, USB access).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The Bluetooth radio is off.
    #[error("bluetooth radio is off")]
    RadioOff,

    /// Pairing was rejected or timed out on the peer.
    #[error("bonding failed")]
    BondFailed,

    /// The HID profile could not be opened.
    #[error("HID connection failed: {0}")]
    HidFailed(String),

    /// The RFCOMM socket could not be opened.
    #[error("RFCOMM connection failed: {0}")]
    RfcommFailed(String),

    /// The USB device could not be opened.
    #[error("USB open failed: {0}")]
    UsbOpenFailed(String),

    /// The attempt did not finish within the configured timeout.
    #[error("{0} connect attempt timed out")]
    Timeout(ConnectType),

    /// Read or write failure on an open link.
    #[error("link I/O error: {0}")]
    Io(String),

    /// Operation on a link that has already been shut down.
    #[error("link is closed")]
    LinkClosed,

    /// A device of one transport kind was handed to the other transport.
    #[error("device belongs to a different transport")]
    TransportMismatch,

    /// The link opened but the display session never started.
    #[error("display session failed to start")]
    SessionStartFailed,
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

// ── Reasons and causes ────────────────────────────────────────────────────────

/// What triggered a discovery start or stop.  Logged, and used by connectors
/// that treat some triggers differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryReason {
    Enabled,
    Disabled,
    ScreenOn,
    SettingsEntered,
    SettingsExited,
    UserRequested,
    RadioOn,
    TransportSwitched,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The user asked to disconnect or forget the device.
    UserRequested,
    /// The connection manager switched to the other transport.
    TransportSwitched,
    /// The Bluetooth radio was turned off.
    RadioOff,
    /// The USB device was unplugged.
    DeviceDetached,
    /// A fatal transport error on the open link.
    LinkLost(TransportError),
    /// A connect to another device replaced this one.
    Superseded,
    /// The feature was disabled.
    Disabled,
}

impl DisconnectCause {
    /// Returns `true` for causes the user should be told about.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, DisconnectCause::LinkLost(_))
    }
}

// ── Raw channel and link ──────────────────────────────────────────────────────

/// A platform byte channel (RFCOMM socket, HID or USB handle).
///
/// `read` blocks and is only ever called from the link's reader thread.
pub trait RawChannel: Send + Sync + fmt::Debug {
    /// Reads the next packet into `buf`.  `Ok(0)` means end of stream.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes one packet.
    fn write(&self, packet: &[u8]) -> io::Result<()>;

    /// Releases the platform resource.  Must tolerate being called twice.
    fn close(&self);
}

/// Process-unique identity of one open link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u64);

impl LinkId {
    /// Allocates the next link id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        LinkId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Receives data read from an open link.  Called on the link reader thread.
pub trait LinkSink: Send + Sync {
    /// A packet arrived from the display.
    fn on_packet_arrived(&self, packet: &[u8]);

    /// Input may now be decoded.  Called after every packet.
    fn on_read_ready(&self);
}

/// An open byte-stream channel bound to exactly one device.
///
/// The link is the sole writer and closer of its channel.  `shutdown` is
/// idempotent: the second call is a no-op, never an error.
pub trait DuplexLink: Send + Sync + fmt::Debug {
    fn id(&self) -> LinkId;

    fn device(&self) -> &DeviceDescriptor;

    fn connect_type(&self) -> ConnectType;

    /// Starts delivering incoming packets to `sink`.
    ///
    /// # Errors
    ///
    /// [`TransportError::LinkClosed`] if the link was already shut down, or
    /// an I/O error if the reader could not be started.
    fn open(&self, sink: Arc<dyn LinkSink>) -> Result<(), TransportError>;

    /// Writes one packet to the display.
    ///
    /// # Errors
    ///
    /// [`TransportError::LinkClosed`] after shutdown, or an I/O error.
    fn send_outgoing_packet(&self, packet: &[u8]) -> Result<(), TransportError>;

    /// Closes the channel.  Idempotent.
    fn shutdown(&self);

    fn is_closed(&self) -> bool;
}

// ── Platform notifications ────────────────────────────────────────────────────

/// Bond state of a Bluetooth peer as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

/// A Bluetooth peer as seen by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct BluetoothPeer {
    pub device: DeviceDescriptor,
    pub bonded: bool,
    /// The peer advertises the HID profile.
    pub hid_capable: bool,
}

/// Notifications from the Bluetooth stack.
#[derive(Debug, Clone, PartialEq)]
pub enum BluetoothEvent {
    RadioStateChanged { enabled: bool },
    DiscoveryStarted,
    DiscoveryFinished,
    DiscoveryFailed,
    DeviceFound(BluetoothPeer),
    BondStateChanged { address: String, state: BondState },
}

/// A USB device as seen by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct UsbDeviceInfo {
    pub device: DeviceDescriptor,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Notifications from the USB host stack.
#[derive(Debug, Clone, PartialEq)]
pub enum UsbEvent {
    Attached(UsbDeviceInfo),
    Detached { address: String },
    PermissionResult { address: String, granted: bool },
}

/// Events posted to the foreground for the active connector.
#[derive(Debug)]
pub enum TransportEvent {
    Bluetooth(BluetoothEvent),
    Usb(UsbEvent),
    /// A connect-attempt thread finished.
    AttemptFinished {
        attempt: u64,
        result: Result<Arc<dyn RawChannel>, TransportError>,
    },
    /// A connect attempt hit its timeout.
    AttemptTimedOut { attempt: u64 },
    /// The discovery keep-alive window with `token` ran out.
    DiscoveryExpired { token: u64 },
    /// Time to retry discovery after a failure.
    DiscoveryRetry { token: u64 },
    /// The reader thread of an open link hit a fatal error.
    LinkFailed { link: LinkId, error: TransportError },
}

// ── Connector contract ────────────────────────────────────────────────────────

/// What a connector reports back to the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The device list was reset (transport switched, radio off).
    DeviceListCleared,
    DeviceSeenOrUpdated(DeviceDescriptor),
    DeviceDeleted(DeviceDescriptor),
    /// A connect attempt over `connect_type` began.
    ConnectStarted {
        device: DeviceDescriptor,
        connect_type: ConnectType,
    },
    Connected(Arc<dyn DuplexLink>),
    /// A connect request ended without a link.
    ConnectFailed {
        device: Option<DeviceDescriptor>,
        manual: bool,
        error: TransportError,
    },
    Disconnected {
        device: Option<DeviceDescriptor>,
        cause: DisconnectCause,
    },
    /// The transport became usable or unusable (radio on/off).
    ConnectivityEnabled(bool),
    SearchStatusChanged { scanning: bool },
    SearchFailure,
}

/// Per-transport discovery and connection logic.
///
/// Every permission-gated call degrades to an empty or `false` result when
/// the platform denies the capability; none of these methods fail.
pub trait TransportConnector: Send {
    fn kind(&self) -> TransportKind;

    /// Starts discovery, or extends the keep-alive window if already running.
    fn start_discovery(&mut self, reason: DiscoveryReason);

    fn stop_discovery(&mut self, reason: DiscoveryReason);

    /// Connects to `device`, tearing down any pending attempt first.
    fn connect(&mut self, device: &DeviceDescriptor, manual: bool);

    /// Cancels a pending attempt and closes the open link, if any.
    fn disconnect(&mut self, cause: DisconnectCause);

    fn is_scanning(&self) -> bool;

    fn is_connecting(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Devices seen by discovery (or attached, for USB).
    fn known_devices(&self) -> Vec<DeviceDescriptor>;

    /// Devices the platform has a bond with.  Empty for USB.
    fn paired_devices(&self) -> Vec<DeviceDescriptor>;

    /// `false` while the transport is unusable (radio off).
    fn connectivity_enabled(&self) -> bool;

    /// Interprets one platform or attempt notification.
    fn handle_event(&mut self, event: TransportEvent);

    /// Drains the events queued since the last call.
    fn take_events(&mut self) -> Vec<ConnectionEvent>;
}

/// Creates connectors and supplies the transport selection policy.
pub trait ConnectorFactory: Send {
    fn create(&mut self, kind: TransportKind) -> Box<dyn TransportConnector>;

    /// The transport the platform currently favours (USB while a supported
    /// USB display is attached, else Bluetooth).
    fn preferred_transport(&self) -> TransportKind;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
