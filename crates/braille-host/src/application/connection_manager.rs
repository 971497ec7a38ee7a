//! Connection manager: one active transport connector and the connection
//! phase state machine.
//!
//! # Responsibilities
//!
//! - Own exactly one [`TransportConnector`] at a time and switch between
//!   Bluetooth and USB at runtime, disconnecting the old transport first.
//! - Keep the [`ConnectionPhase`] consistent with what the connector
//!   reports.  `Connected` holds the link itself, so "connected without a
//!   link" cannot be expressed.
//! - Forward the connector's normalised [`ConnectionEvent`]s to the
//!   coordinator through its own outbox.
//!
//! # Single link
//!
//! When a connector reports a new link while another one is still held,
//! the old link is shut down before the new one is recorded, whether or not
//! the connector already closed it.
//!
//! All methods run on the foreground context.

use std::sync::Arc;

use braille_core::{DeviceDescriptor, TransportKind};
use tracing::{debug, info, warn};

use crate::application::transport::{
    ConnectionEvent, ConnectorFactory, DisconnectCause, DiscoveryReason, DuplexLink,
    TransportConnector, TransportError, TransportEvent,
};

/// Where the connection currently stands.
#[derive(Debug, Clone)]
pub enum ConnectionPhase {
    Idle,
    Scanning,
    Connecting(DeviceDescriptor),
    Connected(Arc<dyn DuplexLink>),
}

impl ConnectionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionPhase::Idle => "idle",
            ConnectionPhase::Scanning => "scanning",
            ConnectionPhase::Connecting(_) => "connecting",
            ConnectionPhase::Connected(_) => "connected",
        }
    }
}

/// Transport-agnostic discovery, connect and disconnect.
pub struct ConnectionManager {
    factory: Box<dyn ConnectorFactory>,
    connector: Box<dyn TransportConnector>,
    phase: ConnectionPhase,
    events: Vec<ConnectionEvent>,
}

impl ConnectionManager {
    /// Creates the manager with a connector for the factory's preferred
    /// transport.
    pub fn new(mut factory: Box<dyn ConnectorFactory>) -> Self {
        let kind = factory.preferred_transport();
        let connector = factory.create(kind);
        info!("connection manager starting on {}", kind);
        Self {
            factory,
            connector,
            phase: ConnectionPhase::Idle,
            events: Vec::new(),
        }
    }

    // ── Transport selection ───────────────────────────────────────────────────

    pub fn active_transport(&self) -> TransportKind {
        self.connector.kind()
    }

    pub fn preferred_transport(&self) -> TransportKind {
        self.factory.preferred_transport()
    }

    /// Switches to `kind`.  Returns `false` if it is already active.
    ///
    /// An open or pending connection on the old transport is torn down with
    /// [`DisconnectCause::TransportSwitched`] before the new connector is
    /// created, and a [`ConnectionEvent::DeviceListCleared`] follows.
    pub fn set_transport(&mut self, kind: TransportKind) -> bool {
        if kind == self.connector.kind() {
            return false;
        }
        info!("switching transport {} -> {}", self.connector.kind(), kind);

        if self.connector.is_connected() || self.connector.is_connecting() {
            self.connector.disconnect(DisconnectCause::TransportSwitched);
        }
        self.connector
            .stop_discovery(DiscoveryReason::TransportSwitched);
        self.pump();

        // Anything the old connector still held is gone with it.
        if let ConnectionPhase::Connected(link) = &self.phase {
            link.shutdown();
        }
        self.connector = self.factory.create(kind);
        self.phase = ConnectionPhase::Idle;
        self.events.push(ConnectionEvent::DeviceListCleared);
        self.pump();
        true
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Starts connecting to `device`.
    ///
    /// On return the phase is `Connecting`, `Connected`, or idle with a
    /// [`ConnectionEvent::ConnectFailed`] already queued.
    pub fn connect(&mut self, device: &DeviceDescriptor, manual: bool) {
        if device.transport() != self.connector.kind() {
            warn!(
                "refusing to connect {} device {} on {} transport",
                device.transport(),
                device.label(),
                self.connector.kind()
            );
            self.events.push(ConnectionEvent::ConnectFailed {
                device: Some(device.clone()),
                manual,
                error: TransportError::TransportMismatch,
            });
            return;
        }
        debug!("connect {} (manual={})", device.label(), manual);
        self.connector.connect(device, manual);
        self.pump();
    }

    pub fn disconnect(&mut self, cause: DisconnectCause) {
        debug!("disconnect: {:?}", cause);
        self.connector.disconnect(cause);
        self.pump();
    }

    pub fn start_discovery(&mut self, reason: DiscoveryReason) {
        self.connector.start_discovery(reason);
        self.pump();
    }

    pub fn stop_discovery(&mut self, reason: DiscoveryReason) {
        self.connector.stop_discovery(reason);
        self.pump();
    }

    /// Hands a platform or attempt notification to the active connector.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        self.connector.handle_event(event);
        self.pump();
    }

    /// Drains the events queued since the last call.
    pub fn take_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn phase(&self) -> &ConnectionPhase {
        &self.phase
    }

    pub fn connecting_device(&self) -> Option<&DeviceDescriptor> {
        match &self.phase {
            ConnectionPhase::Connecting(device) => Some(device),
            _ => None,
        }
    }

    pub fn connected_link(&self) -> Option<Arc<dyn DuplexLink>> {
        match &self.phase {
            ConnectionPhase::Connected(link) => Some(Arc::clone(link)),
            _ => None,
        }
    }

    pub fn connected_device(&self) -> Option<DeviceDescriptor> {
        match &self.phase {
            ConnectionPhase::Connected(link) => Some(link.device().clone()),
            _ => None,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.connector.is_scanning()
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Connecting(_))
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Connected(_))
    }

    pub fn known_devices(&self) -> Vec<DeviceDescriptor> {
        self.connector.known_devices()
    }

    pub fn paired_devices(&self) -> Vec<DeviceDescriptor> {
        self.connector.paired_devices()
    }

    pub fn connectivity_enabled(&self) -> bool {
        self.connector.connectivity_enabled()
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    /// Applies the connector's queued events to the phase and moves them to
    /// the outbox.
    fn pump(&mut self) {
        for event in self.connector.take_events() {
            match &event {
                ConnectionEvent::ConnectStarted { device, .. } => {
                    self.release_link();
                    self.phase = ConnectionPhase::Connecting(device.clone());
                }
                ConnectionEvent::Connected(link) => {
                    if let ConnectionPhase::Connected(old) = &self.phase {
                        if old.id() != link.id() {
                            warn!("{} replaced by {}, closing the old one", old.id(), link.id());
                            old.shutdown();
                        }
                    }
                    info!("connected to {} over {}", link.device().label(), link.connect_type());
                    self.phase = ConnectionPhase::Connected(Arc::clone(link));
                }
                ConnectionEvent::ConnectFailed { .. } => {
                    if self.is_connecting() {
                        self.phase = ConnectionPhase::Idle;
                    }
                }
                ConnectionEvent::Disconnected { .. } => {
                    self.release_link();
                    self.phase = ConnectionPhase::Idle;
                }
                _ => {}
            }
            self.events.push(event);
        }
        self.settle();
    }

    /// Shuts a held link down before the phase moves off `Connected`.
    fn release_link(&mut self) {
        if let ConnectionPhase::Connected(link) = &self.phase {
            link.shutdown();
        }
    }

    fn settle(&mut self) {
        match self.phase {
            ConnectionPhase::Connecting(_) | ConnectionPhase::Connected(_) => {}
            _ => {
                self.phase = if self.connector.is_scanning() {
                    ConnectionPhase::Scanning
                } else {
                    ConnectionPhase::Idle
                };
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use braille_core::ConnectType;

    use crate::application::transport::{LinkId, LinkSink};

    // ── Test doubles ──────────────────────────────────────────────────────────

    #[derive(Debug)]
    struct FakeLink {
        id: LinkId,
        device: DeviceDescriptor,
        closed: AtomicBool,
    }

    impl FakeLink {
        fn new(device: &DeviceDescriptor) -> Arc<Self> {
            Arc::new(Self {
                id: LinkId::next(),
                device: device.clone(),
                closed: AtomicBool::new(false),
            })
        }
    }

    impl DuplexLink for FakeLink {
        fn id(&self) -> LinkId {
            self.id
        }
        fn device(&self) -> &DeviceDescriptor {
            &self.device
        }
        fn connect_type(&self) -> ConnectType {
            ConnectType::BtRfcomm
        }
        fn open(&self, _sink: Arc<dyn LinkSink>) -> Result<(), TransportError> {
            Ok(())
        }
        fn send_outgoing_packet(&self, _packet: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
        fn shutdown(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    /// Connector that connects synchronously and records every call.
    struct InstantConnector {
        kind: TransportKind,
        calls: Arc<Mutex<Vec<String>>>,
        link: Option<Arc<FakeLink>>,
        scanning: bool,
        outbox: Vec<ConnectionEvent>,
    }

    impl TransportConnector for InstantConnector {
        fn kind(&self) -> TransportKind {
            self.kind
        }
        fn start_discovery(&mut self, _reason: DiscoveryReason) {
            self.calls.lock().unwrap().push("start_discovery".into());
            self.scanning = true;
            self.outbox
                .push(ConnectionEvent::SearchStatusChanged { scanning: true });
        }
        fn stop_discovery(&mut self, _reason: DiscoveryReason) {
            self.calls.lock().unwrap().push("stop_discovery".into());
            self.scanning = false;
        }
        fn connect(&mut self, device: &DeviceDescriptor, _manual: bool) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("connect {}", device.address()));
            let link = FakeLink::new(device);
            self.outbox.push(ConnectionEvent::ConnectStarted {
                device: device.clone(),
                connect_type: ConnectType::BtRfcomm,
            });
            self.outbox.push(ConnectionEvent::Connected(link.clone()));
            self.link = Some(link);
        }
        fn disconnect(&mut self, cause: DisconnectCause) {
            self.calls.lock().unwrap().push(format!("disconnect {:?}", cause));
            if let Some(link) = self.link.take() {
                link.shutdown();
                self.outbox.push(ConnectionEvent::Disconnected {
                    device: Some(link.device.clone()),
                    cause,
                });
            }
        }
        fn is_scanning(&self) -> bool {
            self.scanning
        }
        fn is_connecting(&self) -> bool {
            false
        }
        fn is_connected(&self) -> bool {
            self.link.is_some()
        }
        fn known_devices(&self) -> Vec<DeviceDescriptor> {
            Vec::new()
        }
        fn paired_devices(&self) -> Vec<DeviceDescriptor> {
            Vec::new()
        }
        fn connectivity_enabled(&self) -> bool {
            true
        }
        fn handle_event(&mut self, _event: TransportEvent) {}
        fn take_events(&mut self) -> Vec<ConnectionEvent> {
            std::mem::take(&mut self.outbox)
        }
    }

    struct RecordingFactory {
        preferred: TransportKind,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ConnectorFactory for RecordingFactory {
        fn create(&mut self, kind: TransportKind) -> Box<dyn TransportConnector> {
            self.calls.lock().unwrap().push(format!("create {}", kind));
            Box::new(InstantConnector {
                kind,
                calls: Arc::clone(&self.calls),
                link: None,
                scanning: false,
                outbox: Vec::new(),
            })
        }
        fn preferred_transport(&self) -> TransportKind {
            self.preferred
        }
    }

    fn make_manager() -> (ConnectionManager, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let factory = RecordingFactory {
            preferred: TransportKind::Bluetooth,
            calls: Arc::clone(&calls),
        };
        (ConnectionManager::new(Box::new(factory)), calls)
    }

    fn bt(address: &str) -> DeviceDescriptor {
        DeviceDescriptor::bluetooth(Some("Focus 40"), address).unwrap()
    }

    // ── Phase ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_new_manager_is_idle_on_preferred_transport() {
        let (manager, calls) = make_manager();
        assert!(matches!(manager.phase(), ConnectionPhase::Idle));
        assert_eq!(manager.active_transport(), TransportKind::Bluetooth);
        assert_eq!(calls.lock().unwrap().as_slice(), ["create bluetooth"]);
    }

    #[test]
    fn test_connect_moves_phase_to_connected_with_link() {
        // Arrange
        let (mut manager, _) = make_manager();

        // Act
        manager.connect(&bt("AA:BB"), true);

        // Assert
        assert!(manager.is_connected());
        assert_eq!(manager.connected_device(), Some(bt("AA:BB")));
        let events = manager.take_events();
        assert!(matches!(events[0], ConnectionEvent::ConnectStarted { .. }));
        assert!(matches!(events[1], ConnectionEvent::Connected(_)));
    }

    #[test]
    fn test_disconnect_returns_to_idle_and_closes_link() {
        let (mut manager, _) = make_manager();
        manager.connect(&bt("AA:BB"), true);
        let link = manager.connected_link().unwrap();

        manager.disconnect(DisconnectCause::UserRequested);

        assert!(matches!(manager.phase(), ConnectionPhase::Idle));
        assert!(link.is_closed());
        assert!(manager.connected_link().is_none());
    }

    #[test]
    fn test_second_connect_closes_first_link() {
        let (mut manager, _) = make_manager();
        manager.connect(&bt("AA:BB"), true);
        let first = manager.connected_link().unwrap();

        manager.connect(&bt("CC:DD"), true);

        assert!(first.is_closed(), "only one link may be open");
        assert_eq!(manager.connected_device(), Some(bt("CC:DD")));
    }

    #[test]
    fn test_discovery_moves_phase_to_scanning() {
        let (mut manager, _) = make_manager();
        manager.start_discovery(DiscoveryReason::UserRequested);
        assert!(matches!(manager.phase(), ConnectionPhase::Scanning));

        manager.stop_discovery(DiscoveryReason::UserRequested);
        assert!(matches!(manager.phase(), ConnectionPhase::Idle));
    }

    // ── Transport switching ───────────────────────────────────────────────────

    #[test]
    fn test_set_transport_disconnects_old_transport_first() {
        // Arrange
        let (mut manager, calls) = make_manager();
        manager.connect(&bt("AA:BB"), true);
        let link = manager.connected_link().unwrap();
        manager.take_events();

        // Act
        let switched = manager.set_transport(TransportKind::Usb);

        // Assert
        assert!(switched);
        assert!(link.is_closed());
        assert_eq!(manager.active_transport(), TransportKind::Usb);
        let events = manager.take_events();
        assert!(matches!(
            &events[0],
            ConnectionEvent::Disconnected { cause: DisconnectCause::TransportSwitched, .. }
        ));
        assert!(matches!(events.last(), Some(ConnectionEvent::DeviceListCleared)));
        let calls = calls.lock().unwrap();
        let disconnect = calls.iter().position(|c| c.starts_with("disconnect")).unwrap();
        let create = calls.iter().position(|c| c == "create usb").unwrap();
        assert!(disconnect < create);
    }

    #[test]
    fn test_set_transport_to_active_kind_is_noop() {
        let (mut manager, _) = make_manager();
        assert!(!manager.set_transport(TransportKind::Bluetooth));
        assert!(manager.take_events().is_empty());
    }

    #[test]
    fn test_connect_with_wrong_transport_fails_immediately() {
        let (mut manager, calls) = make_manager();
        let usb = DeviceDescriptor::usb(Some("Orbit Reader 20"), "usb-1").unwrap();

        manager.connect(&usb, false);

        assert!(matches!(manager.phase(), ConnectionPhase::Idle));
        let events = manager.take_events();
        assert!(matches!(
            &events[0],
            ConnectionEvent::ConnectFailed { error: TransportError::TransportMismatch, .. }
        ));
        assert!(!calls.lock().unwrap().iter().any(|c| c.starts_with("connect")));
    }
}
