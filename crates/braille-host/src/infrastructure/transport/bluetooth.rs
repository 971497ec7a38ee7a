//! Bluetooth transport connector.
//!
//! # Connect sequence
//!
//! ```text
//! connect(device)
//!   ├─ not bonded ──► create_bond ──► AwaitingBond ──BondStateChanged(Bonded)──┐
//!   │                                               └─(None)──► ConnectFailed   │
//!   └─ bonded ──────────────────────────────────────────────────────────────────┤
//!                                                                               ▼
//!        HID supported by host and peer, prefer_hid? ── yes ──► attempt(BtHid)
//!                     │ no                                       │ fail / timeout
//!                     ▼                                          ▼
//!               attempt(BtRfcomm) ◄──────────────────────── fall back
//!                     │ ok                      │ fail / timeout
//!                     ▼                         ▼
//!                 Connected               ConnectFailed
//! ```
//!
//! The HID failure is handled entirely inside this connector; upstream only
//! sees `ConnectStarted(BtHid)`, `ConnectStarted(BtRfcomm)` and the outcome.
//!
//! # Discovery
//!
//! Discovery runs inside a [`DiscoveryWindow`].  When the platform reports
//! that a scan finished, it is restarted while the window is open and no
//! connection is in progress.  A failed start is retried after a short delay
//! while the window is open.
//!
//! # Permissions
//!
//! Any adapter call may return [`PlatformError::PermissionDenied`].  Scans
//! then simply do not run, the bonded list reads as empty, and connects fail
//! with [`TransportError::PermissionDenied`].  Nothing panics or propagates.

use std::sync::Arc;

use braille_core::{ConnectType, DeviceDescriptor, DeviceFilter, TransportKind};
use tracing::{debug, info, trace, warn};

use crate::application::foreground::Foreground;
use crate::application::transport::{
    BluetoothEvent, BluetoothPeer, BondState, ConnectionEvent, DisconnectCause, DiscoveryReason,
    DuplexLink, RawChannel, TransportConnector, TransportError, TransportEvent,
};
use crate::infrastructure::transport::attempt::ConnectAttempt;
use crate::infrastructure::transport::discovery::DiscoveryWindow;
use crate::infrastructure::transport::link::ChannelLink;
use crate::infrastructure::transport::{PlatformError, TransportSettings};

/// What the connector needs from the platform Bluetooth stack.
///
/// `open_hid` and `open_rfcomm` block until the channel is open or the open
/// fails; they are only called from attempt threads.
pub trait BluetoothAdapter: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// The host can act as a HID host for braille displays.
    fn supports_hid_host(&self) -> bool;

    fn start_discovery(&self) -> Result<(), PlatformError>;

    fn cancel_discovery(&self) -> Result<(), PlatformError>;

    fn bonded_devices(&self) -> Result<Vec<BluetoothPeer>, PlatformError>;

    /// Starts pairing.  The result arrives as
    /// [`BluetoothEvent::BondStateChanged`].
    fn create_bond(&self, address: &str) -> Result<(), PlatformError>;

    fn open_hid(&self, device: &DeviceDescriptor) -> Result<Arc<dyn RawChannel>, PlatformError>;

    fn open_rfcomm(&self, device: &DeviceDescriptor)
        -> Result<Arc<dyn RawChannel>, PlatformError>;
}

enum State {
    Idle,
    AwaitingBond {
        device: DeviceDescriptor,
        manual: bool,
        connect_type: ConnectType,
    },
    Connecting(ConnectAttempt),
    Connected(Arc<dyn DuplexLink>),
}

pub struct BluetoothConnector {
    foreground: Foreground,
    adapter: Arc<dyn BluetoothAdapter>,
    filter: DeviceFilter,
    settings: TransportSettings,
    state: State,
    window: DiscoveryWindow,
    scanning: bool,
    /// Allowed peers seen since the list was last cleared.
    seen: Vec<BluetoothPeer>,
    outbox: Vec<ConnectionEvent>,
}

impl BluetoothConnector {
    pub fn new(
        foreground: Foreground,
        adapter: Arc<dyn BluetoothAdapter>,
        filter: DeviceFilter,
        settings: TransportSettings,
    ) -> Self {
        let window = DiscoveryWindow::new(foreground.clone(), settings.keep_alive);
        Self {
            foreground,
            adapter,
            filter,
            settings,
            state: State::Idle,
            window,
            scanning: false,
            seen: Vec::new(),
            outbox: Vec::new(),
        }
    }

    // ── Discovery helpers ─────────────────────────────────────────────────────

    fn set_scanning(&mut self, scanning: bool) {
        if self.scanning != scanning {
            self.scanning = scanning;
            self.outbox
                .push(ConnectionEvent::SearchStatusChanged { scanning });
        }
    }

    /// Asks the adapter to scan.  Returns `true` on success.
    fn begin_scan(&mut self) -> bool {
        match self.adapter.start_discovery() {
            Ok(()) => {
                self.set_scanning(true);
                true
            }
            Err(e) if e.is_permission_denied() => {
                warn!("bluetooth scan not permitted");
                self.set_scanning(false);
                false
            }
            Err(e) => {
                warn!("bluetooth scan failed to start: {}", e);
                self.set_scanning(false);
                self.outbox.push(ConnectionEvent::SearchFailure);
                self.window.schedule_retry(self.settings.discovery_retry);
                false
            }
        }
    }

    fn end_scan(&mut self) {
        if self.scanning {
            if let Err(e) = self.adapter.cancel_discovery() {
                debug!("cancel discovery: {}", e);
            }
            self.set_scanning(false);
        }
    }

    fn bonded(&self) -> Vec<BluetoothPeer> {
        match self.adapter.bonded_devices() {
            Ok(peers) => peers,
            Err(e) => {
                debug!("bonded list unavailable: {}", e);
                Vec::new()
            }
        }
    }

    /// Records an allowed peer; reports it if new or changed.
    fn observe(&mut self, peer: BluetoothPeer) {
        if !self.filter.allows(&peer.device) {
            return;
        }
        if let Some(existing) = self
            .seen
            .iter_mut()
            .find(|p| p.device == peer.device)
        {
            if existing.device.name() == peer.device.name()
                && existing.bonded == peer.bonded
                && existing.hid_capable == peer.hid_capable
            {
                return;
            }
            *existing = peer.clone();
        } else {
            self.seen.push(peer.clone());
        }
        self.outbox
            .push(ConnectionEvent::DeviceSeenOrUpdated(peer.device));
    }

    fn find_peer(&self, address: &str) -> Option<BluetoothPeer> {
        self.seen
            .iter()
            .find(|p| p.device.has_address(address))
            .cloned()
    }

    // ── Connect helpers ───────────────────────────────────────────────────────

    fn first_connect_type(&self, hid_capable: bool) -> ConnectType {
        if self.settings.prefer_hid && hid_capable && self.adapter.supports_hid_host() {
            ConnectType::BtHid
        } else {
            ConnectType::BtRfcomm
        }
    }

    fn start_attempt(
        &mut self,
        device: DeviceDescriptor,
        manual: bool,
        connect_type: ConnectType,
        announce: bool,
    ) {
        info!("connecting to {} over {}", device.label(), connect_type);
        let adapter = Arc::clone(&self.adapter);
        let target = device.clone();
        let open = move || {
            let opened = match connect_type {
                ConnectType::BtHid => adapter.open_hid(&target),
                _ => adapter.open_rfcomm(&target),
            };
            opened.map_err(|e| e.into_transport(connect_type))
        };

        match ConnectAttempt::spawn(
            &self.foreground,
            device.clone(),
            manual,
            connect_type,
            self.settings.connect_timeout,
            open,
        ) {
            Ok(attempt) => {
                if announce {
                    self.outbox.push(ConnectionEvent::ConnectStarted {
                        device,
                        connect_type,
                    });
                }
                self.state = State::Connecting(attempt);
            }
            Err(error) => {
                self.state = State::Idle;
                self.connect_type_failed(device, manual, connect_type, error);
            }
        }
    }

    /// Handles a failed or timed-out attempt.
    fn attempt_failed(&mut self, attempt: ConnectAttempt, error: TransportError) {
        let device = attempt.device().clone();
        let manual = attempt.manual();
        let connect_type = attempt.connect_type();
        drop(attempt);
        self.connect_type_failed(device, manual, connect_type, error);
    }

    /// HID falls back to RFCOMM; an RFCOMM failure is reported.
    fn connect_type_failed(
        &mut self,
        device: DeviceDescriptor,
        manual: bool,
        connect_type: ConnectType,
        error: TransportError,
    ) {
        if connect_type == ConnectType::BtHid {
            info!("HID connect to {} failed ({}), trying RFCOMM", device.label(), error);
            self.start_attempt(device, manual, ConnectType::BtRfcomm, true);
            return;
        }

        warn!("connect to {} failed: {}", device.label(), error);
        self.state = State::Idle;
        self.outbox.push(ConnectionEvent::ConnectFailed {
            device: Some(device),
            manual,
            error,
        });
        self.resume_discovery();
    }

    /// Restarts a scan that was left idle while connecting.
    fn resume_discovery(&mut self) {
        if self.window.is_open() && !self.scanning && !self.is_connecting() {
            self.begin_scan();
        }
    }

    /// Drops the current attempt or link.  Returns the device it was for.
    fn teardown(&mut self) -> Option<DeviceDescriptor> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => None,
            State::AwaitingBond { device, .. } => Some(device),
            State::Connecting(attempt) => {
                attempt.cancel();
                Some(attempt.device().clone())
            }
            State::Connected(link) => {
                link.shutdown();
                Some(link.device().clone())
            }
        }
    }

    // ── Event handlers ────────────────────────────────────────────────────────

    fn on_attempt_finished(
        &mut self,
        id: u64,
        result: Result<Arc<dyn RawChannel>, TransportError>,
    ) {
        let current = matches!(&self.state, State::Connecting(a) if a.id() == id);
        if !current {
            debug!("discarding result of stale attempt {}", id);
            if let Ok(channel) = result {
                channel.close();
            }
            return;
        }
        let State::Connecting(attempt) = std::mem::replace(&mut self.state, State::Idle) else {
            return;
        };

        match result {
            Ok(channel) => {
                let link = ChannelLink::new(
                    attempt.device().clone(),
                    attempt.connect_type(),
                    channel,
                    self.foreground.clone(),
                );
                let link: Arc<dyn DuplexLink> = link;
                self.state = State::Connected(Arc::clone(&link));
                self.outbox.push(ConnectionEvent::Connected(link));
            }
            Err(error) => self.attempt_failed(attempt, error),
        }
    }

    fn on_attempt_timed_out(&mut self, id: u64) {
        let current = matches!(&self.state, State::Connecting(a) if a.id() == id);
        if !current {
            return;
        }
        if let State::Connecting(attempt) = std::mem::replace(&mut self.state, State::Idle) {
            attempt.cancel();
            let error = TransportError::Timeout(attempt.connect_type());
            self.attempt_failed(attempt, error);
        }
    }

    fn on_bond_state(&mut self, address: &str, bond: BondState) {
        if let Some(peer) = self.seen.iter_mut().find(|p| p.device.has_address(address)) {
            peer.bonded = bond == BondState::Bonded;
        }

        let waiting = matches!(&self.state, State::AwaitingBond { device, .. } if device.has_address(address));
        if !waiting {
            if bond == BondState::Bonded {
                if let Some(peer) = self.find_peer(address) {
                    self.outbox
                        .push(ConnectionEvent::DeviceSeenOrUpdated(peer.device));
                }
            }
            return;
        }

        match bond {
            BondState::Bonding => trace!("bonding with {}", address),
            BondState::Bonded => {
                if let State::AwaitingBond {
                    device,
                    manual,
                    connect_type,
                } = std::mem::replace(&mut self.state, State::Idle)
                {
                    info!("bonded with {}", device.label());
                    self.start_attempt(device, manual, connect_type, false);
                }
            }
            BondState::None => {
                if let State::AwaitingBond { device, manual, .. } =
                    std::mem::replace(&mut self.state, State::Idle)
                {
                    warn!("bonding with {} failed", device.label());
                    self.outbox.push(ConnectionEvent::ConnectFailed {
                        device: Some(device),
                        manual,
                        error: TransportError::BondFailed,
                    });
                    self.resume_discovery();
                }
            }
        }
    }

    fn on_bluetooth_event(&mut self, event: BluetoothEvent) {
        match event {
            BluetoothEvent::RadioStateChanged { enabled: true } => {
                info!("bluetooth radio on");
                self.outbox.push(ConnectionEvent::ConnectivityEnabled(true));
            }
            BluetoothEvent::RadioStateChanged { enabled: false } => {
                info!("bluetooth radio off");
                if let Some(device) = self.teardown() {
                    self.outbox.push(ConnectionEvent::Disconnected {
                        device: Some(device),
                        cause: DisconnectCause::RadioOff,
                    });
                }
                self.window.close();
                self.set_scanning(false);
                self.seen.clear();
                self.outbox.push(ConnectionEvent::DeviceListCleared);
                self.outbox.push(ConnectionEvent::ConnectivityEnabled(false));
            }
            BluetoothEvent::DiscoveryStarted => self.set_scanning(true),
            BluetoothEvent::DiscoveryFinished => {
                if self.window.is_open() && !self.is_connecting() {
                    debug!("discovery finished, restarting within window");
                    if self.begin_scan() {
                        return;
                    }
                }
                self.set_scanning(false);
            }
            BluetoothEvent::DiscoveryFailed => {
                warn!("bluetooth discovery failed");
                self.set_scanning(false);
                self.outbox.push(ConnectionEvent::SearchFailure);
                self.window.schedule_retry(self.settings.discovery_retry);
            }
            BluetoothEvent::DeviceFound(peer) => self.observe(peer),
            BluetoothEvent::BondStateChanged { address, state } => {
                self.on_bond_state(&address, state)
            }
        }
    }
}

impl TransportConnector for BluetoothConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Bluetooth
    }

    fn start_discovery(&mut self, reason: DiscoveryReason) {
        if !self.adapter.is_enabled() {
            debug!("not scanning ({:?}): radio off", reason);
            return;
        }
        debug!("discovery requested: {:?}", reason);
        self.window.touch();
        for peer in self.bonded() {
            self.observe(peer);
        }
        if !self.scanning && !self.is_connecting() {
            self.begin_scan();
        }
    }

    fn stop_discovery(&mut self, reason: DiscoveryReason) {
        debug!("discovery stop: {:?}", reason);
        self.window.close();
        self.end_scan();
    }

    fn connect(&mut self, device: &DeviceDescriptor, manual: bool) {
        if let Some(previous) = self.teardown() {
            debug!("superseding connection to {}", previous.label());
            self.outbox.push(ConnectionEvent::Disconnected {
                device: Some(previous),
                cause: DisconnectCause::Superseded,
            });
        }
        if !self.adapter.is_enabled() {
            self.outbox.push(ConnectionEvent::ConnectFailed {
                device: Some(device.clone()),
                manual,
                error: TransportError::RadioOff,
            });
            return;
        }
        self.end_scan();

        let bonded = self
            .bonded()
            .into_iter()
            .find(|p| p.device == *device);
        if let Some(peer) = &bonded {
            self.observe(peer.clone());
        }

        match bonded {
            Some(peer) => {
                let connect_type = self.first_connect_type(peer.hid_capable);
                self.start_attempt(device.clone(), manual, connect_type, true);
            }
            None => {
                let hid_capable = self
                    .find_peer(device.address())
                    .is_some_and(|p| p.hid_capable);
                let connect_type = self.first_connect_type(hid_capable);
                match self.adapter.create_bond(device.address()) {
                    Ok(()) => {
                        info!("pairing with {}", device.label());
                        self.outbox.push(ConnectionEvent::ConnectStarted {
                            device: device.clone(),
                            connect_type,
                        });
                        self.state = State::AwaitingBond {
                            device: device.clone(),
                            manual,
                            connect_type,
                        };
                    }
                    Err(e) => {
                        let error = if e.is_permission_denied() {
                            TransportError::PermissionDenied("bond".to_string())
                        } else {
                            TransportError::BondFailed
                        };
                        self.outbox.push(ConnectionEvent::ConnectFailed {
                            device: Some(device.clone()),
                            manual,
                            error,
                        });
                    }
                }
            }
        }
    }

    fn disconnect(&mut self, cause: DisconnectCause) {
        if let Some(device) = self.teardown() {
            self.outbox.push(ConnectionEvent::Disconnected {
                device: Some(device),
                cause,
            });
            self.resume_discovery();
        }
    }

    fn is_scanning(&self) -> bool {
        self.scanning
    }

    fn is_connecting(&self) -> bool {
        matches!(self.state, State::AwaitingBond { .. } | State::Connecting(_))
    }

    fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected(_))
    }

    fn known_devices(&self) -> Vec<DeviceDescriptor> {
        self.seen.iter().map(|p| p.device.clone()).collect()
    }

    fn paired_devices(&self) -> Vec<DeviceDescriptor> {
        self.bonded().into_iter().map(|p| p.device).collect()
    }

    fn connectivity_enabled(&self) -> bool {
        self.adapter.is_enabled()
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Bluetooth(event) => self.on_bluetooth_event(event),
            TransportEvent::AttemptFinished { attempt, result } => {
                self.on_attempt_finished(attempt, result)
            }
            TransportEvent::AttemptTimedOut { attempt } => self.on_attempt_timed_out(attempt),
            TransportEvent::DiscoveryExpired { token } => {
                if self.window.on_expired(token) {
                    info!("discovery keep-alive window expired");
                    self.end_scan();
                }
            }
            TransportEvent::DiscoveryRetry { token } => {
                if self.window.on_retry(token) && !self.scanning && !self.is_connecting() {
                    debug!("retrying discovery");
                    self.begin_scan();
                }
            }
            TransportEvent::LinkFailed { link, error } => {
                let current = matches!(&self.state, State::Connected(l) if l.id() == link);
                if current {
                    if let Some(device) = self.teardown() {
                        self.outbox.push(ConnectionEvent::Disconnected {
                            device: Some(device),
                            cause: DisconnectCause::LinkLost(error),
                        });
                    }
                }
            }
            TransportEvent::Usb(_) => {}
        }
    }

    fn take_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.outbox)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::application::foreground::ForegroundEvent;
    use crate::infrastructure::transport::mock::{bluetooth_peer, MockBluetoothAdapter};

    fn make_connector() -> (BluetoothConnector, Arc<MockBluetoothAdapter>) {
        let (connector, adapter, _rx) = make_connector_with_events();
        (connector, adapter)
    }

    fn make_connector_with_events() -> (
        BluetoothConnector,
        Arc<MockBluetoothAdapter>,
        UnboundedReceiver<ForegroundEvent>,
    ) {
        let (fg, rx) = Foreground::channel();
        let adapter = MockBluetoothAdapter::new();
        let connector = BluetoothConnector::new(
            fg,
            adapter.clone(),
            DeviceFilter::default(),
            TransportSettings::default(),
        );
        (connector, adapter, rx)
    }

    /// Blocks until a transport event matching `wanted` was posted.  Never
    /// yields to the runtime, so paused time does not advance meanwhile.
    fn next_transport_event(
        rx: &mut UnboundedReceiver<ForegroundEvent>,
        what: &str,
        wanted: impl Fn(&TransportEvent) -> bool,
    ) -> TransportEvent {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            match rx.try_recv() {
                Ok(ForegroundEvent::Transport(event)) if wanted(&event) => return event,
                Ok(_) => {}
                Err(_) => {
                    assert!(Instant::now() < deadline, "timed out waiting for {what}");
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    fn focus() -> DeviceDescriptor {
        DeviceDescriptor::bluetooth(Some("Focus 40"), "AA:BB").unwrap()
    }

    #[test]
    fn test_start_discovery_reports_allowed_bonded_peers_only() {
        // Arrange
        let (mut connector, adapter) = make_connector();
        adapter.add_bonded(focus(), false);
        adapter.add_bonded(
            DeviceDescriptor::bluetooth(Some("WH-1000XM4"), "CC:DD").unwrap(),
            false,
        );

        // Act
        connector.start_discovery(DiscoveryReason::UserRequested);

        // Assert
        let events = connector.take_events();
        let seen: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ConnectionEvent::DeviceSeenOrUpdated(d) => Some(d.address().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(seen, ["AA:BB"]);
        assert!(connector.is_scanning());
    }

    #[test]
    fn test_scan_permission_denied_is_silent_noop() {
        let (mut connector, adapter) = make_connector();
        adapter.deny_permissions();

        connector.start_discovery(DiscoveryReason::UserRequested);

        assert!(!connector.is_scanning());
        assert!(connector.paired_devices().is_empty());
        assert!(!connector
            .take_events()
            .iter()
            .any(|e| matches!(e, ConnectionEvent::SearchFailure)));
    }

    #[test]
    fn test_unbonded_device_waits_for_bond_result() {
        let (mut connector, adapter) = make_connector();

        connector.connect(&focus(), true);

        assert!(connector.is_connecting());
        assert_eq!(adapter.count("create_bond"), 1);
        assert_eq!(adapter.count("open_"), 0, "no connect before the bond completes");
    }

    #[test]
    fn test_failed_bond_reports_connect_failure() {
        let (mut connector, _adapter) = make_connector();
        connector.connect(&focus(), true);
        connector.take_events();

        connector.handle_event(TransportEvent::Bluetooth(BluetoothEvent::BondStateChanged {
            address: "AA:BB".into(),
            state: BondState::None,
        }));

        assert!(!connector.is_connecting());
        assert!(matches!(
            connector.take_events().as_slice(),
            [ConnectionEvent::ConnectFailed { error: TransportError::BondFailed, .. }]
        ));
    }

    #[test]
    fn test_stale_attempt_result_is_closed_and_ignored() {
        let (mut connector, _adapter) = make_connector();
        let channel = crate::infrastructure::transport::mock::MockChannel::new();

        connector.handle_event(TransportEvent::AttemptFinished {
            attempt: u64::MAX,
            result: Ok(channel.clone()),
        });

        assert!(!connector.is_connected());
        assert!(connector.take_events().is_empty());
        assert_eq!(channel.close_count(), 1);
    }

    #[test]
    fn test_radio_off_clears_devices_and_connectivity() {
        let (mut connector, adapter) = make_connector();
        adapter.add_bonded(focus(), true);
        connector.start_discovery(DiscoveryReason::UserRequested);
        connector.take_events();

        adapter.set_enabled(false);
        connector.handle_event(TransportEvent::Bluetooth(BluetoothEvent::RadioStateChanged {
            enabled: false,
        }));

        assert!(!connector.is_scanning());
        assert!(connector.known_devices().is_empty());
        let events = connector.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ConnectivityEnabled(false))));
    }

    #[test]
    fn test_found_peer_reported_once_until_it_changes() {
        let (mut connector, _adapter) = make_connector();
        let peer = bluetooth_peer(
            DeviceDescriptor::bluetooth(Some("Brailliant BI 20X"), "11:22").unwrap(),
            false,
            true,
        );

        connector.handle_event(TransportEvent::Bluetooth(BluetoothEvent::DeviceFound(peer.clone())));
        connector.handle_event(TransportEvent::Bluetooth(BluetoothEvent::DeviceFound(peer.clone())));
        let mut bonded = peer;
        bonded.bonded = true;
        connector.handle_event(TransportEvent::Bluetooth(BluetoothEvent::DeviceFound(bonded)));

        let seen = connector
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, ConnectionEvent::DeviceSeenOrUpdated(_)))
            .count();
        assert_eq!(seen, 2);
    }

    // ── Bonding, fallback and discovery retry ────────────────────────────────

    #[test]
    fn test_completed_bond_starts_hid_attempt_without_second_announcement() {
        // Arrange
        let (mut connector, adapter, mut rx) = make_connector_with_events();
        connector.handle_event(TransportEvent::Bluetooth(BluetoothEvent::DeviceFound(
            bluetooth_peer(focus(), false, true),
        )));
        connector.take_events();
        connector.connect(&focus(), true);
        assert!(matches!(
            connector.take_events().as_slice(),
            [ConnectionEvent::ConnectStarted { connect_type: ConnectType::BtHid, .. }]
        ));

        // Act
        connector.handle_event(TransportEvent::Bluetooth(BluetoothEvent::BondStateChanged {
            address: "AA:BB".into(),
            state: BondState::Bonded,
        }));
        let bonded_events = connector.take_events();
        let finished = next_transport_event(&mut rx, "attempt result", |e| {
            matches!(e, TransportEvent::AttemptFinished { .. })
        });
        connector.handle_event(finished);

        // Assert
        assert!(bonded_events.is_empty(), "the bond wait already announced the connect");
        assert_eq!(adapter.calls(), ["create_bond AA:BB", "open_hid AA:BB"]);
        match connector.take_events().as_slice() {
            [ConnectionEvent::Connected(link)] => {
                assert_eq!(link.connect_type(), ConnectType::BtHid);
                assert_eq!(link.device(), &focus());
            }
            other => panic!("unexpected events: {:?}", other),
        }
        assert!(connector.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hid_timeout_falls_back_to_rfcomm() {
        // Arrange
        let (mut connector, adapter, mut rx) = make_connector_with_events();
        adapter.add_bonded(focus(), true);
        // Real-time delay in the attempt thread; paused time runs out first.
        adapter.set_open_delay(Duration::from_secs(2));
        connector.connect(&focus(), true);
        assert!(matches!(
            connector.take_events().as_slice(),
            [
                ConnectionEvent::DeviceSeenOrUpdated(_),
                ConnectionEvent::ConnectStarted { connect_type: ConnectType::BtHid, .. }
            ]
        ));

        // Act
        tokio::time::sleep(TransportSettings::default().connect_timeout + Duration::from_secs(1))
            .await;
        let timed_out = next_transport_event(&mut rx, "attempt timeout", |e| {
            matches!(e, TransportEvent::AttemptTimedOut { .. })
        });
        connector.handle_event(timed_out);

        // Assert
        match connector.take_events().as_slice() {
            [ConnectionEvent::ConnectStarted {
                device,
                connect_type: ConnectType::BtRfcomm,
            }] => assert_eq!(device, &focus()),
            other => panic!("unexpected events: {:?}", other),
        }
        assert!(connector.is_connecting());
    }

    #[test]
    fn test_hid_failure_before_attempt_starts_falls_back_to_rfcomm() {
        let (mut connector, _adapter) = make_connector();

        connector.connect_type_failed(
            focus(),
            false,
            ConnectType::BtHid,
            TransportError::Io("no thread".into()),
        );

        assert!(matches!(
            connector.take_events().as_slice(),
            [ConnectionEvent::ConnectStarted { connect_type: ConnectType::BtRfcomm, .. }]
        ));
        assert!(connector.is_connecting());
    }

    #[test]
    fn test_host_without_hid_support_connects_over_rfcomm() {
        let (mut connector, adapter) = make_connector();
        adapter.set_hid_support(false);
        adapter.add_bonded(focus(), true);

        connector.connect(&focus(), true);

        assert!(matches!(
            connector.take_events().as_slice(),
            [
                ConnectionEvent::DeviceSeenOrUpdated(_),
                ConnectionEvent::ConnectStarted { connect_type: ConnectType::BtRfcomm, .. }
            ]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_is_reported_then_retried() {
        // Arrange
        let (mut connector, adapter, mut rx) = make_connector_with_events();
        connector.start_discovery(DiscoveryReason::UserRequested);
        assert!(matches!(
            connector.take_events().as_slice(),
            [ConnectionEvent::SearchStatusChanged { scanning: true }]
        ));

        // Act
        connector.handle_event(TransportEvent::Bluetooth(BluetoothEvent::DiscoveryFailed));
        let failed_events = connector.take_events();
        tokio::time::sleep(Duration::from_secs(3)).await;
        let retry = next_transport_event(&mut rx, "discovery retry", |e| {
            matches!(e, TransportEvent::DiscoveryRetry { .. })
        });
        connector.handle_event(retry);

        // Assert
        assert!(matches!(
            failed_events.as_slice(),
            [
                ConnectionEvent::SearchStatusChanged { scanning: false },
                ConnectionEvent::SearchFailure
            ]
        ));
        assert!(matches!(
            connector.take_events().as_slice(),
            [ConnectionEvent::SearchStatusChanged { scanning: true }]
        ));
        assert_eq!(adapter.count("start_discovery"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_scan_start_is_retried_while_window_open() {
        let (mut connector, adapter, mut rx) = make_connector_with_events();
        adapter.fail_discovery(true);

        connector.start_discovery(DiscoveryReason::ScreenOn);
        assert!(matches!(
            connector.take_events().as_slice(),
            [ConnectionEvent::SearchFailure]
        ));
        assert!(!connector.is_scanning());

        adapter.fail_discovery(false);
        tokio::time::sleep(Duration::from_secs(3)).await;
        let retry = next_transport_event(&mut rx, "discovery retry", |e| {
            matches!(e, TransportEvent::DiscoveryRetry { .. })
        });
        connector.handle_event(retry);

        assert!(connector.is_scanning());
        assert!(matches!(
            connector.take_events().as_slice(),
            [ConnectionEvent::SearchStatusChanged { scanning: true }]
        ));
    }
}
