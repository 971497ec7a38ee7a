//! USB transport connector.
//!
//! USB has no scan: the attached-device list is refreshed whenever discovery
//! is requested and kept current by attach/detach notifications.  Connecting
//! is a single open attempt, preceded by a permission request when the
//! platform requires one.  Unplugging the connected display ends the
//! connection with [`DisconnectCause::DeviceDetached`].

use std::sync::Arc;

use braille_core::{ConnectType, DeviceDescriptor, DeviceFilter, TransportKind};
use tracing::{debug, info, warn};

use crate::application::foreground::Foreground;
use crate::application::transport::{
    ConnectionEvent, DisconnectCause, DiscoveryReason, DuplexLink, RawChannel,
    TransportConnector, TransportError, TransportEvent, UsbDeviceInfo, UsbEvent,
};
use crate::infrastructure::transport::attempt::ConnectAttempt;
use crate::infrastructure::transport::link::ChannelLink;
use crate::infrastructure::transport::{PlatformError, TransportSettings};

/// What the connector needs from the platform USB host stack.
pub trait UsbHost: Send + Sync {
    fn attached_devices(&self) -> Result<Vec<UsbDeviceInfo>, PlatformError>;

    fn has_permission(&self, address: &str) -> bool;

    /// Asks the user for access.  The answer arrives as
    /// [`UsbEvent::PermissionResult`].
    fn request_permission(&self, address: &str) -> Result<(), PlatformError>;

    /// Opens the device.  Blocks; only called from attempt threads.
    fn open(&self, device: &DeviceDescriptor) -> Result<Arc<dyn RawChannel>, PlatformError>;
}

enum State {
    Idle,
    AwaitingPermission { device: DeviceDescriptor, manual: bool },
    Connecting(ConnectAttempt),
    Connected(Arc<dyn DuplexLink>),
}

pub struct UsbConnector {
    foreground: Foreground,
    host: Arc<dyn UsbHost>,
    filter: DeviceFilter,
    settings: TransportSettings,
    state: State,
    attached: Vec<UsbDeviceInfo>,
    outbox: Vec<ConnectionEvent>,
}

impl UsbConnector {
    pub fn new(
        foreground: Foreground,
        host: Arc<dyn UsbHost>,
        filter: DeviceFilter,
        settings: TransportSettings,
    ) -> Self {
        Self {
            foreground,
            host,
            filter,
            settings,
            state: State::Idle,
            attached: Vec::new(),
            outbox: Vec::new(),
        }
    }

    fn allowed(&self, info: &UsbDeviceInfo) -> bool {
        self.filter.allows_usb(info.vendor_id, info.device.name())
    }

    fn observe(&mut self, info: UsbDeviceInfo) {
        if !self.allowed(&info) {
            debug!("ignoring usb device {:04x}:{:04x}", info.vendor_id, info.product_id);
            return;
        }
        if let Some(existing) = self.attached.iter_mut().find(|d| d.device == info.device) {
            if existing.device.name() == info.device.name() {
                return;
            }
            *existing = info.clone();
        } else {
            self.attached.push(info.clone());
        }
        self.outbox
            .push(ConnectionEvent::DeviceSeenOrUpdated(info.device));
    }

    fn refresh(&mut self) {
        match self.host.attached_devices() {
            Ok(devices) => {
                let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.attached)
                    .into_iter()
                    .partition(|known| !devices.iter().any(|d| d.device == known.device));
                self.attached = kept;
                for gone in removed {
                    self.outbox
                        .push(ConnectionEvent::DeviceDeleted(gone.device));
                }
                for info in devices {
                    self.observe(info);
                }
            }
            Err(e) => warn!("usb device list unavailable: {}", e),
        }
    }

    fn fail(&mut self, device: DeviceDescriptor, manual: bool, error: TransportError) {
        warn!("usb connect to {} failed: {}", device.label(), error);
        self.state = State::Idle;
        self.outbox.push(ConnectionEvent::ConnectFailed {
            device: Some(device),
            manual,
            error,
        });
    }

    fn start_attempt(&mut self, device: DeviceDescriptor, manual: bool) {
        let host = Arc::clone(&self.host);
        let target = device.clone();
        let open = move || {
            host.open(&target)
                .map_err(|e| e.into_transport(ConnectType::Usb))
        };
        match ConnectAttempt::spawn(
            &self.foreground,
            device.clone(),
            manual,
            ConnectType::Usb,
            self.settings.connect_timeout,
            open,
        ) {
            Ok(attempt) => self.state = State::Connecting(attempt),
            Err(error) => self.fail(device, manual, error),
        }
    }

    fn teardown(&mut self) -> Option<DeviceDescriptor> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => None,
            State::AwaitingPermission { device, .. } => Some(device),
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

    fn current_device(&self) -> Option<&DeviceDescriptor> {
        match &self.state {
            State::Idle => None,
            State::AwaitingPermission { device, .. } => Some(device),
            State::Connecting(attempt) => Some(attempt.device()),
            State::Connected(link) => Some(link.device()),
        }
    }

    fn on_usb_event(&mut self, event: UsbEvent) {
        match event {
            UsbEvent::Attached(info) => {
                info!("usb device attached: {}", info.device.label());
                self.observe(info);
            }
            UsbEvent::Detached { address } => {
                let Some(index) = self
                    .attached
                    .iter()
                    .position(|d| d.device.has_address(&address))
                else {
                    return;
                };
                let gone = self.attached.remove(index);
                info!("usb device detached: {}", gone.device.label());
                if self.current_device() == Some(&gone.device) {
                    if let Some(device) = self.teardown() {
                        self.outbox.push(ConnectionEvent::Disconnected {
                            device: Some(device),
                            cause: DisconnectCause::DeviceDetached,
                        });
                    }
                }
                self.outbox.push(ConnectionEvent::DeviceDeleted(gone.device));
            }
            UsbEvent::PermissionResult { address, granted } => {
                let waiting = matches!(&self.state, State::AwaitingPermission { device, .. } if device.has_address(&address));
                if !waiting {
                    return;
                }
                if let State::AwaitingPermission { device, manual } =
                    std::mem::replace(&mut self.state, State::Idle)
                {
                    if granted {
                        self.start_attempt(device, manual);
                    } else {
                        self.fail(
                            device,
                            manual,
                            TransportError::PermissionDenied("usb".to_string()),
                        );
                    }
                }
            }
        }
    }
}

impl TransportConnector for UsbConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn start_discovery(&mut self, reason: DiscoveryReason) {
        debug!("usb device refresh: {:?}", reason);
        self.refresh();
    }

    fn stop_discovery(&mut self, _reason: DiscoveryReason) {}

    fn connect(&mut self, device: &DeviceDescriptor, manual: bool) {
        if let Some(previous) = self.teardown() {
            self.outbox.push(ConnectionEvent::Disconnected {
                device: Some(previous),
                cause: DisconnectCause::Superseded,
            });
        }
        if !self.attached.iter().any(|d| d.device == *device) {
            self.refresh();
        }
        if !self.attached.iter().any(|d| d.device == *device) {
            self.fail(
                device.clone(),
                manual,
                TransportError::UsbOpenFailed("device not attached".to_string()),
            );
            return;
        }

        info!("connecting to {} over usb", device.label());
        self.outbox.push(ConnectionEvent::ConnectStarted {
            device: device.clone(),
            connect_type: ConnectType::Usb,
        });

        if self.host.has_permission(device.address()) {
            self.start_attempt(device.clone(), manual);
            return;
        }
        match self.host.request_permission(device.address()) {
            Ok(()) => {
                debug!("usb permission requested for {}", device.label());
                self.state = State::AwaitingPermission {
                    device: device.clone(),
                    manual,
                };
            }
            Err(e) => self.fail(
                device.clone(),
                manual,
                e.into_transport(ConnectType::Usb),
            ),
        }
    }

    fn disconnect(&mut self, cause: DisconnectCause) {
        if let Some(device) = self.teardown() {
            self.outbox.push(ConnectionEvent::Disconnected {
                device: Some(device),
                cause,
            });
        }
    }

    fn is_scanning(&self) -> bool {
        false
    }

    fn is_connecting(&self) -> bool {
        matches!(
            self.state,
            State::AwaitingPermission { .. } | State::Connecting(_)
        )
    }

    fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected(_))
    }

    fn known_devices(&self) -> Vec<DeviceDescriptor> {
        self.attached.iter().map(|d| d.device.clone()).collect()
    }

    fn paired_devices(&self) -> Vec<DeviceDescriptor> {
        Vec::new()
    }

    fn connectivity_enabled(&self) -> bool {
        true
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Usb(event) => self.on_usb_event(event),
            TransportEvent::AttemptFinished { attempt, result } => {
                let current = matches!(&self.state, State::Connecting(a) if a.id() == attempt);
                if !current {
                    if let Ok(channel) = result {
                        channel.close();
                    }
                    return;
                }
                let State::Connecting(pending) = std::mem::replace(&mut self.state, State::Idle)
                else {
                    return;
                };
                match result {
                    Ok(channel) => {
                        let link: Arc<dyn DuplexLink> = ChannelLink::new(
                            pending.device().clone(),
                            ConnectType::Usb,
                            channel,
                            self.foreground.clone(),
                        );
                        self.state = State::Connected(Arc::clone(&link));
                        self.outbox.push(ConnectionEvent::Connected(link));
                    }
                    Err(error) => {
                        let device = pending.device().clone();
                        self.fail(device, pending.manual(), error);
                    }
                }
            }
            TransportEvent::AttemptTimedOut { attempt } => {
                let current = matches!(&self.state, State::Connecting(a) if a.id() == attempt);
                if current {
                    if let State::Connecting(pending) =
                        std::mem::replace(&mut self.state, State::Idle)
                    {
                        pending.cancel();
                        let device = pending.device().clone();
                        self.fail(device, pending.manual(), TransportError::Timeout(ConnectType::Usb));
                    }
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
            TransportEvent::Bluetooth(_)
            | TransportEvent::DiscoveryExpired { .. }
            | TransportEvent::DiscoveryRetry { .. } => {}
        }
    }

    fn take_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.outbox)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
