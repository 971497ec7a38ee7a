//! Coordinator ("Connectioneer"): owns the connection manager and the
//! session runner, applies the enablement and auto-connect policy, keeps the
//! device registry up to date, and republishes everything through
//! [`Aspects`].
//!
//! # Ownership (for beginners)
//!
//! There is exactly one `Connectioneer` per running service.  It is built by
//! the composition root ([`crate::application::service::BrailleService`])
//! and moved into the foreground task, which feeds it every
//! [`ForegroundEvent`] through [`Connectioneer::handle`].  Nothing else holds
//! a reference to it; other components talk to it by posting events.
//!
//! # Policy summary
//!
//! - **Enablement** is `service running AND user setting enabled`.  Any
//!   change re-selects the transport and starts or stops discovery;
//!   disabling also tears the connection down and clears the restriction
//!   sets.
//! - **Auto-connect** runs on screen-on, radio-on, bond completion,
//!   device-seen, USB attach/detach, settings entry, enablement and setting
//!   changes.  It only proceeds while idle and with auto-connect enabled.
//!   Bluetooth candidates must be paired, pass the name filter, be
//!   unrestricted and remembered; USB candidates only need to be attached
//!   (the USB connector already applies the vendor filter) and unrestricted.
//! - **Registry**: a Bluetooth connect promotes the device in the remembered
//!   list; USB devices are never remembered.

use std::collections::HashSet;
use std::sync::Arc;

use braille_core::domain::device::normalize_address;
use braille_core::{
    CodecFactory, DeviceDescriptor, DeviceFilter, DeviceRegistry, RememberedDevice, SettingKey,
    TransportKind,
};
use tracing::{debug, info, trace, warn};

use crate::application::aspects::{Aspects, ConnectStatus, Subscription};
use crate::application::connection_manager::ConnectionManager;
use crate::application::displayer::{Displayer, SessionEvent, SessionMessage};
use crate::application::foreground::{Foreground, ForegroundEvent};
use crate::application::transport::{
    BluetoothEvent, BondState, ConnectionEvent, ConnectorFactory, DisconnectCause,
    DiscoveryReason, DuplexLink, TransportError, TransportEvent, UsbEvent,
};

// ── Inputs ────────────────────────────────────────────────────────────────────

/// Host lifecycle changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The owning accessibility service started.
    ServiceStarted,
    ServiceStopped,
    ScreenOn,
    ScreenOff,
    /// The user opened the braille display settings.
    SettingsEntered,
    SettingsExited,
    /// A registry setting changed.
    SettingChanged(SettingKey),
}

/// Explicit user requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Connect(DeviceDescriptor),
    Disconnect,
    /// Remove from the remembered list, disconnecting if linked.
    Forget(DeviceDescriptor),
    /// Exclude an address from auto-connect for this enabled session.
    Deny(String),
    StartScan,
    StopScan,
    WriteDots(Vec<u8>),
}

// ── Connectioneer ─────────────────────────────────────────────────────────────

pub struct Connectioneer {
    foreground: Foreground,
    registry: Arc<dyn DeviceRegistry>,
    manager: ConnectionManager,
    codec_factory: Arc<dyn CodecFactory>,
    filter: DeviceFilter,
    displayer: Option<Displayer>,
    service_running: bool,
    enabled: bool,
    user_disconnected: HashSet<String>,
    user_denied: HashSet<String>,
    aspects: Aspects,
}

impl Connectioneer {
    pub fn new(
        foreground: Foreground,
        registry: Arc<dyn DeviceRegistry>,
        connectors: Box<dyn ConnectorFactory>,
        codec_factory: Arc<dyn CodecFactory>,
        filter: DeviceFilter,
    ) -> Self {
        Self {
            foreground,
            registry,
            manager: ConnectionManager::new(connectors),
            codec_factory,
            filter,
            displayer: None,
            service_running: false,
            enabled: false,
            user_disconnected: HashSet::new(),
            user_denied: HashSet::new(),
            aspects: Aspects::default(),
        }
    }

    /// Processes one foreground event.  Returns `false` after
    /// [`ForegroundEvent::Shutdown`].
    pub fn handle(&mut self, event: ForegroundEvent) -> bool {
        trace!("foreground event: {:?}", event);
        let keep_running = match event {
            ForegroundEvent::Lifecycle(event) => {
                self.on_lifecycle(event);
                true
            }
            ForegroundEvent::Command(command) => {
                self.on_command(command);
                true
            }
            ForegroundEvent::Transport(event) => {
                self.on_transport_event(event);
                true
            }
            ForegroundEvent::Session(message) => {
                self.on_session_message(message);
                true
            }
            ForegroundEvent::Subscribe(subscription) => {
                self.subscribe(subscription);
                true
            }
            ForegroundEvent::Unsubscribe(kind, id) => {
                self.aspects.unsubscribe(kind, id);
                true
            }
            ForegroundEvent::Shutdown => {
                self.shutdown();
                false
            }
        };
        self.drain_manager();
        keep_running
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn displayer(&self) -> Option<&Displayer> {
        self.displayer.as_ref()
    }

    /// Returns `true` if `address` is excluded from auto-connect.
    pub fn is_restricted(&self, address: &str) -> bool {
        let address = normalize_address(address);
        self.user_disconnected.contains(&address) || self.user_denied.contains(&address)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    fn on_lifecycle(&mut self, event: LifecycleEvent) {
        debug!("lifecycle: {:?}", event);
        match event {
            LifecycleEvent::ServiceStarted => {
                self.service_running = true;
                self.refresh_enablement();
            }
            LifecycleEvent::ServiceStopped => {
                self.service_running = false;
                self.refresh_enablement();
            }
            LifecycleEvent::ScreenOn => {
                if self.enabled {
                    self.manager.start_discovery(DiscoveryReason::ScreenOn);
                    self.auto_connect("screen on");
                }
            }
            LifecycleEvent::ScreenOff => {}
            LifecycleEvent::SettingsEntered => {
                if self.enabled {
                    self.manager.start_discovery(DiscoveryReason::SettingsEntered);
                    self.auto_connect("settings entered");
                }
            }
            LifecycleEvent::SettingsExited => {
                if self.enabled {
                    self.manager.stop_discovery(DiscoveryReason::SettingsExited);
                }
            }
            LifecycleEvent::SettingChanged(key) => match key {
                SettingKey::FeatureEnabled => self.refresh_enablement(),
                SettingKey::AutoConnect => self.auto_connect("auto-connect setting"),
                SettingKey::RememberedDevices => {
                    self.publish_device_list();
                    self.auto_connect("remembered devices changed");
                }
            },
        }
    }

    fn refresh_enablement(&mut self) {
        let enabled = self.service_running && self.registry.is_feature_enabled_by_user();
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        info!("braille display support {}", if enabled { "enabled" } else { "disabled" });

        if enabled {
            self.select_transport();
            self.manager.start_discovery(DiscoveryReason::Enabled);
            self.auto_connect("enabled");
        } else {
            self.manager.stop_discovery(DiscoveryReason::Disabled);
            self.stop_session();
            self.manager.disconnect(DisconnectCause::Disabled);
            self.user_disconnected.clear();
            self.user_denied.clear();
        }
        self.aspects
            .enablement
            .notify(|l| l.on_enablement_changed(enabled));
    }

    /// Switches to the platform's preferred transport if it differs.
    fn select_transport(&mut self) {
        let preferred = self.manager.preferred_transport();
        if self.manager.set_transport(preferred) && self.enabled {
            self.manager
                .start_discovery(DiscoveryReason::TransportSwitched);
        }
    }

    // ── User commands ─────────────────────────────────────────────────────────

    fn on_command(&mut self, command: UserCommand) {
        debug!("user command: {:?}", command);
        match command {
            UserCommand::Connect(device) => self.connect(device, true),
            UserCommand::Disconnect => self.user_disconnect(),
            UserCommand::Forget(device) => {
                self.registry.delete_remembered(device.address());
                if self.is_current_address(device.address()) {
                    self.stop_session();
                    self.manager.disconnect(DisconnectCause::UserRequested);
                }
            }
            UserCommand::Deny(address) => {
                let address = normalize_address(&address);
                if self
                    .manager
                    .connecting_device()
                    .is_some_and(|d| d.has_address(&address))
                {
                    self.manager.disconnect(DisconnectCause::UserRequested);
                }
                self.user_denied.insert(address);
            }
            UserCommand::StartScan => {
                if self.enabled {
                    self.manager.start_discovery(DiscoveryReason::UserRequested);
                }
            }
            UserCommand::StopScan => self.manager.stop_discovery(DiscoveryReason::UserRequested),
            UserCommand::WriteDots(dots) => {
                if let Some(displayer) = &self.displayer {
                    if let Err(e) = displayer.write_braille_dots(&dots) {
                        trace!("dropping dots: {}", e);
                    }
                }
            }
        }
    }

    /// Connects to `device` unless it is already the current device.
    ///
    /// A manual connect lifts both restrictions on the device.
    fn connect(&mut self, device: DeviceDescriptor, manual: bool) {
        if !self.enabled {
            warn!("ignoring connect to {}: feature disabled", device.label());
            return;
        }
        if self.is_current_device(&device) {
            debug!("already connecting or connected to {}", device.label());
            return;
        }
        if manual {
            self.user_disconnected.remove(device.address());
            self.user_denied.remove(device.address());
        }
        self.manager.connect(&device, manual);
    }

    fn user_disconnect(&mut self) {
        let current = self
            .manager
            .connecting_device()
            .cloned()
            .or_else(|| self.manager.connected_device());
        if let Some(device) = current {
            info!("user disconnected {}", device.label());
            self.user_disconnected.insert(device.address().to_string());
        }
        self.stop_session();
        self.manager.disconnect(DisconnectCause::UserRequested);
    }

    // ── Auto-connect ──────────────────────────────────────────────────────────

    fn auto_connect(&mut self, trigger: &str) {
        if !self.enabled || self.manager.is_connecting() || self.manager.is_connected() {
            return;
        }
        if !self.registry.is_auto_connect_enabled() {
            trace!("auto-connect disabled, ignoring {}", trigger);
            return;
        }
        let candidate = match self.manager.active_transport() {
            TransportKind::Bluetooth => self.bluetooth_candidate(),
            TransportKind::Usb => self.usb_candidate(),
        };
        match candidate {
            Some(device) => {
                info!("auto-connecting to {} ({})", device.label(), trigger);
                self.manager.connect(&device, false);
            }
            None => trace!("no auto-connect candidate ({})", trigger),
        }
    }

    fn bluetooth_candidate(&self) -> Option<DeviceDescriptor> {
        let remembered = self.registry.remembered();
        self.manager.paired_devices().into_iter().find(|device| {
            self.filter.allows(device)
                && !self.is_restricted(device.address())
                && remembered.iter().any(|r| device.has_address(&r.address))
        })
    }

    fn usb_candidate(&self) -> Option<DeviceDescriptor> {
        self.manager
            .known_devices()
            .into_iter()
            .find(|device| !self.is_restricted(device.address()))
    }

    /// Connect de-duplication compares names; a device without a name
    /// falls back to its address.
    fn is_current_device(&self, device: &DeviceDescriptor) -> bool {
        let current = self
            .manager
            .connecting_device()
            .cloned()
            .or_else(|| self.manager.connected_device());
        match current {
            Some(current) => match (current.name(), device.name()) {
                (Some(a), Some(b)) => a == b,
                _ => current == *device,
            },
            None => false,
        }
    }

    fn is_current_address(&self, address: &str) -> bool {
        self.manager
            .connecting_device()
            .cloned()
            .or_else(|| self.manager.connected_device())
            .is_some_and(|d| d.has_address(address))
    }

    // ── Transport events ──────────────────────────────────────────────────────

    fn on_transport_event(&mut self, event: TransportEvent) {
        let trigger = match &event {
            TransportEvent::Bluetooth(BluetoothEvent::RadioStateChanged { enabled: true }) => {
                Some("radio on")
            }
            TransportEvent::Bluetooth(BluetoothEvent::BondStateChanged {
                state: BondState::Bonded,
                ..
            }) => Some("bonded"),
            TransportEvent::Usb(UsbEvent::Attached(_)) => Some("usb attached"),
            TransportEvent::Usb(UsbEvent::Detached { .. }) => Some("usb detached"),
            _ => None,
        };
        let usb_change = matches!(
            event,
            TransportEvent::Usb(UsbEvent::Attached(_) | UsbEvent::Detached { .. })
        );

        self.manager.handle_transport_event(event);
        self.drain_manager();

        if !self.enabled {
            return;
        }
        if usb_change {
            self.select_transport();
        }
        if trigger == Some("radio on") {
            self.manager.start_discovery(DiscoveryReason::RadioOn);
        }
        if let Some(trigger) = trigger {
            self.auto_connect(trigger);
        }
    }

    /// Applies the manager's queued events until none are left.  Handling one
    /// event may issue manager calls that queue more.
    fn drain_manager(&mut self) {
        loop {
            let events = self.manager.take_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.on_connection_event(event);
            }
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::DeviceListCleared | ConnectionEvent::DeviceDeleted(_) => {
                self.publish_device_list();
            }
            ConnectionEvent::DeviceSeenOrUpdated(_) => {
                self.publish_device_list();
                self.auto_connect("device seen");
            }
            ConnectionEvent::ConnectStarted { device, connect_type } => {
                debug!("connecting to {} over {}", device.label(), connect_type);
                self.aspects.connection.notify(|l| {
                    l.on_connection_status_changed(ConnectStatus::Connecting, Some(&device))
                });
            }
            ConnectionEvent::Connected(link) => {
                let device = link.device().clone();
                if device.transport() == TransportKind::Bluetooth {
                    self.registry
                        .add_remembered(RememberedDevice::from(&device));
                }
                self.aspects.connection.notify(|l| {
                    l.on_connection_status_changed(ConnectStatus::Connected, Some(&device))
                });
                self.start_session(link);
            }
            ConnectionEvent::ConnectFailed {
                device,
                manual,
                error,
            } => {
                warn!(
                    "connect to {} failed: {}",
                    device.as_ref().map_or("unknown device", |d| d.label()),
                    error
                );
                self.aspects.connection.notify(|l| {
                    l.on_connect_failed(device.as_ref(), manual, &error);
                    l.on_connection_status_changed(ConnectStatus::Disconnected, device.as_ref());
                });
            }
            ConnectionEvent::Disconnected { device, cause } => {
                self.stop_session();
                info!(
                    "disconnected from {}: {:?}",
                    device.as_ref().map_or("unknown device", |d| d.label()),
                    cause
                );
                self.aspects.connection.notify(|l| {
                    l.on_connection_status_changed(ConnectStatus::Disconnected, device.as_ref());
                    if let DisconnectCause::LinkLost(error) = &cause {
                        l.on_link_lost(device.as_ref(), error);
                    }
                });
            }
            ConnectionEvent::ConnectivityEnabled(enabled) => {
                debug!("connectivity enabled: {}", enabled);
            }
            ConnectionEvent::SearchStatusChanged { scanning } => {
                self.aspects
                    .connection
                    .notify(|l| l.on_scanning_changed(scanning));
            }
            ConnectionEvent::SearchFailure => {
                self.aspects.connection.notify(|l| l.on_search_failure());
            }
        }
    }

    fn publish_device_list(&self) {
        let devices = self.manager.known_devices();
        self.aspects
            .connection
            .notify(|l| l.on_device_list_changed(&devices));
    }

    // ── Session ───────────────────────────────────────────────────────────────

    fn start_session(&mut self, link: Arc<dyn DuplexLink>) {
        self.stop_session();
        let mut displayer = Displayer::new(
            Arc::clone(&link),
            self.codec_factory.create_codec(),
            self.foreground.clone(),
        );
        if let Err(e) = link.open(displayer.link_sink()) {
            warn!("could not open {}: {}", link.id(), e);
            self.manager.disconnect(DisconnectCause::LinkLost(e));
            return;
        }
        if let Err(e) = displayer.start() {
            warn!("could not start session on {}: {}", link.id(), e);
            self.manager
                .disconnect(DisconnectCause::LinkLost(TransportError::SessionStartFailed));
            return;
        }
        self.displayer = Some(displayer);
    }

    fn stop_session(&mut self) {
        if let Some(mut displayer) = self.displayer.take() {
            let was_ready = displayer.is_ready();
            displayer.stop();
            if was_ready {
                self.aspects
                    .display_properties
                    .notify(|l| l.on_display_properties(None));
            }
        }
    }

    fn on_session_message(&mut self, message: SessionMessage) {
        let Some(displayer) = self.displayer.as_mut() else {
            trace!("session message with no session");
            return;
        };
        let Some(event) = displayer.on_message(message) else {
            return;
        };

        match event {
            SessionEvent::Started(properties) => {
                self.aspects
                    .display_properties
                    .notify(|l| l.on_display_properties(Some(&properties)));
            }
            SessionEvent::StartFailed => {
                self.stop_session();
                self.manager
                    .disconnect(DisconnectCause::LinkLost(TransportError::SessionStartFailed));
            }
            SessionEvent::Input(input) => {
                self.aspects.traffic.notify(|l| l.on_input_event(&input));
            }
            SessionEvent::PacketSent(packet) => {
                self.aspects.traffic.notify(|l| l.on_packet_sent(&packet));
            }
            SessionEvent::PacketReceived(packet) => {
                self.aspects
                    .traffic
                    .notify(|l| l.on_packet_received(&packet));
            }
        }
    }

    // ── Subscriptions and shutdown ────────────────────────────────────────────

    /// Attaches a listener and replays the current state to it.
    fn subscribe(&mut self, subscription: Subscription) {
        match &subscription {
            Subscription::Enablement(_, listener) => listener.on_enablement_changed(self.enabled),
            Subscription::Connection(_, listener) => {
                if let Some(device) = self.manager.connected_device() {
                    listener.on_connection_status_changed(ConnectStatus::Connected, Some(&device));
                }
            }
            Subscription::DisplayProperties(_, listener) => {
                if let Some(properties) = self.displayer.as_ref().and_then(|d| d.properties()) {
                    listener.on_display_properties(Some(properties));
                }
            }
            Subscription::Traffic(..) => {}
        }
        self.aspects.subscribe(subscription);
    }

    fn shutdown(&mut self) {
        info!("coordinator shutting down");
        self.stop_session();
        self.manager.stop_discovery(DiscoveryReason::Disabled);
        self.manager.disconnect(DisconnectCause::Disabled);
        self.enabled = false;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
