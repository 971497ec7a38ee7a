//! [`ConnectorFactory`] over the platform adapters.

use std::sync::Arc;

use braille_core::{DeviceFilter, TransportKind};
use tracing::debug;

use crate::application::foreground::Foreground;
use crate::application::transport::{ConnectorFactory, TransportConnector};
use crate::infrastructure::transport::bluetooth::{BluetoothAdapter, BluetoothConnector};
use crate::infrastructure::transport::usb::{UsbConnector, UsbHost};
use crate::infrastructure::transport::TransportSettings;

/// Builds Bluetooth and USB connectors sharing one filter and one set of
/// transport settings.
pub struct PlatformConnectors {
    foreground: Foreground,
    bluetooth: Arc<dyn BluetoothAdapter>,
    usb: Arc<dyn UsbHost>,
    filter: DeviceFilter,
    settings: TransportSettings,
}

impl PlatformConnectors {
    pub fn new(
        foreground: Foreground,
        bluetooth: Arc<dyn BluetoothAdapter>,
        usb: Arc<dyn UsbHost>,
        filter: DeviceFilter,
        settings: TransportSettings,
    ) -> Self {
        Self {
            foreground,
            bluetooth,
            usb,
            filter,
            settings,
        }
    }
}

impl ConnectorFactory for PlatformConnectors {
    fn create(&mut self, kind: TransportKind) -> Box<dyn TransportConnector> {
        debug!("creating {} connector", kind);
        match kind {
            TransportKind::Bluetooth => Box::new(BluetoothConnector::new(
                self.foreground.clone(),
                Arc::clone(&self.bluetooth),
                self.filter.clone(),
                self.settings.clone(),
            )),
            TransportKind::Usb => Box::new(UsbConnector::new(
                self.foreground.clone(),
                Arc::clone(&self.usb),
                self.filter.clone(),
                self.settings.clone(),
            )),
        }
    }

    /// USB when a supported display is plugged in, Bluetooth otherwise.
    fn preferred_transport(&self) -> TransportKind {
        let plugged_in = self
            .usb
            .attached_devices()
            .map(|devices| {
                devices
                    .iter()
                    .any(|d| self.filter.allows_usb(d.vendor_id, d.device.name()))
            })
            .unwrap_or(false);
        if plugged_in {
            TransportKind::Usb
        } else {
            TransportKind::Bluetooth
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
