//! [`UsbHost`] backed by `hidapi`.
//!
//! Braille displays on USB almost all enumerate as HID devices, so the HID
//! device list doubles as the USB device list.  The device path is used as
//! the address.  hidapi has no runtime permission model: access is decided
//! by OS device permissions when the device is opened.
//!
//! Packets are passed through unchanged; adding the HID report id is the
//! codec's job.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use braille_core::DeviceDescriptor;
use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::application::transport::{RawChannel, UsbDeviceInfo};
use crate::infrastructure::transport::usb::UsbHost;
use crate::infrastructure::transport::PlatformError;

/// Read timeout per poll; bounds how long `close` waits for the reader.
const READ_POLL_MS: i32 = 100;

pub struct HidapiUsbHost {
    api: Mutex<HidApi>,
}

impl HidapiUsbHost {
    /// # Errors
    ///
    /// Returns [`PlatformError::Unavailable`] if the HID library cannot be
    /// initialised.
    pub fn new() -> Result<Self, PlatformError> {
        let api = HidApi::new().map_err(|e| PlatformError::Unavailable(e.to_string()))?;
        Ok(Self {
            api: Mutex::new(api),
        })
    }
}

impl UsbHost for HidapiUsbHost {
    fn attached_devices(&self) -> Result<Vec<UsbDeviceInfo>, PlatformError> {
        let mut api = self.api.lock();
        api.refresh_devices()
            .map_err(|e| PlatformError::Io(e.to_string()))?;

        let mut devices: Vec<UsbDeviceInfo> = Vec::new();
        for info in api.device_list() {
            let address = info.path().to_string_lossy();
            let Ok(device) = DeviceDescriptor::usb(info.product_string(), &address) else {
                continue;
            };
            // One display can expose several HID interfaces.
            if devices.iter().any(|d| d.device == device) {
                continue;
            }
            devices.push(UsbDeviceInfo {
                device,
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
            });
        }
        Ok(devices)
    }

    fn has_permission(&self, _address: &str) -> bool {
        true
    }

    fn request_permission(&self, _address: &str) -> Result<(), PlatformError> {
        Ok(())
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Arc<dyn RawChannel>, PlatformError> {
        let api = self.api.lock();
        let info = api
            .device_list()
            .find(|info| device.has_address(&info.path().to_string_lossy()))
            .ok_or_else(|| PlatformError::Unavailable(device.address().to_string()))?;

        let handle = info.open_device(&api).map_err(|e| {
            let message = e.to_string();
            if message.to_ascii_lowercase().contains("permission") {
                PlatformError::PermissionDenied("usb open".to_string())
            } else {
                PlatformError::Io(message)
            }
        })?;
        info!("opened usb display {}", device.label());
        Ok(Arc::new(HidChannel {
            device: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
            label: device.label().to_string(),
        }))
    }
}

struct HidChannel {
    device: Mutex<Option<HidDevice>>,
    closed: AtomicBool,
    label: String,
}

impl std::fmt::Debug for HidChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidChannel")
            .field("device", &self.label)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

fn hid_error(e: hidapi::HidError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

impl RawChannel for HidChannel {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Ok(0);
            }
            let guard = self.device.lock();
            let Some(device) = guard.as_ref() else {
                return Ok(0);
            };
            let n = device.read_timeout(buf, READ_POLL_MS).map_err(hid_error)?;
            if n > 0 {
                return Ok(n);
            }
        }
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let guard = self.device.lock();
        let device = guard
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "channel closed"))?;
        device.write(bytes).map_err(hid_error)?;
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // The reader notices the flag within one poll and releases the lock.
        self.device.lock().take();
        debug!("closed usb display {}", self.label);
    }
}
