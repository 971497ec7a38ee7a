//! Allow-filter for supported braille displays.
//!
//! Discovery sees every Bluetooth peer in range: headphones, keyboards,
//! watches.  Only peers whose advertised name starts with a known display
//! family prefix are offered for connection or auto-connect.  USB devices
//! are recognised by vendor id first and by product name as a fallback,
//! because several manufacturers ship displays on generic USB-serial chips.

use serde::{Deserialize, Serialize};

use super::device::DeviceDescriptor;

/// Display-family name prefixes recognised out of the box.
pub const DEFAULT_NAME_PREFIXES: &[&str] = &[
    "ALVA",
    "APH",
    "Actilino",
    "Active Braille",
    "Active Star",
    "Basic Braille",
    "BI14",
    "BI20",
    "BI40",
    "Braille Edge",
    "BrailleEDGE",
    "BrailleNote",
    "BrailleOne",
    "BrailleSense",
    "Brailliant",
    "Chameleon",
    "DotPad",
    "Esys",
    "Focus",
    "HumanWare",
    "Mantis",
    "NLS eReader",
    "Orbit Reader",
    "Refreshabraille",
    "Seika",
    "SmartBeetle",
    "VarioUltra",
];

/// USB vendor ids of display manufacturers recognised out of the box.
pub const DEFAULT_USB_VENDOR_IDS: &[u16] = &[
    0x0798, // Optelec / ALVA
    0x0904, // Baum
    0x0921, // Handy Tech
    0x0F4E, // Freedom Scientific
    0x1C71, // HumanWare
];

/// Decides whether a discovered peer is a supported braille display.
///
/// Missing fields deserialize to the built-in lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFilter {
    /// Case-insensitive name prefixes.
    pub name_prefixes: Vec<String>,
    /// USB vendor ids accepted regardless of product name.
    pub usb_vendor_ids: Vec<u16>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            name_prefixes: DEFAULT_NAME_PREFIXES.iter().map(|p| p.to_string()).collect(),
            usb_vendor_ids: DEFAULT_USB_VENDOR_IDS.to_vec(),
        }
    }
}

impl DeviceFilter {
    /// Returns `true` if `name` starts with one of the configured prefixes.
    ///
    /// A device without a name is never allowed: there is nothing to match.
    pub fn allows_name(&self, name: Option<&str>) -> bool {
        let Some(name) = name else {
            return false;
        };
        let name = name.trim().to_ascii_lowercase();
        self.name_prefixes
            .iter()
            .any(|prefix| name.starts_with(&prefix.to_ascii_lowercase()))
    }

    /// Returns `true` if the descriptor's name passes the filter.
    pub fn allows(&self, device: &DeviceDescriptor) -> bool {
        let allowed = self.allows_name(device.name());
        if !allowed {
            tracing::trace!("filtered out {} ({})", device.label(), device.address());
        }
        allowed
    }

    /// Returns `true` for a USB device with a supported vendor id or name.
    pub fn allows_usb(&self, vendor_id: u16, product_name: Option<&str>) -> bool {
        self.usb_vendor_ids.contains(&vendor_id) || self.allows_name(product_name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
