//! Properties and input surfaced by a running display session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::device::{ConnectType, DeviceDescriptor};

/// What the codec learned about the display when its session started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayProperties {
    /// Name of the firmware driver the codec selected (e.g. `"freedomscientific"`).
    pub driver_name: String,
    /// Number of text cells per row.
    pub text_cells: u16,
    /// Number of rows (1 for almost every display).
    pub rows: u16,
    /// Number of status cells, not part of the text area.
    pub status_cells: u16,
}

impl DisplayProperties {
    /// Total number of text cells across all rows.
    pub fn total_text_cells(&self) -> usize {
        usize::from(self.text_cells) * usize::from(self.rows.max(1))
    }
}

/// One decoded command read from the display (a key chord, a routing key
/// press, a panning key).
///
/// The command vocabulary belongs to the codec; the connection core only
/// relays it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrailleInputEvent {
    /// Codec-defined command identifier.
    pub command: u32,
    /// Command argument, e.g. the cell index for a routing key; `0` if unused.
    pub argument: i32,
}

/// Parameters handed to the codec when a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParameters {
    /// Device name used by the codec to pick a firmware driver.
    pub device_name: String,
    /// Address of the connected peer.
    pub address: String,
    /// Link type the session runs over.
    pub connect_type: ConnectType,
    /// Minimum delay between polls when the codec defers reads.
    pub min_read_delay: Duration,
}

impl DeviceParameters {
    /// Builds the parameters for `device` connected over `connect_type`.
    pub fn for_device(device: &DeviceDescriptor, connect_type: ConnectType) -> Self {
        Self {
            device_name: device.label().to_string(),
            address: device.address().to_string(),
            connect_type,
            min_read_delay: Duration::from_millis(10),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_text_cells_treats_zero_rows_as_one() {
        let props = DisplayProperties {
            driver_name: "hims".into(),
            text_cells: 32,
            rows: 0,
            status_cells: 0,
        };
        assert_eq!(props.total_text_cells(), 32);
    }

    #[test]
    fn test_device_parameters_fall_back_to_address_when_name_missing() {
        let device = DeviceDescriptor::bluetooth(None, "AA:BB").unwrap();
        let params = DeviceParameters::for_device(&device, ConnectType::BtRfcomm);
        assert_eq!(params.device_name, "AA:BB");
        assert_eq!(params.connect_type, ConnectType::BtRfcomm);
    }
}
