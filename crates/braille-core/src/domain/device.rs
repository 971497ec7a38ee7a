//! Remote device identity.
//!
//! A [`DeviceDescriptor`] is created when discovery observes a peer or when
//! the registry yields a remembered pair, and never changes afterwards.  Two
//! descriptors are the same device when their addresses match, whatever
//! their display names say: a remembered device that is out of range may
//! carry a stale name, or none at all.
//!
//! # Address normalisation
//!
//! Bluetooth stacks disagree on the case of hex digits in a MAC address
//! (`aa:bb:..` vs `AA:BB:..`).  Addresses are trimmed and upper-cased at
//! construction so that equality, hashing and registry lookups agree.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for descriptor construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// The address was empty after trimming whitespace.
    #[error("device address must not be empty")]
    EmptyAddress,
}

/// The physical family of link a device is reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Bluetooth,
    Usb,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Bluetooth => f.write_str("bluetooth"),
            TransportKind::Usb => f.write_str("usb"),
        }
    }
}

/// The concrete link type used for one connect attempt.
///
/// Bluetooth devices may be reached over two different profiles; which one
/// was used matters to the session codec because framing differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectType {
    /// Bluetooth HID profile (input reports / output reports).
    BtHid,
    /// Bluetooth RFCOMM serial port profile.
    BtRfcomm,
    /// USB (HID class or vendor bulk endpoints).
    Usb,
}

impl ConnectType {
    /// Returns the transport family this connect type belongs to.
    pub fn transport(self) -> TransportKind {
        match self {
            ConnectType::BtHid | ConnectType::BtRfcomm => TransportKind::Bluetooth,
            ConnectType::Usb => TransportKind::Usb,
        }
    }

    /// Returns `true` for link types that carry HID reports rather than a byte stream.
    pub fn is_hid(self) -> bool {
        matches!(self, ConnectType::BtHid | ConnectType::Usb)
    }
}

impl fmt::Display for ConnectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectType::BtHid => f.write_str("bt-hid"),
            ConnectType::BtRfcomm => f.write_str("bt-rfcomm"),
            ConnectType::Usb => f.write_str("usb"),
        }
    }
}

/// Immutable identity of a candidate or connected peer.
///
/// Deserialising goes through [`DeviceDescriptor::new`], so a stored
/// descriptor is normalised and validated like a constructed one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawDescriptor")]
pub struct DeviceDescriptor {
    name: Option<String>,
    address: String,
    transport: TransportKind,
}

impl DeviceDescriptor {
    /// Creates a descriptor, normalising the address.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::EmptyAddress`] if `address` is blank.
    pub fn new(
        name: Option<String>,
        address: impl AsRef<str>,
        transport: TransportKind,
    ) -> Result<Self, DescriptorError> {
        let address = normalize_address(address.as_ref());
        if address.is_empty() {
            return Err(DescriptorError::EmptyAddress);
        }
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        Ok(Self {
            name,
            address,
            transport,
        })
    }

    /// Convenience constructor for a Bluetooth peer.
    pub fn bluetooth(name: Option<&str>, address: &str) -> Result<Self, DescriptorError> {
        Self::new(name.map(str::to_string), address, TransportKind::Bluetooth)
    }

    /// Convenience constructor for a USB peer.
    pub fn usb(name: Option<&str>, address: &str) -> Result<Self, DescriptorError> {
        Self::new(name.map(str::to_string), address, TransportKind::Usb)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Returns the name when known, else the address.  Used in log lines and
    /// user-visible failure notifications.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }

    /// Returns `true` if `address` refers to this device.
    pub fn has_address(&self, address: &str) -> bool {
        self.address == normalize_address(address)
    }
}

/// Wire shape of [`DeviceDescriptor`] before validation.
#[derive(Deserialize)]
struct RawDescriptor {
    name: Option<String>,
    address: String,
    transport: TransportKind,
}

impl TryFrom<RawDescriptor> for DeviceDescriptor {
    type Error = DescriptorError;

    fn try_from(raw: RawDescriptor) -> Result<Self, Self::Error> {
        DeviceDescriptor::new(raw.name, raw.address, raw.transport)
    }
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for DeviceDescriptor {}

impl Hash for DeviceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({}, {})", self.address, self.transport),
            None => write!(f, "{} ({})", self.address, self.transport),
        }
    }
}

/// A `(name, address)` pair persisted by the registry for auto-connect.
///
/// Only Bluetooth peers are ever remembered.  The address is normalised on
/// load as well, so a hand-edited registry file matches live descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRemembered")]
pub struct RememberedDevice {
    pub name: Option<String>,
    pub address: String,
}

impl RememberedDevice {
    pub fn new(name: Option<String>, address: &str) -> Self {
        Self {
            name,
            address: normalize_address(address),
        }
    }
}

#[derive(Deserialize)]
struct RawRemembered {
    name: Option<String>,
    address: String,
}

impl From<RawRemembered> for RememberedDevice {
    fn from(raw: RawRemembered) -> Self {
        RememberedDevice::new(raw.name, &raw.address)
    }
}

impl From<&DeviceDescriptor> for RememberedDevice {
    fn from(device: &DeviceDescriptor) -> Self {
        Self {
            name: device.name.clone(),
            address: device.address.clone(),
        }
    }
}

impl TryFrom<&RememberedDevice> for DeviceDescriptor {
    type Error = DescriptorError;

    fn try_from(remembered: &RememberedDevice) -> Result<Self, Self::Error> {
        DeviceDescriptor::new(
            remembered.name.clone(),
            &remembered.address,
            TransportKind::Bluetooth,
        )
    }
}

/// Trims and upper-cases an address.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
