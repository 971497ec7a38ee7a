//! # braille-core
//!
//! Shared library for the braille display link containing the domain
//! entities and the contracts of the two external collaborators the
//! connection core talks to.
//!
//! This crate has zero dependencies on OS APIs, radios, threads or timers.
//!
//! # Architecture overview
//!
//! A refreshable braille display is an external device with a row of
//! pin-based cells and a handful of navigation keys.  The host (a phone or a
//! desktop screen reader) pushes dot patterns to it and receives key presses
//! back, over Bluetooth (RFCOMM or HID) or USB.
//!
//! This crate defines:
//!
//! - **`domain`** – What a display *is* to the rest of the system: an
//!   immutable [`DeviceDescriptor`] identity, the [`DisplayProperties`]
//!   reported by its firmware once a session starts, decoded
//!   [`BrailleInputEvent`]s, and the [`DeviceFilter`] that decides which
//!   peers are braille displays at all.
//!
//! - **`protocol`** – The narrow contracts for the collaborators that live
//!   outside the connection core: the firmware [`SessionCodec`] that turns
//!   dot buffers into display-specific packets, and the persistent
//!   [`DeviceRegistry`] of remembered devices and user settings.

pub mod domain;
pub mod protocol;

pub use domain::device::{
    ConnectType, DescriptorError, DeviceDescriptor, RememberedDevice, TransportKind,
};
pub use domain::display::{BrailleInputEvent, DeviceParameters, DisplayProperties};
pub use domain::filter::DeviceFilter;
pub use protocol::codec::{CodecFactory, CodecHost, PacketConsumer, SessionCodec};
pub use protocol::registry::{DeviceRegistry, SettingKey};
