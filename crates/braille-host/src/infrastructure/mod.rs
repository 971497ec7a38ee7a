//! Infrastructure layer of the braille display link.
//!
//! Contains the platform-facing adapters: Bluetooth and USB connectors, the
//! duplex link over a raw platform channel, mock platform adapters for
//! tests, and file-system storage for configuration and the device
//! registry.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `braille_core`, but MUST NOT be imported by the `application` layer.

pub mod storage;
pub mod transport;
