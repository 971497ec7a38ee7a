//! Concrete transport connectors.
//!
//! # How a connection is made (for beginners)
//!
//! 1. Discovery: [`bluetooth::BluetoothConnector`] asks the platform adapter
//!    to scan and keeps the scan alive for a bounded
//!    [`discovery::DiscoveryWindow`].  Peers whose name passes the device
//!    filter are reported as seen.
//!
//! 2. Connect: each blocking platform open call runs on its own thread,
//!    wrapped in an [`attempt::ConnectAttempt`] with a shutdown flag and a
//!    timeout.  The thread posts its result to the foreground; a result for
//!    an attempt that was cancelled in the meantime is discarded and its
//!    channel closed.
//!
//! 3. Link: the opened [`RawChannel`](crate::application::transport::RawChannel)
//!    is wrapped in a [`link::ChannelLink`], which runs a reader thread and
//!    reports a fatal read error once.
//!
//! Platform adapters implement [`bluetooth::BluetoothAdapter`] and
//! [`usb::UsbHost`].  [`mock`] provides scriptable versions for tests; the
//! `hidapi` cargo feature adds a real USB host backend.

pub mod attempt;
pub mod bluetooth;
pub mod discovery;
#[cfg(feature = "hidapi")]
pub mod hidapi_usb;
pub mod link;
pub mod mock;
pub mod platform;
pub mod usb;

use std::time::Duration;

use braille_core::ConnectType;
use thiserror::Error;

use crate::application::transport::TransportError;
use crate::infrastructure::storage::config::AppConfig;

/// Error type returned by platform adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform refused the capability; the string names the operation.
    #[error("permission denied for {0}")]
    PermissionDenied(String),

    /// The device or service is not available.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl PlatformError {
    /// Maps a failed open call for `connect_type` to the transport error
    /// reported upwards.
    pub fn into_transport(self, connect_type: ConnectType) -> TransportError {
        match self {
            PlatformError::PermissionDenied(operation) => {
                TransportError::PermissionDenied(operation)
            }
            PlatformError::Unavailable(message) | PlatformError::Io(message) => {
                match connect_type {
                    ConnectType::BtHid => TransportError::HidFailed(message),
                    ConnectType::BtRfcomm => TransportError::RfcommFailed(message),
                    ConnectType::Usb => TransportError::UsbOpenFailed(message),
                }
            }
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, PlatformError::PermissionDenied(_))
    }
}

/// Timing and preference knobs shared by all connectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// How long discovery stays alive after the last trigger.
    pub keep_alive: Duration,
    /// Upper bound for one connect attempt.
    pub connect_timeout: Duration,
    /// Delay before retrying a failed discovery start.
    pub discovery_retry: Duration,
    /// Try the HID profile before RFCOMM when both sides support it.
    pub prefer_hid: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(20),
            discovery_retry: Duration::from_secs(2),
            prefer_hid: true,
        }
    }
}

impl From<&AppConfig> for TransportSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            keep_alive: Duration::from_secs(config.discovery.keep_alive_secs),
            connect_timeout: Duration::from_secs(config.connection.connect_timeout_secs),
            discovery_retry: Duration::from_secs(config.discovery.retry_secs),
            prefer_hid: config.connection.prefer_hid,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
