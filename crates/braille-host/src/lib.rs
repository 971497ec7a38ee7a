//! braille-host library entry point.
//!
//! The connection and session core for refreshable braille displays:
//! discovering candidate devices, opening a Bluetooth (HID or RFCOMM) or USB
//! link with retry and fallback, running the display's protocol session on a
//! background worker, and fanning connection, traffic and display-property
//! events out to any number of observers.
//!
//! Re-exports all public modules so that integration tests in `tests/` and
//! host applications share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::connectioneer::Connectioneer;
pub use application::foreground::{Foreground, ForegroundEvent};
pub use application::service::{BrailleService, ServiceHandle};
