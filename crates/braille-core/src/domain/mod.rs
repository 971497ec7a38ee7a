//! Domain entities for the braille display link.
//!
//! This module contains pure data and rules with no infrastructure
//! dependencies: it compiles and tests on any platform without a radio, a
//! USB stack or a running display.
//!
//! Code in outer layers (the connection manager, the transports, the
//! coordinator) depends on these types, but the domain never depends on them.

/// Device identity and transport kinds.
///
/// See [`device::DeviceDescriptor`] for the main type.
pub mod device;

/// Properties and input events surfaced by a running display session.
pub mod display;

/// Allow-filter deciding which discovered peers are supported displays.
pub mod filter;
