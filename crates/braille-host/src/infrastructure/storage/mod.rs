//! Storage infrastructure: configuration and the device registry on disk.
//!
//! - `config` reads and writes the TOML configuration file from the
//!   platform-appropriate directory, falling back to defaults on first run.
//! - `registry` implements the persistent device registry contract over a
//!   second TOML file, and provides an in-memory registry for tests and
//!   embedders that keep settings elsewhere.

pub mod config;
pub mod registry;
