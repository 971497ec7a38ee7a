//! Application layer of the braille display link.
//!
//! Everything here runs on, or talks to, the single **foreground** context:
//! one tokio task that owns the [`connectioneer::Connectioneer`] and
//! consumes [`foreground::ForegroundEvent`]s in FIFO order.  State
//! transitions of the connection manager and the coordinator happen only
//! there, so none of this code needs locks; exclusivity comes from `&mut
//! self`, not from a mutex.
//!
//! The only other execution contexts are the per-session background worker
//! owned by [`displayer::Displayer`], and short-lived connector threads
//! spawned by the transports for each blocking connect attempt.  Both talk
//! back exclusively by posting events to the foreground queue.
//!
//! # Sub-modules
//!
//! - **`foreground`** – The foreground event vocabulary and the cloneable
//!   [`foreground::Foreground`] posting handle, including delayed posts used
//!   for keep-alive windows and connect timeouts.
//!
//! - **`transport`** – Contracts the concrete transports implement:
//!   [`transport::TransportConnector`], [`transport::DuplexLink`],
//!   [`transport::RawChannel`], and the normalised
//!   [`transport::ConnectionEvent`] vocabulary.
//!
//! - **`connection_manager`** – Owns exactly one active connector and the
//!   connection phase state machine.
//!
//! - **`displayer`** – The session runner driving the firmware codec on its
//!   background worker.
//!
//! - **`aspects`** – Independently subscribable observer lists.
//!
//! - **`connectioneer`** – The coordinator: enablement, auto-connect policy,
//!   registry updates, and event fan-out.
//!
//! - **`display_manager`** – The per-host-session facade gating callbacks by
//!   service and display readiness.
//!
//! - **`service`** – Runs the foreground loop and hands out a
//!   [`service::ServiceHandle`].

pub mod aspects;
pub mod connection_manager;
pub mod connectioneer;
pub mod display_manager;
pub mod displayer;
pub mod foreground;
pub mod service;
pub mod transport;
mod worker_queue;
