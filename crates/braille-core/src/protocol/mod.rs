//! Contracts for the collaborators that live outside the connection core.

pub mod codec;
pub mod registry;

pub use codec::{CodecFactory, CodecHost, PacketConsumer, SessionCodec};
pub use registry::{DeviceRegistry, SettingKey};
