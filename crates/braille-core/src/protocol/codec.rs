//! Session codec contract.
//!
//! The codec is the firmware-protocol engine: given a dot buffer it produces
//! display-specific wire packets, and given raw bytes from the display it
//! decodes key presses.  Wire framing lives entirely inside the codec; the
//! connection core only moves opaque byte buffers in and out.
//!
//! # Threading
//!
//! A codec is not thread-safe.  Every [`SessionCodec`] method, and every
//! [`CodecHost`] callback it makes, runs on the single background worker
//! thread that owns it.  Calls may block (codec start typically performs a
//! handshake with the display).
//!
//! Incoming bytes are the one exception: they arrive on the link's reader
//! thread while `start` may still be waiting for the handshake reply, so
//! they go through the codec's [`PacketConsumer`], which the codec hands out
//! once and must make safe to call concurrently with its own methods.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::display::{BrailleInputEvent, DeviceParameters, DisplayProperties};

/// Callbacks the codec uses to reach the display and the scheduler.
pub trait CodecHost: Send + Sync {
    /// Writes an encoded packet to the connected display.
    fn send_packet_to_device(&self, packet: &[u8]);

    /// Asks for [`SessionCodec::read_command`] to be called again after
    /// `delay`, for displays that must be polled instead of pushing input.
    fn read_after_delay(&self, delay: Duration);
}

/// Receives raw bytes from the display.
///
/// Called from the link reader thread only, never from the foreground.
pub trait PacketConsumer: Send + Sync {
    fn consume_packet_from_device(&self, packet: &[u8]);
}

/// The opaque display-protocol state machine.
pub trait SessionCodec: Send {
    /// Starts a session with the display.
    ///
    /// Returns the display's properties on success, or `None` if the display
    /// did not answer or is not supported by any driver.
    fn start(
        &mut self,
        parameters: &DeviceParameters,
        host: Arc<dyn CodecHost>,
    ) -> Option<DisplayProperties>;

    /// Stops the session and forgets all driver state.
    fn stop(&mut self);

    /// Encodes `dots` (one byte per cell, bit n = dot n+1) and sends it.
    fn write_braille_dots(&mut self, dots: &[u8]);

    /// Decodes the next buffered input command, if any.
    fn read_command(&mut self) -> Option<BrailleInputEvent>;

    /// Returns the sink that feeds raw display bytes into the decoder.
    fn packet_consumer(&self) -> Arc<dyn PacketConsumer>;
}

/// Creates a fresh codec for each session.
///
/// Codec instances are not restartable after a failed start, so the
/// connection core asks for a new one for every connected link.
pub trait CodecFactory: Send + Sync {
    fn create_codec(&self) -> Box<dyn SessionCodec>;
}

impl<F> CodecFactory for F
where
    F: Fn() -> Box<dyn SessionCodec> + Send + Sync,
{
    fn create_codec(&self) -> Box<dyn SessionCodec> {
        (self)()
    }
}
