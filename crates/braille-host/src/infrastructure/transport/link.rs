//! [`DuplexLink`] over a platform [`RawChannel`].
//!
//! The link owns the channel: it is the only writer and the only closer.
//! [`DuplexLink::open`] starts a reader thread that blocks in
//! [`RawChannel::read`] and hands every packet to the sink.  A read error or
//! end of stream is posted once as [`TransportEvent::LinkFailed`], unless
//! the link was shut down first, in which case the error is the expected
//! result of closing the channel and is not reported.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use braille_core::{ConnectType, DeviceDescriptor};
use tracing::{debug, warn};

use crate::application::foreground::Foreground;
use crate::application::transport::{
    DuplexLink, LinkId, LinkSink, RawChannel, TransportError, TransportEvent,
};

const READ_BUFFER_SIZE: usize = 512;

pub struct ChannelLink {
    id: LinkId,
    device: DeviceDescriptor,
    connect_type: ConnectType,
    channel: Arc<dyn RawChannel>,
    foreground: Foreground,
    closed: Arc<AtomicBool>,
    opened: AtomicBool,
}

impl ChannelLink {
    pub fn new(
        device: DeviceDescriptor,
        connect_type: ConnectType,
        channel: Arc<dyn RawChannel>,
        foreground: Foreground,
    ) -> Arc<Self> {
        let link = Arc::new(Self {
            id: LinkId::next(),
            device,
            connect_type,
            channel,
            foreground,
            closed: Arc::new(AtomicBool::new(false)),
            opened: AtomicBool::new(false),
        });
        debug!("{} created for {} over {}", link.id, link.device.label(), connect_type);
        link
    }
}

impl std::fmt::Debug for ChannelLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLink")
            .field("id", &self.id)
            .field("device", &self.device.address())
            .field("connect_type", &self.connect_type)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DuplexLink for ChannelLink {
    fn id(&self) -> LinkId {
        self.id
    }

    fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    fn connect_type(&self) -> ConnectType {
        self.connect_type
    }

    fn open(&self, sink: Arc<dyn LinkSink>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::LinkClosed);
        }
        if self.opened.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let id = self.id;
        let channel = Arc::clone(&self.channel);
        let closed = Arc::clone(&self.closed);
        let foreground = self.foreground.clone();

        std::thread::Builder::new()
            .name(format!("braille-{}", id))
            .spawn(move || {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                loop {
                    let error = match channel.read(&mut buf) {
                        Ok(0) => TransportError::Io("end of stream".to_string()),
                        Ok(n) => {
                            sink.on_packet_arrived(&buf[..n]);
                            sink.on_read_ready();
                            continue;
                        }
                        Err(e) => TransportError::from(e),
                    };
                    if !closed.load(Ordering::Acquire) {
                        warn!("{} failed: {}", id, error);
                        foreground.post(TransportEvent::LinkFailed { link: id, error });
                    }
                    break;
                }
                debug!("{} reader exiting", id);
            })
            .map_err(|e| {
                self.opened.store(false, Ordering::Release);
                TransportError::Io(e.to_string())
            })?;
        Ok(())
    }

    fn send_outgoing_packet(&self, packet: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::LinkClosed);
        }
        self.channel.write(packet).map_err(TransportError::from)
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("{} shutting down", self.id);
        self.channel.close();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
