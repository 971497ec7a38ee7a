//! One blocking connect attempt on its own thread.
//!
//! The platform open call (RFCOMM socket connect, HID open, USB open) can
//! block for seconds, so it never runs on the foreground.  The attempt
//! thread posts [`TransportEvent::AttemptFinished`] with its attempt id and
//! a timer posts [`TransportEvent::AttemptTimedOut`] if it takes too long.
//!
//! Cancelling (explicitly or by dropping the attempt) raises the shutdown
//! flag.  A thread that finishes after that closes whatever channel it
//! opened and posts nothing.  A result that was already posted when the
//! flag went up is caught by the connector, which no longer recognises the
//! attempt id.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use braille_core::{ConnectType, DeviceDescriptor};
use tracing::debug;

use crate::application::foreground::{Foreground, TimerHandle};
use crate::application::transport::{RawChannel, TransportError, TransportEvent};

pub struct ConnectAttempt {
    id: u64,
    device: DeviceDescriptor,
    manual: bool,
    connect_type: ConnectType,
    shutdown: Arc<AtomicBool>,
    _timeout: TimerHandle,
}

impl ConnectAttempt {
    /// Runs `open` on a new thread.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the thread could not be spawned.
    pub fn spawn<F>(
        foreground: &Foreground,
        device: DeviceDescriptor,
        manual: bool,
        connect_type: ConnectType,
        timeout: Duration,
        open: F,
    ) -> Result<Self, TransportError>
    where
        F: FnOnce() -> Result<Arc<dyn RawChannel>, TransportError> + Send + 'static,
    {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&shutdown);
        let fg = foreground.clone();
        std::thread::Builder::new()
            .name(format!("braille-connect-{}", id))
            .spawn(move || {
                let result = open();
                if flag.load(Ordering::Acquire) {
                    debug!("attempt {} finished after cancellation", id);
                    if let Ok(channel) = result {
                        channel.close();
                    }
                    return;
                }
                fg.post(TransportEvent::AttemptFinished { attempt: id, result });
            })
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let timer = foreground.post_after(timeout, TransportEvent::AttemptTimedOut { attempt: id });
        debug!(
            "attempt {} started: {} over {} (timeout {:?})",
            id,
            device.label(),
            connect_type,
            timeout
        );

        Ok(Self {
            id,
            device,
            manual,
            connect_type,
            shutdown,
            _timeout: timer,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn manual(&self) -> bool {
        self.manual
    }

    pub fn connect_type(&self) -> ConnectType {
        self.connect_type
    }

    pub fn cancel(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for ConnectAttempt {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
