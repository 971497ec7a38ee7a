//! Facade ("BrailleDisplayManager") binding the coordinator to the single
//! active consumer, the accessibility pipeline.
//!
//! Callbacks are delivered only while the owning service is active and the
//! transport is connected; input and rendering additionally need the
//! display session to be ready.  Callbacks that arrive late (a packet
//! decoded after the service stopped) are swallowed here instead of reaching
//! a torn-down consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use braille_core::{BrailleInputEvent, DeviceDescriptor, DisplayProperties};
use tracing::trace;

use crate::application::aspects::{
    AspectKind, ConnectStatus, ConnectionListener, DisplayPropertiesListener, ListenerId,
    Subscription, TrafficListener,
};
use crate::application::connectioneer::{LifecycleEvent, UserCommand};
use crate::application::service::ServiceHandle;

/// What the accessibility pipeline implements.
pub trait BrailleDisplayConsumer: Send + Sync {
    fn on_connection_changed(&self, _connected: bool, _device: Option<&DeviceDescriptor>) {}

    /// `Some` once the display can render, `None` when it no longer can.
    fn on_display_ready(&self, _properties: Option<&DisplayProperties>) {}

    fn on_input_event(&self, _event: &BrailleInputEvent) {}
}

struct Gate {
    service_active: AtomicBool,
    connected: AtomicBool,
    ready: AtomicBool,
    consumer: Arc<dyn BrailleDisplayConsumer>,
}

impl Gate {
    fn active(&self) -> bool {
        self.service_active.load(Ordering::Acquire)
    }

    fn can_render(&self) -> bool {
        self.active() && self.connected.load(Ordering::Acquire) && self.ready.load(Ordering::Acquire)
    }
}

impl ConnectionListener for Gate {
    fn on_connection_status_changed(
        &self,
        status: ConnectStatus,
        device: Option<&DeviceDescriptor>,
    ) {
        match status {
            ConnectStatus::Connecting => {}
            ConnectStatus::Connected => {
                self.connected.store(true, Ordering::Release);
                if self.active() {
                    self.consumer.on_connection_changed(true, device);
                }
            }
            ConnectStatus::Disconnected => {
                let was_connected = self.connected.swap(false, Ordering::AcqRel);
                self.ready.store(false, Ordering::Release);
                if was_connected && self.active() {
                    self.consumer.on_connection_changed(false, device);
                }
            }
        }
    }
}

impl DisplayPropertiesListener for Gate {
    fn on_display_properties(&self, properties: Option<&DisplayProperties>) {
        match properties {
            Some(properties) => {
                if !self.connected.load(Ordering::Acquire) {
                    trace!("ignoring display properties while disconnected");
                    return;
                }
                self.ready.store(true, Ordering::Release);
                if self.active() {
                    self.consumer.on_display_ready(Some(properties));
                }
            }
            None => {
                let was_ready = self.ready.swap(false, Ordering::AcqRel);
                if was_ready && self.active() {
                    self.consumer.on_display_ready(None);
                }
            }
        }
    }
}

impl TrafficListener for Gate {
    fn on_input_event(&self, event: &BrailleInputEvent) {
        if self.can_render() {
            self.consumer.on_input_event(event);
        } else {
            trace!("dropping input event {:?}", event);
        }
    }
}

/// Per-host-session facade over a running service.
pub struct BrailleDisplayManager {
    handle: ServiceHandle,
    gate: Arc<Gate>,
    subscriptions: Vec<(AspectKind, ListenerId)>,
}

impl BrailleDisplayManager {
    /// Subscribes `consumer` to the service's connection, display-property
    /// and traffic aspects.  Nothing is delivered until
    /// [`on_service_started`](Self::on_service_started).
    pub fn new(handle: ServiceHandle, consumer: Arc<dyn BrailleDisplayConsumer>) -> Self {
        let gate = Arc::new(Gate {
            service_active: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            consumer,
        });
        let subscriptions = [
            Subscription::Connection(ListenerId::next(), gate.clone()),
            Subscription::DisplayProperties(ListenerId::next(), gate.clone()),
            Subscription::Traffic(ListenerId::next(), gate.clone()),
        ]
        .into_iter()
        .map(|s| (s.kind(), handle.subscribe(s)))
        .collect();

        Self {
            handle,
            gate,
            subscriptions,
        }
    }

    pub fn on_service_started(&self) {
        self.gate.service_active.store(true, Ordering::Release);
        self.handle.post_lifecycle(LifecycleEvent::ServiceStarted);
    }

    pub fn on_service_stopped(&self) {
        self.gate.service_active.store(false, Ordering::Release);
        self.handle.post_lifecycle(LifecycleEvent::ServiceStopped);
    }

    /// Sends dots to the display.  Returns `false` if the display cannot
    /// render right now.
    pub fn write_braille_dots(&self, dots: &[u8]) -> bool {
        if !self.gate.can_render() {
            return false;
        }
        self.handle.send_command(UserCommand::WriteDots(dots.to_vec()))
    }

    pub fn is_connected(&self) -> bool {
        self.gate.connected.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.gate.can_render()
    }
}

impl Drop for BrailleDisplayManager {
    fn drop(&mut self) {
        for (kind, id) in self.subscriptions.drain(..) {
            self.handle.unsubscribe(kind, id);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
