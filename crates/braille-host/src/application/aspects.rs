//! Independently subscribable event groups ("aspects").
//!
//! The coordinator republishes what happens inside the connection manager
//! and the session runner through four aspects:
//!
//! | Aspect              | Listener trait                  | Carries                                  |
//! |---------------------|---------------------------------|------------------------------------------|
//! | Enablement          | [`EnablementListener`]          | effective feature enablement             |
//! | Connection          | [`ConnectionListener`]          | status, device list, scanning, failures  |
//! | Traffic             | [`TrafficListener`]             | packets sent/received, decoded input     |
//! | Display properties  | [`DisplayPropertiesListener`]   | properties once a session is ready       |
//!
//! Each aspect is an observer list with explicit attach/detach.  Listeners
//! are notified in attach order, on the foreground context.  Every listener
//! method has an empty default so subscribers implement only what they use.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use braille_core::{BrailleInputEvent, DeviceDescriptor, DisplayProperties};

use crate::application::transport::TransportError;

// ── Listener ids ──────────────────────────────────────────────────────────────

/// Identifies one attached listener so it can be detached later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ListenerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

// ── Listener traits ───────────────────────────────────────────────────────────

/// Connection status as shown to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Connecting,
    Connected,
    Disconnected,
}

pub trait EnablementListener: Send + Sync {
    fn on_enablement_changed(&self, _enabled: bool) {}
}

pub trait ConnectionListener: Send + Sync {
    fn on_connection_status_changed(
        &self,
        _status: ConnectStatus,
        _device: Option<&DeviceDescriptor>,
    ) {
    }

    /// The known or paired device list changed.
    fn on_device_list_changed(&self, _devices: &[DeviceDescriptor]) {}

    fn on_scanning_changed(&self, _scanning: bool) {}

    /// A connect request gave up.  `manual` is `true` for user-initiated
    /// attempts, which deserve a visible notification.
    fn on_connect_failed(
        &self,
        _device: Option<&DeviceDescriptor>,
        _manual: bool,
        _error: &TransportError,
    ) {
    }

    /// An open connection died on a transport error.
    fn on_link_lost(&self, _device: Option<&DeviceDescriptor>, _error: &TransportError) {}

    fn on_search_failure(&self) {}
}

pub trait TrafficListener: Send + Sync {
    fn on_packet_sent(&self, _packet: &[u8]) {}

    fn on_packet_received(&self, _packet: &[u8]) {}

    fn on_input_event(&self, _event: &BrailleInputEvent) {}
}

pub trait DisplayPropertiesListener: Send + Sync {
    /// `None` when the display is no longer ready.
    fn on_display_properties(&self, _properties: Option<&DisplayProperties>) {}
}

// ── Aspect ────────────────────────────────────────────────────────────────────

/// An ordered observer list.
pub struct Aspect<L: ?Sized> {
    listeners: Vec<(ListenerId, Arc<L>)>,
}

impl<L: ?Sized> Default for Aspect<L> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

impl<L: ?Sized> Aspect<L> {
    /// Attaches `listener` at the end of the list.
    pub fn attach(&mut self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId::next();
        self.attach_with_id(id, listener);
        id
    }

    /// Attaches under a caller-chosen id.  Re-attaching an id moves it to
    /// the end.
    pub fn attach_with_id(&mut self, id: ListenerId, listener: Arc<L>) {
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.push((id, listener));
    }

    /// Returns `true` if a listener was removed.
    pub fn detach(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    /// Calls `f` for every listener, in attach order.
    pub fn notify(&self, mut f: impl FnMut(&L)) {
        for (_, listener) in &self.listeners {
            f(&**listener);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// Which aspect a subscription targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectKind {
    Enablement,
    Connection,
    Traffic,
    DisplayProperties,
}

/// A request to attach a listener, posted through the foreground.
#[derive(Clone)]
pub enum Subscription {
    Enablement(ListenerId, Arc<dyn EnablementListener>),
    Connection(ListenerId, Arc<dyn ConnectionListener>),
    Traffic(ListenerId, Arc<dyn TrafficListener>),
    DisplayProperties(ListenerId, Arc<dyn DisplayPropertiesListener>),
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        match self {
            Subscription::Enablement(id, _)
            | Subscription::Connection(id, _)
            | Subscription::Traffic(id, _)
            | Subscription::DisplayProperties(id, _) => *id,
        }
    }

    pub fn kind(&self) -> AspectKind {
        match self {
            Subscription::Enablement(..) => AspectKind::Enablement,
            Subscription::Connection(..) => AspectKind::Connection,
            Subscription::Traffic(..) => AspectKind::Traffic,
            Subscription::DisplayProperties(..) => AspectKind::DisplayProperties,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind())
            .field("id", &self.id())
            .finish()
    }
}

/// The four aspects the coordinator publishes.
#[derive(Default)]
pub struct Aspects {
    pub enablement: Aspect<dyn EnablementListener>,
    pub connection: Aspect<dyn ConnectionListener>,
    pub traffic: Aspect<dyn TrafficListener>,
    pub display_properties: Aspect<dyn DisplayPropertiesListener>,
}

impl Aspects {
    pub fn subscribe(&mut self, subscription: Subscription) {
        match subscription {
            Subscription::Enablement(id, l) => self.enablement.attach_with_id(id, l),
            Subscription::Connection(id, l) => self.connection.attach_with_id(id, l),
            Subscription::Traffic(id, l) => self.traffic.attach_with_id(id, l),
            Subscription::DisplayProperties(id, l) => {
                self.display_properties.attach_with_id(id, l)
            }
        }
    }

    pub fn unsubscribe(&mut self, kind: AspectKind, id: ListenerId) -> bool {
        match kind {
            AspectKind::Enablement => self.enablement.detach(id),
            AspectKind::Connection => self.connection.detach(id),
            AspectKind::Traffic => self.traffic.detach(id),
            AspectKind::DisplayProperties => self.display_properties.detach(id),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
