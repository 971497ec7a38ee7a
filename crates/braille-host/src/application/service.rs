//! Composition root and foreground loop.
//!
//! Constructs the foreground queue, hands its posting side to whatever
//! needs it (platform connectors, the TOML registry's change notifier), then
//! moves a [`Connectioneer`] into a tokio task that drains the queue.
//!
//! ```text
//! let service = BrailleService::new().with_filter(config.filter.clone());
//! let connectors = PlatformConnectors::new(service.foreground(), ...);
//! let (handle, task) = service.spawn(registry, Box::new(connectors), codec_factory);
//! handle.post_lifecycle(LifecycleEvent::ServiceStarted);
//! ```

use std::sync::Arc;

use braille_core::{CodecFactory, DeviceFilter, DeviceRegistry};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::aspects::{AspectKind, ListenerId, Subscription};
use crate::application::connectioneer::{Connectioneer, LifecycleEvent, UserCommand};
use crate::application::foreground::{Foreground, ForegroundEvent};
use crate::application::transport::ConnectorFactory;

/// Builder for the running service.
pub struct BrailleService {
    foreground: Foreground,
    rx: UnboundedReceiver<ForegroundEvent>,
    filter: DeviceFilter,
}

impl Default for BrailleService {
    fn default() -> Self {
        Self::new()
    }
}

impl BrailleService {
    pub fn new() -> Self {
        let (foreground, rx) = Foreground::channel();
        Self {
            foreground,
            rx,
            filter: DeviceFilter::default(),
        }
    }

    /// Posting handle for collaborators built before the loop starts.
    pub fn foreground(&self) -> Foreground {
        self.foreground.clone()
    }

    pub fn with_filter(mut self, filter: DeviceFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Builds the coordinator without starting the loop.  Used by tests
    /// that drive [`Connectioneer::handle`] by hand.
    pub fn build(
        self,
        registry: Arc<dyn DeviceRegistry>,
        connectors: Box<dyn ConnectorFactory>,
        codec_factory: Arc<dyn CodecFactory>,
    ) -> (Connectioneer, UnboundedReceiver<ForegroundEvent>) {
        let connectioneer = Connectioneer::new(
            self.foreground,
            registry,
            connectors,
            codec_factory,
            self.filter,
        );
        (connectioneer, self.rx)
    }

    /// Spawns the foreground loop on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(
        self,
        registry: Arc<dyn DeviceRegistry>,
        connectors: Box<dyn ConnectorFactory>,
        codec_factory: Arc<dyn CodecFactory>,
    ) -> (ServiceHandle, JoinHandle<Connectioneer>) {
        let handle = ServiceHandle::new(self.foreground.clone());
        let (connectioneer, rx) = self.build(registry, connectors, codec_factory);
        let task = tokio::spawn(run_foreground(connectioneer, rx));
        (handle, task)
    }
}

/// Drains the foreground queue into `connectioneer` until shutdown or until
/// every sender is gone.  Returns the coordinator for inspection.
pub async fn run_foreground(
    mut connectioneer: Connectioneer,
    mut rx: UnboundedReceiver<ForegroundEvent>,
) -> Connectioneer {
    info!("foreground loop started");
    while let Some(event) = rx.recv().await {
        if !connectioneer.handle(event) {
            break;
        }
    }
    info!("foreground loop stopped");
    connectioneer
}

/// Cloneable front door to a running service.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    foreground: Foreground,
}

impl ServiceHandle {
    pub fn new(foreground: Foreground) -> Self {
        Self { foreground }
    }

    pub fn foreground(&self) -> &Foreground {
        &self.foreground
    }

    pub fn post_lifecycle(&self, event: LifecycleEvent) -> bool {
        self.foreground.post(event)
    }

    pub fn send_command(&self, command: UserCommand) -> bool {
        self.foreground.post(command)
    }

    /// Attaches a listener.  The id is chosen here so the caller can detach
    /// without waiting for the loop.
    pub fn subscribe(&self, subscription: Subscription) -> ListenerId {
        let id = subscription.id();
        self.foreground.post(ForegroundEvent::Subscribe(subscription));
        id
    }

    pub fn unsubscribe(&self, kind: AspectKind, id: ListenerId) {
        self.foreground.post(ForegroundEvent::Unsubscribe(kind, id));
    }

    /// Asks the loop to tear everything down and exit.
    pub fn shutdown(&self) {
        debug!("shutdown requested");
        self.foreground.post(ForegroundEvent::Shutdown);
    }
}
