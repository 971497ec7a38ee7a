//! Session runner ("Displayer"): drives the display's firmware codec on a
//! dedicated background worker.
//!
//! # State machine
//!
//! ```text
//! Stopped ──start()──► Starting ──Started──► Ready
//!    ▲                    │                    │
//!    └──────stop()────────┴────────stop()──────┘
//! ```
//!
//! `Ready` carries the [`DisplayProperties`] the codec reported, so a ready
//! session without properties cannot be expressed.  A failed start is
//! terminal: the owner must call [`Displayer::stop`] and build a fresh
//! `Displayer` to try again.
//!
//! # Two contexts, one queue each way
//!
//! The foreground side (this struct) never touches the codec.  It pushes
//! [`WorkerCommand`]s onto a FIFO [`WorkQueue`]; the worker thread executes
//! them against the codec and posts [`SessionMessage`]s back through the
//! [`Foreground`].  Pending starts, writes and reads are coalesced, so the
//! display always shows the latest dots, never a write history.
//!
//! Every message carries the runner id and the session *epoch*.  `stop()`
//! bumps the epoch, which turns everything the worker posted before the stop
//! into stale messages that [`Displayer::on_message`] drops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use braille_core::{
    BrailleInputEvent, CodecHost, DeviceParameters, DisplayProperties, PacketConsumer,
    SessionCodec,
};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::application::foreground::Foreground;
use crate::application::transport::{DuplexLink, LinkSink};
use crate::application::worker_queue::{Popped, WorkQueue};

// ── Public types ──────────────────────────────────────────────────────────────

/// Error type for session operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The codec failed to start; this instance cannot be restarted.
    #[error("session failed to start and cannot be restarted")]
    Failed,

    /// The operation needs a ready session.
    #[error("display is not ready")]
    NotReady,

    /// The background worker thread could not be created.
    #[error("could not spawn session worker: {0}")]
    Spawn(String),
}

/// Process-unique identity of one [`Displayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunnerId(u64);

impl RunnerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        RunnerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Session lifecycle as seen from the foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Stopped,
    Starting,
    Ready(DisplayProperties),
}

/// What the worker or link reader reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started(DisplayProperties),
    StartFailed,
    Input(BrailleInputEvent),
    PacketSent(Vec<u8>),
    PacketReceived(Vec<u8>),
}

/// A [`SessionEvent`] tagged with its origin.
#[derive(Debug, Clone)]
pub struct SessionMessage {
    pub runner: RunnerId,
    pub epoch: u64,
    pub event: SessionEvent,
}

// ── Worker commands ───────────────────────────────────────────────────────────

enum WorkerCommand {
    Start {
        parameters: DeviceParameters,
        epoch: u64,
    },
    Stop,
    WriteDots(Vec<u8>),
    ReadCommand,
    /// Read again at the given instant (codec-requested polling).
    ReadAfter(Instant),
}

impl WorkerCommand {
    fn is_start(&self) -> bool {
        matches!(self, WorkerCommand::Start { .. })
    }

    fn is_write(&self) -> bool {
        matches!(self, WorkerCommand::WriteDots(_))
    }

    fn is_read(&self) -> bool {
        matches!(self, WorkerCommand::ReadCommand)
    }

    fn is_read_after(&self) -> bool {
        matches!(self, WorkerCommand::ReadAfter(_))
    }
}

/// State shared by the foreground side, the worker, the codec host and the
/// link sink.
struct Shared {
    runner: RunnerId,
    foreground: Foreground,
    queue: WorkQueue<WorkerCommand>,
    /// Current epoch as decided by the foreground.
    epoch: AtomicU64,
}

impl Shared {
    fn post(&self, epoch: u64, event: SessionEvent) {
        self.foreground.post(SessionMessage {
            runner: self.runner,
            epoch,
            event,
        });
    }
}

// ── Displayer ─────────────────────────────────────────────────────────────────

/// Runs one display session over one link.
pub struct Displayer {
    shared: Arc<Shared>,
    link: Arc<dyn DuplexLink>,
    codec: Arc<Mutex<Box<dyn SessionCodec>>>,
    consumer: Arc<dyn PacketConsumer>,
    worker: Option<JoinHandle<()>>,
    phase: SessionPhase,
    /// A start was issued and no stop since.
    running: bool,
    failed: bool,
}

impl Displayer {
    /// Creates a stopped runner.  No thread is started until [`start`].
    ///
    /// [`start`]: Displayer::start
    pub fn new(
        link: Arc<dyn DuplexLink>,
        codec: Box<dyn SessionCodec>,
        foreground: Foreground,
    ) -> Self {
        let consumer = codec.packet_consumer();
        Self {
            shared: Arc::new(Shared {
                runner: RunnerId::next(),
                foreground,
                queue: WorkQueue::new(),
                epoch: AtomicU64::new(0),
            }),
            link,
            codec: Arc::new(Mutex::new(codec)),
            consumer,
            worker: None,
            phase: SessionPhase::Stopped,
            running: false,
            failed: false,
        }
    }

    pub fn id(&self) -> RunnerId {
        self.shared.runner
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.phase, SessionPhase::Ready(_))
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn properties(&self) -> Option<&DisplayProperties> {
        match &self.phase {
            SessionPhase::Ready(properties) => Some(properties),
            _ => None,
        }
    }

    pub fn link(&self) -> &Arc<dyn DuplexLink> {
        &self.link
    }

    /// Issues a start request, creating the worker if none is alive.
    ///
    /// Any start still pending is replaced by this one.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Failed`] once a start has failed on this instance.
    /// - [`SessionError::Spawn`] if the worker thread could not be created.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.failed {
            return Err(SessionError::Failed);
        }
        if self.worker.is_none() {
            self.spawn_worker()?;
        }

        let epoch = self.shared.epoch.load(Ordering::Acquire);
        let parameters =
            DeviceParameters::for_device(self.link.device(), self.link.connect_type());
        let command = |parameters: DeviceParameters| WorkerCommand::Start { parameters, epoch };

        // A closed queue means the previous worker finished a stop and exited.
        if !self
            .shared
            .queue
            .replace(command(parameters.clone()), WorkerCommand::is_start)
        {
            self.spawn_worker()?;
            self.shared
                .queue
                .replace(command(parameters), WorkerCommand::is_start);
        }

        info!(
            "starting session on {} ({})",
            self.link.device().label(),
            self.link.connect_type()
        );
        self.running = true;
        self.phase = SessionPhase::Starting;
        Ok(())
    }

    /// Stops the session.  Idempotent.
    ///
    /// Pending work on both sides is cancelled: queued worker commands are
    /// dropped and messages already posted to the foreground become stale.
    /// The worker stops the codec and exits unless a new start arrives
    /// before it gets to the stop.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        info!("stopping session on {}", self.link.device().label());
        self.running = false;
        self.phase = SessionPhase::Stopped;
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        self.shared.queue.clear();
        self.shared.queue.push(WorkerCommand::Stop);
    }

    /// Sends `dots` to the display, replacing any write still pending.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotReady`] unless the session is ready.
    pub fn write_braille_dots(&self, dots: &[u8]) -> Result<(), SessionError> {
        if !self.is_ready() {
            return Err(SessionError::NotReady);
        }
        self.shared
            .queue
            .replace(WorkerCommand::WriteDots(dots.to_vec()), WorkerCommand::is_write);
        Ok(())
    }

    /// Asks the worker to decode buffered input.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotReady`] unless the session is ready.
    pub fn read_command(&self) -> Result<(), SessionError> {
        if !self.is_ready() {
            return Err(SessionError::NotReady);
        }
        self.shared
            .queue
            .replace(WorkerCommand::ReadCommand, WorkerCommand::is_read);
        Ok(())
    }

    /// Feeds raw display bytes straight into the codec's decoder.
    ///
    /// Must not be called from the foreground context.  The link reader
    /// thread calls this through [`Displayer::link_sink`].
    pub fn consume_packet_from_device(&self, packet: &[u8]) {
        self.consumer.consume_packet_from_device(packet);
    }

    /// The sink to pass to [`DuplexLink::open`].
    pub fn link_sink(&self) -> Arc<dyn LinkSink> {
        Arc::new(DisplayerSink {
            shared: Arc::clone(&self.shared),
            consumer: Arc::clone(&self.consumer),
        })
    }

    /// Applies a message from the worker or link reader.
    ///
    /// Returns the event for fan-out, or `None` if the message belongs to
    /// another runner or an earlier epoch.
    pub fn on_message(&mut self, message: SessionMessage) -> Option<SessionEvent> {
        let epoch = self.shared.epoch.load(Ordering::Acquire);
        if message.runner != self.shared.runner || message.epoch != epoch || !self.running {
            trace!(
                "dropping stale session message (epoch {} vs {})",
                message.epoch,
                epoch
            );
            return None;
        }

        match &message.event {
            SessionEvent::Started(properties) => {
                info!(
                    "display ready: {} with {} cells",
                    properties.driver_name,
                    properties.total_text_cells()
                );
                self.phase = SessionPhase::Ready(properties.clone());
            }
            SessionEvent::StartFailed => {
                warn!("session start failed on {}", self.link.device().label());
                self.failed = true;
                self.phase = SessionPhase::Stopped;
            }
            _ => {}
        }
        Some(message.event)
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn spawn_worker(&mut self) -> Result<(), SessionError> {
        self.shared.queue.reopen();
        let shared = Arc::clone(&self.shared);
        let codec = Arc::clone(&self.codec);
        let link = Arc::clone(&self.link);

        let handle = std::thread::Builder::new()
            .name("braille-session".to_string())
            .spawn(move || run_worker(shared, codec, link))
            .map_err(|e| {
                error!("failed to spawn session worker: {}", e);
                SessionError::Spawn(e.to_string())
            })?;
        self.worker = Some(handle);
        Ok(())
    }
}

impl Drop for Displayer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Worker side ───────────────────────────────────────────────────────────────

fn run_worker(
    shared: Arc<Shared>,
    codec: Arc<Mutex<Box<dyn SessionCodec>>>,
    link: Arc<dyn DuplexLink>,
) {
    debug!("session worker started");
    // Epoch of the session the codec is currently running, if any.
    let mut running: Option<u64> = None;
    let mut deferred_read: Option<Instant> = None;

    loop {
        let command = match shared.queue.pop_until(deferred_read) {
            Popped::Item(command) => command,
            Popped::TimedOut => {
                deferred_read = None;
                WorkerCommand::ReadCommand
            }
            Popped::Closed => break,
        };

        match command {
            WorkerCommand::Start { parameters, epoch } => {
                if running.take().is_some() {
                    codec.lock().stop();
                }
                let host = Arc::new(SessionHost {
                    shared: Arc::clone(&shared),
                    link: Arc::clone(&link),
                    epoch,
                    min_read_delay: parameters.min_read_delay,
                });
                let started = codec.lock().start(&parameters, host);
                match started {
                    Some(properties) => {
                        running = Some(epoch);
                        shared.post(epoch, SessionEvent::Started(properties));
                    }
                    None => shared.post(epoch, SessionEvent::StartFailed),
                }
            }
            WorkerCommand::Stop => {
                if running.take().is_some() {
                    codec.lock().stop();
                }
                deferred_read = None;
                if shared.queue.close_unless(WorkerCommand::is_start) {
                    break;
                }
            }
            WorkerCommand::WriteDots(dots) => {
                if running.is_some() {
                    codec.lock().write_braille_dots(&dots);
                }
            }
            WorkerCommand::ReadCommand => {
                if let Some(epoch) = running {
                    loop {
                        let next = codec.lock().read_command();
                        match next {
                            Some(event) => shared.post(epoch, SessionEvent::Input(event)),
                            None => break,
                        }
                    }
                }
            }
            WorkerCommand::ReadAfter(at) => {
                if running.is_some() {
                    deferred_read = Some(deferred_read.map_or(at, |pending| pending.min(at)));
                }
            }
        }
    }

    if running.is_some() {
        codec.lock().stop();
    }
    debug!("session worker exiting");
}

/// [`CodecHost`] handed to the codec for one session.
struct SessionHost {
    shared: Arc<Shared>,
    link: Arc<dyn DuplexLink>,
    epoch: u64,
    min_read_delay: Duration,
}

impl CodecHost for SessionHost {
    fn send_packet_to_device(&self, packet: &[u8]) {
        match self.link.send_outgoing_packet(packet) {
            Ok(()) => self
                .shared
                .post(self.epoch, SessionEvent::PacketSent(packet.to_vec())),
            Err(e) => warn!("dropping outgoing packet: {}", e),
        }
    }

    fn read_after_delay(&self, delay: Duration) {
        let at = Instant::now() + delay.max(self.min_read_delay);
        self.shared
            .queue
            .replace(WorkerCommand::ReadAfter(at), WorkerCommand::is_read_after);
    }
}

/// [`LinkSink`] handed to the link: decodes on the reader thread, then asks
/// the worker to read commands.
struct DisplayerSink {
    shared: Arc<Shared>,
    consumer: Arc<dyn PacketConsumer>,
}

impl LinkSink for DisplayerSink {
    fn on_packet_arrived(&self, packet: &[u8]) {
        self.consumer.consume_packet_from_device(packet);
        let epoch = self.shared.epoch.load(Ordering::Acquire);
        self.shared
            .post(epoch, SessionEvent::PacketReceived(packet.to_vec()));
    }

    fn on_read_ready(&self) {
        self.shared
            .queue
            .replace(WorkerCommand::ReadCommand, WorkerCommand::is_read);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
