//! The foreground execution context.
//!
//! # What is the foreground? (for beginners)
//!
//! Braille display handling has three kinds of actors: the platform (radio
//! callbacks, USB hot-plug), the display session worker, and the host
//! application (lifecycle changes, user commands).  They all run on
//! different threads.  Instead of protecting the connection state with
//! locks, every actor turns what it observed into a [`ForegroundEvent`] and
//! posts it to one FIFO queue.  A single tokio task drains that queue and is
//! the only code that ever mutates connection or coordinator state.
//!
//! [`Foreground`] is the cheap, cloneable posting handle.  It never blocks,
//! so it is safe to call from platform callback threads.
//!
//! # Delayed posts
//!
//! [`Foreground::post_after`] schedules an event for later, for the
//! discovery keep-alive window and the per-attempt connect timeout.  The
//! returned [`TimerHandle`] cancels the post when dropped, so a timer owned
//! by a piece of state can never fire after that state is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::application::aspects::{AspectKind, ListenerId, Subscription};
use crate::application::connectioneer::{LifecycleEvent, UserCommand};
use crate::application::displayer::SessionMessage;
use crate::application::transport::TransportEvent;

/// Everything the foreground loop can be asked to process.
#[derive(Debug)]
pub enum ForegroundEvent {
    /// Host lifecycle change (service start/stop, screen, settings).
    Lifecycle(LifecycleEvent),
    /// Explicit user request.
    Command(UserCommand),
    /// Platform or connect-attempt notification for the active connector.
    Transport(TransportEvent),
    /// Message from a session worker or link reader thread.
    Session(SessionMessage),
    /// Attach a listener to one aspect.
    Subscribe(Subscription),
    /// Detach a listener.
    Unsubscribe(AspectKind, ListenerId),
    /// Stop the loop after tearing everything down.
    Shutdown,
}

impl From<LifecycleEvent> for ForegroundEvent {
    fn from(event: LifecycleEvent) -> Self {
        ForegroundEvent::Lifecycle(event)
    }
}

impl From<UserCommand> for ForegroundEvent {
    fn from(command: UserCommand) -> Self {
        ForegroundEvent::Command(command)
    }
}

impl From<TransportEvent> for ForegroundEvent {
    fn from(event: TransportEvent) -> Self {
        ForegroundEvent::Transport(event)
    }
}

impl From<SessionMessage> for ForegroundEvent {
    fn from(message: SessionMessage) -> Self {
        ForegroundEvent::Session(message)
    }
}

/// Posting handle for the foreground queue.
#[derive(Debug, Clone)]
pub struct Foreground {
    tx: mpsc::UnboundedSender<ForegroundEvent>,
}

impl Foreground {
    /// Creates the foreground queue.
    ///
    /// The receiver goes to whoever runs the loop (see
    /// [`crate::application::service::run_foreground`]).
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ForegroundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Posts `event` to the back of the queue.
    ///
    /// Returns `false` if the loop has already exited; the event is dropped.
    pub fn post(&self, event: impl Into<ForegroundEvent>) -> bool {
        let event = event.into();
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                trace!("foreground gone, dropping {:?}", event);
                false
            }
        }
    }

    /// Posts `event` after `delay`, unless the returned handle is cancelled
    /// or dropped first.
    ///
    /// Uses the current tokio runtime's timer when called from inside one
    /// (so paused test time applies), else a plain sleeping thread.
    pub fn post_after(&self, delay: Duration, event: impl Into<ForegroundEvent>) -> TimerHandle {
        let event = event.into();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let foreground = self.clone();

        let task = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                if !flag.load(Ordering::Acquire) {
                    foreground.post(event);
                }
            })),
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("braille-timer".to_string())
                    .spawn(move || {
                        std::thread::sleep(delay);
                        if !flag.load(Ordering::Acquire) {
                            foreground.post(event);
                        }
                    });
                if let Err(e) = spawned {
                    debug!("could not spawn timer thread: {}", e);
                }
                None
            }
        };

        TimerHandle { cancelled, task }
    }

    /// Returns `true` once the loop's receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Cancels a delayed post when dropped.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TimerHandle {
    /// Cancels the pending post.  Idempotent.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::TransportEvent;

    fn expired(token: u64) -> ForegroundEvent {
        ForegroundEvent::Transport(TransportEvent::DiscoveryExpired { token })
    }

    #[tokio::test]
    async fn test_post_delivers_in_fifo_order() {
        // Arrange
        let (fg, mut rx) = Foreground::channel();

        // Act
        fg.post(expired(1));
        fg.post(expired(2));

        // Assert
        for expected in [1, 2] {
            match rx.recv().await {
                Some(ForegroundEvent::Transport(TransportEvent::DiscoveryExpired { token })) => {
                    assert_eq!(token, expected)
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_post_returns_false_after_receiver_dropped() {
        let (fg, rx) = Foreground::channel();
        drop(rx);
        assert!(!fg.post(ForegroundEvent::Shutdown));
        assert!(fg.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_after_fires_once_delay_elapses() {
        let (fg, mut rx) = Foreground::channel();
        let _timer = fg.post_after(Duration::from_secs(30), expired(7));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err(), "must not fire early");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(
            rx.try_recv(),
            Ok(ForegroundEvent::Transport(TransportEvent::DiscoveryExpired { token: 7 }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_timer_never_fires() {
        let (fg, mut rx) = Foreground::channel();
        let timer = fg.post_after(Duration::from_secs(5), expired(1));
        drop(timer);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_post_after_without_runtime_uses_thread_fallback() {
        let (fg, mut rx) = Foreground::channel();
        let _timer = fg.post_after(Duration::from_millis(10), expired(3));

        std::thread::sleep(Duration::from_millis(200));
        assert!(matches!(
            rx.try_recv(),
            Ok(ForegroundEvent::Transport(TransportEvent::DiscoveryExpired { token: 3 }))
        ));
    }
}
