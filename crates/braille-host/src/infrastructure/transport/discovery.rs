//! Discovery keep-alive window.
//!
//! Discovery is expensive on battery and radio bandwidth, so it only runs
//! for a bounded window after the last trigger (screen on, settings opened,
//! user request).  Every [`touch`](DiscoveryWindow::touch) restarts the
//! window with a fresh token; the connector stops scanning when a
//! [`TransportEvent::DiscoveryExpired`] carrying the current token arrives.
//! Expiry events with an older token are stale and ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::application::foreground::{Foreground, TimerHandle};
use crate::application::transport::TransportEvent;

fn next_token() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

pub struct DiscoveryWindow {
    foreground: Foreground,
    keep_alive: Duration,
    token: u64,
    expiry: Option<TimerHandle>,
    retry: Option<(u64, TimerHandle)>,
}

impl DiscoveryWindow {
    pub fn new(foreground: Foreground, keep_alive: Duration) -> Self {
        Self {
            foreground,
            keep_alive,
            token: 0,
            expiry: None,
            retry: None,
        }
    }

    /// Opens the window, or restarts it if already open.
    pub fn touch(&mut self) {
        self.token = next_token();
        let token = self.token;
        self.expiry = Some(
            self.foreground
                .post_after(self.keep_alive, TransportEvent::DiscoveryExpired { token }),
        );
        debug!("discovery window open for {:?} (token {})", self.keep_alive, token);
    }

    /// Closes the window and cancels any pending retry.
    pub fn close(&mut self) {
        self.expiry = None;
        self.retry = None;
    }

    pub fn is_open(&self) -> bool {
        self.expiry.is_some()
    }

    /// Handles an expiry event.  Returns `true` if it closed the window.
    pub fn on_expired(&mut self, token: u64) -> bool {
        if self.expiry.is_none() || token != self.token {
            return false;
        }
        self.close();
        true
    }

    /// Schedules a discovery retry while the window is open.
    pub fn schedule_retry(&mut self, delay: Duration) {
        if !self.is_open() {
            return;
        }
        let token = next_token();
        let timer = self
            .foreground
            .post_after(delay, TransportEvent::DiscoveryRetry { token });
        self.retry = Some((token, timer));
    }

    /// Handles a retry event.  Returns `true` if the caller should retry.
    pub fn on_retry(&mut self, token: u64) -> bool {
        match &self.retry {
            Some((pending, _)) if *pending == token => {
                self.retry = None;
                self.is_open()
            }
            _ => false,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
