use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::error::HandlerError;

/// Point-in-time counters for the dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrainStats {
    pub events_dispatched: u64,
    pub handler_invocations: u64,
    pub handler_failures: u64,
    pub handler_timeouts: u64,
    pub handler_panics: u64,
    pub callback_panics: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    events_dispatched: AtomicU64,
    handler_invocations: AtomicU64,
    handler_failures: AtomicU64,
    handler_timeouts: AtomicU64,
    handler_panics: AtomicU64,
    callback_panics: AtomicU64,
}

impl StatsRecorder {
    pub fn event_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_invoked(&self) {
        self.handler_invocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Timeouts and panics also count as failures.
    pub fn handler_failed(&self, err: &HandlerError) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
        if err.is_timeout() {
            self.handler_timeouts.fetch_add(1, Ordering::Relaxed);
        }
        if err.is_panic() {
            self.handler_panics.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn callback_panicked(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BrainStats {
        BrainStats {
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            handler_invocations: self.handler_invocations.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            handler_timeouts: self.handler_timeouts.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}
