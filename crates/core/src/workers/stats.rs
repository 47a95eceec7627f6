use std::sync::{
    Mutex,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use serde::Serialize;

/// Per-module counters. Updated concurrently by the dispatcher, the drain
/// task and every worker of the module.
#[derive(Default)]
pub struct ModuleStats {
    queued: AtomicU64,
    filtered: AtomicU64,
    deduped: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    backpressure_stalls: AtomicU64,
    staged: AtomicUsize,
    setup_error: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleStatsSnapshot {
    pub queued: u64,
    pub filtered: u64,
    pub deduped: u64,
    pub handled: u64,
    pub failed: u64,
    pub backpressure_stalls: u64,
    pub setup_error: Option<String>,
    pub last_error: Option<String>,
}

impl ModuleStats {
    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduped(&self) {
        self.deduped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handled(&self) {
        self.handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, message: String) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(message);
    }

    pub fn record_stall(&self) {
        self.backpressure_stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_setup_error(&self, message: String) {
        *self.setup_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(message);
    }

    pub(crate) fn staged_inc(&self) {
        self.staged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn staged_dec(&self) {
        self.staged.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn staged(&self) -> usize {
        self.staged.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ModuleStatsSnapshot {
        ModuleStatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            deduped: self.deduped.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            backpressure_stalls: self.backpressure_stalls.load(Ordering::Relaxed),
            setup_error: self
                .setup_error
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
        }
    }
}
