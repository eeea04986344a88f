//! Shared runtime counters.
//!
//! Plain relaxed atomics bumped from the scanner, writer and stream tasks;
//! the status endpoint and the periodic log line read them through
//! [`ScanStats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

pub type StatsHandle = Arc<ScanStats>;

#[derive(Debug, Default)]
pub struct ScanStats {
    frames_grabbed: AtomicU64,
    frames_saved: AtomicU64,
    frames_dropped: AtomicU64,
    write_errors: AtomicU64,
    clients_served: AtomicU64,
    clients_active: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_grabbed: u64,
    pub frames_saved: u64,
    pub frames_dropped: u64,
    pub write_errors: u64,
    pub clients_served: u64,
    pub clients_active: u64,
}

impl ScanStats {
    pub fn new_handle() -> StatsHandle {
        Arc::new(Self::default())
    }

    pub fn inc_grabbed(&self) {
        self.frames_grabbed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_saved(&self) {
        self.frames_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_errors(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_connected(&self) {
        self.clients_served.fetch_add(1, Ordering::Relaxed);
        self.clients_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.clients_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_grabbed: self.frames_grabbed.load(Ordering::Relaxed),
            frames_saved: self.frames_saved.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            clients_served: self.clients_served.load(Ordering::Relaxed),
            clients_active: self.clients_active.load(Ordering::Relaxed),
        }
    }
}
