//! Kernel self-health: uptime and served-snapshot counters. This is the
//! one endpoint that answers even when every fleet source is down.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub hosts_configured: usize,
    pub services_configured: usize,
    pub snapshots_served: u64,
    pub last_snapshot_at: Option<String>,
    pub version: &'static str,
}

#[derive(Clone)]
pub struct HealthTracker {
    start: Instant,
    snapshots: Arc<AtomicU64>,
    last_snapshot: Arc<Mutex<Option<String>>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            snapshots: Arc::new(AtomicU64::new(0)),
            last_snapshot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn mark_snapshot(&self, at: String) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
        *self.last_snapshot.lock() = Some(at);
    }

    pub fn report(&self, hosts: usize, services: usize) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start.elapsed().as_secs(),
            hosts_configured: hosts,
            services_configured: services,
            snapshots_served: self.snapshots.load(Ordering::Relaxed),
            last_snapshot_at: self.last_snapshot.lock().clone(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_snapshots() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.report(2, 1).snapshots_served, 0);
        tracker.mark_snapshot("2026-08-07T10:00:00Z".into());
        let report = tracker.report(2, 1);
        assert_eq!(report.snapshots_served, 1);
        assert_eq!(report.last_snapshot_at.as_deref(), Some("2026-08-07T10:00:00Z"));
        assert_eq!(report.hosts_configured, 2);
    }
}
