//! Global atomic counters for census observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] at the end of a run to emit them as a single
//! `tracing::info!` event, or [`Metrics::render_text`] to expose them over
//! the diagnostics endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    repos_cloned: AtomicU64,
    repos_updated: AtomicU64,
    sync_failures: AtomicU64,
    extraction_failures: AtomicU64,
    syncs_in_flight: AtomicU64,
    peak_syncs_in_flight: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            repos_cloned: AtomicU64::new(0),
            repos_updated: AtomicU64::new(0),
            sync_failures: AtomicU64::new(0),
            extraction_failures: AtomicU64::new(0),
            syncs_in_flight: AtomicU64::new(0),
            peak_syncs_in_flight: AtomicU64::new(0),
        }
    }

    pub fn inc_cloned(&self) {
        self.repos_cloned.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "repos_cloned", "counter incremented");
    }

    pub fn inc_updated(&self) {
        self.repos_updated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "repos_updated", "counter incremented");
    }

    pub fn inc_sync_failures(&self) {
        self.sync_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sync_failures", "counter incremented");
    }

    pub fn inc_extraction_failures(&self) {
        self.extraction_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "extraction_failures", "counter incremented");
    }

    /// Mark one sync operation as started; updates the high-water mark.
    pub fn sync_started(&self) {
        let now = self.syncs_in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_syncs_in_flight.fetch_max(now, Ordering::Relaxed);
    }

    pub fn sync_finished(&self) {
        self.syncs_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            repos_cloned = self.repos_cloned(),
            repos_updated = self.repos_updated(),
            sync_failures = self.sync_failures(),
            extraction_failures = self.extraction_failures(),
            peak_syncs_in_flight = self.peak_syncs_in_flight(),
        );
    }

    /// Render counters as `name value` lines.
    pub fn render_text(&self) -> String {
        format!(
            "repos_cloned {}\nrepos_updated {}\nsync_failures {}\nextraction_failures {}\nsyncs_in_flight {}\npeak_syncs_in_flight {}\n",
            self.repos_cloned(),
            self.repos_updated(),
            self.sync_failures(),
            self.extraction_failures(),
            self.syncs_in_flight(),
            self.peak_syncs_in_flight(),
        )
    }

    pub fn repos_cloned(&self) -> u64 {
        self.repos_cloned.load(Ordering::Relaxed)
    }

    pub fn repos_updated(&self) -> u64 {
        self.repos_updated.load(Ordering::Relaxed)
    }

    pub fn sync_failures(&self) -> u64 {
        self.sync_failures.load(Ordering::Relaxed)
    }

    pub fn extraction_failures(&self) -> u64 {
        self.extraction_failures.load(Ordering::Relaxed)
    }

    pub fn syncs_in_flight(&self) -> u64 {
        self.syncs_in_flight.load(Ordering::Relaxed)
    }

    pub fn peak_syncs_in_flight(&self) -> u64 {
        self.peak_syncs_in_flight.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.repos_cloned.store(0, Ordering::Relaxed);
        self.repos_updated.store(0, Ordering::Relaxed);
        self.sync_failures.store(0, Ordering::Relaxed);
        self.extraction_failures.store(0, Ordering::Relaxed);
        self.syncs_in_flight.store(0, Ordering::Relaxed);
        self.peak_syncs_in_flight.store(0, Ordering::Relaxed);
    }
}
