//! Structured observability hooks for census lifecycle events.
//!
//! This module provides:
//! - Driver-scoped tracing spans via [`driver_span`]
//! - Emission functions for key lifecycle events: census start, per-driver
//!   sync and extraction, census finish
//!
//! Events are emitted at `info!` level (filterable via `RUST_LOG`).

use tracing::{info, warn};

use crate::model::SyncOutcome;

/// Span tagging all work done on behalf of one driver.
///
/// Attach to futures with `tracing::Instrument::instrument`; the span is
/// not entered across await points.
pub fn driver_span(language: &str, local_path: &str) -> tracing::Span {
    tracing::info_span!("typecov.driver", language = %language, dir = %local_path)
}

/// Emit event: census started.
pub fn emit_census_started(driver_count: usize, concurrency: usize) {
    info!(
        event = "census.started",
        drivers = driver_count,
        concurrency = concurrency,
    );
}

/// Emit event: one driver finished syncing.
///
/// Failures are emitted at `warn!` level with the failure reason.
pub fn emit_driver_synced(language: &str, outcome: &SyncOutcome, duration_ms: u64) {
    match outcome {
        SyncOutcome::Failed { reason } => warn!(
            event = "driver.synced",
            language = %language,
            outcome = "failed",
            reason = %reason,
            duration_ms = duration_ms,
        ),
        other => info!(
            event = "driver.synced",
            language = %language,
            outcome = %other,
            duration_ms = duration_ms,
        ),
    }
}

/// Emit event: usage counts extracted for one driver.
pub fn emit_driver_extracted(language: &str, fixture_total: u64, code_total: u64) {
    info!(
        event = "driver.extracted",
        language = %language,
        fixture_total = fixture_total,
        code_total = code_total,
    );
}

/// Emit event: extraction failed; the driver keeps zero counts.
pub fn emit_extraction_failed(language: &str, error: &dyn std::fmt::Display) {
    warn!(event = "driver.extraction_failed", language = %language, error = %error);
}

/// Emit event: census finished.
pub fn emit_census_finished(driver_count: usize, failed: usize, duration_ms: u64) {
    info!(
        event = "census.finished",
        drivers = driver_count,
        failed = failed,
        duration_ms = duration_ms,
    );
}
