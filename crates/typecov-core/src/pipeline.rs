//! End-to-end census run.
//!
//! [`Census::run`] drives the stages in order: registry lookup, clone-root
//! creation, bounded parallel sync, then per-driver extraction. Only the
//! first two stages can fail the run; sync and extraction problems are
//! recorded on the affected driver, which then reports zero counts.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::catalog::NodeTypeCatalog;
use crate::error::{CensusError, Result};
use crate::extract::UsageExtractor;
use crate::git::repo_dir;
use crate::metrics::METRICS;
use crate::model::{drivers_from_specs, Driver};
use crate::obs;
use crate::registry::DriverRegistry;
use crate::report::{self, ReportOptions};
use crate::sync::RepoSynchronizer;

/// Final driver records of one run, ready for rendering.
#[derive(Debug, Clone)]
pub struct CensusOutcome {
    pub catalog: NodeTypeCatalog,
    pub drivers: Vec<Driver>,
}

impl CensusOutcome {
    /// Drivers whose repository could not be synced.
    pub fn failed_count(&self) -> usize {
        self.drivers
            .iter()
            .filter(|d| d.sync_outcome.as_ref().map_or(true, |o| o.is_failure()))
            .count()
    }

    pub fn synced_count(&self) -> usize {
        self.drivers.iter().filter(|d| d.is_synced()).count()
    }

    pub fn render(&self, options: &ReportOptions) -> Result<String> {
        report::render(&self.catalog, &self.drivers, options)
    }
}

/// Orchestrates one census run.
pub struct Census {
    registry: Arc<dyn DriverRegistry>,
    synchronizer: RepoSynchronizer,
    extractor: Arc<dyn UsageExtractor>,
    catalog: NodeTypeCatalog,
}

impl Census {
    pub fn new(
        registry: Arc<dyn DriverRegistry>,
        synchronizer: RepoSynchronizer,
        extractor: Arc<dyn UsageExtractor>,
        catalog: NodeTypeCatalog,
    ) -> Self {
        Self {
            registry,
            synchronizer,
            extractor,
            catalog,
        }
    }

    pub fn synchronizer(&self) -> &RepoSynchronizer {
        &self.synchronizer
    }

    pub fn catalog(&self) -> &NodeTypeCatalog {
        &self.catalog
    }

    /// Run every stage and return the final driver records.
    pub async fn run(&self) -> Result<CensusOutcome> {
        let started = Instant::now();

        let specs = self.registry.list_drivers().await.map_err(|e| match e {
            CensusError::Registry(_) => e,
            other => CensusError::Registry(other.to_string()),
        })?;
        let mut drivers = drivers_from_specs(specs)?;
        if drivers.is_empty() {
            warn!("registry returned no drivers; the report will have no columns");
        }
        obs::emit_census_started(drivers.len(), self.synchronizer.concurrency());

        self.synchronizer.ensure_root().await?;

        let outcomes = self.synchronizer.sync(&drivers).await;
        for (driver, outcome) in drivers.iter_mut().zip(outcomes) {
            driver.sync_outcome = Some(outcome);
        }

        info!(node_types = self.catalog.len(), "extracting node-type usage");
        self.extract_all(&mut drivers).await;

        let outcome = CensusOutcome {
            catalog: self.catalog.clone(),
            drivers,
        };
        obs::emit_census_finished(
            outcome.drivers.len(),
            outcome.failed_count(),
            started.elapsed().as_millis() as u64,
        );
        METRICS.flush();
        Ok(outcome)
    }

    /// Extract usage for every synced driver, one at a time.
    ///
    /// Drivers that failed to sync keep empty maps.
    async fn extract_all(&self, drivers: &mut [Driver]) {
        for driver in drivers.iter_mut().filter(|d| d.is_synced()) {
            let extractor = Arc::clone(&self.extractor);
            let catalog = self.catalog.clone();
            let dir = repo_dir(self.synchronizer.root(), &driver.local_path);
            let span = obs::driver_span(&driver.language, &driver.local_path);

            let joined = tokio::task::spawn_blocking(move || {
                let _entered = span.enter();
                extractor.extract(&dir, &catalog)
            })
            .await;

            let result = joined
                .map_err(|e| CensusError::Task(format!("extraction task failed: {e}")))
                .and_then(|r| r);

            match result {
                Ok(usage) => {
                    obs::emit_driver_extracted(
                        &driver.language,
                        usage.fixtures.total(),
                        usage.code.total(),
                    );
                    driver.apply_usage(usage);
                }
                Err(e) => {
                    METRICS.inc_extraction_failures();
                    obs::emit_extraction_failed(&driver.language, &e);
                }
            }
        }
    }
}
