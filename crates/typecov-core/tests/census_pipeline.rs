//! Integration tests for the census pipeline with stub collaborators.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use typecov_core::report::{FOOTER, HEADER};
use typecov_core::{
    Census, CensusError, DriverRegistry, DriverSpec, DriverUsage, NodeTypeCatalog, RepoOps,
    RepoSynchronizer, ReportOptions, Result, StaticRegistry, SyncOutcome, UsageCounts,
    UsageExtractor,
};

/// Clones create a checkout after a short delay; listed URLs fail.
#[derive(Default)]
struct StubOps {
    failing: HashSet<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubOps {
    fn failing(urls: &[&str]) -> Self {
        Self {
            failing: urls.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }
    }

    async fn busy(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(15)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RepoOps for StubOps {
    async fn clone_into(&self, url: &str, root: &Path, dir_name: &str) -> Result<()> {
        self.busy().await;
        if self.failing.contains(url) {
            return Err(CensusError::Git {
                operation: "clone".to_string(),
                dir: root.to_path_buf(),
                stderr: "authentication failed".to_string(),
            });
        }
        std::fs::create_dir_all(root.join(dir_name).join(".git"))?;
        Ok(())
    }

    async fn update(&self, _repo_dir: &Path, _branch: &str) -> Result<()> {
        self.busy().await;
        Ok(())
    }
}

/// Extractor returning canned usage keyed by clone directory name.
struct CannedExtractor {
    usage: Vec<(&'static str, DriverUsage)>,
    broken: HashSet<&'static str>,
}

impl UsageExtractor for CannedExtractor {
    fn extract(&self, repo_dir: &Path, catalog: &NodeTypeCatalog) -> Result<DriverUsage> {
        let name = repo_dir.file_name().unwrap().to_string_lossy().to_string();
        if self.broken.contains(name.as_str()) {
            return Err(CensusError::Extraction {
                dir: repo_dir.to_path_buf(),
                detail: "corrupt fixture".to_string(),
            });
        }
        Ok(self
            .usage
            .iter()
            .find(|(dir, _)| *dir == name)
            .map(|(_, usage)| usage.clone())
            .unwrap_or_else(|| DriverUsage::seeded(catalog)))
    }
}

struct FailingRegistry;

#[async_trait]
impl DriverRegistry for FailingRegistry {
    async fn list_drivers(&self) -> Result<Vec<DriverSpec>> {
        Err(CensusError::Http("503 Service Unavailable".to_string()))
    }
}

const URL_A: &str = "https://example.com/org/a-driver";
const URL_B: &str = "https://example.com/org/b-driver";

fn scenario_extractor() -> CannedExtractor {
    let fixtures: UsageCounts = [("Identifier", 3)].into_iter().collect();
    let code: UsageCounts = [("Identifier", 1), ("Comment", 2)].into_iter().collect();
    CannedExtractor {
        usage: vec![("a-driver", DriverUsage { fixtures, code })],
        broken: HashSet::new(),
    }
}

fn census(root: &Path, registry: Arc<dyn DriverRegistry>, ops: Arc<StubOps>, extractor: CannedExtractor) -> Census {
    Census::new(
        registry,
        RepoSynchronizer::new(root.join("drivers"), ops).with_concurrency(3),
        Arc::new(extractor),
        NodeTypeCatalog::new(["Identifier", "Comment"]).unwrap(),
    )
}

/// Test: two drivers, the second fails to sync and renders all zeros
#[tokio::test]
async fn test_scenario_report_with_failed_driver() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(StaticRegistry::new(vec![
        DriverSpec::new("A", URL_A),
        DriverSpec::new("B", URL_B),
    ]));
    let census = census(
        dir.path(),
        registry,
        Arc::new(StubOps::failing(&[URL_B])),
        scenario_extractor(),
    );

    let outcome = census.run().await.expect("census failed");

    assert_eq!(outcome.drivers[0].sync_outcome, Some(SyncOutcome::Cloned));
    assert!(outcome.drivers[1].sync_outcome.as_ref().unwrap().is_failure());
    assert_eq!(outcome.failed_count(), 1);
    assert_eq!(outcome.synced_count(), 1);

    let report = outcome.render(&ReportOptions::default()).unwrap();
    let table = "\
|                         |    A|    B|
| :---------------------- | :-- | :-- |
|               Identifier| 3/1 | 0/0 |
|                  Comment| 0/2 | 0/0 |
";
    assert_eq!(report, format!("{HEADER}{table}{FOOTER}"));
}

/// Test: many drivers, one forced failure, cap respected
#[tokio::test]
async fn test_failure_isolation_under_concurrency_cap() {
    let dir = tempfile::tempdir().unwrap();
    let specs: Vec<DriverSpec> = (0..9)
        .map(|i| DriverSpec::new(format!("lang{i}"), format!("https://example.com/org/lang{i}-driver")))
        .collect();
    let broken_url = specs[4].repository_url.clone();
    let ops = Arc::new(StubOps::failing(&[broken_url.as_str()]));
    let census = census(
        dir.path(),
        Arc::new(StaticRegistry::new(specs)),
        ops.clone(),
        scenario_extractor(),
    );

    let outcome = census.run().await.expect("a per-driver failure must not fail the run");

    assert_eq!(outcome.drivers.len(), 9);
    for (i, driver) in outcome.drivers.iter().enumerate() {
        let failed = driver.sync_outcome.as_ref().unwrap().is_failure();
        assert_eq!(failed, i == 4, "driver {i}");
    }
    assert!(ops.max_in_flight.load(Ordering::SeqCst) <= 3);
    assert!(census.synchronizer().peak_in_flight() <= 3);
}

/// Test: registry failure aborts before any driver work
#[tokio::test]
async fn test_registry_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let census = census(
        dir.path(),
        Arc::new(FailingRegistry),
        Arc::new(StubOps::default()),
        scenario_extractor(),
    );

    let err = census.run().await.unwrap_err();
    assert!(matches!(err, CensusError::Registry(_)));
    assert!(err.to_string().contains("503"));
    assert!(!dir.path().join("drivers").exists(), "no clone root before drivers are known");
}

/// Test: an unusable clone root aborts the run
#[tokio::test]
async fn test_clone_root_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("drivers"), b"occupied").unwrap();
    let census = Census::new(
        Arc::new(StaticRegistry::new(vec![DriverSpec::new("A", URL_A)])),
        RepoSynchronizer::new(dir.path().join("drivers").join("nested"), Arc::new(StubOps::default())),
        Arc::new(scenario_extractor()),
        NodeTypeCatalog::builtin(),
    );

    let err = census.run().await.unwrap_err();
    assert!(matches!(err, CensusError::CloneRoot { .. }));
}

/// Test: extraction failure degrades to zero counts for that driver only
#[tokio::test]
async fn test_extraction_failure_degrades_to_zero() {
    let dir = tempfile::tempdir().unwrap();
    let mut extractor = scenario_extractor();
    extractor.broken.insert("a-driver");
    let census = census(
        dir.path(),
        Arc::new(StaticRegistry::new(vec![
            DriverSpec::new("A", URL_A),
            DriverSpec::new("B", URL_B),
        ])),
        Arc::new(StubOps::default()),
        extractor,
    );

    let outcome = census.run().await.unwrap();
    let a = &outcome.drivers[0];
    assert_eq!(a.sync_outcome, Some(SyncOutcome::Cloned));
    assert_eq!(a.fixture_usage.total(), 0);
    assert_eq!(a.code_usage.total(), 0);

    let report = outcome.render(&ReportOptions::default()).unwrap();
    assert!(report.contains("|               Identifier| 0/0 | 0/0 |\n"));
}

/// Test: duplicate clone directories are rejected up front
#[tokio::test]
async fn test_duplicate_clone_dirs_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let census = census(
        dir.path(),
        Arc::new(StaticRegistry::new(vec![
            DriverSpec::new("A", URL_A),
            DriverSpec::new("A2", "https://mirror.example/a-driver.git"),
        ])),
        Arc::new(StubOps::default()),
        scenario_extractor(),
    );

    let err = census.run().await.unwrap_err();
    assert!(matches!(err, CensusError::DuplicateCloneDir { .. }));
}

/// Test: re-running the pipeline reproduces the report byte for byte
#[tokio::test]
async fn test_rerun_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let registry: Arc<dyn DriverRegistry> = Arc::new(StaticRegistry::new(vec![
        DriverSpec::new("A", URL_A),
        DriverSpec::new("B", URL_B),
    ]));
    let census = census(
        dir.path(),
        registry,
        Arc::new(StubOps::failing(&[URL_B])),
        scenario_extractor(),
    );

    let first = census.run().await.unwrap();
    let second = census.run().await.unwrap();

    assert_eq!(second.drivers[0].sync_outcome, Some(SyncOutcome::Updated));
    let options = ReportOptions::default();
    assert_eq!(
        first.render(&options).unwrap().into_bytes(),
        second.render(&options).unwrap().into_bytes()
    );
}
