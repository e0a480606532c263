//! Repository synchronizer.
//!
//! [`RepoSynchronizer`] makes sure every driver has an up-to-date local
//! clone under a shared root. Operations run on a [`TaskPool`] so at most
//! `concurrency` clones or pulls execute at once; a failing driver is
//! recorded as [`SyncOutcome::Failed`] and never stops the others.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn, Instrument};

use crate::error::{CensusError, Result};
use crate::git::{is_checkout, repo_dir, RepoOps};
use crate::metrics::METRICS;
use crate::model::{Driver, SyncOutcome};
use crate::obs;
use crate::pool::TaskPool;

/// Simultaneous clone/pull operations when not configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Branch pulled when a clone already exists.
pub const DEFAULT_BRANCH: &str = "master";

/// Everything one sync task needs, detached from the driver record.
struct SyncJob {
    language: String,
    url: String,
    dir_name: String,
}

/// Clones or updates driver repositories under a concurrency cap.
pub struct RepoSynchronizer {
    root: PathBuf,
    branch: String,
    timeout: Option<Duration>,
    ops: Arc<dyn RepoOps>,
    pool: TaskPool,
}

impl RepoSynchronizer {
    pub fn new(root: impl Into<PathBuf>, ops: Arc<dyn RepoOps>) -> Self {
        Self {
            root: root.into(),
            branch: DEFAULT_BRANCH.to_string(),
            timeout: None,
            ops,
            pool: TaskPool::new(DEFAULT_CONCURRENCY),
        }
    }

    /// Cap on simultaneous repository operations (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.pool = TaskPool::new(concurrency).with_deadline(self.timeout);
        self
    }

    /// Fail a driver whose clone or pull runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self.pool = TaskPool::new(self.pool.limit()).with_deadline(timeout);
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn concurrency(&self) -> usize {
        self.pool.limit()
    }

    /// Highest number of simultaneous repository operations observed.
    pub fn peak_in_flight(&self) -> usize {
        self.pool.peak_in_flight()
    }

    /// Create the clone root. Safe to call when it already exists.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| CensusError::CloneRoot {
                path: self.root.clone(),
                source,
            })
    }

    /// Sync every driver; one outcome per driver, in input order.
    ///
    /// Returns only after every operation has finished or failed.
    pub async fn sync(&self, drivers: &[Driver]) -> Vec<SyncOutcome> {
        info!(
            drivers = drivers.len(),
            root = %self.root.display(),
            concurrency = self.pool.limit(),
            "syncing driver repositories"
        );

        let jobs: Vec<SyncJob> = drivers
            .iter()
            .map(|d| SyncJob {
                language: d.language.clone(),
                url: d.repository_url.clone(),
                dir_name: d.local_path.clone(),
            })
            .collect();

        let ops = Arc::clone(&self.ops);
        let root = self.root.clone();
        let branch = self.branch.clone();

        let results = self
            .pool
            .run(jobs, move |job| {
                let ops = Arc::clone(&ops);
                let root = root.clone();
                let branch = branch.clone();
                let span = obs::driver_span(&job.language, &job.dir_name);
                async move {
                    let started = Instant::now();
                    let outcome = {
                        let _gauge = SyncGauge::start();
                        match sync_one(ops.as_ref(), &root, &branch, &job).await {
                            Ok(outcome) => outcome,
                            Err(e) => SyncOutcome::Failed {
                                reason: e.to_string(),
                            },
                        }
                    };
                    record(&job.language, &outcome, started.elapsed());
                    Ok(outcome)
                }
                .instrument(span)
            })
            .await;

        // Only timeouts and panics surface as errors here; sync_one
        // failures were already converted above.
        drivers
            .iter()
            .zip(results)
            .map(|(driver, result)| {
                result.unwrap_or_else(|e| {
                    let outcome = SyncOutcome::Failed {
                        reason: e.to_string(),
                    };
                    record(&driver.language, &outcome, Duration::ZERO);
                    outcome
                })
            })
            .collect()
    }
}

/// Balances the global in-flight gauge, including on timeout drop.
struct SyncGauge;

impl SyncGauge {
    fn start() -> Self {
        METRICS.sync_started();
        SyncGauge
    }
}

impl Drop for SyncGauge {
    fn drop(&mut self) {
        METRICS.sync_finished();
    }
}

async fn sync_one(
    ops: &dyn RepoOps,
    root: &Path,
    branch: &str,
    job: &SyncJob,
) -> Result<SyncOutcome> {
    let target = repo_dir(root, &job.dir_name);
    let exists = match tokio::fs::metadata(&target).await {
        Ok(_) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(CensusError::Io(e)),
    };

    if !exists {
        debug!(dir = %target.display(), url = %job.url, "no clone yet, cloning");
        return clone_fresh(ops, root, job).await;
    }
    if !is_checkout(&target).await {
        warn!(dir = %target.display(), "directory is not a git checkout, cloning again");
        tokio::fs::remove_dir_all(&target).await?;
        return clone_fresh(ops, root, job).await;
    }

    debug!(dir = %target.display(), branch = %branch, "clone exists, pulling");
    ops.update(&target, branch).await?;
    log_revision(ops, &target).await;
    Ok(SyncOutcome::Updated)
}

/// Clone under a staging name and move it into place only on success, so
/// an interrupted clone never looks like a finished one.
async fn clone_fresh(ops: &dyn RepoOps, root: &Path, job: &SyncJob) -> Result<SyncOutcome> {
    let staging_name = staging_dir_name(&job.dir_name);
    let staging = repo_dir(root, &staging_name);
    if tokio::fs::metadata(&staging).await.is_ok() {
        debug!(dir = %staging.display(), "removing interrupted clone");
        tokio::fs::remove_dir_all(&staging).await?;
    }

    ops.clone_into(&job.url, root, &staging_name).await?;
    let target = repo_dir(root, &job.dir_name);
    tokio::fs::rename(&staging, &target).await?;
    log_revision(ops, &target).await;
    Ok(SyncOutcome::Cloned)
}

/// Staging directory for an in-progress clone of `dir_name`.
pub fn staging_dir_name(dir_name: &str) -> String {
    format!(".{dir_name}.partial")
}

async fn log_revision(ops: &dyn RepoOps, target: &Path) {
    match ops.head_revision(target).await {
        Ok(Some(rev)) => debug!(revision = %rev, "checked out"),
        Ok(None) => {}
        Err(e) => debug!(error = %e, "could not read revision"),
    }
}

fn record(language: &str, outcome: &SyncOutcome, elapsed: Duration) {
    match outcome {
        SyncOutcome::Cloned => METRICS.inc_cloned(),
        SyncOutcome::Updated => METRICS.inc_updated(),
        SyncOutcome::Failed { .. } => METRICS.inc_sync_failures(),
    }
    obs::emit_driver_synced(language, outcome, elapsed.as_millis() as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::sleep;

    /// Stub backend: clones create the directory, URLs in `failing` error.
    #[derive(Default)]
    struct StubOps {
        failing: HashSet<String>,
        hang: HashSet<String>,
        delay_ms: u64,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl StubOps {
        async fn enter(&self, call: String) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(call);
            sleep(Duration::from_millis(self.delay_ms)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RepoOps for StubOps {
        async fn clone_into(&self, url: &str, root: &Path, dir_name: &str) -> Result<()> {
            if self.hang.contains(url) {
                sleep(Duration::from_secs(3600)).await;
            }
            self.enter(format!("clone {dir_name}")).await;
            if self.failing.contains(url) {
                return Err(CensusError::Git {
                    operation: "clone".to_string(),
                    dir: root.to_path_buf(),
                    stderr: "could not resolve host".to_string(),
                });
            }
            std::fs::create_dir_all(root.join(dir_name).join(".git"))?;
            Ok(())
        }

        async fn update(&self, repo_dir: &Path, _branch: &str) -> Result<()> {
            self.enter(format!("pull {}", repo_dir.display())).await;
            Ok(())
        }
    }

    fn drivers(n: usize) -> Vec<Driver> {
        (0..n)
            .map(|i| Driver::new(format!("lang{i}"), format!("https://example.com/org/lang{i}-driver")).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_concurrency_cap_holds_with_more_drivers_than_permits() {
        let root = tempfile::tempdir().unwrap();
        let ops = Arc::new(StubOps {
            delay_ms: 20,
            ..Default::default()
        });
        let sync = RepoSynchronizer::new(root.path(), ops.clone()).with_concurrency(3);

        let outcomes = sync.sync(&drivers(8)).await;

        assert_eq!(outcomes.len(), 8);
        assert!(outcomes.iter().all(|o| *o == SyncOutcome::Cloned));
        let max = ops.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "max_in_flight={max}");
        assert!(sync.peak_in_flight() <= 3);
        assert!(sync.peak_in_flight() > 1, "expected concurrent syncs");
    }

    #[tokio::test]
    async fn test_one_failure_does_not_affect_other_drivers() {
        let root = tempfile::tempdir().unwrap();
        let all = drivers(4);
        let ops = Arc::new(StubOps {
            failing: HashSet::from([all[1].repository_url.clone()]),
            ..Default::default()
        });
        let sync = RepoSynchronizer::new(root.path(), ops);

        let outcomes = sync.sync(&all).await;

        assert!(matches!(&outcomes[1], SyncOutcome::Failed { reason } if reason.contains("could not resolve host")));
        for i in [0, 2, 3] {
            assert_eq!(outcomes[i], SyncOutcome::Cloned, "driver {i}");
        }
    }

    #[tokio::test]
    async fn test_existing_clone_is_updated() {
        let root = tempfile::tempdir().unwrap();
        let all = drivers(2);
        std::fs::create_dir_all(root.path().join(&all[0].local_path).join(".git")).unwrap();
        let ops = Arc::new(StubOps::default());
        let sync = RepoSynchronizer::new(root.path(), ops.clone());

        let outcomes = sync.sync(&all).await;

        assert_eq!(outcomes, vec![SyncOutcome::Updated, SyncOutcome::Cloned]);
        let calls = ops.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c.starts_with("pull")));
        assert!(calls.iter().any(|c| c == "clone .lang1-driver.partial"));
        assert!(root.path().join("lang1-driver/.git").is_dir());
    }

    #[tokio::test]
    async fn test_leftover_directory_without_checkout_is_recloned() {
        let root = tempfile::tempdir().unwrap();
        let all = drivers(1);
        let leftover = root.path().join(&all[0].local_path);
        std::fs::create_dir_all(&leftover).unwrap();
        std::fs::write(leftover.join("junk"), b"x").unwrap();
        let ops = Arc::new(StubOps::default());
        let sync = RepoSynchronizer::new(root.path(), ops.clone());

        let outcomes = sync.sync(&all).await;

        assert_eq!(outcomes, vec![SyncOutcome::Cloned]);
        assert!(!ops.calls.lock().unwrap().iter().any(|c| c.starts_with("pull")));
        assert!(leftover.join(".git").is_dir());
        assert!(!leftover.join("junk").exists());
    }

    #[tokio::test]
    async fn test_timed_out_clone_is_retried_on_next_sync() {
        let root = tempfile::tempdir().unwrap();
        let all = drivers(1);
        let staging = root.path().join(staging_dir_name(&all[0].local_path));
        let hung = Arc::new(StubOps {
            hang: HashSet::from([all[0].repository_url.clone()]),
            ..Default::default()
        });
        let first = RepoSynchronizer::new(root.path(), hung)
            .with_timeout(Some(Duration::from_millis(100)))
            .sync(&all)
            .await;
        assert!(first[0].is_failure());
        assert!(!root.path().join(&all[0].local_path).exists());

        // What a killed git process leaves behind.
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("junk"), b"x").unwrap();

        let second = RepoSynchronizer::new(root.path(), Arc::new(StubOps::default()))
            .sync(&all)
            .await;
        assert_eq!(second, vec![SyncOutcome::Cloned]);
        assert!(!staging.exists());
        let target = root.path().join(&all[0].local_path);
        assert!(target.join(".git").is_dir());
        assert!(!target.join("junk").exists());
    }

    #[tokio::test]
    async fn test_timeout_fails_only_the_hung_driver() {
        let root = tempfile::tempdir().unwrap();
        let all = drivers(3);
        let ops = Arc::new(StubOps {
            hang: HashSet::from([all[0].repository_url.clone()]),
            ..Default::default()
        });
        let sync = RepoSynchronizer::new(root.path(), ops)
            .with_timeout(Some(Duration::from_millis(200)))
            .with_concurrency(1);

        let outcomes = sync.sync(&all).await;

        assert!(matches!(&outcomes[0], SyncOutcome::Failed { reason } if reason.contains("timed out")));
        assert_eq!(outcomes[1], SyncOutcome::Cloned);
        assert_eq!(outcomes[2], SyncOutcome::Cloned);
    }

    #[tokio::test]
    async fn test_ensure_root_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("drivers");
        let sync = RepoSynchronizer::new(&root, Arc::new(StubOps::default()));
        sync.ensure_root().await.unwrap();
        sync.ensure_root().await.unwrap();
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_ensure_root_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let sync = RepoSynchronizer::new(file.join("drivers"), Arc::new(StubOps::default()));

        let err = sync.ensure_root().await.unwrap_err();
        assert!(matches!(err, CensusError::CloneRoot { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_builder_keeps_timeout_when_concurrency_changes() {
        let sync = RepoSynchronizer::new("drivers", Arc::new(StubOps::default()))
            .with_timeout(Some(Duration::from_secs(5)))
            .with_concurrency(7)
            .with_branch("main");
        assert_eq!(sync.concurrency(), 7);
        assert_eq!(sync.timeout, Some(Duration::from_secs(5)));
        assert_eq!(sync.branch, "main");
    }
}
