//! Census data model: drivers, usage counters and sync outcomes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::NodeTypeCatalog;
use crate::error::{CensusError, Result};

/// A driver as listed by the registry, before any local state exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSpec {
    /// Human-readable language name, used as the report column header.
    pub language: String,
    /// Canonical repository location passed to `git clone`.
    pub repository_url: String,
}

impl DriverSpec {
    pub fn new(language: impl Into<String>, repository_url: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            repository_url: repository_url.into(),
        }
    }
}

/// Occurrence counts keyed by node-type name.
///
/// Lookups of absent names yield zero; an absent entry and a zero entry
/// are indistinguishable to readers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageCounts(BTreeMap<String, u64>);

impl UsageCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts with an explicit zero for every catalog entry.
    pub fn seeded(catalog: &NodeTypeCatalog) -> Self {
        Self(catalog.iter().map(|name| (name.to_string(), 0)).collect())
    }

    /// Record a single occurrence of `name`.
    pub fn record(&mut self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&mut self, name: &str, n: u64) {
        match self.0.get_mut(name) {
            Some(count) => *count += n,
            None => {
                self.0.insert(name.to_string(), n);
            }
        }
    }

    /// Count for `name`, defaulting to zero.
    pub fn get(&self, name: &str) -> u64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for UsageCounts {
    fn from_iter<T: IntoIterator<Item = (S, u64)>>(iter: T) -> Self {
        let mut counts = UsageCounts::new();
        for (name, n) in iter {
            let name: String = name.into();
            counts.add(&name, n);
        }
        counts
    }
}

/// Both usage maps produced for one driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverUsage {
    /// Occurrences in the driver's test fixtures.
    pub fixtures: UsageCounts,
    /// Use-sites in the driver's mapping code.
    pub code: UsageCounts,
}

impl DriverUsage {
    pub fn seeded(catalog: &NodeTypeCatalog) -> Self {
        Self {
            fixtures: UsageCounts::seeded(catalog),
            code: UsageCounts::seeded(catalog),
        }
    }
}

/// Result of synchronizing one driver's local clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The local directory did not exist and was cloned.
    Cloned,
    /// The local directory existed and its default branch was pulled.
    Updated,
    /// Clone or pull failed; the driver reports zero counts.
    Failed { reason: String },
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Cloned => f.write_str("cloned"),
            SyncOutcome::Updated => f.write_str("updated"),
            SyncOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// One language driver under audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Driver {
    pub language: String,
    pub repository_url: String,
    /// Clone directory name under the clone root; also the stable lookup key.
    pub local_path: String,
    pub fixture_usage: UsageCounts,
    pub code_usage: UsageCounts,
    /// `None` until the synchronizer has reported for this driver.
    pub sync_outcome: Option<SyncOutcome>,
}

impl Driver {
    pub fn new(language: impl Into<String>, repository_url: impl Into<String>) -> Result<Self> {
        let repository_url = repository_url.into();
        let local_path = local_dir_name(&repository_url)?;
        Ok(Self {
            language: language.into(),
            repository_url,
            local_path,
            fixture_usage: UsageCounts::new(),
            code_usage: UsageCounts::new(),
            sync_outcome: None,
        })
    }

    pub fn from_spec(spec: DriverSpec) -> Result<Self> {
        Self::new(spec.language, spec.repository_url)
    }

    /// Whether extraction may run: the driver synced and did not fail.
    pub fn is_synced(&self) -> bool {
        matches!(
            self.sync_outcome,
            Some(SyncOutcome::Cloned | SyncOutcome::Updated)
        )
    }

    pub fn apply_usage(&mut self, usage: DriverUsage) {
        self.fixture_usage = usage.fixtures;
        self.code_usage = usage.code;
    }
}

/// Materialise registry entries in order, rejecting shared clone directories.
pub fn drivers_from_specs(specs: Vec<DriverSpec>) -> Result<Vec<Driver>> {
    let mut by_dir: BTreeMap<String, String> = BTreeMap::new();
    let mut drivers = Vec::with_capacity(specs.len());
    for spec in specs {
        let driver = Driver::from_spec(spec)?;
        if let Some(first) = by_dir.get(&driver.local_path) {
            return Err(CensusError::DuplicateCloneDir {
                dir: driver.local_path.clone(),
                first: first.clone(),
                second: driver.language.clone(),
            });
        }
        by_dir.insert(driver.local_path.clone(), driver.language.clone());
        drivers.push(driver);
    }
    Ok(drivers)
}

/// Derive the clone directory name from the URL's final path segment.
///
/// Trailing slashes and a `.git` suffix are dropped, so
/// `https://github.com/bblfsh/go-driver.git` maps to `go-driver`.
/// Scp-style `git@host:org/repo` URLs are handled the same way.
pub fn local_dir_name(url: &str) -> Result<String> {
    let invalid = |reason: &str| CensusError::InvalidRepositoryUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = url.trim().trim_end_matches('/');
    let segment = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default();
    let name = segment.strip_suffix(".git").unwrap_or(segment);

    if name.is_empty() || trimmed.len() == segment.len() {
        return Err(invalid("no path segment"));
    }
    if name == "." || name == ".." {
        return Err(invalid("path segment is not a directory name"));
    }
    Ok(name.to_string())
}
