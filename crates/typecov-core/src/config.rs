//! Census configuration.
//!
//! Defaults match the classic audit run: clones under `./drivers/`, three
//! simultaneous repository operations, no deadline, `master` pulled, and
//! drivers discovered from the `bblfsh` GitHub organisation. Environment
//! variables override the defaults; the CLI overrides both.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::NodeTypeCatalog;
use crate::error::{CensusError, Result};
use crate::extract::SourceScanner;
use crate::git::GitCli;
use crate::pipeline::Census;
use crate::registry::{
    DriverRegistry, GithubOrgRegistry, ManifestRegistry, DEFAULT_GITHUB_ORG,
};
use crate::sync::{RepoSynchronizer, DEFAULT_BRANCH, DEFAULT_CONCURRENCY};

pub const ENV_CLONE_ROOT: &str = "TYPECOV_CLONE_ROOT";
pub const ENV_CONCURRENCY: &str = "TYPECOV_CONCURRENCY";
pub const ENV_SYNC_TIMEOUT_SECS: &str = "TYPECOV_SYNC_TIMEOUT_SECS";
pub const ENV_BRANCH: &str = "TYPECOV_BRANCH";
pub const ENV_MANIFEST: &str = "TYPECOV_MANIFEST";
pub const ENV_GITHUB_ORG: &str = "TYPECOV_GITHUB_ORG";
pub const ENV_GITHUB_API: &str = "TYPECOV_GITHUB_API";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_CATALOG: &str = "TYPECOV_CATALOG";

/// Default clone root, relative to the working directory.
pub const DEFAULT_CLONE_ROOT: &str = "./drivers/";

/// Where the driver list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrySource {
    Github {
        org: String,
        api_base: Option<String>,
        token: Option<String>,
    },
    Manifest(PathBuf),
}

impl Default for RegistrySource {
    fn default() -> Self {
        RegistrySource::Github {
            org: DEFAULT_GITHUB_ORG.to_string(),
            api_base: None,
            token: None,
        }
    }
}

/// Resolved settings for one census run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CensusConfig {
    pub clone_root: PathBuf,
    pub concurrency: usize,
    /// Per-driver clone/pull deadline; `None` waits indefinitely.
    pub sync_timeout: Option<Duration>,
    pub branch: String,
    pub registry: RegistrySource,
    /// Catalog file; the built-in UAST catalog when `None`.
    pub catalog_path: Option<PathBuf>,
}

impl Default for CensusConfig {
    fn default() -> Self {
        Self {
            clone_root: PathBuf::from(DEFAULT_CLONE_ROOT),
            concurrency: DEFAULT_CONCURRENCY,
            sync_timeout: None,
            branch: DEFAULT_BRANCH.to_string(),
            registry: RegistrySource::default(),
            catalog_path: None,
        }
    }
}

impl CensusConfig {
    /// Defaults overridden by `TYPECOV_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`CensusConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(root) = get(ENV_CLONE_ROOT) {
            config.clone_root = PathBuf::from(root);
        }
        if let Some(raw) = get(ENV_CONCURRENCY) {
            config.concurrency = parse_number(ENV_CONCURRENCY, &raw)?;
        }
        if let Some(raw) = get(ENV_SYNC_TIMEOUT_SECS) {
            config.sync_timeout = timeout_from_secs(parse_number(ENV_SYNC_TIMEOUT_SECS, &raw)?);
        }
        if let Some(branch) = get(ENV_BRANCH) {
            config.branch = branch;
        }
        if let Some(path) = get(ENV_CATALOG) {
            config.catalog_path = Some(PathBuf::from(path));
        }

        config.registry = match get(ENV_MANIFEST) {
            Some(path) => RegistrySource::Manifest(PathBuf::from(path)),
            None => RegistrySource::Github {
                org: get(ENV_GITHUB_ORG).unwrap_or_else(|| DEFAULT_GITHUB_ORG.to_string()),
                api_base: get(ENV_GITHUB_API),
                token: get(ENV_GITHUB_TOKEN),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(CensusError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.branch.trim().is_empty() {
            return Err(CensusError::Config("branch must not be empty".to_string()));
        }
        if self.clone_root.as_os_str().is_empty() {
            return Err(CensusError::Config("clone root must not be empty".to_string()));
        }
        if let RegistrySource::Github { org, .. } = &self.registry {
            if org.trim().is_empty() {
                return Err(CensusError::Config("GitHub org must not be empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn load_catalog(&self) -> Result<NodeTypeCatalog> {
        match &self.catalog_path {
            Some(path) => NodeTypeCatalog::load(path),
            None => Ok(NodeTypeCatalog::builtin()),
        }
    }

    pub fn build_registry(&self) -> Result<Arc<dyn DriverRegistry>> {
        Ok(match &self.registry {
            RegistrySource::Manifest(path) => Arc::new(ManifestRegistry::new(path)),
            RegistrySource::Github {
                org,
                api_base,
                token,
            } => {
                let mut registry = GithubOrgRegistry::new(org.clone())?.with_token(token.clone());
                if let Some(api_base) = api_base {
                    registry = registry.with_api_base(api_base.clone());
                }
                Arc::new(registry)
            }
        })
    }

    pub fn build_synchronizer(&self) -> RepoSynchronizer {
        RepoSynchronizer::new(self.clone_root.clone(), Arc::new(GitCli::new()))
            .with_concurrency(self.concurrency)
            .with_timeout(self.sync_timeout)
            .with_branch(self.branch.clone())
    }

    /// Wire the production collaborators: git CLI and source scanner.
    pub fn build_census(&self) -> Result<Census> {
        self.validate()?;
        Ok(Census::new(
            self.build_registry()?,
            self.build_synchronizer(),
            Arc::new(SourceScanner::new()?),
            self.load_catalog()?,
        ))
    }
}

/// A zero-second deadline means "no deadline".
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| CensusError::Config(format!("{key}: '{raw}' is not a valid number")))
}
