//! Driver registry clients.
//!
//! A [`DriverRegistry`] returns the ordered list of drivers to audit. Any
//! failure is fatal to the run: a partial list would make the report
//! columns incomplete.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{CensusError, Result};
use crate::model::DriverSpec;

/// Source of the drivers under audit.
#[async_trait]
pub trait DriverRegistry: Send + Sync {
    /// All drivers, in registry order.
    async fn list_drivers(&self) -> Result<Vec<DriverSpec>>;
}

/// Registry backed by a fixed in-memory list.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    drivers: Vec<DriverSpec>,
}

impl StaticRegistry {
    pub fn new(drivers: Vec<DriverSpec>) -> Self {
        Self { drivers }
    }
}

#[async_trait]
impl DriverRegistry for StaticRegistry {
    async fn list_drivers(&self) -> Result<Vec<DriverSpec>> {
        Ok(self.drivers.clone())
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default, rename = "driver")]
    drivers: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    language: String,
    url: String,
}

/// Registry read from a TOML manifest, in file order.
///
/// ```toml
/// [[driver]]
/// language = "go"
/// url = "https://github.com/bblfsh/go-driver"
/// ```
#[derive(Debug, Clone)]
pub struct ManifestRegistry {
    path: PathBuf,
}

impl ManifestRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse manifest text.
    pub fn parse(text: &str) -> Result<Vec<DriverSpec>> {
        let manifest: Manifest = toml::from_str(text)?;
        manifest
            .drivers
            .into_iter()
            .map(|entry| {
                if entry.language.trim().is_empty() {
                    return Err(CensusError::Registry(format!(
                        "driver with url '{}' has an empty language",
                        entry.url
                    )));
                }
                Ok(DriverSpec::new(entry.language.trim(), entry.url.trim()))
            })
            .collect()
    }
}

#[async_trait]
impl DriverRegistry for ManifestRegistry {
    async fn list_drivers(&self) -> Result<Vec<DriverSpec>> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CensusError::Registry(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let drivers = Self::parse(&text)
            .map_err(|e| CensusError::Registry(format!("{}: {e}", self.path.display())))?;
        info!(path = %self.path.display(), drivers = drivers.len(), "loaded driver manifest");
        Ok(drivers)
    }
}

/// Default organisation hosting the official drivers.
pub const DEFAULT_GITHUB_ORG: &str = "bblfsh";
const GITHUB_API: &str = "https://api.github.com";
const DRIVER_SUFFIX: &str = "-driver";
const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 50;

/// One entry of the GitHub "list organization repositories" response.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoListing {
    pub name: String,
    pub html_url: String,
    #[serde(default)]
    pub archived: bool,
}

/// Registry discovering `*-driver` repositories of a GitHub organisation.
pub struct GithubOrgRegistry {
    api_base: String,
    org: String,
    token: Option<String>,
    max_pages: usize,
    http_client: reqwest::Client,
}

impl GithubOrgRegistry {
    pub fn new(org: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("typecov/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            api_base: GITHUB_API.to_string(),
            org: org.into(),
            token: None,
            max_pages: MAX_PAGES,
            http_client,
        })
    }

    /// Point at a GitHub Enterprise or mock API root.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    /// Give up (with an error) after this many pages of results.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    async fn fetch_page(&self, page: usize) -> Result<Vec<RepoListing>> {
        let url = format!(
            "{}/orgs/{}/repos?type=public&per_page={PAGE_SIZE}&page={page}",
            self.api_base, self.org
        );
        debug!(%url, "fetching repository page");

        let mut request = self
            .http_client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        Ok(response.json::<Vec<RepoListing>>().await?)
    }
}

#[async_trait]
impl DriverRegistry for GithubOrgRegistry {
    async fn list_drivers(&self) -> Result<Vec<DriverSpec>> {
        info!(org = %self.org, "discovering drivers");
        let mut listing = Vec::new();
        let mut complete = false;
        for page in 1..=self.max_pages {
            let batch = self
                .fetch_page(page)
                .await
                .map_err(|e| CensusError::Registry(format!("org {}: {e}", self.org)))?;
            let last = batch.len() < PAGE_SIZE;
            listing.extend(batch);
            if last {
                complete = true;
                break;
            }
        }
        if !complete {
            return Err(CensusError::Registry(format!(
                "org {}: listing truncated after {} pages of {PAGE_SIZE} repositories",
                self.org, self.max_pages
            )));
        }

        let drivers = drivers_from_listing(listing);
        info!(org = %self.org, drivers = drivers.len(), "drivers discovered");
        Ok(drivers)
    }
}

/// Keep active `*-driver` repositories, sorted by language.
pub fn drivers_from_listing(listing: Vec<RepoListing>) -> Vec<DriverSpec> {
    let mut drivers: Vec<DriverSpec> = listing
        .into_iter()
        .filter(|repo| !repo.archived)
        .filter_map(|repo| {
            let language = repo.name.strip_suffix(DRIVER_SUFFIX)?;
            if language.is_empty() {
                return None;
            }
            Some(DriverSpec::new(language, repo.html_url))
        })
        .collect();
    drivers.sort_by(|a, b| a.language.cmp(&b.language));
    drivers
}
