//! Error taxonomy for the census pipeline.
//!
//! Errors fall into two classes. Fatal errors (registry lookup, catalog,
//! configuration, clone root) abort a run before any driver work starts.
//! Everything else is scoped to a single driver and degrades to zero
//! counts for that driver.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the census pipeline.
#[derive(Debug, Error)]
pub enum CensusError {
    /// The driver registry could not produce a complete driver list.
    #[error("driver registry lookup failed: {0}")]
    Registry(String),

    /// A repository URL has no usable final path segment.
    #[error("invalid repository url '{url}': {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    /// Two drivers would be cloned into the same directory.
    #[error("drivers '{first}' and '{second}' both map to clone directory '{dir}'")]
    DuplicateCloneDir {
        dir: String,
        first: String,
        second: String,
    },

    /// The shared clone root could not be created.
    #[error("cannot create clone root {path}: {source}")]
    CloneRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A git subprocess exited unsuccessfully or could not be spawned.
    #[error("git {operation} failed in {dir}: {stderr}")]
    Git {
        operation: String,
        dir: PathBuf,
        stderr: String,
    },

    /// A pooled task exceeded its deadline.
    #[error("operation timed out after {after:?}")]
    Timeout { after: Duration },

    /// A pooled task panicked or was cancelled before reporting.
    #[error("task failed: {0}")]
    Task(String),

    /// Scanning a driver's fixtures or mapping code failed.
    #[error("usage extraction failed in {dir}: {detail}")]
    Extraction { dir: PathBuf, detail: String },

    /// The node-type catalog is empty or malformed.
    #[error("invalid node-type catalog: {0}")]
    Catalog(String),

    /// A configuration value could not be parsed or is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("manifest parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP error talking to a remote registry.
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for CensusError {
    fn from(err: reqwest::Error) -> Self {
        CensusError::Http(err.to_string())
    }
}

impl CensusError {
    /// Whether this error must abort the whole run.
    ///
    /// Per-driver errors (git, timeout, task, extraction) are recorded
    /// against their driver and never unwind past the pipeline.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CensusError::Git { .. }
                | CensusError::Timeout { .. }
                | CensusError::Task(_)
                | CensusError::Extraction { .. }
        )
    }
}

/// Result type for census operations.
pub type Result<T> = std::result::Result<T, CensusError>;
