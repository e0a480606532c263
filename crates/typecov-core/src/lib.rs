//! typecov core library
//!
//! Audits which AST node types every language driver uses, in its test
//! fixtures and in its mapping code:
//! - [`registry`] lists the drivers to audit
//! - [`sync`] clones or updates each driver repository under a concurrency cap
//! - [`extract`] counts node-type usage in a synced clone
//! - [`report`] folds everything into a deterministic Markdown (or JSON) table
//! - [`pipeline::Census`] runs the stages in order

pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod git;
pub mod metrics;
pub mod model;
pub mod obs;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod report;
pub mod sync;
pub mod telemetry;

pub use catalog::{NodeTypeCatalog, DEFAULT_NODE_TYPES};
pub use config::{CensusConfig, RegistrySource};
pub use error::{CensusError, Result};
pub use extract::{SourceScanner, UsageExtractor};
pub use git::{GitCli, RepoOps};
pub use metrics::METRICS;
pub use model::{Driver, DriverSpec, DriverUsage, SyncOutcome, UsageCounts};
pub use pipeline::{Census, CensusOutcome};
pub use pool::{TaskOutcome, TaskPool};
pub use registry::{DriverRegistry, GithubOrgRegistry, ManifestRegistry, StaticRegistry};
pub use report::{ReportFormat, ReportOptions};
pub use sync::RepoSynchronizer;
pub use telemetry::init_tracing;
