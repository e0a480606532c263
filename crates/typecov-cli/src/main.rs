//! typecov - node-type coverage census
//!
//! Syncs every language driver repository, counts how often each AST node
//! type appears in its fixtures and its normalizer code, and prints a
//! Markdown table (or JSON) of the results.
//!
//! Exit codes: 0 on success, even when some drivers failed to sync; 1 on a
//! fatal error; 2 when `--check` finds the report file out of date.

mod diag;

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};

use typecov_core::config::{
    timeout_from_secs, ENV_BRANCH, ENV_CATALOG, ENV_CLONE_ROOT, ENV_CONCURRENCY, ENV_GITHUB_ORG,
    ENV_MANIFEST, ENV_SYNC_TIMEOUT_SECS,
};
use typecov_core::report::{is_up_to_date, write_report};
use typecov_core::{init_tracing, CensusConfig, RegistrySource, ReportFormat, ReportOptions};

#[derive(Parser, Debug)]
#[command(name = "typecov")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Census of AST node-type usage across language drivers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Serve /debug/metrics and /debug/health while the census runs
    #[arg(long, alias = "pprof")]
    diag: bool,

    /// Address of the diagnostics endpoint
    #[arg(long, default_value = diag::DEFAULT_DIAG_ADDR)]
    diag_addr: SocketAddr,

    /// Directory holding one clone per driver
    #[arg(long, env = ENV_CLONE_ROOT)]
    clone_root: Option<PathBuf>,

    /// Maximum simultaneous clone/pull operations
    #[arg(short = 'j', long, env = ENV_CONCURRENCY)]
    concurrency: Option<usize>,

    /// Per-driver clone/pull deadline in seconds (0 disables it)
    #[arg(long, env = ENV_SYNC_TIMEOUT_SECS)]
    sync_timeout_secs: Option<u64>,

    /// Branch pulled when a clone already exists
    #[arg(long, env = ENV_BRANCH)]
    branch: Option<String>,

    /// Read drivers from a TOML manifest instead of GitHub; takes
    /// precedence over --github-org
    #[arg(long, env = ENV_MANIFEST)]
    manifest: Option<PathBuf>,

    /// GitHub organisation whose `*-driver` repositories are audited
    #[arg(long, env = ENV_GITHUB_ORG)]
    github_org: Option<String>,

    /// Node-type catalog file, one name per line
    #[arg(long, env = ENV_CATALOG)]
    catalog: Option<PathBuf>,

    /// Report format: markdown or json
    #[arg(long, default_value = "markdown")]
    format: ReportFormat,

    /// Append a per-driver sync status section to the Markdown report
    #[arg(long)]
    with_status: bool,

    /// Write the report to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Fail with exit code 2 if the output file is not up to date
    #[arg(long, requires = "output")]
    check: bool,
}

impl Cli {
    /// Apply command-line overrides on top of `base`.
    fn census_config(&self, mut base: CensusConfig) -> Result<CensusConfig> {
        if let Some(root) = &self.clone_root {
            base.clone_root = root.clone();
        }
        if let Some(concurrency) = self.concurrency {
            base.concurrency = concurrency;
        }
        if let Some(secs) = self.sync_timeout_secs {
            base.sync_timeout = timeout_from_secs(secs);
        }
        if let Some(branch) = &self.branch {
            base.branch = branch.clone();
        }
        if let Some(catalog) = &self.catalog {
            base.catalog_path = Some(catalog.clone());
        }
        if let Some(manifest) = &self.manifest {
            base.registry = RegistrySource::Manifest(manifest.clone());
        } else if let Some(org) = &self.github_org {
            let (api_base, token) = match &base.registry {
                RegistrySource::Github {
                    api_base, token, ..
                } => (api_base.clone(), token.clone()),
                RegistrySource::Manifest(_) => (None, None),
            };
            base.registry = RegistrySource::Github {
                org: org.clone(),
                api_base,
                token,
            };
        }
        base.validate().context("invalid configuration")?;
        Ok(base)
    }

    fn report_options(&self) -> ReportOptions {
        ReportOptions {
            format: self.format,
            include_status: self.with_status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    Done,
    Stale,
}

impl From<RunStatus> for ExitCode {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Done => ExitCode::SUCCESS,
            RunStatus::Stale => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let base = match CensusConfig::from_env() {
        Ok(base) => base,
        Err(e) => {
            eprintln!("Error: invalid environment configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(&cli, base).await {
        Ok(status) => status.into(),
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, base: CensusConfig) -> Result<RunStatus> {
    let config = cli.census_config(base)?;

    let diag = if cli.diag {
        diag::spawn(cli.diag_addr).await
    } else {
        None
    };

    let census = config
        .build_census()
        .context("failed to prepare census")?;
    let outcome = census.run().await.context("census failed")?;
    let rendered = outcome
        .render(&cli.report_options())
        .context("failed to render report")?;

    if let Some((_, handle)) = diag {
        handle.abort();
    }

    emit(cli, &rendered)
}

fn emit(cli: &Cli, rendered: &str) -> Result<RunStatus> {
    match &cli.output {
        Some(path) if cli.check => {
            let fresh = is_up_to_date(path, rendered)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if fresh {
                info!(path = %path.display(), "report is up to date");
                Ok(RunStatus::Done)
            } else {
                warn!(path = %path.display(), "report is out of date");
                Ok(RunStatus::Stale)
            }
        }
        Some(path) => {
            write_report(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "report written");
            Ok(RunStatus::Done)
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(rendered.as_bytes())
                .and_then(|_| stdout.flush())
                .context("failed to write report to stdout")?;
            Ok(RunStatus::Done)
        }
    }
}
