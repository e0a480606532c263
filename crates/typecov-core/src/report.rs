//! Coverage report rendering.
//!
//! The Markdown report is a pure function of the catalog and the final
//! driver records: driver columns in registry order, node-type rows in
//! catalog order, each cell `<fixtures>/<code>` with absent counts read as
//! zero. Rendering the same inputs twice yields identical bytes.

use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

use crate::catalog::NodeTypeCatalog;
use crate::error::{CensusError, Result};
use crate::model::{Driver, SyncOutcome};

/// Text emitted before the table.
pub const HEADER: &str = "<!-- Code generated by 'make types' DO NOT EDIT. -->
# UAST Types

For every UAST type in every Driver 2 numbers are reported:
 - _fixtures usage_ number of times this type was used in driver _fixtures_ (*.sem.uast files)
 - _code usage_ number of times this type was usind in driver mapping DSL code (normalizer.go)

in the format _<fixtures usage>/<code usage>_.

";

/// Text emitted after the table.
pub const FOOTER: &str = "
**Don't see your favorite AST construct mapped? [Help us!](join-the-community.md)**
";

const LABEL_WIDTH: usize = 25;
const COLUMN_WIDTH: usize = 5;

/// Output format of the rendered census.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
}

impl FromStr for ReportFormat {
    type Err = CensusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            other => Err(CensusError::Config(format!("unknown report format '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub format: ReportFormat,
    /// Append a per-driver sync status list after the Markdown table.
    pub include_status: bool,
}

/// Render the census in the requested format.
pub fn render(catalog: &NodeTypeCatalog, drivers: &[Driver], options: &ReportOptions) -> Result<String> {
    match options.format {
        ReportFormat::Markdown => Ok(render_markdown(catalog, drivers, options.include_status)),
        ReportFormat::Json => render_json(catalog, drivers),
    }
}

/// Render the Markdown table, optionally followed by the status section.
pub fn render_markdown(catalog: &NodeTypeCatalog, drivers: &[Driver], include_status: bool) -> String {
    let mut out = String::from(HEADER);
    render_table(&mut out, catalog, drivers);
    if include_status {
        out.push('\n');
        out.push_str(&render_status_section(drivers));
    }
    out.push_str(FOOTER);
    out
}

fn render_table(out: &mut String, catalog: &NodeTypeCatalog, drivers: &[Driver]) {
    // write! into a String cannot fail.
    let _ = write!(out, "|{:>LABEL_WIDTH$}|", "");
    for driver in drivers {
        let _ = write!(out, "{:>COLUMN_WIDTH$}|", driver.language);
    }
    out.push_str("\n| :---------------------- |");
    for _ in drivers {
        out.push_str(" :-- |");
    }
    out.push('\n');

    for node_type in catalog.iter() {
        let _ = write!(out, "|{:>LABEL_WIDTH$}|", node_type);
        for driver in drivers {
            let _ = write!(
                out,
                " {}/{} |",
                driver.fixture_usage.get(node_type),
                driver.code_usage.get(node_type)
            );
        }
        out.push('\n');
    }
}

/// One line per driver stating how its repository was synced.
///
/// Distinguishes "genuinely unused" zero rows from "could not be
/// measured" ones.
pub fn render_status_section(drivers: &[Driver]) -> String {
    let mut out = String::from("## Driver status\n\n");
    for driver in drivers {
        let status = match &driver.sync_outcome {
            Some(outcome) => outcome.to_string(),
            None => "not synced".to_string(),
        };
        let _ = writeln!(out, " - {}: {}", driver.language, status);
    }
    out
}

#[derive(Serialize)]
struct CensusArtifact<'a> {
    schema_version: &'static str,
    catalog: &'a NodeTypeCatalog,
    drivers: Vec<DriverArtifact<'a>>,
}

#[derive(Serialize)]
struct DriverArtifact<'a> {
    language: &'a str,
    repository_url: &'a str,
    local_path: &'a str,
    sync: Option<&'a SyncOutcome>,
    usage: Vec<UsageRow<'a>>,
}

#[derive(Serialize)]
struct UsageRow<'a> {
    node_type: &'a str,
    fixtures: u64,
    code: u64,
}

/// Render the census as pretty JSON, rows in catalog order.
pub fn render_json(catalog: &NodeTypeCatalog, drivers: &[Driver]) -> Result<String> {
    let artifact = CensusArtifact {
        schema_version: "1.0",
        catalog,
        drivers: drivers
            .iter()
            .map(|driver| DriverArtifact {
                language: &driver.language,
                repository_url: &driver.repository_url,
                local_path: &driver.local_path,
                sync: driver.sync_outcome.as_ref(),
                usage: catalog
                    .iter()
                    .map(|node_type| UsageRow {
                        node_type,
                        fixtures: driver.fixture_usage.get(node_type),
                        code: driver.code_usage.get(node_type),
                    })
                    .collect(),
            })
            .collect(),
    };
    let mut json = serde_json::to_string_pretty(&artifact)?;
    json.push('\n');
    Ok(json)
}

/// Write a rendered report to `path`.
pub fn write_report(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)?;
    Ok(())
}

/// Whether `path` already holds exactly `content`. A missing file is stale.
pub fn is_up_to_date(path: &Path, content: &str) -> Result<bool> {
    match std::fs::read_to_string(path) {
        Ok(existing) => Ok(existing == content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
