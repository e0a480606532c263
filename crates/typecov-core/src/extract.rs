//! Node-type usage extraction.
//!
//! [`UsageExtractor`] is the contract between the pipeline and whatever
//! scanning strategy is used: given a synced clone and the catalog, return
//! both usage maps. [`SourceScanner`] is the default text scanner:
//!
//! - fixtures: every `uast:<Name>` marker in `fixtures/**/*.sem.uast`
//! - code: every `uast.<Name>` use-site in `driver/normalizer/**/*.go`,
//!   restricted to catalog names, `//` comments ignored (but not `//`
//!   inside string literals)

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::catalog::NodeTypeCatalog;
use crate::error::{CensusError, Result};
use crate::model::{DriverUsage, UsageCounts};

/// Produces fixture and code usage counts for one synced driver.
pub trait UsageExtractor: Send + Sync {
    /// Scan `repo_dir`. Every catalog entry must be present in both maps,
    /// zero when unused.
    fn extract(&self, repo_dir: &Path, catalog: &NodeTypeCatalog) -> Result<DriverUsage>;
}

const FIXTURE_GLOB: &str = "fixtures/**/*.sem.uast";
const CODE_GLOB: &str = "driver/normalizer/**/*.go";

/// Regex-based scanner over fixture files and mapping source.
#[derive(Debug, Clone)]
pub struct SourceScanner {
    fixture_glob: String,
    code_glob: String,
    fixture_marker: Regex,
    code_marker: Regex,
}

impl SourceScanner {
    pub fn new() -> Result<Self> {
        Self::with_globs(FIXTURE_GLOB, CODE_GLOB)
    }

    /// Scanner with custom repo-relative glob patterns.
    pub fn with_globs(fixture_glob: &str, code_glob: &str) -> Result<Self> {
        let fixture_marker = Regex::new(r"uast:([A-Za-z_][A-Za-z0-9_]*)")
            .map_err(|e| CensusError::Config(format!("fixture marker pattern: {e}")))?;
        let code_marker = Regex::new(r"\buast\.([A-Z][A-Za-z0-9_]*)\b")
            .map_err(|e| CensusError::Config(format!("code marker pattern: {e}")))?;
        Ok(Self {
            fixture_glob: fixture_glob.to_string(),
            code_glob: code_glob.to_string(),
            fixture_marker,
            code_marker,
        })
    }

    /// Count every `uast:<Name>` occurrence in `text`.
    pub fn count_fixture_markers(&self, text: &str, counts: &mut UsageCounts) {
        for caps in self.fixture_marker.captures_iter(text) {
            counts.record(&caps[1]);
        }
    }

    /// Count `uast.<Name>` use-sites of catalog names, skipping `//` comments.
    pub fn count_code_references(
        &self,
        text: &str,
        catalog: &NodeTypeCatalog,
        counts: &mut UsageCounts,
    ) {
        let mut in_raw_string = false;
        for line in text.lines() {
            let code = strip_line_comment(line, &mut in_raw_string);
            for caps in self.code_marker.captures_iter(code) {
                let name = &caps[1];
                if catalog.contains(name) {
                    counts.record(name);
                }
            }
        }
    }

    fn matching_files(&self, repo_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
        let extraction_error = |detail: String| CensusError::Extraction {
            dir: repo_dir.to_path_buf(),
            detail,
        };

        // Escape the root so brackets in a clone path are not glob syntax.
        let root = glob::Pattern::escape(&repo_dir.to_string_lossy());
        let full = format!("{}/{}", root.trim_end_matches('/'), pattern);

        let mut files = Vec::new();
        for entry in glob::glob(&full).map_err(|e| extraction_error(format!("bad pattern: {e}")))? {
            let path = entry.map_err(|e| extraction_error(e.to_string()))?;
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn read_lossy(repo_dir: &Path, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path).map_err(|e| CensusError::Extraction {
            dir: repo_dir.to_path_buf(),
            detail: format!("read {}: {e}", path.display()),
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl UsageExtractor for SourceScanner {
    fn extract(&self, repo_dir: &Path, catalog: &NodeTypeCatalog) -> Result<DriverUsage> {
        let mut usage = DriverUsage::seeded(catalog);

        for path in self.matching_files(repo_dir, &self.fixture_glob)? {
            let text = Self::read_lossy(repo_dir, &path)?;
            self.count_fixture_markers(&text, &mut usage.fixtures);
        }

        for path in self.matching_files(repo_dir, &self.code_glob)? {
            let text = Self::read_lossy(repo_dir, &path)?;
            self.count_code_references(&text, catalog, &mut usage.code);
        }

        Ok(usage)
    }
}

/// The part of a Go source line before any `//` comment.
///
/// `//` inside interpreted strings, rune literals and raw strings is kept.
/// Raw strings may span lines, so their state carries over in
/// `in_raw_string`.
fn strip_line_comment<'a>(line: &'a str, in_raw_string: &mut bool) -> &'a str {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if *in_raw_string {
            if b == b'`' {
                *in_raw_string = false;
            }
        } else if let Some(q) = quote {
            if b == b'\\' {
                i += 1;
            } else if b == q {
                quote = None;
            }
        } else {
            match b {
                b'"' | b'\'' => quote = Some(b),
                b'`' => *in_raw_string = true,
                b'/' if bytes.get(i + 1) == Some(&b'/') => return &line[..i],
                _ => {}
            }
        }
        i += 1;
    }
    line
}
