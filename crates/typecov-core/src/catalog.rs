//! Ordered catalog of node-type names enumerated by the report.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CensusError, Result};

/// Node types of the semantic UAST enumerated when no catalog file is given.
pub const DEFAULT_NODE_TYPES: &[&str] = &[
    "Identifier",
    "String",
    "Bool",
    "QualifiedIdentifier",
    "Comment",
    "Group",
    "FunctionGroup",
    "Block",
    "Alias",
    "Import",
    "RuntimeImport",
    "RuntimeReImport",
    "InlineImport",
    "Argument",
    "FunctionType",
    "Function",
];

/// An ordered, duplicate-free sequence of node-type names.
///
/// The report renders exactly these rows, in this order, whatever the
/// counts are. The catalog is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NodeTypeCatalog {
    names: Vec<String>,
}

impl NodeTypeCatalog {
    /// Build a catalog, keeping the first occurrence of repeated names.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for name in names {
            let owned: String = name.into();
            let name = owned.trim();
            if name.is_empty() {
                return Err(CensusError::Catalog("node-type name is empty".to_string()));
            }
            if name.chars().any(char::is_whitespace) {
                return Err(CensusError::Catalog(format!(
                    "node-type name '{name}' contains whitespace"
                )));
            }
            if seen.insert(name.to_string()) {
                ordered.push(name.to_string());
            }
        }

        if ordered.is_empty() {
            return Err(CensusError::Catalog("catalog has no entries".to_string()));
        }
        Ok(Self { names: ordered })
    }

    /// The built-in UAST catalog.
    pub fn builtin() -> Self {
        Self {
            names: DEFAULT_NODE_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Parse a catalog file: one name per line, `#` starts a comment.
    pub fn parse(text: &str) -> Result<Self> {
        Self::new(
            text.lines()
                .map(|line| line.split('#').next().unwrap_or_default().trim())
                .filter(|line| !line.is_empty()),
        )
    }

    /// Load a catalog file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CensusError::Catalog(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

impl Default for NodeTypeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Deserializes from a list of names with the same checks as [`NodeTypeCatalog::new`].
impl<'de> Deserialize<'de> for NodeTypeCatalog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        Self::new(names).map_err(serde::de::Error::custom)
    }
}
