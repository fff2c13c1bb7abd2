//! Plugin manifest format (CSV: `enabled,name,git_url,git_branch`)

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::{Error, Result};

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid regex"));

/// Number of positional columns in a manifest row
const COLUMNS: usize = 4;

/// One row of the plugin manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginEntry {
    /// Whether the plugin is bundled into the image
    pub enabled: bool,
    /// Plugin identifier, also its directory name under the install path
    pub name: String,
    /// Repository location
    pub git_url: Option<String>,
    /// Branch to check out (remote default when absent)
    pub git_branch: Option<String>,
    /// 1-based line in the manifest file
    pub line: u64,
}

/// Parsed plugin manifest, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginManifest {
    entries: Vec<PluginEntry>,
}

impl PluginManifest {
    /// Read and parse a manifest file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or a row is malformed
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read plugin manifest {}: {e}", path.display()))
        })?;
        let manifest = Self::parse(&content)?;

        tracing::debug!(
            path = %path.display(),
            rows = manifest.len(),
            enabled = manifest.enabled().count(),
            "loaded plugin manifest"
        );

        Ok(manifest)
    }

    /// Load a manifest given either a file path or inline CSV content
    ///
    /// Image builds pass the manifest through a build argument, which may
    /// hold the file name or the CSV text itself.
    ///
    /// # Errors
    ///
    /// Returns error if `source` is neither a readable file nor CSV content,
    /// or if the manifest is malformed
    pub fn load(source: &str) -> Result<Self> {
        let path = Path::new(source);
        if path.is_file() {
            return Self::from_path(path);
        }

        if looks_inline(source) {
            tracing::debug!("parsing inline plugin manifest");
            return Self::parse(source);
        }

        Err(Error::Config(format!("plugin manifest not found: {source}")))
    }

    /// Parse manifest content
    ///
    /// Each line is one CSV record; quoted cells cannot span lines.
    ///
    /// # Errors
    ///
    /// Returns error on malformed rows, invalid names or duplicate names
    pub fn parse(content: &str) -> Result<Self> {
        let mut builder = csv::ReaderBuilder::new();
        builder.has_headers(false).flexible(true).trim(csv::Trim::All);

        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut first = true;

        for (line, raw) in (1u64..).zip(content.lines()) {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some(record) = builder.from_reader(raw.as_bytes()).records().next() else {
                continue;
            };
            let record = record?;

            if record.iter().all(str::is_empty) {
                continue;
            }

            if std::mem::take(&mut first) && is_header(&record) {
                continue;
            }

            let entry = parse_row(&record, line)?;
            if !seen.insert(entry.name.clone()) {
                return Err(Error::manifest(
                    line,
                    format!("duplicate plugin name: {}", entry.name),
                ));
            }
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    /// Build a manifest from already-typed entries
    #[must_use]
    pub const fn from_entries(entries: Vec<PluginEntry>) -> Self {
        Self { entries }
    }

    /// All rows, in file order
    #[must_use]
    pub fn entries(&self) -> &[PluginEntry] {
        &self.entries
    }

    /// Enabled rows, in file order
    pub fn enabled(&self) -> impl Iterator<Item = &PluginEntry> {
        self.entries.iter().filter(|e| e.enabled)
    }

    /// Look up a row by plugin name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PluginEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_header(record: &csv::StringRecord) -> bool {
    record
        .get(0)
        .is_some_and(|cell| cell.eq_ignore_ascii_case("enabled"))
}

/// Inline content has several lines or starts like a manifest row
fn looks_inline(source: &str) -> bool {
    let source = source.trim();
    if source.contains('\n') {
        return true;
    }
    let first = source.split(',').next().unwrap_or_default().trim();
    source.contains(',') && (parse_bool(first).is_some() || first.eq_ignore_ascii_case("enabled"))
}

fn parse_row(record: &csv::StringRecord, line: u64) -> Result<PluginEntry> {
    if record.len() > COLUMNS {
        return Err(Error::manifest(
            line,
            format!(
                "expected at most {COLUMNS} columns (enabled,name,git_url,git_branch), got {}",
                record.len()
            ),
        ));
    }

    let cell = |i: usize| record.get(i).filter(|c| !c.is_empty());

    let enabled = parse_bool(record.get(0).unwrap_or_default())
        .ok_or_else(|| {
            Error::manifest(
                line,
                format!("invalid enabled flag: {:?}", record.get(0).unwrap_or_default()),
            )
        })?;

    let name = cell(1).ok_or_else(|| Error::manifest(line, "missing plugin name"))?;
    validate_name(name).map_err(|message| Error::manifest(line, message))?;

    Ok(PluginEntry {
        enabled,
        name: name.to_string(),
        git_url: cell(2).map(ToString::to_string),
        git_branch: cell(3).map(ToString::to_string),
        line,
    })
}

/// Parse a boolean cell
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Check that a plugin name is usable as a single directory component
///
/// # Errors
///
/// Returns a description of the problem when the name is rejected
pub fn validate_name(name: &str) -> std::result::Result<(), String> {
    if name == "." || name == ".." {
        return Err(format!("invalid plugin name: {name}"));
    }
    if !NAME_REGEX.is_match(name) {
        return Err(format!(
            "invalid plugin name {name:?}: only ASCII letters, digits, '.', '-' and '_' are allowed"
        ));
    }
    Ok(())
}
