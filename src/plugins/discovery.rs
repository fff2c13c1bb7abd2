//! Inspect the install path for already-fetched plugins

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::descriptor::DESCRIPTOR_FILE;
use super::manifest::{PluginEntry, PluginManifest};

/// State of one manifest row on disk
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    /// Plugin name
    pub name: String,
    /// Manifest enabled flag
    pub enabled: bool,
    /// Target directory under the install path
    pub path: PathBuf,
    /// What the directory currently holds
    pub state: CheckoutState,
    /// Whether the plugin ships a `pims-plugin.toml`
    pub has_descriptor: bool,
}

/// What a plugin target directory currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    /// Nothing at the target path
    Missing,
    /// A git working tree
    Checkout,
    /// Something that is not a git working tree
    Foreign,
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Checkout => write!(f, "downloaded"),
            Self::Foreign => write!(f, "not a git checkout"),
        }
    }
}

/// Target directory for a plugin
#[must_use]
pub fn plugin_dir(install_path: &Path, entry: &PluginEntry) -> PathBuf {
    install_path.join(&entry.name)
}

/// Classify a target directory
#[must_use]
pub fn checkout_state(dir: &Path) -> CheckoutState {
    if !dir.exists() {
        CheckoutState::Missing
    } else if dir.is_dir() && dir.join(".git").exists() {
        CheckoutState::Checkout
    } else {
        CheckoutState::Foreign
    }
}

/// Report the on-disk state of every manifest row
#[must_use]
pub fn inspect(install_path: &Path, manifest: &PluginManifest) -> Vec<PluginStatus> {
    manifest
        .entries()
        .iter()
        .map(|entry| {
            let path = plugin_dir(install_path, entry);
            let state = checkout_state(&path);
            tracing::trace!(plugin = %entry.name, path = %path.display(), %state, "inspected plugin");
            PluginStatus {
                name: entry.name.clone(),
                enabled: entry.enabled,
                has_descriptor: path.join(DESCRIPTOR_FILE).is_file(),
                state,
                path,
            }
        })
        .collect()
}
