//! Per-plugin descriptor (`pims-plugin.toml`)

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::lifecycle::Phase;
use crate::{Error, Result};

/// Descriptor file name at the plugin root
pub const DESCRIPTOR_FILE: &str = "pims-plugin.toml";

/// Optional plugin metadata shipped inside the plugin repository
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginDescriptor {
    /// Informational package name
    #[serde(default)]
    pub name: Option<String>,
    /// Hook script overrides, relative to the plugin root
    #[serde(default)]
    pub hooks: HookPaths,
    /// Requirements checked before any hook runs
    #[serde(default)]
    pub requires: PluginRequirements,
    /// Per-hook timeout override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Hook script overrides
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookPaths {
    #[serde(default)]
    pub dependencies_before_vips: Option<PathBuf>,
    #[serde(default)]
    pub dependencies_before_python: Option<PathBuf>,
    #[serde(default)]
    pub install: Option<PathBuf>,
}

impl HookPaths {
    /// Override declared for a phase
    #[must_use]
    pub fn for_phase(&self, phase: Phase) -> Option<&Path> {
        match phase {
            Phase::Download => None,
            Phase::DependenciesBeforeVips => self.dependencies_before_vips.as_deref(),
            Phase::DependenciesBeforePython => self.dependencies_before_python.as_deref(),
            Phase::Install => self.install.as_deref(),
        }
    }
}

/// Plugin requirements
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginRequirements {
    /// Required binaries in PATH
    #[serde(default)]
    pub bins: Vec<String>,
    /// Required environment variables
    #[serde(default)]
    pub env: Vec<String>,
    /// Supported operating systems
    #[serde(default)]
    pub os: Vec<String>,
}

impl PluginRequirements {
    /// Describe the first unmet requirement, if any
    #[must_use]
    pub fn unmet(&self) -> Option<String> {
        if !self.os.is_empty() {
            let current_os = std::env::consts::OS;
            if !self.os.iter().any(|os| os == current_os) {
                return Some(format!(
                    "os {current_os} not in [{}]",
                    self.os.join(", ")
                ));
            }
        }

        if let Some(bin) = self.bins.iter().find(|bin| which::which(bin).is_err()) {
            return Some(format!("binary {bin} not found in PATH"));
        }

        if let Some(var) = self.env.iter().find(|var| std::env::var(var).is_err()) {
            return Some(format!("environment variable {var} not set"));
        }

        None
    }
}

impl PluginDescriptor {
    /// Load the descriptor from a plugin directory
    ///
    /// A missing file yields the default descriptor.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed, if a
    /// hook path escapes the plugin directory, or if `timeout_secs` is zero
    pub fn load(plugin: &str, plugin_dir: &Path) -> Result<Self> {
        let path = plugin_dir.join(DESCRIPTOR_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }

        let descriptor_error = |message: String| Error::Descriptor {
            plugin: plugin.to_string(),
            message,
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| descriptor_error(format!("failed to read {DESCRIPTOR_FILE}: {e}")))?;
        let descriptor: Self = toml::from_str(&content)
            .map_err(|e| descriptor_error(format!("failed to parse {DESCRIPTOR_FILE}: {e}")))?;

        for phase in Phase::ALL {
            if let Some(hook) = descriptor.hooks.for_phase(phase) {
                if !is_contained(hook) {
                    return Err(descriptor_error(format!(
                        "hook path for {phase} must be relative and stay inside the plugin: {}",
                        hook.display()
                    )));
                }
            }
        }

        if descriptor.timeout_secs == Some(0) {
            return Err(descriptor_error("timeout_secs must be greater than zero".to_string()));
        }

        tracing::debug!(plugin = %plugin, path = %path.display(), "loaded plugin descriptor");
        Ok(descriptor)
    }
}

/// Relative path with no parent or root components
fn is_contained(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().any(|c| matches!(c, Component::Normal(_)))
}
