//! TOML configuration file loading
//!
//! Supports `~/.config/pims/plugins.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "PIMS_PLUGINS_CONFIG";

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginsConfigFile {
    /// Git configuration
    #[serde(default)]
    pub git: GitFileConfig,

    /// Hook execution configuration
    #[serde(default)]
    pub hooks: HooksFileConfig,

    /// Default install step configuration
    #[serde(default)]
    pub install: InstallFileConfig,
}

/// Git-related configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitFileConfig {
    /// Git executable
    pub binary: Option<String>,

    /// Clone with `--depth 1`
    pub shallow: Option<bool>,

    /// Fast-forward existing checkouts instead of leaving them untouched
    pub update_existing: Option<bool>,
}

/// Hook execution configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HooksFileConfig {
    /// Per-hook time limit in seconds
    pub timeout_secs: Option<u64>,

    /// Interpreter for `.py` hooks
    pub python: Option<String>,

    /// Extra variables passed through to hooks
    pub env_allowlist: Option<Vec<String>>,
}

/// Default install step configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallFileConfig {
    /// Command run when a plugin has no install hook
    pub command: Option<Vec<String>>,
}

/// Load the TOML config file
///
/// An explicitly named file (argument or `PIMS_PLUGINS_CONFIG`) must exist and
/// parse. The default location is optional and falls back to defaults with a
/// warning when unreadable.
///
/// # Errors
///
/// Returns error if an explicitly named file cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<PluginsConfigFile> {
    let explicit = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    if let Some(path) = explicit {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config = parse_config(&content)
            .map_err(|e| Error::Config(format!("invalid config file {}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(PluginsConfigFile::default());
    };

    if !path.exists() {
        return Ok(PluginsConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(PluginsConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(PluginsConfigFile::default())
        }
    }
}

/// Parse config file content
///
/// # Errors
///
/// Returns error on invalid TOML or unknown keys
pub fn parse_config(content: &str) -> Result<PluginsConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/pims/plugins.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("pims").join("plugins.toml"))
}
