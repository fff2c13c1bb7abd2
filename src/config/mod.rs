//! Configuration management for the plugin driver

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::plugins::manifest::parse_bool;
use crate::{Error, Result};

pub use file::{PluginsConfigFile, config_file_path, load_config_file};

/// Placeholder replaced by the plugin directory in the install command
pub const PLUGIN_DIR_PLACEHOLDER: &str = "{plugin_dir}";

/// Placeholder replaced by the configured Python interpreter
pub const PYTHON_PLACEHOLDER: &str = "{python}";

/// Default hook time limit (30 minutes)
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Resolved driver configuration
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory plugins are fetched into
    pub install_path: PathBuf,

    /// Git configuration
    pub git: GitSettings,

    /// Hook execution configuration
    pub hooks: HookSettings,

    /// Command run when a plugin has no install hook
    pub install_command: Vec<String>,

    /// Continue with remaining plugins of the current phase after a failure
    pub keep_going: bool,
}

/// Git configuration
#[derive(Debug, Clone)]
pub struct GitSettings {
    /// Git executable
    pub binary: String,
    /// Clone with `--depth 1`
    pub shallow: bool,
    /// Fast-forward existing checkouts
    pub update_existing: bool,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            binary: "git".to_string(),
            shallow: true,
            update_existing: false,
        }
    }
}

/// Hook execution configuration
#[derive(Debug, Clone)]
pub struct HookSettings {
    /// Per-hook time limit
    pub timeout: Duration,
    /// Interpreter for `.py` hooks
    pub python: String,
    /// Extra variables passed through to hooks
    pub env_allowlist: Vec<String>,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HOOK_TIMEOUT,
            python: "python3".to_string(),
            env_allowlist: Vec::new(),
        }
    }
}

/// Default install command: `pip install` of the plugin directory
#[must_use]
pub fn default_install_command() -> Vec<String> {
    [
        PYTHON_PLACEHOLDER,
        "-m",
        "pip",
        "install",
        "--no-cache-dir",
        PLUGIN_DIR_PLACEHOLDER,
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

impl Settings {
    /// Defaults rooted at `install_path`
    #[must_use]
    pub fn new(install_path: impl Into<PathBuf>) -> Self {
        Self {
            install_path: install_path.into(),
            git: GitSettings::default(),
            hooks: HookSettings::default(),
            install_command: default_install_command(),
            keep_going: false,
        }
    }

    /// Load settings (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the config file or an environment override is invalid
    pub fn load(install_path: &Path, config_path: Option<&Path>) -> Result<Self> {
        let fc = load_config_file(config_path)?;
        Self::from_sources(install_path, fc, |key| std::env::var(key).ok())
    }

    /// Resolve settings from a config file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if an override does not parse or the install command is empty
    pub fn from_sources(
        install_path: &Path,
        fc: PluginsConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::new(install_path);

        let update_existing = match env("PIMS_PLUGINS_UPDATE_EXISTING") {
            Some(value) => parse_bool(&value).ok_or_else(|| {
                Error::Config(format!("PIMS_PLUGINS_UPDATE_EXISTING: invalid boolean {value:?}"))
            })?,
            None => fc.git.update_existing.unwrap_or(defaults.git.update_existing),
        };

        let git = GitSettings {
            binary: env("PIMS_PLUGINS_GIT")
                .or(fc.git.binary)
                .unwrap_or(defaults.git.binary),
            shallow: fc.git.shallow.unwrap_or(defaults.git.shallow),
            update_existing,
        };

        let timeout = match env("PIMS_PLUGINS_HOOK_TIMEOUT") {
            Some(value) => Duration::from_secs(value.parse().map_err(|_| {
                Error::Config(format!("PIMS_PLUGINS_HOOK_TIMEOUT: invalid seconds {value:?}"))
            })?),
            None => fc
                .hooks
                .timeout_secs
                .map_or(defaults.hooks.timeout, Duration::from_secs),
        };
        if timeout.is_zero() {
            return Err(Error::Config("hook timeout must be positive".to_string()));
        }

        let hooks = HookSettings {
            timeout,
            python: env("PIMS_PLUGINS_PYTHON")
                .or(fc.hooks.python)
                .unwrap_or(defaults.hooks.python),
            env_allowlist: fc.hooks.env_allowlist.unwrap_or_default(),
        };

        let install_command = fc.install.command.unwrap_or(defaults.install_command);
        if install_command.is_empty() {
            return Err(Error::Config("install.command must not be empty".to_string()));
        }

        Ok(Self {
            install_path: defaults.install_path,
            git,
            hooks,
            install_command,
            keep_going: false,
        })
    }

    /// Install command with placeholders substituted for one plugin
    #[must_use]
    pub fn install_command_for(&self, plugin_dir: &Path) -> Vec<String> {
        let dir = plugin_dir.display().to_string();
        self.install_command
            .iter()
            .map(|part| {
                part.replace(PLUGIN_DIR_PLACEHOLDER, &dir)
                    .replace(PYTHON_PLACEHOLDER, &self.hooks.python)
            })
            .collect()
    }
}
