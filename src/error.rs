//! Error types for the plugin lifecycle driver

use std::time::Duration;

use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving plugin lifecycles
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed manifest row
    #[error("manifest error (line {line}): {message}")]
    Manifest {
        /// 1-based line number in the CSV file
        line: u64,
        /// What is wrong with the row
        message: String,
    },

    /// Malformed `pims-plugin.toml`
    #[error("descriptor error for plugin {plugin}: {message}")]
    Descriptor {
        /// Plugin name
        plugin: String,
        /// What is wrong with the descriptor
        message: String,
    },

    /// Fetching plugin sources failed
    #[error("download failed for plugin {plugin}: {message}")]
    Download {
        /// Plugin name
        plugin: String,
        /// Failure detail
        message: String,
    },

    /// A dependency hook failed
    #[error("hook {phase} failed for plugin {plugin}: {message}")]
    Hook {
        /// Plugin name
        plugin: String,
        /// Lifecycle phase name
        phase: &'static str,
        /// Failure detail
        message: String,
    },

    /// The install step failed
    #[error("install failed for plugin {plugin}: {message}")]
    Install {
        /// Plugin name
        plugin: String,
        /// Failure detail
        message: String,
    },

    /// A phase after `download` ran before the plugin was fetched
    #[error("plugin {0} is not downloaded")]
    NotDownloaded(String),

    /// Declared plugin requirement is missing
    #[error("plugin {plugin} requirement not satisfied: {message}")]
    Requirement {
        /// Plugin name
        plugin: String,
        /// Which requirement is missing
        message: String,
    },

    /// Subprocess exceeded its time limit
    #[error("command {command} timed out after {timeout:?}{}", with_output(.output))]
    Timeout {
        /// Command that was run
        command: String,
        /// Limit that was exceeded
        timeout: Duration,
        /// Tail of the output produced before the kill
        output: String,
    },

    /// Failed to spawn or wait on a subprocess
    #[error("failed to run {command}: {source}")]
    Spawn {
        /// Program that was run
        command: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reader error
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a manifest error for the given line
    #[must_use]
    pub fn manifest(line: u64, message: impl Into<String>) -> Self {
        Self::Manifest {
            line,
            message: message.into(),
        }
    }

    /// Plugin the error is attributed to, if any
    #[must_use]
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Self::Descriptor { plugin, .. }
            | Self::Download { plugin, .. }
            | Self::Hook { plugin, .. }
            | Self::Install { plugin, .. }
            | Self::Requirement { plugin, .. }
            | Self::NotDownloaded(plugin) => Some(plugin),
            _ => None,
        }
    }
}

fn with_output(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(": {output}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_error_mentions_line() {
        let err = Error::manifest(4, "missing name");
        assert_eq!(err.to_string(), "manifest error (line 4): missing name");
        assert!(err.plugin().is_none());
    }

    #[test]
    fn plugin_attribution() {
        let err = Error::Hook {
            plugin: "bioformats".to_string(),
            phase: "dependencies_before_vips",
            message: "exited with code 2".to_string(),
        };
        assert_eq!(err.plugin(), Some("bioformats"));
        assert_eq!(
            err.to_string(),
            "hook dependencies_before_vips failed for plugin bioformats: exited with code 2"
        );
    }

    #[test]
    fn timeout_includes_output_tail() {
        let err = Error::Timeout {
            command: "sh install.sh".to_string(),
            timeout: Duration::from_secs(1),
            output: "Collecting numpy".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "command sh install.sh timed out after 1s: Collecting numpy"
        );
    }
}
