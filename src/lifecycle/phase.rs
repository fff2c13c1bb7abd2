//! The four ordered lifecycle phases

use serde::Serialize;

/// Lifecycle method a plugin may hook into
///
/// Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Fetch plugin sources into the install path
    Download,
    /// Before the native imaging library is built
    DependenciesBeforeVips,
    /// After native libraries, before Python packages are installed
    DependenciesBeforePython,
    /// Final installation once Python dependencies are present
    Install,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Self; 4] = [
        Self::Download,
        Self::DependenciesBeforeVips,
        Self::DependenciesBeforePython,
        Self::Install,
    ];

    /// Method name as used on the command line
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::DependenciesBeforeVips => "dependencies_before_vips",
            Self::DependenciesBeforePython => "dependencies_before_python",
            Self::Install => "install",
        }
    }

    /// Kebab-case form used for hook script names
    #[must_use]
    pub const fn script_stem(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::DependenciesBeforeVips => "dependencies-before-vips",
            Self::DependenciesBeforePython => "dependencies-before-python",
            Self::Install => "install",
        }
    }

    /// Phase that follows this one
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self {
            Self::Download => Some(Self::DependenciesBeforeVips),
            Self::DependenciesBeforeVips => Some(Self::DependenciesBeforePython),
            Self::DependenciesBeforePython => Some(Self::Install),
            Self::Install => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s || phase.script_stem() == s)
            .ok_or_else(|| format!("unknown lifecycle method: {s}"))
    }
}
