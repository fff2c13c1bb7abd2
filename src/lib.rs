//! PIMS plugin lifecycle driver
//!
//! Reads the plugin manifest used by the PIMS image build and applies the
//! plugin lifecycle methods to every enabled plugin:
//! - `download`: fetch plugin sources into `<install_path>/<name>`
//! - `dependencies_before_vips`: plugin hook run before libvips is built
//! - `dependencies_before_python`: plugin hook run before Python packages
//! - `install`: plugin install hook, or `pip install` of the plugin
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │             pims-plugins (CLI)               │
//! └──────────────────────┬───────────────────────┘
//!                        │
//! ┌──────────────────────▼───────────────────────┐
//! │               LifecycleDriver                │
//! │   manifest  │  descriptor  │  report         │
//! └──────────────────────┬───────────────────────┘
//!                        │
//! ┌──────────────────────▼───────────────────────┐
//! │      CommandRunner (git, hook sandbox)       │
//! └──────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod plugins;
pub mod process;

pub use config::Settings;
pub use error::{Error, Result};
pub use lifecycle::{LifecycleDriver, Phase, PhaseOutcome, ReportEntry, RunReport};
pub use plugins::{PluginDescriptor, PluginEntry, PluginManifest, PluginStatus};
pub use process::{CommandOutput, CommandRunner, CommandSpec, HookSandbox, ProcessRunner};
