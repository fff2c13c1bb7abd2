//! Plugin manifest and on-disk plugin layout
//!
//! The manifest is a CSV listing the plugins to bundle. Each enabled plugin is
//! fetched into `<install_path>/<name>` and may ship a `pims-plugin.toml`
//! descriptor that tunes how its hooks run.

pub mod descriptor;
pub mod discovery;
pub mod manifest;

pub use descriptor::{DESCRIPTOR_FILE, HookPaths, PluginDescriptor, PluginRequirements};
pub use discovery::{CheckoutState, PluginStatus, checkout_state, inspect, plugin_dir};
pub use manifest::{PluginEntry, PluginManifest};
