//! Plugin hook discovery and execution

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::phase::Phase;
use crate::plugins::{PluginDescriptor, PluginEntry};
use crate::process::{CommandOutput, CommandRunner, CommandSpec, HookSandbox};
use crate::Result;

/// Find the hook script for a phase
///
/// A descriptor override wins; otherwise the first existing conventional
/// location is used (`scripts/dependencies-before-vips.sh`, ...).
///
/// # Errors
///
/// Returns a description of the problem if the descriptor names a hook that
/// does not exist, or if the hook resolves outside the plugin directory
pub fn find_hook(
    plugin_dir: &Path,
    descriptor: &PluginDescriptor,
    phase: Phase,
) -> std::result::Result<Option<PathBuf>, String> {
    if let Some(declared) = descriptor.hooks.for_phase(phase) {
        let path = plugin_dir.join(declared);
        if path.is_file() {
            return ensure_inside(plugin_dir, path).map(Some);
        }
        return Err(format!("declared {phase} hook not found: {}", declared.display()));
    }

    let stem = phase.script_stem();
    let snake = phase.as_str();
    let candidates = [
        format!("scripts/{stem}.sh"),
        format!("{stem}.sh"),
        format!("scripts/{snake}.sh"),
        format!("scripts/{stem}.py"),
    ];

    candidates
        .iter()
        .map(|name| plugin_dir.join(name))
        .find(|path| path.is_file())
        .map(|path| ensure_inside(plugin_dir, path))
        .transpose()
}

/// Reject hooks whose resolved location (after symlinks) leaves the plugin
fn ensure_inside(plugin_dir: &Path, hook: PathBuf) -> std::result::Result<PathBuf, String> {
    let root = plugin_dir
        .canonicalize()
        .map_err(|e| format!("cannot resolve {}: {e}", plugin_dir.display()))?;
    let resolved = hook
        .canonicalize()
        .map_err(|e| format!("cannot resolve {}: {e}", hook.display()))?;

    if resolved.starts_with(&root) {
        Ok(hook)
    } else {
        Err(format!(
            "hook {} resolves outside the plugin directory: {}",
            hook.display(),
            resolved.display()
        ))
    }
}

/// Determine how to execute a hook based on its extension
///
/// # Errors
///
/// Returns error for extensions with no known interpreter
pub fn determine_executor(
    hook: &Path,
    python: &str,
) -> std::result::Result<(String, Vec<String>), String> {
    let extension = hook.extension().and_then(|e| e.to_str()).unwrap_or("");

    let path_str = hook.to_str().ok_or("invalid hook path")?.to_string();

    match extension {
        "sh" => Ok(("sh".to_string(), vec![path_str])),
        "bash" => Ok(("bash".to_string(), vec![path_str])),
        "py" => Ok((python.to_string(), vec![path_str])),
        // No extension, assume executable binary or script with shebang
        "" => Ok((path_str, vec![])),
        _ => Err(format!("unknown hook extension: .{extension}")),
    }
}

/// Variables describing the plugin to its hooks
#[must_use]
pub fn hook_env(
    entry: &PluginEntry,
    plugin_dir: &Path,
    install_path: &Path,
    phase: Phase,
) -> Vec<(String, String)> {
    let mut vars = vec![
        ("PIMS_PLUGIN_NAME".to_string(), entry.name.clone()),
        ("PIMS_PLUGIN_DIR".to_string(), plugin_dir.display().to_string()),
        ("PIMS_PLUGIN_PHASE".to_string(), phase.as_str().to_string()),
        ("PIMS_INSTALL_PATH".to_string(), install_path.display().to_string()),
    ];
    if let Some(url) = &entry.git_url {
        vars.push(("PIMS_PLUGIN_GIT_URL".to_string(), url.clone()));
    }
    if let Some(branch) = &entry.git_branch {
        vars.push(("PIMS_PLUGIN_GIT_BRANCH".to_string(), branch.clone()));
    }
    vars
}

/// Driver values of the variables the descriptor declares as required
///
/// The sandbox clears the environment, so these are passed on explicitly.
#[must_use]
pub fn required_env(descriptor: &PluginDescriptor) -> Vec<(String, String)> {
    descriptor
        .requires
        .env
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| (key.clone(), value)))
        .collect()
}

/// Run a command inside the hook sandbox, rooted at the plugin directory
///
/// # Errors
///
/// Returns error if the process cannot be spawned or times out
pub async fn run_confined(
    runner: &dyn CommandRunner,
    sandbox: &HookSandbox,
    spec: CommandSpec,
    plugin_dir: &Path,
    vars: Vec<(String, String)>,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let spec = sandbox.confine(spec.current_dir(plugin_dir), vars, timeout);
    runner.run(&spec).await
}
