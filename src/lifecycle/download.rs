//! Fetch plugin sources with git

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::report::PhaseOutcome;
use crate::config::GitSettings;
use crate::plugins::{CheckoutState, PluginEntry, checkout_state};
use crate::process::{CommandRunner, CommandSpec};
use crate::{Error, Result};

/// `user@host:path` remote form
static SCP_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+@[A-Za-z0-9.-]+:[^/].*$").expect("valid regex"));

const URL_SCHEMES: &[&str] = &["https", "http", "ssh", "git", "file"];

/// Check that a manifest `git_url` is something git can clone
///
/// # Errors
///
/// Returns a description of the problem when the location is rejected
pub fn validate_git_url(location: &str) -> std::result::Result<(), String> {
    if SCP_LIKE.is_match(location) {
        return Ok(());
    }

    match url::Url::parse(location) {
        Ok(url) if URL_SCHEMES.contains(&url.scheme()) => Ok(()),
        Ok(url) => Err(format!("unsupported git url scheme: {}", url.scheme())),
        Err(_) if Path::new(location).exists() => Ok(()),
        Err(e) => Err(format!("invalid git url {location:?}: {e}")),
    }
}

/// Normalize a remote for comparison
fn normalize_remote(remote: &str) -> &str {
    let trimmed = remote.trim().trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed)
}

fn git(settings: &GitSettings) -> CommandSpec {
    CommandSpec::new(&settings.binary).env("GIT_TERMINAL_PROMPT", "0")
}

/// Fetch one plugin into `target`
///
/// A missing target is cloned through a temporary sibling directory and only
/// moved into place once the clone succeeded. An existing checkout of the same
/// remote is left as is, or fast-forwarded when `update_existing` is set.
///
/// # Errors
///
/// Returns error if the row has no usable `git_url`, the target holds
/// something else, or git fails
pub async fn download(
    runner: &dyn CommandRunner,
    settings: &GitSettings,
    entry: &PluginEntry,
    target: &Path,
) -> Result<PhaseOutcome> {
    let download_error = |message: String| Error::Download {
        plugin: entry.name.clone(),
        message,
    };

    let git_url = entry.git_url.as_deref().ok_or_else(|| {
        download_error(format!(
            "enabled plugin has no git_url (manifest line {})",
            entry.line
        ))
    })?;
    validate_git_url(git_url).map_err(download_error)?;

    match checkout_state(target) {
        CheckoutState::Missing => clone(runner, settings, entry, git_url, target).await,
        CheckoutState::Checkout => {
            let origin = runner
                .run(
                    &git(settings)
                        .args(["remote", "get-url", "origin"])
                        .current_dir(target),
                )
                .await?;
            if !origin.success() {
                return Err(download_error(format!(
                    "cannot read origin of existing checkout {}: {}",
                    target.display(),
                    origin.failure_message()
                )));
            }

            if normalize_remote(&origin.stdout) != normalize_remote(git_url) {
                return Err(download_error(format!(
                    "{} is a checkout of {}, not {git_url}",
                    target.display(),
                    origin.stdout.trim()
                )));
            }

            if settings.update_existing {
                update(runner, settings, entry, target).await
            } else {
                tracing::info!(plugin = %entry.name, path = %target.display(), "already downloaded");
                Ok(PhaseOutcome::skipped("already downloaded"))
            }
        }
        CheckoutState::Foreign => Err(download_error(format!(
            "{} exists and is not a git checkout",
            target.display()
        ))),
    }
}

async fn clone(
    runner: &dyn CommandRunner,
    settings: &GitSettings,
    entry: &PluginEntry,
    git_url: &str,
    target: &Path,
) -> Result<PhaseOutcome> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    // Removed on drop, so a failed clone leaves nothing behind
    let staging = tempfile::Builder::new()
        .prefix(&format!(".{}-", entry.name))
        .tempdir_in(parent)?;
    let checkout = staging.path().join("checkout");

    let mut spec = git(settings).arg("clone");
    if settings.shallow {
        spec = spec.args(["--depth", "1"]);
    }
    if let Some(branch) = &entry.git_branch {
        spec = spec.args(["--branch", branch.as_str()]);
    }
    spec = spec
        .arg("--")
        .arg(git_url)
        .arg(checkout.display().to_string());

    let output = runner.run(&spec).await?;
    if !output.success() {
        return Err(Error::Download {
            plugin: entry.name.clone(),
            message: format!("git clone {git_url}: {}", output.failure_message()),
        });
    }

    std::fs::rename(&checkout, target)?;
    tracing::info!(
        plugin = %entry.name,
        url = %git_url,
        branch = ?entry.git_branch,
        path = %target.display(),
        "downloaded plugin"
    );

    Ok(PhaseOutcome::completed(match &entry.git_branch {
        Some(branch) => format!("cloned {git_url} ({branch})"),
        None => format!("cloned {git_url}"),
    }))
}

async fn update(
    runner: &dyn CommandRunner,
    settings: &GitSettings,
    entry: &PluginEntry,
    target: &Path,
) -> Result<PhaseOutcome> {
    let refspec = entry.git_branch.as_deref().unwrap_or("HEAD");

    // Unlimited depth: a depth-limited fetch has no history to fast-forward along
    let fetch = git(settings)
        .args(["fetch", "origin", refspec])
        .current_dir(target);

    let merge = git(settings)
        .args(["merge", "--ff-only", "FETCH_HEAD"])
        .current_dir(target);

    for spec in [fetch, merge] {
        let output = runner.run(&spec).await?;
        if !output.success() {
            return Err(Error::Download {
                plugin: entry.name.clone(),
                message: format!("{}: {}", spec.display(), output.failure_message()),
            });
        }
    }

    tracing::info!(plugin = %entry.name, refspec = %refspec, "updated existing checkout");
    Ok(PhaseOutcome::completed(format!("fast-forwarded to origin/{refspec}")))
}
