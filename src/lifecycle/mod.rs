//! Plugin lifecycle driver
//!
//! Applies the lifecycle phases to every enabled manifest row, in manifest
//! order:
//!
//! ```text
//! download → dependencies_before_vips → dependencies_before_python → install
//! ```
//!
//! A run is fail-fast: the first failure stops it, and no later phase is ever
//! applied after an earlier one failed. With `keep_going` the remaining
//! plugins of the current phase still run, but the next phase does not start.

pub mod download;
pub mod hooks;
mod phase;
mod report;

pub use phase::Phase;
pub use report::{PhaseOutcome, ReportEntry, RunReport};

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::Instrument;

use crate::config::Settings;
use crate::plugins::{PluginDescriptor, PluginEntry, PluginManifest, PluginStatus, inspect};
use crate::process::{CommandRunner, CommandSpec, HookSandbox, ProcessRunner};
use crate::{Error, Result};

/// Drives plugin lifecycle phases through a [`CommandRunner`]
pub struct LifecycleDriver<R = ProcessRunner> {
    settings: Settings,
    sandbox: HookSandbox,
    runner: R,
}

impl LifecycleDriver<ProcessRunner> {
    /// Driver that spawns real processes
    #[must_use]
    pub fn with_process_runner(settings: Settings) -> Self {
        Self::new(settings, ProcessRunner)
    }
}

impl<R: CommandRunner> LifecycleDriver<R> {
    /// Create a driver
    #[must_use]
    pub fn new(settings: Settings, runner: R) -> Self {
        let sandbox = HookSandbox::new(&settings.hooks.env_allowlist, settings.hooks.timeout);
        Self {
            settings,
            sandbox,
            runner,
        }
    }

    /// Driver settings
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Underlying command runner
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Apply a single phase to every enabled plugin
    pub async fn run_phase(&self, manifest: &PluginManifest, phase: Phase) -> RunReport {
        self.run_phases(manifest, &[phase]).await
    }

    /// Apply all four phases in order
    pub async fn run_all(&self, manifest: &PluginManifest) -> RunReport {
        self.run_phases(manifest, &Phase::ALL).await
    }

    /// Apply `phases` phase-major: every enabled plugin finishes a phase
    /// before any plugin starts the next one
    pub async fn run_phases(&self, manifest: &PluginManifest, phases: &[Phase]) -> RunReport {
        let enabled: Vec<&PluginEntry> = manifest.enabled().collect();
        let mut report = RunReport::new(phases, manifest.len() - enabled.len());

        if enabled.is_empty() {
            tracing::info!("no enabled plugins, nothing to do");
        }

        'phases: for &phase in phases {
            tracing::info!(%phase, plugins = enabled.len(), "starting phase");

            for entry in &enabled {
                let span = tracing::info_span!("plugin", plugin = %entry.name, %phase);

                match self.apply(entry, phase).instrument(span).await {
                    Ok(outcome) => {
                        tracing::debug!(plugin = %entry.name, %phase, ?outcome, "phase finished");
                        report.record(&entry.name, phase, outcome);
                    }
                    Err(e) => {
                        tracing::error!(plugin = %entry.name, %phase, error = %e, "phase failed");
                        report.record(
                            &entry.name,
                            phase,
                            PhaseOutcome::Failed {
                                error: e.to_string(),
                            },
                        );
                        if !self.settings.keep_going {
                            report.aborted = true;
                            break 'phases;
                        }
                    }
                }
            }

            if report.failures().next().is_some() {
                report.aborted = phases.last() != Some(&phase);
                break;
            }
        }

        report.finish();
        report
    }

    /// On-disk state of every manifest row
    #[must_use]
    pub fn status(&self, manifest: &PluginManifest) -> Vec<PluginStatus> {
        inspect(&self.settings.install_path, manifest)
    }

    /// Apply one phase to one plugin
    ///
    /// # Errors
    ///
    /// Returns error if the phase fails for this plugin
    pub async fn apply(&self, entry: &PluginEntry, phase: Phase) -> Result<PhaseOutcome> {
        let target = self.settings.install_path.join(&entry.name);

        if phase == Phase::Download {
            return download::download(&self.runner, &self.settings.git, entry, &target).await;
        }

        if !target.is_dir() {
            return Err(Error::NotDownloaded(entry.name.clone()));
        }
        let plugin_dir = target.canonicalize()?;

        let descriptor = PluginDescriptor::load(&entry.name, &plugin_dir)?;
        if let Some(message) = descriptor.requires.unmet() {
            return Err(Error::Requirement {
                plugin: entry.name.clone(),
                message,
            });
        }

        let hook = hooks::find_hook(&plugin_dir, &descriptor, phase).map_err(|message| {
            Error::Descriptor {
                plugin: entry.name.clone(),
                message,
            }
        })?;
        match hook {
            Some(hook) => {
                self.run_hook(entry, phase, &plugin_dir, &hook, &descriptor)
                    .await
            }
            None if phase == Phase::Install => {
                self.run_default_install(entry, &plugin_dir, &descriptor).await
            }
            None => {
                tracing::debug!("no hook");
                Ok(PhaseOutcome::skipped("no hook"))
            }
        }
    }

    async fn run_hook(
        &self,
        entry: &PluginEntry,
        phase: Phase,
        plugin_dir: &Path,
        hook: &Path,
        descriptor: &PluginDescriptor,
    ) -> Result<PhaseOutcome> {
        let phase_error = |message: String| {
            if phase == Phase::Install {
                Error::Install {
                    plugin: entry.name.clone(),
                    message,
                }
            } else {
                Error::Hook {
                    plugin: entry.name.clone(),
                    phase: phase.as_str(),
                    message,
                }
            }
        };

        let (program, args) = hooks::determine_executor(hook, &self.settings.hooks.python)
            .map_err(phase_error)?;

        let mut vars = hooks::hook_env(entry, plugin_dir, &self.settings.install_path, phase);
        vars.extend(hooks::required_env(descriptor));
        let spec = CommandSpec::new(program).args(args);
        let output = hooks::run_confined(
            &self.runner,
            &self.sandbox,
            spec,
            plugin_dir,
            vars,
            descriptor.timeout_secs.map(Duration::from_secs),
        )
        .await?;

        let rel = relative_to(hook, plugin_dir);
        if output.success() {
            tracing::info!(hook = %rel.display(), "hook completed");
            Ok(PhaseOutcome::completed(format!("ran {}", rel.display())))
        } else {
            Err(phase_error(format!(
                "{}: {}",
                rel.display(),
                output.failure_message()
            )))
        }
    }

    async fn run_default_install(
        &self,
        entry: &PluginEntry,
        plugin_dir: &Path,
        descriptor: &PluginDescriptor,
    ) -> Result<PhaseOutcome> {
        let command = self.settings.install_command_for(plugin_dir);
        let Some((program, args)) = command.split_first() else {
            return Err(Error::Config("install command is empty".to_string()));
        };

        let spec = CommandSpec::new(program.as_str()).args(args.iter().cloned());
        let rendered = spec.display();
        let mut vars =
            hooks::hook_env(entry, plugin_dir, &self.settings.install_path, Phase::Install);
        vars.extend(hooks::required_env(descriptor));
        let output = hooks::run_confined(
            &self.runner,
            &self.sandbox,
            spec,
            plugin_dir,
            vars,
            descriptor.timeout_secs.map(Duration::from_secs),
        )
        .await?;

        if output.success() {
            Ok(PhaseOutcome::completed(rendered))
        } else {
            Err(Error::Install {
                plugin: entry.name.clone(),
                message: format!("{rendered}: {}", output.failure_message()),
            })
        }
    }
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map_or_else(|_| path.to_path_buf(), Path::to_path_buf)
}

impl<R> std::fmt::Debug for LifecycleDriver<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleDriver")
            .field("install_path", &self.settings.install_path)
            .field("keep_going", &self.settings.keep_going)
            .finish_non_exhaustive()
    }
}
