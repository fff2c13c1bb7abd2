//! Shared test utilities

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pims_plugins::{
    CommandOutput, CommandRunner, CommandSpec, LifecycleDriver, Phase, PluginManifest, Settings,
};
use tokio::sync::Mutex;

/// File inside a fake checkout holding its origin URL
const ORIGIN_FILE: &str = "origin";

/// Predicate selecting commands that should fail
type FailRule = Box<dyn Fn(&CommandSpec) -> bool + Send + Sync>;

/// Command runner that records invocations and fakes git
///
/// `git clone` creates a checkout with a `.git` directory and, when
/// `with_hooks` is set, a shell hook for every phase. Hooks and install
/// commands are not executed.
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<CommandSpec>>>,
    fail: Vec<FailRule>,
    with_hooks: bool,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail: Vec::new(),
            with_hooks: true,
        }
    }

    /// Cloned plugins ship no hook scripts
    pub fn without_hooks(mut self) -> Self {
        self.with_hooks = false;
        self
    }

    /// Fail every command matching `rule`
    pub fn failing(mut self, rule: impl Fn(&CommandSpec) -> bool + Send + Sync + 'static) -> Self {
        self.fail.push(Box::new(rule));
        self
    }

    pub async fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().await.clone()
    }

    /// `(plugin, phase)` of every hook or install invocation, in order
    pub async fn hook_calls(&self) -> Vec<(String, String)> {
        self.calls()
            .await
            .iter()
            .filter_map(|spec| Some((env_value(spec, "PIMS_PLUGIN_NAME")?, env_value(spec, "PIMS_PLUGIN_PHASE")?)))
            .collect()
    }

    /// Plugins cloned, in order
    pub async fn clones(&self) -> Vec<String> {
        self.calls()
            .await
            .iter()
            .filter(|spec| spec.args.first().map(String::as_str) == Some("clone"))
            .filter_map(|spec| spec.args.iter().position(|a| a == "--").map(|i| spec.args[i + 1].clone()))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> pims_plugins::Result<CommandOutput> {
        self.calls.lock().await.push(spec.clone());

        if self.fail.iter().any(|rule| rule(spec)) {
            return Ok(CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "simulated failure".to_string(),
            });
        }

        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["clone", .., "--", url, dest] => {
                fake_checkout(Path::new(dest), url, self.with_hooks);
                Ok(success(""))
            }
            ["remote", "get-url", "origin"] => {
                let cwd = spec.cwd.as_ref().expect("git remote runs in the checkout");
                let origin = std::fs::read_to_string(cwd.join(".git").join(ORIGIN_FILE))
                    .expect("fake checkout has an origin");
                Ok(success(&format!("{origin}\n")))
            }
            _ => Ok(success("")),
        }
    }
}

fn success(stdout: &str) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn env_value(spec: &CommandSpec, key: &str) -> Option<String> {
    spec.env
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

/// Lay out what a clone of `url` would produce
pub fn fake_checkout(dest: &Path, url: &str, with_hooks: bool) {
    std::fs::create_dir_all(dest.join(".git")).unwrap();
    std::fs::write(dest.join(".git").join(ORIGIN_FILE), url).unwrap();

    if with_hooks {
        let scripts = dest.join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();
        for phase in &Phase::ALL[1..] {
            std::fs::write(
                scripts.join(format!("{}.sh", phase.script_stem())),
                "#!/bin/sh\nexit 0\n",
            )
            .unwrap();
        }
    }
}

/// Settings rooted at a test install directory
pub fn settings(install_path: &Path) -> Settings {
    Settings::new(install_path)
}

pub fn driver(install_path: &Path, runner: RecordingRunner) -> LifecycleDriver<RecordingRunner> {
    LifecycleDriver::new(settings(install_path), runner)
}

pub fn manifest(csv: &str) -> PluginManifest {
    PluginManifest::parse(csv).expect("valid test manifest")
}

/// Whether a command targets the given plugin
pub fn targets(spec: &CommandSpec, install_path: &Path, plugin: &str) -> bool {
    let dir: PathBuf = install_path.join(plugin);
    env_value(spec, "PIMS_PLUGIN_NAME").as_deref() == Some(plugin)
        || spec.cwd.as_deref() == Some(dir.as_path())
        || spec.args.iter().any(|a| a.contains(&format!("/{plugin}.git")))
}
