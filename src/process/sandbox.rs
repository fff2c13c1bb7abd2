//! Isolation policy applied to plugin-supplied hook code
//!
//! Hooks come from third-party repositories. They never run inline: each one
//! is a child process with a rebuilt environment, a fixed working directory,
//! no stdin and a time limit.

use std::time::Duration;

use super::runner::CommandSpec;

/// Variables passed through to hooks unless configured otherwise
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "LC_ALL",
    "TMPDIR",
    "http_proxy",
    "https_proxy",
    "no_proxy",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
];

/// Environment and time limits for hook processes
#[derive(Debug, Clone)]
pub struct HookSandbox {
    allowlist: Vec<String>,
    timeout: Duration,
}

impl HookSandbox {
    /// Create a sandbox passing the default allowlist plus `extra_env`
    #[must_use]
    pub fn new(extra_env: &[String], timeout: Duration) -> Self {
        let mut allowlist: Vec<String> = DEFAULT_ENV_ALLOWLIST
            .iter()
            .map(ToString::to_string)
            .collect();
        for var in extra_env {
            if !allowlist.contains(var) {
                allowlist.push(var.clone());
            }
        }

        Self { allowlist, timeout }
    }

    /// Default time limit for hooks
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Variables passed through from the driver's environment
    #[must_use]
    pub fn allowlist(&self) -> &[String] {
        &self.allowlist
    }

    /// Confine a command: clear its environment, re-add allowlisted variables
    /// from the driver's environment, then the hook-specific `vars`
    #[must_use]
    pub fn confine(
        &self,
        spec: CommandSpec,
        vars: Vec<(String, String)>,
        timeout: Option<Duration>,
    ) -> CommandSpec {
        let mut env: Vec<(String, String)> = self
            .allowlist
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.clone(), value)))
            .collect();
        env.extend(vars);
        env.extend(spec.env);

        CommandSpec {
            env,
            clear_env: true,
            timeout: Some(timeout.unwrap_or(self.timeout)),
            ..spec
        }
    }
}
