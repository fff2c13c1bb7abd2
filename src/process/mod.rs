//! External command execution
//!
//! Every git invocation and hook script goes through [`CommandRunner`], so the
//! lifecycle driver can be exercised without spawning anything.

mod runner;
mod sandbox;

pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use sandbox::{DEFAULT_ENV_ALLOWLIST, HookSandbox};
