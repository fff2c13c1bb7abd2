//! Subprocess execution via tokio

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::{Error, Result};

/// A fully described subprocess invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory (inherits the driver's when unset)
    pub cwd: Option<PathBuf>,
    /// Variables set on the child
    pub env: Vec<(String, String)>,
    /// Start the child from an empty environment
    pub clear_env: bool,
    /// Kill the child after this long
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Create a spec for a program
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set a child environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the time limit
    #[must_use]
    pub const fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Shell-like rendering for logs
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{part}'")
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished subprocess
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (`None` when killed by a signal)
    pub code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the process exited with status zero
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Short failure description including the tail of stderr
    #[must_use]
    pub fn failure_message(&self) -> String {
        let code = self
            .code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let tail = output_tail(&self.stderr);
        if tail.is_empty() {
            format!("exited with code {code}")
        } else {
            format!("exited with code {code}: {tail}")
        }
    }
}

/// Last few lines of captured output, joined on one line
#[must_use]
pub fn output_tail(text: &str) -> String {
    let tail: Vec<&str> = text
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .take(TAIL_LINES)
        .collect();
    tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
}

/// Seam through which every external command is run
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion
    ///
    /// A non-zero exit is reported in the output, not as an error.
    ///
    /// # Errors
    ///
    /// Returns error if the process cannot be spawned or exceeds its timeout
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as real child processes
///
/// Output is forwarded to the log line by line while the child runs. Timed
/// commands get their own process group, and the whole group is killed when
/// the limit is hit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::info!(command = %spec.display(), cwd = ?spec.cwd, "+ running");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if spec.clear_env {
            command.env_clear();
        }
        command.envs(spec.env.iter().map(|(k, v)| (k, v)));

        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        #[cfg(unix)]
        if spec.timeout.is_some() {
            command.process_group(0);
        }

        let spawn_error = |source| Error::Spawn {
            command: spec.program.clone(),
            source,
        };

        let mut child = command.spawn().map_err(spawn_error)?;
        let stdout = forward(child.stdout.take(), &spec.program, Stream::Stdout);
        let stderr = forward(child.stderr.take(), &spec.program, Stream::Stderr);

        let status = match spec.timeout {
            Some(limit) => {
                let waited = timeout(limit, child.wait()).await;
                if let Ok(status) = waited {
                    status
                } else {
                    kill_tree(&mut child).await;
                    let (stdout, stderr) = (stdout.finish(true).await, stderr.finish(true).await);
                    let output = if stderr.trim().is_empty() {
                        output_tail(&stdout)
                    } else {
                        output_tail(&stderr)
                    };
                    tracing::warn!(command = %spec.display(), ?limit, "command timed out");
                    return Err(Error::Timeout {
                        command: spec.display(),
                        timeout: limit,
                        output,
                    });
                }
            }
            None => child.wait().await,
        }
        .map_err(spawn_error)?;

        Ok(CommandOutput {
            code: status.code(),
            stdout: stdout.finish(false).await,
            stderr: stderr.finish(false).await,
        })
    }
}

/// Number of output lines kept for failure messages
const TAIL_LINES: usize = 5;

/// How long to wait for pipes to drain after a timed-out child was killed
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Output captured by a background reader
struct Captured {
    buffer: Arc<Mutex<String>>,
    reader: Option<JoinHandle<()>>,
}

impl Captured {
    /// Wait for the reader to hit end of file and return everything read
    ///
    /// After a kill the wait is bounded, since a detached descendant may still
    /// hold the pipe open.
    async fn finish(self, killed: bool) -> String {
        if let Some(reader) = self.reader {
            if killed {
                if timeout(DRAIN_GRACE, reader).await.is_err() {
                    tracing::debug!("output reader still open after kill");
                }
            } else if let Err(e) = reader.await {
                tracing::debug!(error = %e, "output reader failed");
            }
        }
        let buffer = self.buffer.lock().await;
        buffer.clone()
    }
}

fn forward<R>(pipe: Option<R>, program: &str, stream: Stream) -> Captured
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(String::new()));
    let reader = pipe.map(|pipe| {
        let buffer = Arc::clone(&buffer);
        let program = program.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        tracing::info!(program = %program, stream = stream.as_str(), "{line}");
                        let mut buffer = buffer.lock().await;
                        buffer.push_str(&line);
                        buffer.push('\n');
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(program = %program, error = %e, "stopped reading output");
                        break;
                    }
                }
            }
        })
    });
    Captured { buffer, reader }
}

/// Kill a timed-out child together with everything it started
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            tracing::debug!(pid, error = %e, "failed to kill process group");
        }
    }

    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "failed to kill child");
    }
}
