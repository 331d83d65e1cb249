// src/exec/process.rs

//! External process invocation.
//!
//! Builders and deployers describe what to run as an [`Invocation`] and hand
//! it to a [`ProcessRunner`]. Production uses [`RealProcessRunner`]; tests
//! substitute a recording fake.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{Result, RolloutError};
use crate::types::Stage;

/// Boxed future used at the backend trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One external command to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    /// Extra environment on top of the inherited one.
    pub env: Vec<(String, String)>,
    /// Bytes piped to STDIN; `None` leaves STDIN closed.
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Add `KEY=VALUE` entries; entries without `=` are ignored.
    pub fn env_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for entry in entries {
            if let Some((k, v)) = entry.as_ref().split_once('=') {
                self.env.push((k.to_string(), v.to_string()));
            }
        }
        self
    }

    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs external commands.
pub trait ProcessRunner: Send + Sync + fmt::Debug {
    /// Run `invocation` to completion.
    ///
    /// A non-zero exit is NOT an error here; see [`run_checked`]. When
    /// `cancel` fires the child is killed and `RolloutError::Cancelled` is
    /// returned.
    fn run<'a>(
        &'a self,
        invocation: Invocation,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ProcessOutput>>;
}

/// Spawns real OS processes with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct RealProcessRunner;

impl ProcessRunner for RealProcessRunner {
    fn run<'a>(
        &'a self,
        invocation: Invocation,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ProcessOutput>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(RolloutError::Cancelled);
            }

            info!(cmd = %invocation, dir = ?invocation.dir, "running");

            let mut cmd = Command::new(&invocation.program);
            cmd.args(&invocation.args)
                .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(if invocation.stdin.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                })
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if let Some(dir) = &invocation.dir {
                cmd.current_dir(dir);
            }

            let mut child = cmd.spawn().map_err(|e| {
                RolloutError::Other(anyhow::anyhow!(
                    "spawning `{}`: {e}",
                    invocation.program
                ))
            })?;

            if let (Some(bytes), Some(mut pipe)) = (invocation.stdin.clone(), child.stdin.take()) {
                let program = invocation.program.clone();
                tokio::spawn(async move {
                    if let Err(e) = pipe.write_all(&bytes).await {
                        warn!(cmd = %program, error = %e, "writing stdin failed");
                    }
                    // Dropping the pipe closes STDIN.
                });
            }

            // Dropping the child on cancellation kills it (kill_on_drop).
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(cmd = %invocation, "cancelled; killing process");
                    Err(RolloutError::Cancelled)
                }
                output = child.wait_with_output() => {
                    let output = output?;
                    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                    for line in stderr.lines() {
                        debug!(cmd = %invocation.program, "stderr: {line}");
                    }
                    debug!(
                        cmd = %invocation.program,
                        exit_code = ?output.status.code(),
                        "process exited"
                    );
                    Ok(ProcessOutput {
                        code: output.status.code(),
                        stdout: output.stdout,
                        stderr,
                    })
                }
            }
        })
    }
}

/// Run and turn a non-zero exit into a `BackendExecution` error naming the
/// backend and stage.
pub async fn run_checked(
    runner: &dyn ProcessRunner,
    invocation: Invocation,
    cancel: &CancellationToken,
    backend: &str,
    stage: Stage,
) -> Result<ProcessOutput> {
    let display = invocation.to_string();
    let output = runner.run(invocation, cancel).await?;
    if output.success() {
        return Ok(output);
    }

    let code = output
        .code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());
    let detail = output.stderr.trim();
    let message = if detail.is_empty() {
        format!("`{display}` exited with {code}")
    } else {
        format!("`{display}` exited with {code}: {detail}")
    };
    Err(RolloutError::backend(backend, stage, message))
}
