//! Command execution utilities for scheduler binaries.
//!
//! Every interaction with `qsub`, `qstat` and `qdel` goes through a
//! [`ProcessRunner`], so the rest of the workspace never spawns processes
//! directly and tests can substitute a [`ScriptedRunner`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Error type for command execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Failed to execute {command}: {error}")]
    Execution { command: String, error: String },
    #[error("Command {command} failed: {stderr}")]
    Failed { command: String, stderr: String },
}

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// A successful run printing `stdout`.
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// A failed run with the given exit code and stderr text.
    pub fn failure(exit_code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<Vec<u8>>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Boxed future returned by [`ProcessRunner::run`].
pub type RunFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, CommandError>> + Send + 'a>>;

/// Runs an external program and captures its output.
///
/// A non-zero exit status is not an error at this level: callers decide
/// whether a failed run is fatal (e.g. `qstat` exits non-zero when one of
/// several ids is unknown but still prints the others).
pub trait ProcessRunner: Send + Sync {
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> RunFuture<'a>;
}

/// [`ProcessRunner`] spawning real processes with tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

impl ProcessRunner for TokioRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> RunFuture<'a> {
        Box::pin(async move {
            tracing::debug!("Running `{} {}`", program, args.join(" "));
            let output = Command::new(program)
                .args(args)
                .output()
                .await
                .map_err(|e| CommandError::Execution {
                    command: program.to_string(),
                    error: e.to_string(),
                })?;

            Ok(CommandOutput {
                exit_code: output.status.code(),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        })
    }
}

/// Execute a command and return stdout as a string.
///
/// Convenience wrapper treating a non-zero exit as [`CommandError::Failed`].
pub async fn run_command(
    runner: &dyn ProcessRunner,
    program: &str,
    args: &[String],
) -> Result<String, CommandError> {
    let output = runner.run(program, args).await?;

    if !output.is_success() {
        return Err(CommandError::Failed {
            command: program.to_string(),
            stderr: output.stderr_lossy(),
        });
    }

    Ok(output.stdout_lossy())
}

/// One recorded call made through a [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

/// [`ProcessRunner`] replaying canned outputs, for tests and dry runs.
///
/// Responses are queued per program name. When a program's queue is empty the
/// repeated response set with [`ScriptedRunner::repeat`] is used, if any.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    queued: Mutex<HashMap<String, VecDeque<Result<CommandOutput, CommandError>>>>,
    repeated: Mutex<HashMap<String, CommandOutput>>,
    invocations: Mutex<Vec<Invocation>>,
    delay: Option<Duration>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every run, to widen race windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue one response for `program`.
    pub fn push(&self, program: &str, output: CommandOutput) -> &Self {
        self.queue(program, Ok(output))
    }

    /// Queue a spawn failure for `program`.
    pub fn push_spawn_error(&self, program: &str, error: &str) -> &Self {
        self.queue(
            program,
            Err(CommandError::Execution {
                command: program.to_string(),
                error: error.to_string(),
            }),
        )
    }

    /// Response returned for `program` whenever its queue is empty.
    pub fn repeat(&self, program: &str, output: CommandOutput) -> &Self {
        lock(&self.repeated).insert(program.to_string(), output);
        self
    }

    /// All invocations so far, in call order.
    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.invocations).clone()
    }

    /// Number of times `program` was run.
    pub fn count(&self, program: &str) -> usize {
        lock(&self.invocations)
            .iter()
            .filter(|i| i.program == program)
            .count()
    }

    fn queue(&self, program: &str, response: Result<CommandOutput, CommandError>) -> &Self {
        lock(&self.queued)
            .entry(program.to_string())
            .or_default()
            .push_back(response);
        self
    }

    fn next_response(&self, program: &str) -> Result<CommandOutput, CommandError> {
        if let Some(response) = lock(&self.queued)
            .get_mut(program)
            .and_then(|queue| queue.pop_front())
        {
            return response;
        }
        lock(&self.repeated)
            .get(program)
            .cloned()
            .ok_or_else(|| CommandError::Execution {
                command: program.to_string(),
                error: "no scripted response".to_string(),
            })
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> RunFuture<'a> {
        Box::pin(async move {
            lock(&self.invocations).push(Invocation {
                program: program.to_string(),
                args: args.to_vec(),
            });
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.next_response(program)
        })
    }
}

// A poisoned lock only means another test thread panicked mid-push.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
