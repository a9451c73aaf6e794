//! The uniform isolate contract shared by every backend.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Child;

use crate::cancel::CancelToken;
use crate::error::TeeResult;
use crate::policy::TeePolicy;

/// One command to run inside an isolate.
#[derive(Clone, Default)]
pub struct ExecRequest {
    pub command: String,
    pub args: Vec<String>,
    /// Extra variables for this call only, layered over the policy env.
    pub env: BTreeMap<String, String>,
    /// Working directory relative to the isolate root.
    pub cwd: Option<String>,
}

impl ExecRequest {
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

// `env` may carry injected credential values, so only keys are shown.
impl std::fmt::Debug for ExecRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecRequest")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("cwd", &self.cwd)
            .finish()
    }
}

/// Captured result of a finished command. Exit codes are passed through as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process was terminated by a signal.
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A long-running child started through [`Isolate::spawn`].
///
/// The process is killed when this handle is dropped.
#[derive(Debug)]
pub struct SpawnedProcess {
    child: Child,
    command: String,
}

impl SpawnedProcess {
    pub(crate) fn new(child: Child, command: String) -> Self {
        Self { child, command }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether the process is still alive.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Exit status if the process has exited. Does not block.
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Kill and reap the process. A process that already exited is not an error.
    pub async fn kill(&mut self) -> TeeResult<()> {
        match self.child.try_wait()? {
            Some(_) => Ok(()),
            None => {
                self.child.kill().await?;
                Ok(())
            }
        }
    }
}

/// Start/stop/execute/copy contract over every isolation backend.
///
/// Methods take `&self` so an isolate can be shared behind an `Arc` while a
/// command runs; `stop` cancels any in-flight `execute`.
#[async_trait]
pub trait Isolate: Send + Sync {
    fn policy(&self) -> &TeePolicy;

    fn is_started(&self) -> bool;

    /// Root of the private working directory while started.
    fn work_dir(&self) -> Option<PathBuf>;

    async fn start(&self) -> TeeResult<()>;

    /// Release the working directory and cancel in-flight executions.
    /// Stopping a stopped isolate is a no-op.
    async fn stop(&self) -> TeeResult<()>;

    async fn execute(&self, command: &str, args: &[String]) -> TeeResult<ExecOutput> {
        self.execute_cancellable(
            ExecRequest::new(command, args.iter().cloned()),
            CancelToken::never(),
        )
        .await
    }

    /// Run one command under the policy's wall-clock timeout, also ending
    /// early when `cancel` fires.
    async fn execute_cancellable(
        &self,
        request: ExecRequest,
        cancel: CancelToken,
    ) -> TeeResult<ExecOutput>;

    /// Start a long-running process that outlives this call.
    async fn spawn(&self, request: ExecRequest) -> TeeResult<SpawnedProcess>;

    /// Copy a host file to `dest` (relative to the isolate root).
    async fn copy_file_in(&self, host_path: &Path, dest: &str) -> TeeResult<PathBuf>;

    /// Copy `src` (relative to the isolate root) out to a host path.
    async fn copy_file_out(&self, src: &str, host_path: &Path) -> TeeResult<()>;

    /// Write bytes to `dest` (relative to the isolate root).
    async fn write_file(&self, dest: &str, contents: &[u8]) -> TeeResult<PathBuf>;
}
