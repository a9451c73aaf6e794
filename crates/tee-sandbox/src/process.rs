//! Process backend: a private temp directory, a scrubbed environment,
//! `setrlimit` ceilings and a wall-clock timeout per command.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::cancel::{cancel_pair, CancelHandle, CancelToken};
use crate::error::{TeeError, TeeResult};
use crate::isolate::{ExecOutput, ExecRequest, Isolate, SpawnedProcess};
use crate::policy::TeePolicy;

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Default)]
struct State {
    work_dir: Option<TempDir>,
    stop: Option<CancelHandle>,
}

/// Isolate that runs commands as host child processes.
pub struct ProcessIsolate {
    policy: TeePolicy,
    host_path: String,
    state: Mutex<State>,
}

impl ProcessIsolate {
    /// Build an isolate for an already validated policy.
    pub fn new(policy: TeePolicy) -> Self {
        let host_path = std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string());
        Self {
            policy,
            host_path,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Working directory and stop token, or `NotStarted`.
    fn running(&self, op: &str) -> TeeResult<(PathBuf, CancelToken)> {
        let state = self.state();
        match (&state.work_dir, &state.stop) {
            (Some(dir), Some(stop)) => Ok((dir.path().to_path_buf(), stop.token())),
            _ => {
                error!(operation = op, "isolate used before start");
                Err(TeeError::NotStarted)
            }
        }
    }

    fn build_command(&self, root: &Path, request: &ExecRequest) -> TeeResult<Command> {
        let cwd = match &request.cwd {
            Some(rel) => resolve_inside(root, rel)?,
            None => root.to_path_buf(),
        };
        let tmp = root.join(".tmp");

        let mut env: BTreeMap<String, String> = BTreeMap::new();
        env.insert("PATH".to_string(), self.host_path.clone());
        env.insert("HOME".to_string(), root.display().to_string());
        env.insert("TMPDIR".to_string(), tmp.display().to_string());
        env.extend(self.policy.capability_env());
        env.extend(self.policy.env.clone());
        env.extend(request.env.clone());

        let mut cmd = Command::new(&request.command);
        cmd.args(&request.args)
            .current_dir(cwd)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        apply_rlimits(&mut cmd, &self.policy);

        Ok(cmd)
    }
}

impl Drop for ProcessIsolate {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(stop) = state.stop.take() {
            stop.cancel();
        }
        // TempDir removes the directory on drop.
        state.work_dir.take();
    }
}

#[async_trait]
impl Isolate for ProcessIsolate {
    fn policy(&self) -> &TeePolicy {
        &self.policy
    }

    fn is_started(&self) -> bool {
        self.state().work_dir.is_some()
    }

    fn work_dir(&self) -> Option<PathBuf> {
        self.state().work_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    async fn start(&self) -> TeeResult<()> {
        let mut state = self.state();
        if state.work_dir.is_some() {
            return Ok(());
        }

        let dir = tempfile::Builder::new().prefix("tee-").tempdir()?;
        std::fs::create_dir_all(dir.path().join(".tmp"))?;
        info!(
            work_dir = %dir.path().display(),
            isolation = %self.policy.isolation,
            memory_mb = self.policy.resources.memory_mb,
            timeout_secs = self.policy.resources.timeout_secs,
            "isolate started"
        );

        let (handle, _token) = cancel_pair();
        state.work_dir = Some(dir);
        state.stop = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> TeeResult<()> {
        let (dir, stop) = {
            let mut state = self.state();
            (state.work_dir.take(), state.stop.take())
        };
        if let Some(stop) = stop {
            stop.cancel();
        }
        if let Some(dir) = dir {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(work_dir = %path.display(), error = %e, "failed to remove isolate directory");
                return Err(TeeError::Io(e));
            }
            info!(work_dir = %path.display(), "isolate stopped");
        }
        Ok(())
    }

    async fn execute_cancellable(
        &self,
        request: ExecRequest,
        cancel: CancelToken,
    ) -> TeeResult<ExecOutput> {
        let (root, stopped) = self.running("execute")?;
        let mut cmd = self.build_command(&root, &request)?;
        let limit = self.policy.resources.timeout();

        debug!(command = %request.command, args = ?request.args, "executing in isolate");
        let child = cmd.spawn().map_err(|source| TeeError::Spawn {
            command: request.command.clone(),
            source,
        })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            res = tokio::time::timeout(limit, child.wait_with_output()) => match res {
                Ok(output) => output?,
                Err(_) => {
                    warn!(command = %request.command, timeout_secs = limit.as_secs(), "isolate command timed out");
                    return Err(TeeError::Timeout { timeout_secs: limit.as_secs() });
                }
            },
            _ = cancel.cancelled() => {
                return Err(TeeError::Killed { reason: "cancelled by caller".to_string() });
            }
            _ = stopped.cancelled() => {
                return Err(TeeError::Killed { reason: "isolate stopped".to_string() });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(command = %request.command, exit_code, "isolate command finished");
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code,
        })
    }

    async fn spawn(&self, request: ExecRequest) -> TeeResult<SpawnedProcess> {
        let (root, _stopped) = self.running("spawn")?;
        let mut cmd = self.build_command(&root, &request)?;
        cmd.stdout(Stdio::null()).stderr(Stdio::null());

        let child = cmd.spawn().map_err(|source| TeeError::Spawn {
            command: request.command.clone(),
            source,
        })?;
        info!(command = %request.command, pid = ?child.id(), "spawned long-running process");
        Ok(SpawnedProcess::new(child, request.command))
    }

    async fn copy_file_in(&self, host_path: &Path, dest: &str) -> TeeResult<PathBuf> {
        let (root, _) = self.running("copy_file_in")?;
        let target = resolve_inside(&root, dest)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(host_path, &target).await?;
        Ok(target)
    }

    async fn copy_file_out(&self, src: &str, host_path: &Path) -> TeeResult<()> {
        let (root, _) = self.running("copy_file_out")?;
        let source = resolve_inside(&root, src)?;
        tokio::fs::copy(&source, host_path).await?;
        Ok(())
    }

    async fn write_file(&self, dest: &str, contents: &[u8]) -> TeeResult<PathBuf> {
        let (root, _) = self.running("write_file")?;
        let target = resolve_inside(&root, dest)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, contents).await?;
        Ok(target)
    }
}

/// Join a relative path onto `root`, rejecting anything that could leave it.
fn resolve_inside(root: &Path, rel: &str) -> TeeResult<PathBuf> {
    let rel_path = Path::new(rel);
    let escapes = rel_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || rel.is_empty() {
        return Err(TeeError::PathEscape(rel_path.to_path_buf()));
    }
    Ok(root.join(rel_path))
}

#[cfg(unix)]
fn apply_rlimits(cmd: &mut Command, policy: &TeePolicy) {
    let memory = policy.resources.memory_bytes() as libc::rlim_t;
    let cpu = policy.resources.cpu_seconds() as libc::rlim_t;

    // SAFETY: the closure only calls async-signal-safe libc functions.
    unsafe {
        cmd.pre_exec(move || {
            let as_limit = libc::rlimit {
                rlim_cur: memory,
                rlim_max: memory,
            };
            if libc::setrlimit(libc::RLIMIT_AS, &as_limit) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            let cpu_limit = libc::rlimit {
                rlim_cur: cpu,
                rlim_max: cpu,
            };
            if libc::setrlimit(libc::RLIMIT_CPU, &cpu_limit) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}
