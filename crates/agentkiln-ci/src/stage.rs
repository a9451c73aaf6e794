//! Build stage execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info};

/// One external command in a local build.
#[derive(Debug, Clone)]
pub struct BuildStage {
    pub name: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Zero disables the limit.
    pub timeout_secs: u64,
}

impl BuildStage {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            cwd: None,
            timeout_secs: 0,
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage_name: String,
    /// `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl StageResult {
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Last few stderr lines, for job logs and failure messages.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Run `stage` to completion, killing it if it outlives its timeout.
///
/// Spawn errors (missing program, bad cwd) are returned as `Err`; a command
/// that runs and fails is an `Ok` result with a non-zero exit code.
pub async fn run_stage(stage: &BuildStage) -> std::io::Result<StageResult> {
    let Some((program, args)) = stage.command.split_first() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("stage {} has an empty command", stage.name),
        ));
    };

    let start = Instant::now();
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &stage.cwd {
        cmd.current_dir(cwd);
    }

    debug!(stage = %stage.name, command = ?stage.command, "starting build stage");
    let child = cmd.spawn()?;

    let waited = if stage.timeout_secs > 0 {
        tokio::time::timeout(
            Duration::from_secs(stage.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .ok()
    } else {
        Some(child.wait_with_output().await)
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    let result = match waited {
        Some(output) => {
            let output = output?;
            StageResult {
                stage_name: stage.name.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                duration_ms,
                timed_out: false,
            }
        }
        // Dropping the wait future drops the child, which kills it.
        None => StageResult {
            stage_name: stage.name.clone(),
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("stage timed out after {}s", stage.timeout_secs),
            duration_ms,
            timed_out: true,
        },
    };

    info!(
        stage = %result.stage_name,
        exit_code = result.exit_code,
        duration_ms = result.duration_ms,
        timed_out = result.timed_out,
        "build stage finished"
    );
    Ok(result)
}
