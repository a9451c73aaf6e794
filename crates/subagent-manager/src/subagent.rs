//! One subagent: its isolate, its long-running process and its call state.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use credential_vault::{CredentialStore, ExposeSecret};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tee_sandbox::{CancelToken, ExecRequest, Isolate, SpawnedProcess, TeeError};
use tracing::{debug, info, warn};

use crate::descriptor::SubagentDescriptor;
use crate::error::{Result, SubagentError};

/// Status as observed from `is_running` and `last_error`. Never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Created,
    Running,
    Stopped,
    Error,
}

/// Snapshot for status queries and listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubagentInfo {
    pub id: String,
    pub name: String,
    pub runtime: String,
    pub status: SubagentStatus,
    pub tools: Vec<String>,
    pub last_error: Option<String>,
    pub tool_calls: u64,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    initialized: bool,
    running: bool,
    ever_started: bool,
    process: Option<SpawnedProcess>,
    last_error: Option<String>,
    tool_calls: u64,
    started_at: Option<DateTime<Utc>>,
    last_activity: Option<DateTime<Utc>>,
}

/// A child agent executing delegated tool calls inside its own isolate.
pub struct Subagent {
    id: String,
    descriptor: SubagentDescriptor,
    interpreter: String,
    isolate: Arc<dyn Isolate>,
    state: Mutex<State>,
}

impl Subagent {
    pub(crate) fn new(
        id: String,
        descriptor: SubagentDescriptor,
        interpreter: String,
        isolate: Arc<dyn Isolate>,
    ) -> Self {
        Self {
            id,
            descriptor,
            interpreter,
            isolate,
            state: Mutex::new(State::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptor(&self) -> &SubagentDescriptor {
        &self.descriptor
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Running only while the init process is alive inside a started isolate.
    pub fn is_running(&self) -> bool {
        let mut state = self.state();
        self.reap_exited(&mut state);
        state.running && self.isolate.is_started()
    }

    /// Notice an init process that exited on its own. A non-zero exit or a
    /// signal is recorded as the last error.
    fn reap_exited(&self, state: &mut State) {
        if !state.running {
            return;
        }
        let Some(status) = state.process.as_mut().and_then(SpawnedProcess::try_exit) else {
            return;
        };
        state.running = false;
        state.process = None;
        if status.success() {
            info!(subagent = %self.id, "init process exited");
            return;
        }
        let message = match status.code() {
            Some(code) => format!("init process exited with code {code}"),
            None => "init process terminated by signal".to_string(),
        };
        warn!(subagent = %self.id, error = %message, "subagent runtime error");
        state.last_error = Some(message);
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    pub fn status(&self) -> SubagentStatus {
        let running = self.is_running();
        let state = self.state();
        match (running, &state.last_error) {
            (true, _) => SubagentStatus::Running,
            (false, Some(_)) => SubagentStatus::Error,
            (false, None) if state.ever_started => SubagentStatus::Stopped,
            (false, None) => SubagentStatus::Created,
        }
    }

    pub fn info(&self) -> SubagentInfo {
        let status = self.status();
        let state = self.state();
        SubagentInfo {
            id: self.id.clone(),
            name: self.descriptor.name.clone(),
            runtime: self.descriptor.runtime.to_string(),
            status,
            tools: self.descriptor.tools.iter().map(|t| t.name.clone()).collect(),
            last_error: state.last_error.clone(),
            tool_calls: state.tool_calls,
            pid: state.process.as_ref().and_then(SpawnedProcess::id),
            started_at: state.started_at,
            last_activity: state.last_activity,
        }
    }

    /// PID of the long-running process, if alive.
    pub(crate) fn pid(&self) -> Option<u32> {
        if !self.is_running() {
            return None;
        }
        self.state().process.as_ref().and_then(SpawnedProcess::id)
    }

    fn record_error(&self, message: String) {
        warn!(subagent = %self.id, error = %message, "subagent runtime error");
        self.state().last_error = Some(message);
    }

    fn script_path(&self, stem: &str) -> String {
        format!("{stem}.{}", self.descriptor.runtime.extension())
    }

    /// Environment for one child process: descriptor env, model override,
    /// module path and resolved credentials. Built per call, never stored.
    fn child_env(&self, credentials: &CredentialStore) -> Result<BTreeMap<String, String>> {
        let mut env = self.descriptor.env.clone();
        env.insert("SUBAGENT_ID".to_string(), self.id.clone());
        env.insert("SUBAGENT_NAME".to_string(), self.descriptor.name.clone());

        let (key, value) = self.descriptor.runtime.module_path_env();
        env.insert(key.to_string(), value.to_string());

        if let Some(model) = &self.descriptor.model {
            env.insert("SUBAGENT_MODEL_PROVIDER".to_string(), model.provider.clone());
            env.insert("SUBAGENT_MODEL".to_string(), model.model.clone());
        }
        for name in &self.descriptor.credentials {
            let secret = credentials.get(name)?;
            env.insert(name.clone(), secret.expose_secret().to_string());
        }
        Ok(env)
    }

    /// Prepare the working environment: isolate, scripts, dependencies.
    pub(crate) async fn initialize(&self) -> Result<()> {
        if self.state().initialized {
            return Ok(());
        }

        self.isolate.start().await?;

        let init = self.script_path("init");
        self.isolate
            .write_file(&init, self.descriptor.init_script.as_bytes())
            .await?;
        for tool in &self.descriptor.tools {
            let path = format!("tools/{}", self.script_path(&tool.name));
            self.isolate.write_file(&path, tool.source.as_bytes()).await?;
        }

        if !self.descriptor.dependencies.is_empty() {
            let (command, args) = self
                .descriptor
                .runtime
                .install_command(&self.interpreter, &self.descriptor.dependencies);
            info!(subagent = %self.id, count = self.descriptor.dependencies.len(), "installing dependencies");
            let output = self.isolate.execute(&command, &args).await?;
            if !output.success() {
                return Err(SubagentError::DependencyInstall {
                    subagent: self.id.clone(),
                    stderr: output.stderr,
                });
            }
        }

        self.state().initialized = true;
        debug!(subagent = %self.id, tools = self.descriptor.tools.len(), "subagent initialized");
        Ok(())
    }

    /// Initialize if needed, then launch the long-running init process.
    pub(crate) async fn start(&self, credentials: &CredentialStore) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if let Err(e) = self.initialize().await {
            self.record_error(e.to_string());
            return Err(e);
        }

        let mut request = ExecRequest::new(&self.interpreter, [self.script_path("init")]);
        request.env = self.child_env(credentials)?;
        let process = match self.isolate.spawn(request).await {
            Ok(p) => p,
            Err(e) => {
                self.record_error(e.to_string());
                return Err(e.into());
            }
        };

        let mut state = self.state();
        info!(subagent = %self.id, pid = ?process.id(), "subagent started");
        state.process = Some(process);
        state.running = true;
        state.ever_started = true;
        state.last_error = None;
        state.started_at = Some(Utc::now());
        Ok(())
    }

    /// Kill the process and release the isolate. Safe on a stopped subagent.
    pub(crate) async fn stop(&self) -> Result<()> {
        let process = {
            let mut state = self.state();
            if !state.running && state.process.is_none() && !self.isolate.is_started() {
                return Ok(());
            }
            state.running = false;
            state.initialized = false;
            state.process.take()
        };

        let mut first_error = None;
        if let Some(mut process) = process {
            if let Err(e) = process.kill().await {
                first_error = Some(e);
            }
        }
        // Stopping the isolate also kills any in-flight tool call.
        if let Err(e) = self.isolate.stop().await {
            first_error.get_or_insert(e);
        }

        info!(subagent = %self.id, "subagent stopped");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Run `tools/<tool>.<ext> <params-json>` and parse stdout as JSON
    /// (falling back to a plain string).
    pub(crate) async fn run_tool(
        &self,
        tool: &str,
        params: &Value,
        credentials: &CredentialStore,
        cancel: CancelToken,
    ) -> Result<Value> {
        if !self.is_running() {
            return Err(SubagentError::NotRunning(self.id.clone()));
        }
        if !self.descriptor.has_tool(tool) {
            return Err(SubagentError::UnknownTool {
                subagent: self.id.clone(),
                tool: tool.to_string(),
            });
        }

        let script = format!("tools/{}", self.script_path(tool));
        let mut request = ExecRequest::new(
            &self.interpreter,
            [script, serde_json::to_string(params)?],
        );
        request.env = self.child_env(credentials)?;

        debug!(subagent = %self.id, tool = %tool, "running tool");
        let result = self.isolate.execute_cancellable(request, cancel).await;

        {
            let mut state = self.state();
            state.tool_calls += 1;
            state.last_activity = Some(Utc::now());
        }

        let output = match result {
            Ok(output) => output,
            Err(TeeError::Killed { reason }) => {
                debug!(subagent = %self.id, tool = %tool, reason = %reason, "tool call killed");
                return Err(SubagentError::Killed {
                    subagent: self.id.clone(),
                    reason,
                });
            }
            Err(TeeError::NotStarted) => {
                return Err(SubagentError::NotRunning(self.id.clone()));
            }
            Err(e) => {
                self.record_error(format!("tool '{tool}': {e}"));
                return Err(e.into());
            }
        };

        if !output.success() {
            self.record_error(format!(
                "tool '{tool}' exited with code {}",
                output.exit_code
            ));
            return Err(SubagentError::ToolFailed {
                tool: tool.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let trimmed = output.stdout.trim();
        Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())))
    }
}

impl std::fmt::Debug for Subagent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subagent")
            .field("id", &self.id)
            .field("name", &self.descriptor.name)
            .field("runtime", &self.descriptor.runtime)
            .finish()
    }
}
