//! The live subagent set for one parent agent.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use credential_vault::CredentialStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tee_sandbox::{create_isolate, usage, CancelToken, ProcessUsage, TeePolicy};
use tracing::{info, warn};

use crate::descriptor::{SubagentDescriptor, SubagentRuntime};
use crate::error::{Result, SubagentError};
use crate::subagent::{Subagent, SubagentInfo};

pub const DEFAULT_MAX_CONCURRENT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubagentManagerConfig {
    pub max_concurrent: usize,
    /// Parent policy; descriptors without limits inherit it.
    pub default_policy: TeePolicy,
    pub python_interpreter: String,
    pub node_interpreter: String,
}

impl Default for SubagentManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            default_policy: TeePolicy::default(),
            python_interpreter: SubagentRuntime::Python.default_interpreter().to_string(),
            node_interpreter: SubagentRuntime::Node.default_interpreter().to_string(),
        }
    }
}

impl SubagentManagerConfig {
    fn interpreter(&self, runtime: SubagentRuntime) -> &str {
        match runtime {
            SubagentRuntime::Python => &self.python_interpreter,
            SubagentRuntime::Node => &self.node_interpreter,
        }
    }
}

/// Per-call context for `run_tool`.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub cancel: CancelToken,
    /// Caller identity for logs.
    pub caller: Option<String>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            cancel: CancelToken::never(),
            caller: None,
        }
    }
}

impl ToolContext {
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            cancel,
            caller: None,
        }
    }
}

/// Aggregate measured usage of running subagents.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagerUsage {
    pub total: usize,
    pub running: usize,
    pub sampled: usize,
    pub usage: ProcessUsage,
}

/// Creates, runs and tears down subagents.
///
/// The map is behind a reader/writer lock; each subagent guards its own
/// state, and neither lock is held while a tool runs.
#[derive(Debug)]
pub struct SubagentManager {
    config: SubagentManagerConfig,
    credentials: Arc<CredentialStore>,
    subagents: RwLock<HashMap<String, Arc<Subagent>>>,
}

impl SubagentManager {
    pub fn new(config: SubagentManagerConfig, credentials: Arc<CredentialStore>) -> Self {
        Self {
            config,
            credentials,
            subagents: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SubagentManagerConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Subagent>>> {
        self.subagents.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Subagent>>> {
        self.subagents.write().unwrap_or_else(|e| e.into_inner())
    }

    fn get(&self, id: &str) -> Result<Arc<Subagent>> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| SubagentError::NotFound(id.to_string()))
    }

    /// Register a subagent. Capacity and id uniqueness are checked under one
    /// write lock, so a failed create never changes the live set.
    pub fn create(&self, mut descriptor: SubagentDescriptor) -> Result<String> {
        descriptor.validate()?;

        let policy = descriptor.effective_policy(&self.config.default_policy);
        let isolate = create_isolate(policy)?;

        let id = descriptor
            .id
            .clone()
            .unwrap_or_else(|| format!("subagent-{}", uuid::Uuid::new_v4().simple()));
        descriptor.id = Some(id.clone());
        let interpreter = self.config.interpreter(descriptor.runtime).to_string();

        let mut subagents = self.write();
        if subagents.len() >= self.config.max_concurrent {
            return Err(SubagentError::CapacityExceeded {
                max: self.config.max_concurrent,
            });
        }
        if subagents.contains_key(&id) {
            return Err(SubagentError::Duplicate(id));
        }

        info!(subagent = %id, name = %descriptor.name, runtime = %descriptor.runtime, "subagent created");
        let subagent = Subagent::new(id.clone(), descriptor, interpreter, isolate);
        subagents.insert(id.clone(), Arc::new(subagent));
        Ok(id)
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        self.get(id)?.start(&self.credentials).await
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        self.get(id)?.stop().await
    }

    /// Run a registered tool on a running subagent and wait for its result.
    pub async fn run_tool(
        &self,
        ctx: &ToolContext,
        id: &str,
        tool: &str,
        params: &Value,
    ) -> Result<Value> {
        let subagent = self.get(id)?;
        if let Some(caller) = &ctx.caller {
            tracing::debug!(subagent = %id, tool = %tool, caller = %caller, "tool call");
        }
        subagent
            .run_tool(tool, params, &self.credentials, ctx.cancel.clone())
            .await
    }

    /// Stop and remove. Cleanup errors are reported after removal.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let subagent = self.get(id)?;

        let mut errors = Vec::new();
        if let Err(e) = subagent.stop().await {
            errors.push(e.to_string());
        }

        self.write().remove(id);
        info!(subagent = %id, "subagent deleted");

        if errors.is_empty() {
            Ok(())
        } else {
            warn!(subagent = %id, errors = ?errors, "subagent cleanup reported errors");
            Err(SubagentError::Cleanup {
                id: id.to_string(),
                errors,
            })
        }
    }

    pub fn status(&self, id: &str) -> Result<SubagentInfo> {
        Ok(self.get(id)?.info())
    }

    /// Snapshot of every subagent, ordered by id.
    pub fn list(&self) -> Vec<SubagentInfo> {
        let subagents: Vec<Arc<Subagent>> = self.read().values().cloned().collect();
        let mut out: Vec<SubagentInfo> = subagents.iter().map(|s| s.info()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Which subagent serves `tool`, if any.
    pub fn find_tool(&self, tool: &str) -> Option<String> {
        let mut owners: Vec<String> = self
            .read()
            .values()
            .filter(|s| s.descriptor().has_tool(tool))
            .map(|s| s.id().to_string())
            .collect();
        owners.sort();
        owners.into_iter().next()
    }

    /// Sum of RSS and CPU time across running subagent processes.
    pub fn usage(&self) -> ManagerUsage {
        let subagents: Vec<Arc<Subagent>> = self.read().values().cloned().collect();
        let pids: Vec<u32> = subagents.iter().filter_map(|s| s.pid()).collect();
        let samples: Vec<ProcessUsage> = pids.iter().filter_map(|pid| usage::sample(*pid)).collect();

        ManagerUsage {
            total: subagents.len(),
            running: pids.len(),
            sampled: samples.len(),
            usage: samples.into_iter().sum(),
        }
    }

    /// Parent teardown: delete every subagent, collecting cleanup errors.
    pub async fn shutdown(&self) -> Result<()> {
        let ids: Vec<String> = self.read().keys().cloned().collect();
        let mut errors = Vec::new();
        for id in ids {
            match self.delete(&id).await {
                Ok(()) | Err(SubagentError::NotFound(_)) => {}
                Err(e) => errors.push(e.to_string()),
            }
        }
        info!(remaining = self.len(), "subagent manager shut down");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SubagentError::Cleanup {
                id: "*".to_string(),
                errors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max: usize) -> SubagentManager {
        SubagentManager::new(
            SubagentManagerConfig {
                max_concurrent: max,
                ..SubagentManagerConfig::default()
            },
            Arc::new(CredentialStore::new()),
        )
    }

    #[test]
    fn test_create_generates_id() {
        let mgr = manager(2);
        let id = mgr
            .create(SubagentDescriptor::new("worker", SubagentRuntime::Python))
            .expect("create");
        assert!(id.starts_with("subagent-"));
        assert_eq!(mgr.status(&id).expect("status").name, "worker");
    }

    #[test]
    fn test_create_rejects_duplicate_id() {
        let mgr = manager(3);
        let desc = SubagentDescriptor::new("a", SubagentRuntime::Node).with_id("fixed");
        mgr.create(desc.clone()).expect("first");
        let err = mgr.create(desc).unwrap_err();
        assert!(matches!(err, SubagentError::Duplicate(_)));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_invalid_limits_rejected_before_insert() {
        let mgr = manager(3);
        let desc = SubagentDescriptor::new("a", SubagentRuntime::Python).with_limits(
            tee_sandbox::ResourceCeiling {
                memory_mb: -1,
                cpu_cores: 1.0,
                timeout_secs: 5,
            },
        );
        assert!(matches!(
            mgr.create(desc).unwrap_err(),
            SubagentError::Tee(_)
        ));
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_find_tool() {
        let mgr = manager(3);
        mgr.create(
            SubagentDescriptor::new("a", SubagentRuntime::Python)
                .with_id("a")
                .with_tool("scrape", "print(1)"),
        )
        .expect("create");
        assert_eq!(mgr.find_tool("scrape").as_deref(), Some("a"));
        assert!(mgr.find_tool("missing").is_none());
    }
}
