//! Subagent descriptors: what to run and under which limits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tee_sandbox::{ResourceCeiling, TeePolicy};

use crate::error::{Result, SubagentError};

/// Scripting runtimes a subagent can use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubagentRuntime {
    Python,
    Node,
}

impl SubagentRuntime {
    pub fn default_interpreter(&self) -> &'static str {
        match self {
            SubagentRuntime::Python => "python3",
            SubagentRuntime::Node => "node",
        }
    }

    /// Script file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            SubagentRuntime::Python => "py",
            SubagentRuntime::Node => "js",
        }
    }

    /// Command that installs `deps` into the isolate root.
    pub(crate) fn install_command(&self, interpreter: &str, deps: &[String]) -> (String, Vec<String>) {
        match self {
            SubagentRuntime::Python => {
                let mut args: Vec<String> = ["-m", "pip", "install", "--quiet", "--target", "deps"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                args.extend(deps.iter().cloned());
                (interpreter.to_string(), args)
            }
            SubagentRuntime::Node => {
                let mut args: Vec<String> = ["install", "--silent", "--prefix", "."]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                args.extend(deps.iter().cloned());
                ("npm".to_string(), args)
            }
        }
    }

    /// Module search path variable pointing at installed dependencies.
    pub(crate) fn module_path_env(&self) -> (&'static str, &'static str) {
        match self {
            SubagentRuntime::Python => ("PYTHONPATH", "deps"),
            SubagentRuntime::Node => ("NODE_PATH", "node_modules"),
        }
    }
}

impl std::fmt::Display for SubagentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubagentRuntime::Python => f.write_str("python"),
            SubagentRuntime::Node => f.write_str("node"),
        }
    }
}

/// A tool script materialized as `tools/<name>.<ext>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubagentTool {
    pub name: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Model selection handed to the subagent process through its environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelOverride {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubagentDescriptor {
    /// Generated on create when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub runtime: SubagentRuntime,
    /// Long-running entry point. The subagent is running only while it lives.
    #[serde(default)]
    pub init_script: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub tools: Vec<SubagentTool>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Credential names injected as environment variables of the same name.
    #[serde(default)]
    pub credentials: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelOverride>,
    /// Overrides the parent policy's ceilings when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceCeiling>,
}

impl SubagentDescriptor {
    pub fn new(name: impl Into<String>, runtime: SubagentRuntime) -> Self {
        Self {
            id: None,
            name: name.into(),
            runtime,
            init_script: String::new(),
            env: BTreeMap::new(),
            tools: Vec::new(),
            dependencies: Vec::new(),
            credentials: Vec::new(),
            model: None,
            limits: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_init_script(mut self, script: impl Into<String>) -> Self {
        self.init_script = script.into();
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.tools.push(SubagentTool {
            name: name.into(),
            source: source.into(),
            description: None,
        });
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_credential(mut self, name: impl Into<String>) -> Self {
        self.credentials.push(name.into());
        self
    }

    pub fn with_limits(mut self, limits: ResourceCeiling) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SubagentError::InvalidDescriptor(
                "name must not be empty".to_string(),
            ));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(SubagentError::InvalidDescriptor(
                    "id must not be blank when given".to_string(),
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !is_script_name(&tool.name) {
                return Err(SubagentError::InvalidDescriptor(format!(
                    "tool name '{}' must match [A-Za-z0-9_-]+",
                    tool.name
                )));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(SubagentError::InvalidDescriptor(format!(
                    "duplicate tool '{}'",
                    tool.name
                )));
            }
        }
        Ok(())
    }

    /// Parent policy with this descriptor's limits applied.
    pub fn effective_policy(&self, parent: &TeePolicy) -> TeePolicy {
        match self.limits {
            Some(limits) => parent.clone().with_resources(limits),
            None => parent.clone(),
        }
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

/// Tool names become file names, so they are kept to a safe charset.
fn is_script_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
