//! Agent build specifications.
//!
//! An [`AgentBuildSpec`] is the single JSON payload the configuration layer
//! hands to the orchestrator. It is validated once at submission and never
//! mutated afterwards; a new build gets a new spec.

use std::collections::HashSet;
use std::sync::OnceLock;

use credential_vault::{Credential, CredentialKind, CredentialSource};
use llm_router::{InferenceConfig, Provider};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subagent_manager::{SubagentDescriptor, SubagentRuntime};
use tee_sandbox::TeePolicy;

use super::digest;
use super::error::{KilnError, Result};

/// Output form of a compiled agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BuildTarget {
    /// WASI bytecode runnable in a constrained host.
    #[default]
    SandboxedBytecode,
    /// Dynamic library loaded by a host process.
    NativePlugin,
}

impl BuildTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildTarget::SandboxedBytecode => "sandboxed-bytecode",
            BuildTarget::NativePlugin => "native-plugin",
        }
    }

    /// Platform label sent with remote dispatches.
    pub fn platform(&self) -> &'static str {
        match self {
            BuildTarget::SandboxedBytecode => "wasm32-wasip1",
            BuildTarget::NativePlugin => "x86_64-unknown-linux-gnu",
        }
    }
}

impl std::fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "sandboxed-bytecode" | "wasm" => Ok(BuildTarget::SandboxedBytecode),
            "native-plugin" | "native" => Ok(BuildTarget::NativePlugin),
            other => Err(format!("unknown build target: {other}")),
        }
    }
}

/// How a tool is executed at runtime.
///
/// Tools are bound ahead of time: builtins by name against the runtime's
/// whitelist, scripts by materializing them into a subagent. Nothing is
/// evaluated from a string at call time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolImplementation {
    Builtin { function: String },
    Script { runtime: SubagentRuntime, source: String },
}

fn default_parameters() -> Value {
    serde_json::json!({"type": "object"})
}

fn default_returns() -> String {
    "object".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the input object.
    #[serde(default = "default_parameters")]
    pub parameters: Value,
    #[serde(default = "default_returns")]
    pub returns: String,
    pub implementation: ToolImplementation,
}

impl ToolDefinition {
    pub fn builtin(name: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: default_parameters(),
            returns: default_returns(),
            implementation: ToolImplementation::Builtin {
                function: function.into(),
            },
        }
    }

    pub fn script(
        name: impl Into<String>,
        runtime: SubagentRuntime,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: default_parameters(),
            returns: default_returns(),
            implementation: ToolImplementation::Script {
                runtime,
                source: source.into(),
            },
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Top-level `required` names from the parameter schema.
    pub fn required_fields(&self) -> Vec<String> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceDefinition {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// Model-provider selection; the same shape the inference router consumes.
pub type ModelSelection = InferenceConfig;

/// A secret the agent needs at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRequirement {
    pub name: String,
    pub kind: CredentialKind,
    pub source: CredentialSource,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CredentialRequirement {
    pub fn to_credential(&self) -> Credential {
        let mut credential = Credential::new(&self.name, self.kind, self.source.clone());
        if self.optional {
            credential = credential.optional();
        }
        if let Some(description) = &self.description {
            credential = credential.with_description(description);
        }
        credential
    }
}

/// Immutable input to one build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentBuildSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
    #[serde(default)]
    pub prompts: Vec<PromptDefinition>,
    pub model: ModelSelection,
    #[serde(default)]
    pub tee_policy: TeePolicy,
    #[serde(default)]
    pub build_target: BuildTarget,
    #[serde(default)]
    pub credentials: Vec<CredentialRequirement>,
    #[serde(default)]
    pub subagents: Vec<SubagentDescriptor>,
}

/// Runs of anything outside `[a-z0-9]`.
fn name_separators() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-z0-9]+").ok()).as_ref()
}

fn invalid(message: impl Into<String>) -> KilnError {
    KilnError::InvalidSpec(message.into())
}

fn is_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && name.len() <= 64
}

impl AgentBuildSpec {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        model: ModelSelection,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: version.into(),
            tools: Vec::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
            model,
            tee_policy: TeePolicy::default(),
            build_target: BuildTarget::default(),
            credentials: Vec::new(),
            subagents: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_build_target(mut self, target: BuildTarget) -> Self {
        self.build_target = target;
        self
    }

    pub fn with_credential(mut self, requirement: CredentialRequirement) -> Self {
        self.credentials.push(requirement);
        self
    }

    /// Parse and validate a JSON payload.
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Configuration checks run before any job or process exists.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.sanitized_name().is_empty() {
            return Err(invalid(format!(
                "name '{}' has no usable characters",
                self.name
            )));
        }
        semver::Version::parse(&self.version)
            .map_err(|e| invalid(format!("version '{}': {e}", self.version)))?;

        if self.model.model.trim().is_empty() {
            return Err(invalid("model must not be empty"));
        }
        if self.model.provider == Provider::Custom && self.model.endpoint.is_none() {
            return Err(invalid("custom provider requires an endpoint"));
        }

        self.tee_policy
            .validate()
            .map_err(|e| invalid(format!("tee_policy: {e}")))?;

        let mut tool_names = HashSet::new();
        for tool in &self.tools {
            if !is_tool_name(&tool.name) {
                return Err(invalid(format!(
                    "tool name '{}' must match [A-Za-z][A-Za-z0-9_-]*",
                    tool.name
                )));
            }
            if !tool_names.insert(tool.name.as_str()) {
                return Err(invalid(format!("duplicate tool '{}'", tool.name)));
            }
            match &tool.implementation {
                ToolImplementation::Builtin { function } if function.trim().is_empty() => {
                    return Err(invalid(format!("tool '{}': empty builtin name", tool.name)));
                }
                ToolImplementation::Script { source, .. } if source.trim().is_empty() => {
                    return Err(invalid(format!("tool '{}': empty script", tool.name)));
                }
                _ => {}
            }
        }

        let mut credential_names = HashSet::new();
        for requirement in &self.credentials {
            if requirement.name.trim().is_empty() {
                return Err(invalid("credential name must not be empty"));
            }
            if !credential_names.insert(requirement.name.as_str()) {
                return Err(invalid(format!(
                    "duplicate credential '{}'",
                    requirement.name
                )));
            }
        }

        for descriptor in &self.subagents {
            descriptor
                .validate()
                .map_err(|e| invalid(format!("subagent '{}': {e}", descriptor.name)))?;
        }
        Ok(())
    }

    /// Lowercase `[a-z0-9-]` form of the name with dashes collapsed.
    pub fn sanitized_name(&self) -> String {
        let lower = self.name.to_ascii_lowercase();
        match name_separators() {
            Some(re) => re.replace_all(&lower, "-").trim_matches('-').to_string(),
            None => lower.chars().filter(char::is_ascii_alphanumeric).collect(),
        }
    }

    /// SHA-256 over the canonical JSON of the whole spec.
    pub fn digest(&self) -> Result<String> {
        digest::compute_digest(&serde_json::to_value(self)?)
    }

    pub fn script_tools(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| matches!(t.implementation, ToolImplementation::Script { .. }))
    }
}
