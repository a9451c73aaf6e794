//! Function registry for compiled agents.
//!
//! Every callable tool is bound before the agent serves requests:
//! - builtins resolve by name against a [`BuiltinCatalog`] whitelist
//! - script tools are materialized into subagents and run by name there
//!
//! Invocation validates required input fields, applies a timeout, and trips
//! a per-tool circuit breaker after repeated failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use subagent_manager::{
    ModelOverride, SubagentDescriptor, SubagentError, SubagentManager, SubagentRuntime,
    SubagentTool, ToolContext,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::{AgentBuildSpec, KilnError, ToolImplementation};
use crate::metrics::METRICS;
use crate::obs::emit_subagent_event;

/// A whitelisted in-process function.
pub type BuiltinFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// The set of functions a spec may bind builtin tools to.
#[derive(Clone, Default)]
pub struct BuiltinCatalog {
    functions: HashMap<String, BuiltinFn>,
}

impl BuiltinCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `echo`, `timestamp` and `word_count`.
    pub fn standard() -> Self {
        Self::empty()
            .with("echo", |input| Ok(input.clone()))
            .with("timestamp", |_| {
                Ok(json!({"timestamp": chrono::Utc::now().to_rfc3339()}))
            })
            .with("word_count", |input| {
                let text = input
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "field 'text' must be a string".to_string())?;
                Ok(json!({"words": text.split_whitespace().count()}))
            })
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        function: impl Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<BuiltinFn> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for BuiltinCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinCatalog")
            .field("functions", &self.names())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolExecutionConfig {
    pub timeout_ms: u64,
    /// Consecutive failures before calls are refused. Zero disables.
    pub circuit_breaker_threshold: u32,
}

impl Default for ToolExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            circuit_breaker_threshold: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {tool}")]
    UnknownTool { tool: String },

    #[error("duplicate tool registration: {tool}")]
    DuplicateTool { tool: String },

    #[error("tool '{tool}' binds '{function}', which is not a whitelisted builtin")]
    NotWhitelisted { tool: String, function: String },

    #[error("tool '{tool}': input must be a JSON object")]
    InputNotObject { tool: String },

    #[error("tool '{tool}': missing required field '{field}'")]
    SchemaViolation { tool: String, field: String },

    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },

    #[error("circuit breaker open for tool '{tool}' (failures={failures})")]
    CircuitOpen { tool: String, failures: u32 },

    #[error("tool '{tool}' needs a subagent manager")]
    NoSubagentManager { tool: String },

    #[error("tool '{tool}': {source}")]
    Subagent {
        tool: String,
        #[source]
        source: SubagentError,
    },
}

#[derive(Clone)]
enum Binding {
    Builtin { function: String, call: BuiltinFn },
    Subagent { subagent_id: String },
}

#[derive(Clone)]
struct RegisteredTool {
    description: String,
    required_fields: Vec<String>,
    binding: Binding,
}

/// Listing entry for one bound tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub required_fields: Vec<String>,
    /// `builtin` or `subagent`.
    pub binding: String,
    /// Builtin function name or subagent id.
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolReport {
    pub tool: String,
    pub output: Value,
    pub duration_ms: u64,
}

/// Long-running init script that keeps a tool subagent alive.
fn idle_init_script(runtime: SubagentRuntime) -> &'static str {
    match runtime {
        SubagentRuntime::Python => "import time\n\nwhile True:\n    time.sleep(3600)\n",
        SubagentRuntime::Node => "setInterval(() => {}, 1 << 30);\n",
    }
}

pub struct FunctionRegistry {
    catalog: BuiltinCatalog,
    tools: HashMap<String, RegisteredTool>,
    subagents: Option<Arc<SubagentManager>>,
    config: ToolExecutionConfig,
    failure_counts: Mutex<HashMap<String, u32>>,
}

impl FunctionRegistry {
    pub fn new(catalog: BuiltinCatalog, config: ToolExecutionConfig) -> Self {
        Self {
            catalog,
            tools: HashMap::new(),
            subagents: None,
            config,
            failure_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_subagents(mut self, manager: Arc<SubagentManager>) -> Self {
        self.subagents = Some(manager);
        self
    }

    fn insert(&mut self, name: &str, tool: RegisteredTool) -> Result<(), ToolError> {
        if self.tools.contains_key(name) {
            return Err(ToolError::DuplicateTool {
                tool: name.to_string(),
            });
        }
        self.tools.insert(name.to_string(), tool);
        Ok(())
    }

    /// Bind `name` to the whitelisted `function`.
    pub fn register_builtin(
        &mut self,
        name: &str,
        description: &str,
        required_fields: Vec<String>,
        function: &str,
    ) -> Result<(), ToolError> {
        let call = self
            .catalog
            .get(function)
            .ok_or_else(|| ToolError::NotWhitelisted {
                tool: name.to_string(),
                function: function.to_string(),
            })?;
        self.insert(
            name,
            RegisteredTool {
                description: description.to_string(),
                required_fields,
                binding: Binding::Builtin {
                    function: function.to_string(),
                    call,
                },
            },
        )
    }

    /// Bind `name` to the tool of the same name on `subagent_id`.
    pub fn register_subagent_tool(
        &mut self,
        name: &str,
        description: &str,
        required_fields: Vec<String>,
        subagent_id: &str,
    ) -> Result<(), ToolError> {
        if self.subagents.is_none() {
            return Err(ToolError::NoSubagentManager {
                tool: name.to_string(),
            });
        }
        self.insert(
            name,
            RegisteredTool {
                description: description.to_string(),
                required_fields,
                binding: Binding::Subagent {
                    subagent_id: subagent_id.to_string(),
                },
            },
        )
    }

    /// Bind every tool of `spec`.
    ///
    /// Script tools are grouped per runtime into one generated subagent each;
    /// the build spec's own subagents are created as given and their tools exposed.
    /// Subagents are created here and started by [`start_subagents`](Self::start_subagents).
    pub fn from_spec(
        spec: &AgentBuildSpec,
        catalog: BuiltinCatalog,
        manager: Arc<SubagentManager>,
        config: ToolExecutionConfig,
    ) -> Result<Self, KilnError> {
        spec.validate()?;
        let mut registry = Self::new(catalog, config).with_subagents(Arc::clone(&manager));

        let mut by_runtime: BTreeMap<String, (SubagentRuntime, Vec<SubagentTool>)> =
            BTreeMap::new();
        for tool in &spec.tools {
            match &tool.implementation {
                ToolImplementation::Builtin { function } => {
                    registry.register_builtin(
                        &tool.name,
                        &tool.description,
                        tool.required_fields(),
                        function,
                    )?;
                }
                ToolImplementation::Script { runtime, source } => {
                    by_runtime
                        .entry(runtime.to_string())
                        .or_insert_with(|| (*runtime, Vec::new()))
                        .1
                        .push(SubagentTool {
                            name: tool.name.clone(),
                            source: source.clone(),
                            description: Some(tool.description.clone())
                                .filter(|d| !d.is_empty()),
                        });
                }
            }
        }

        let required_credentials: Vec<String> = spec
            .credentials
            .iter()
            .filter(|c| !c.optional)
            .map(|c| c.name.clone())
            .collect();

        for (label, (runtime, tools)) in by_runtime {
            let mut descriptor =
                SubagentDescriptor::new(format!("{}-{label}-tools", spec.sanitized_name()), runtime)
                    .with_init_script(idle_init_script(runtime));
            descriptor.tools = tools;
            descriptor.credentials = required_credentials.clone();
            descriptor.model = Some(ModelOverride {
                provider: spec.model.provider.to_string(),
                model: spec.model.model.clone(),
            });

            let id = manager.create(descriptor)?;
            emit_subagent_event(&id, "created", Some(label.as_str()));
            for tool in spec.script_tools() {
                if matches!(&tool.implementation, ToolImplementation::Script { runtime: r, .. } if *r == runtime)
                {
                    registry.register_subagent_tool(
                        &tool.name,
                        &tool.description,
                        tool.required_fields(),
                        &id,
                    )?;
                }
            }
        }

        for descriptor in &spec.subagents {
            let id = manager.create(descriptor.clone())?;
            for tool in &descriptor.tools {
                registry.register_subagent_tool(
                    &tool.name,
                    tool.description.as_deref().unwrap_or(""),
                    Vec::new(),
                    &id,
                )?;
            }
        }

        info!(
            agent = %spec.sanitized_name(),
            tools = registry.tools.len(),
            subagents = registry.subagent_ids().len(),
            "function registry bound"
        );
        Ok(registry)
    }

    /// Distinct subagents backing registered tools, sorted.
    pub fn subagent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tools
            .values()
            .filter_map(|t| match &t.binding {
                Binding::Subagent { subagent_id } => Some(subagent_id.clone()),
                Binding::Builtin { .. } => None,
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Start every subagent that backs a tool.
    pub async fn start_subagents(&self) -> Result<(), KilnError> {
        let Some(manager) = &self.subagents else {
            return Ok(());
        };
        for id in self.subagent_ids() {
            manager.start(&id).await?;
            emit_subagent_event(&id, "started", None);
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        let mut out: Vec<ToolInfo> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                let (binding, target) = match &tool.binding {
                    Binding::Builtin { function, .. } => ("builtin", function.clone()),
                    Binding::Subagent { subagent_id } => ("subagent", subagent_id.clone()),
                };
                ToolInfo {
                    name: name.clone(),
                    description: tool.description.clone(),
                    required_fields: tool.required_fields.clone(),
                    binding: binding.to_string(),
                    target,
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Run `name` with `input`.
    pub async fn invoke(
        &self,
        ctx: &ToolContext,
        name: &str,
        input: &Value,
    ) -> Result<ToolReport, ToolError> {
        let started = Instant::now();
        let tool = self.tools.get(name).ok_or_else(|| ToolError::UnknownTool {
            tool: name.to_string(),
        })?;

        validate_input(name, &tool.required_fields, input)?;

        let failures = self.failure_count(name).await;
        if self.config.circuit_breaker_threshold > 0
            && failures >= self.config.circuit_breaker_threshold
        {
            return Err(ToolError::CircuitOpen {
                tool: name.to_string(),
                failures,
            });
        }

        METRICS.inc_tool_calls();
        let result = match &tool.binding {
            Binding::Builtin { function, call } => {
                debug!(tool = %name, function = %function, "invoking builtin");
                call(input).map_err(|message| ToolError::Failed {
                    tool: name.to_string(),
                    message,
                })
            }
            Binding::Subagent { subagent_id } => {
                self.invoke_subagent(ctx, name, subagent_id, input).await
            }
        };

        match result {
            Ok(output) => {
                self.reset_failures(name).await;
                Ok(ToolReport {
                    tool: name.to_string(),
                    output,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(e) => {
                self.record_failure(name).await;
                Err(e)
            }
        }
    }

    async fn invoke_subagent(
        &self,
        ctx: &ToolContext,
        name: &str,
        subagent_id: &str,
        input: &Value,
    ) -> Result<Value, ToolError> {
        let manager = self
            .subagents
            .as_ref()
            .ok_or_else(|| ToolError::NoSubagentManager {
                tool: name.to_string(),
            })?;
        debug!(tool = %name, subagent = %subagent_id, "delegating to subagent");

        let timeout = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, manager.run_tool(ctx, subagent_id, name, input)).await
        {
            Err(_) => Err(ToolError::Timeout {
                tool: name.to_string(),
                timeout_ms: self.config.timeout_ms,
            }),
            Ok(Err(source)) => Err(ToolError::Subagent {
                tool: name.to_string(),
                source,
            }),
            Ok(Ok(output)) => Ok(output),
        }
    }

    async fn failure_count(&self, name: &str) -> u32 {
        *self.failure_counts.lock().await.get(name).unwrap_or(&0)
    }

    async fn record_failure(&self, name: &str) {
        *self
            .failure_counts
            .lock()
            .await
            .entry(name.to_string())
            .or_insert(0) += 1;
    }

    async fn reset_failures(&self, name: &str) {
        self.failure_counts.lock().await.remove(name);
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("tools", &names)
            .field("config", &self.config)
            .finish()
    }
}

fn validate_input(tool: &str, required: &[String], input: &Value) -> Result<(), ToolError> {
    let Some(object) = input.as_object() else {
        return Err(ToolError::InputNotObject {
            tool: tool.to_string(),
        });
    };
    for field in required {
        if !object.contains_key(field) {
            return Err(ToolError::SchemaViolation {
                tool: tool.to_string(),
                field: field.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FunctionRegistry {
        let catalog = BuiltinCatalog::standard().with("fail", |_| Err("nope".to_string()));
        let mut registry = FunctionRegistry::new(
            catalog,
            ToolExecutionConfig {
                timeout_ms: 1_000,
                circuit_breaker_threshold: 2,
            },
        );
        registry
            .register_builtin("echo", "", Vec::new(), "echo")
            .expect("echo");
        registry
            .register_builtin("count", "", vec!["text".to_string()], "word_count")
            .expect("count");
        registry
            .register_builtin("broken", "", Vec::new(), "fail")
            .expect("broken");
        registry
    }

    #[tokio::test]
    async fn test_builtin_invocation() {
        let report = registry()
            .invoke(&ToolContext::default(), "count", &json!({"text": "a b c"}))
            .await
            .expect("invoke");
        assert_eq!(report.output, json!({"words": 3}));
    }

    #[tokio::test]
    async fn test_required_fields_checked_before_call() {
        let err = registry()
            .invoke(&ToolContext::default(), "count", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SchemaViolation { ref field, .. } if field == "text"));

        let err = registry()
            .invoke(&ToolContext::default(), "echo", &json!("bare string"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InputNotObject { .. }));
    }

    #[test]
    fn test_only_whitelisted_functions_bind() {
        let mut registry = registry();
        let err = registry
            .register_builtin("shell", "", Vec::new(), "os.system")
            .unwrap_err();
        assert!(matches!(err, ToolError::NotWhitelisted { .. }));
        assert!(!registry.contains("shell"));

        let err = registry
            .register_builtin("echo", "", Vec::new(), "echo")
            .unwrap_err();
        assert!(matches!(err, ToolError::DuplicateTool { .. }));
    }

    #[tokio::test]
    async fn test_circuit_opens_after_repeated_failures() {
        let registry = registry();
        let ctx = ToolContext::default();
        for _ in 0..2 {
            let err = registry.invoke(&ctx, "broken", &json!({})).await.unwrap_err();
            assert!(matches!(err, ToolError::Failed { .. }));
        }
        let err = registry.invoke(&ctx, "broken", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::CircuitOpen { failures: 2, .. }));

        // Other tools are unaffected.
        registry.invoke(&ctx, "echo", &json!({})).await.expect("echo");
    }

    #[test]
    fn test_subagent_tool_needs_manager() {
        let mut registry = registry();
        let err = registry
            .register_subagent_tool("scrape", "", Vec::new(), "subagent-1")
            .unwrap_err();
        assert!(matches!(err, ToolError::NoSubagentManager { .. }));
    }
}
