//! Function registry bound from build specs, including subagent-backed tools.

use std::sync::Arc;

use agentkiln_core::{
    AgentBuildSpec, BuiltinCatalog, CredentialRequirement, FunctionRegistry, KilnError,
    ToolDefinition, ToolError, ToolExecutionConfig,
};
use credential_vault::{CredentialError, CredentialKind, CredentialSource, CredentialStore};
use llm_router::{InferenceConfig, Provider};
use serde_json::json;
use subagent_manager::{
    SubagentDescriptor, SubagentError, SubagentManager, SubagentManagerConfig, SubagentRuntime,
    ToolContext,
};

fn shell_manager() -> Arc<SubagentManager> {
    Arc::new(SubagentManager::new(
        SubagentManagerConfig {
            max_concurrent: 4,
            python_interpreter: "sh".to_string(),
            ..SubagentManagerConfig::default()
        },
        Arc::new(CredentialStore::new()),
    ))
}

fn spec() -> AgentBuildSpec {
    AgentBuildSpec::new(
        "spec-42",
        "Research Agent",
        "1.2.0",
        InferenceConfig::new(Provider::OpenAi, "gpt-4o"),
    )
    .with_tool(
        ToolDefinition::builtin("echo", "echo")
            .with_parameters(json!({"type": "object", "required": ["message"]})),
    )
    .with_tool(ToolDefinition::builtin("now", "timestamp"))
    .with_tool(ToolDefinition::script(
        "fetch",
        SubagentRuntime::Python,
        "print('{}')",
    ))
}

// -------------------------------------------------------------------------
// Binding
// -------------------------------------------------------------------------

#[test]
fn from_spec_binds_builtins_and_script_tools() {
    let manager = shell_manager();
    let registry = FunctionRegistry::from_spec(
        &spec(),
        BuiltinCatalog::standard(),
        Arc::clone(&manager),
        ToolExecutionConfig::default(),
    )
    .expect("bind");

    let tools = registry.list();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "fetch", "now"]);

    let fetch = tools.iter().find(|t| t.name == "fetch").expect("fetch");
    assert_eq!(fetch.binding, "subagent");
    assert_eq!(registry.subagent_ids(), vec![fetch.target.clone()]);

    let info = manager.status(&fetch.target).expect("subagent created");
    assert_eq!(info.name, "research-agent-python-tools");
    assert_eq!(info.tools, vec!["fetch".to_string()]);

    let echo = tools.iter().find(|t| t.name == "echo").expect("echo");
    assert_eq!(echo.required_fields, vec!["message".to_string()]);
}

#[test]
fn from_spec_rejects_unlisted_builtin() {
    let spec = spec().with_tool(ToolDefinition::builtin("exec", "eval"));
    let err = FunctionRegistry::from_spec(
        &spec,
        BuiltinCatalog::standard(),
        shell_manager(),
        ToolExecutionConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        KilnError::Tool(ToolError::NotWhitelisted { .. })
    ));
}

// -------------------------------------------------------------------------
// Invocation through a subagent
// -------------------------------------------------------------------------

#[tokio::test]
async fn subagent_tool_round_trips_json() {
    let manager = shell_manager();
    let id = manager
        .create(
            SubagentDescriptor::new("helper", SubagentRuntime::Python)
                .with_init_script("sleep 60\n")
                .with_tool("reverse", "printf '%s' \"$1\"\n"),
        )
        .expect("create");

    let mut registry = FunctionRegistry::new(BuiltinCatalog::standard(), ToolExecutionConfig::default())
        .with_subagents(Arc::clone(&manager));
    registry
        .register_subagent_tool("reverse", "", vec!["items".to_string()], &id)
        .expect("register");
    registry.start_subagents().await.expect("start");

    let input = json!({"items": [1, 2, 3]});
    let report = registry
        .invoke(&ToolContext::default(), "reverse", &input)
        .await
        .expect("invoke");
    assert_eq!(report.output, input);

    manager.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn stopped_subagent_surfaces_not_running() {
    let manager = shell_manager();
    let id = manager
        .create(
            SubagentDescriptor::new("helper", SubagentRuntime::Python)
                .with_init_script("sleep 60\n")
                .with_tool("ping", "printf pong\n"),
        )
        .expect("create");

    let mut registry = FunctionRegistry::new(BuiltinCatalog::empty(), ToolExecutionConfig::default())
        .with_subagents(Arc::clone(&manager));
    registry
        .register_subagent_tool("ping", "", Vec::new(), &id)
        .expect("register");
    registry.start_subagents().await.expect("start");
    assert_eq!(
        registry
            .invoke(&ToolContext::default(), "ping", &json!({}))
            .await
            .expect("ping")
            .output,
        json!("pong")
    );

    manager.stop(&id).await.expect("stop");
    let err = registry
        .invoke(&ToolContext::default(), "ping", &json!({}))
        .await
        .unwrap_err();
    match err {
        ToolError::Subagent {
            source: SubagentError::NotRunning(_),
            ..
        } => {}
        other => panic!("expected NotRunning, got {:?}", other),
    }
}

#[tokio::test]
async fn slow_subagent_tool_times_out() {
    let manager = shell_manager();
    let id = manager
        .create(
            SubagentDescriptor::new("helper", SubagentRuntime::Python)
                .with_init_script("sleep 60\n")
                .with_tool("slow", "sleep 30\n"),
        )
        .expect("create");

    let mut registry = FunctionRegistry::new(
        BuiltinCatalog::empty(),
        ToolExecutionConfig {
            timeout_ms: 300,
            circuit_breaker_threshold: 0,
        },
    )
    .with_subagents(Arc::clone(&manager));
    registry
        .register_subagent_tool("slow", "", Vec::new(), &id)
        .expect("register");
    registry.start_subagents().await.expect("start");

    let err = registry
        .invoke(&ToolContext::default(), "slow", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Timeout { timeout_ms: 300, .. }));

    manager.shutdown().await.expect("shutdown");
}

// -------------------------------------------------------------------------
// Credential requirements
// -------------------------------------------------------------------------

#[test]
fn unset_required_env_credential_is_the_only_one_reported() {
    let spec = spec()
        .with_credential(CredentialRequirement {
            name: "SEARCH_API_KEY".to_string(),
            kind: CredentialKind::ApiKey,
            source: CredentialSource::Env {
                var: "AGENTKILN_TEST_SEARCH_KEY_NEVER_SET".to_string(),
            },
            optional: false,
            description: None,
        })
        .with_credential(CredentialRequirement {
            name: "TRACE_TOKEN".to_string(),
            kind: CredentialKind::Token,
            source: CredentialSource::Env {
                var: "AGENTKILN_TEST_TRACE_TOKEN_NEVER_SET".to_string(),
            },
            optional: true,
            description: None,
        })
        .with_credential(CredentialRequirement {
            name: "PATH_LIKE".to_string(),
            kind: CredentialKind::Custom,
            source: CredentialSource::Env {
                var: "PATH".to_string(),
            },
            optional: false,
            description: None,
        });
    spec.validate().expect("valid spec");

    let store = CredentialStore::new();
    for requirement in &spec.credentials {
        store.add(requirement.to_credential()).expect("add");
    }

    match store.validate_all() {
        Err(CredentialError::MissingRequired { names }) => {
            assert_eq!(names, vec!["SEARCH_API_KEY".to_string()]);
        }
        other => panic!("expected MissingRequired, got {:?}", other),
    }
}
