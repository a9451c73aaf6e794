//! Runtime configuration.
//!
//! [`KilnConfig::from_env`] reads `AGENTKILN_*` variables and
//! [`KilnConfig::from_file`] a JSON document; both fall back to defaults for
//! anything unset. CLI flags are applied on top by the binaries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use subagent_manager::{SubagentManagerConfig, SubagentRuntime, DEFAULT_MAX_CONCURRENT};
use tee_sandbox::TeePolicy;

use crate::domain::{KilnError, Result};

/// GitHub Actions workflow used for remote builds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteCiConfig {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    /// Workflow file name (or numeric id).
    pub workflow: String,
    pub git_ref: String,
    /// Credential holding the API token.
    pub token_credential: String,
    pub request_timeout_secs: u64,
}

impl Default for RemoteCiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            owner: String::new(),
            repo: String::new(),
            workflow: "build-agent.yml".to_string(),
            git_ref: "main".to_string(),
            token_credential: "GITHUB_TOKEN".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl RemoteCiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn is_configured(&self) -> bool {
        !self.owner.is_empty() && !self.repo.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            max_attempts: 60,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocalBuildConfig {
    pub enabled: bool,
    pub cargo: String,
    /// Where scaffolded crates are built.
    pub work_dir: Option<PathBuf>,
    /// Where finished artifacts are copied.
    pub output_dir: PathBuf,
    pub build_timeout_secs: u64,
    /// Upper bound on the toolchain probe.
    pub probe_timeout_secs: u64,
}

impl Default for LocalBuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cargo: "cargo".to_string(),
            work_dir: None,
            output_dir: PathBuf::from("target/agentkiln"),
            build_timeout_secs: 600,
            probe_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionConfig {
    /// How long terminal jobs stay queryable.
    pub retention_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubagentConfig {
    pub max_concurrent: usize,
    pub python_interpreter: String,
    pub node_interpreter: String,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            python_interpreter: SubagentRuntime::Python.default_interpreter().to_string(),
            node_interpreter: SubagentRuntime::Node.default_interpreter().to_string(),
        }
    }
}

impl SubagentConfig {
    /// Manager settings under `parent` as the default policy.
    pub fn manager_config(&self, parent: TeePolicy) -> SubagentManagerConfig {
        SubagentManagerConfig {
            max_concurrent: self.max_concurrent,
            default_policy: parent,
            python_interpreter: self.python_interpreter.clone(),
            node_interpreter: self.node_interpreter.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KilnConfig {
    pub remote: RemoteCiConfig,
    pub poll: PollConfig,
    pub local: LocalBuildConfig,
    pub retention: RetentionConfig,
    pub subagents: SubagentConfig,
    /// Credential metadata file; in-memory only when unset.
    pub credentials_path: Option<PathBuf>,
    /// Loopback address of the agent runtime host.
    pub runtime_addr: String,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            remote: RemoteCiConfig::default(),
            poll: PollConfig::default(),
            local: LocalBuildConfig::default(),
            retention: RetentionConfig::default(),
            subagents: SubagentConfig::default(),
            credentials_path: None,
            runtime_addr: "127.0.0.1:8787".to_string(),
        }
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| KilnError::Config(format!("{key}={raw:?}: {e}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(KilnError::Config(format!("{key}={raw:?}: expected a boolean"))),
    }
}

impl KilnConfig {
    /// Defaults overridden by `AGENTKILN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("AGENTKILN_"))
            .collect();
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AGENTKILN_CI_API_BASE") {
            config.remote.api_base = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("AGENTKILN_CI_OWNER") {
            config.remote.owner = v;
        }
        if let Some(v) = get("AGENTKILN_CI_REPO") {
            config.remote.repo = v;
        }
        if let Some(v) = get("AGENTKILN_CI_WORKFLOW") {
            config.remote.workflow = v;
        }
        if let Some(v) = get("AGENTKILN_CI_REF") {
            config.remote.git_ref = v;
        }
        if let Some(v) = get("AGENTKILN_CI_TOKEN_CREDENTIAL") {
            config.remote.token_credential = v;
        }
        if let Some(v) = get("AGENTKILN_CI_TIMEOUT_SECS") {
            config.remote.request_timeout_secs = parse("AGENTKILN_CI_TIMEOUT_SECS", &v)?;
        }

        if let Some(v) = get("AGENTKILN_POLL_INTERVAL_SECS") {
            config.poll.interval_secs = parse("AGENTKILN_POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("AGENTKILN_POLL_MAX_ATTEMPTS") {
            config.poll.max_attempts = parse("AGENTKILN_POLL_MAX_ATTEMPTS", &v)?;
        }

        if let Some(v) = get("AGENTKILN_LOCAL_BUILD") {
            config.local.enabled = parse_bool("AGENTKILN_LOCAL_BUILD", &v)?;
        }
        if let Some(v) = get("AGENTKILN_CARGO") {
            config.local.cargo = v;
        }
        if let Some(v) = get("AGENTKILN_WORK_DIR") {
            config.local.work_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("AGENTKILN_OUTPUT_DIR") {
            config.local.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("AGENTKILN_BUILD_TIMEOUT_SECS") {
            config.local.build_timeout_secs = parse("AGENTKILN_BUILD_TIMEOUT_SECS", &v)?;
        }

        if let Some(v) = get("AGENTKILN_RETENTION_SECS") {
            config.retention.retention_secs = parse("AGENTKILN_RETENTION_SECS", &v)?;
        }
        if let Some(v) = get("AGENTKILN_MAX_SUBAGENTS") {
            config.subagents.max_concurrent = parse("AGENTKILN_MAX_SUBAGENTS", &v)?;
        }
        if let Some(v) = get("AGENTKILN_PYTHON") {
            config.subagents.python_interpreter = v;
        }
        if let Some(v) = get("AGENTKILN_NODE") {
            config.subagents.node_interpreter = v;
        }

        if let Some(v) = get("AGENTKILN_CREDENTIALS_FILE") {
            config.credentials_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("AGENTKILN_RUNTIME_ADDR") {
            config.runtime_addr = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// JSON config file; missing sections take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| KilnError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll.max_attempts == 0 {
            return Err(KilnError::Config("poll.max_attempts must be > 0".to_string()));
        }
        if self.subagents.max_concurrent == 0 {
            return Err(KilnError::Config(
                "subagents.max_concurrent must be > 0".to_string(),
            ));
        }
        if self.local.build_timeout_secs == 0 || self.local.probe_timeout_secs == 0 {
            return Err(KilnError::Config("local build timeouts must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = KilnConfig::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(config.poll.interval_secs, 5);
        assert_eq!(config.poll.max_attempts, 60);
        assert_eq!(config.subagents.max_concurrent, 5);
        assert!(config.local.enabled);
        assert!(!config.remote.is_configured());
    }

    #[test]
    fn test_env_overrides() {
        let config = KilnConfig::from_lookup(lookup(&[
            ("AGENTKILN_CI_OWNER", "stevedores-org"),
            ("AGENTKILN_CI_REPO", "agent-builds"),
            ("AGENTKILN_CI_API_BASE", "http://localhost:9999/"),
            ("AGENTKILN_POLL_MAX_ATTEMPTS", "3"),
            ("AGENTKILN_LOCAL_BUILD", "off"),
            ("AGENTKILN_MAX_SUBAGENTS", "2"),
        ]))
        .expect("config");
        assert!(config.remote.is_configured());
        assert_eq!(config.remote.api_base, "http://localhost:9999");
        assert_eq!(config.poll.max_attempts, 3);
        assert!(!config.local.enabled);
        assert_eq!(config.subagents.max_concurrent, 2);
    }

    #[test]
    fn test_bad_number_is_config_error() {
        let err = KilnConfig::from_lookup(lookup(&[("AGENTKILN_POLL_MAX_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(matches!(err, KilnError::Config(_)));
        assert!(err.to_string().contains("AGENTKILN_POLL_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(KilnConfig::from_lookup(lookup(&[("AGENTKILN_POLL_MAX_ATTEMPTS", "0")])).is_err());
    }

    #[test]
    fn test_from_file_partial_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agentkiln.json");
        std::fs::write(
            &path,
            r#"{"remote": {"owner": "o", "repo": "r"}, "poll": {"interval_secs": 1}}"#,
        )
        .expect("write");

        let config = KilnConfig::from_file(&path).expect("load");
        assert_eq!(config.remote.owner, "o");
        assert_eq!(config.remote.workflow, "build-agent.yml");
        assert_eq!(config.poll.interval_secs, 1);
        assert_eq!(config.poll.max_attempts, 60);
    }
}
