//! TEE policy: isolation level, resource ceilings and capability flags.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TeeError, TeeResult};

/// Which isolation backend an isolate should use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    Process,
    Container,
    Vm,
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IsolationLevel::Process => "process",
            IsolationLevel::Container => "container",
            IsolationLevel::Vm => "vm",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "process" => Ok(Self::Process),
            "container" => Ok(Self::Container),
            "vm" => Ok(Self::Vm),
            other => Err(format!("unknown isolation level: {other}")),
        }
    }
}

/// Resource ceilings. Signed so that invalid input survives deserialization
/// and is rejected by [`TeePolicy::validate`] instead.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ResourceCeiling {
    pub memory_mb: i64,
    pub cpu_cores: f64,
    pub timeout_secs: i64,
}

impl Default for ResourceCeiling {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_cores: 1.0,
            timeout_secs: 30,
        }
    }
}

impl ResourceCeiling {
    /// Wall-clock limit for one execution. Only meaningful after validation.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1) as u64)
    }

    pub fn memory_bytes(&self) -> u64 {
        (self.memory_mb.max(0) as u64).saturating_mul(1024 * 1024)
    }

    /// CPU-seconds budget: cores times wall-clock, rounded up.
    pub fn cpu_seconds(&self) -> u64 {
        let secs = (self.cpu_cores * self.timeout_secs as f64).ceil();
        if secs.is_finite() && secs >= 1.0 {
            secs as u64
        } else {
            1
        }
    }
}

/// Capability flags threaded through to whichever layer enforces them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    #[serde(default)]
    pub network_access: bool,
    #[serde(default = "default_true")]
    pub filesystem_access: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            network_access: false,
            filesystem_access: true,
        }
    }
}

/// Full policy for one isolate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TeePolicy {
    #[serde(default)]
    pub isolation: IsolationLevel,
    #[serde(default)]
    pub resources: ResourceCeiling,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Policy-mandated environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl TeePolicy {
    /// Reject non-positive ceilings. Must pass before an isolate is built.
    pub fn validate(&self) -> TeeResult<()> {
        let r = &self.resources;
        if r.memory_mb <= 0 {
            return Err(TeeError::InvalidPolicy(format!(
                "memory_mb must be positive, got {}",
                r.memory_mb
            )));
        }
        if !r.cpu_cores.is_finite() || r.cpu_cores <= 0.0 {
            return Err(TeeError::InvalidPolicy(format!(
                "cpu_cores must be positive, got {}",
                r.cpu_cores
            )));
        }
        if r.timeout_secs <= 0 {
            return Err(TeeError::InvalidPolicy(format!(
                "timeout_secs must be positive, got {}",
                r.timeout_secs
            )));
        }
        if let Some(key) = self.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(TeeError::InvalidPolicy(format!(
                "invalid environment variable name: {key:?}"
            )));
        }
        Ok(())
    }

    pub fn with_resources(mut self, resources: ResourceCeiling) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_timeout_secs(mut self, secs: i64) -> Self {
        self.resources.timeout_secs = secs;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Variables describing this policy, injected into every child process.
    pub fn capability_env(&self) -> BTreeMap<String, String> {
        let r = &self.resources;
        BTreeMap::from([
            ("TEE_ISOLATION".to_string(), self.isolation.to_string()),
            (
                "TEE_NETWORK_ACCESS".to_string(),
                self.capabilities.network_access.to_string(),
            ),
            (
                "TEE_FILESYSTEM_ACCESS".to_string(),
                self.capabilities.filesystem_access.to_string(),
            ),
            ("TEE_MEMORY_MB".to_string(), r.memory_mb.to_string()),
            ("TEE_CPU_CORES".to_string(), r.cpu_cores.to_string()),
            ("TEE_TIMEOUT_SECS".to_string(), r.timeout_secs.to_string()),
        ])
    }
}
