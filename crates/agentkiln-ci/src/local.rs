//! Local builds: scaffold a crate from the build spec and run cargo on it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agentkiln_core::{
    AgentBuildSpec, ArtifactLocator, BuildTarget, LocalBuildConfig, ToolImplementation,
};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::LocalBuildError;
use crate::stage::{run_stage, BuildStage, StageResult};

/// Environment variables set by serverless hosts where cargo cannot run.
pub const SERVERLESS_MARKERS: &[&str] = &["AWS_LAMBDA_FUNCTION_NAME", "VERCEL", "NETLIFY"];

/// Builds agent artifacts on this machine.
#[async_trait]
pub trait LocalBuilder: Send + Sync {
    /// Fast availability check. `Unavailable` sends the job to remote CI.
    async fn probe(&self) -> Result<(), LocalBuildError>;

    /// Build `spec` and return where the artifact landed. May still return
    /// `Unavailable` when the environment turns out to be incomplete.
    async fn build(
        &self,
        job_id: &str,
        spec: &AgentBuildSpec,
    ) -> Result<ArtifactLocator, LocalBuildError>;
}

/// First serverless marker present according to `lookup`.
pub fn serverless_marker(lookup: impl Fn(&str) -> Option<String>) -> Option<&'static str> {
    SERVERLESS_MARKERS
        .iter()
        .copied()
        .find(|key| lookup(key).is_some_and(|v| !v.is_empty()))
}

/// [`LocalBuilder`] driving the cargo on `PATH` (or `config.cargo`).
#[derive(Debug, Clone)]
pub struct CargoLocalBuilder {
    config: LocalBuildConfig,
}

impl CargoLocalBuilder {
    pub fn new(config: LocalBuildConfig) -> Self {
        Self { config }
    }

    fn build_stage(&self, manifest: &Path, target: BuildTarget) -> BuildStage {
        let mut command = vec![
            self.config.cargo.clone(),
            "build".to_string(),
            "--release".to_string(),
            "--manifest-path".to_string(),
            manifest.display().to_string(),
        ];
        if target == BuildTarget::SandboxedBytecode {
            command.push("--target".to_string());
            command.push(target.platform().to_string());
        }
        let cwd = manifest.parent().map(Path::to_path_buf).unwrap_or_default();
        BuildStage::new("cargo-build", command)
            .in_dir(cwd)
            .with_timeout(self.config.build_timeout_secs)
    }

    fn scratch_dir(&self, job_id: &str) -> Result<tempfile::TempDir, LocalBuildError> {
        let prefix = format!("{job_id}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.config.work_dir {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

#[async_trait]
impl LocalBuilder for CargoLocalBuilder {
    async fn probe(&self) -> Result<(), LocalBuildError> {
        if !self.config.enabled {
            return Err(LocalBuildError::Unavailable(
                "local builds disabled".to_string(),
            ));
        }
        if let Some(marker) = serverless_marker(|k| std::env::var(k).ok()) {
            return Err(LocalBuildError::Unavailable(format!(
                "serverless environment ({marker} is set)"
            )));
        }

        let stage = BuildStage::new(
            "probe",
            vec![self.config.cargo.clone(), "--version".to_string()],
        );
        let probe = tokio::time::timeout(
            Duration::from_secs(self.config.probe_timeout_secs.max(1)),
            run_stage(&stage),
        )
        .await;
        match probe {
            Ok(Ok(result)) if result.passed() => {
                debug!(toolchain = %result.stdout.trim(), "local toolchain available");
                Ok(())
            }
            Ok(Ok(result)) => Err(LocalBuildError::Unavailable(format!(
                "{} --version exited with {}",
                self.config.cargo, result.exit_code
            ))),
            Ok(Err(e)) => Err(LocalBuildError::Unavailable(format!(
                "{} not runnable: {e}",
                self.config.cargo
            ))),
            Err(_) => Err(LocalBuildError::Unavailable(format!(
                "{} --version did not answer within {}s",
                self.config.cargo, self.config.probe_timeout_secs
            ))),
        }
    }

    async fn build(
        &self,
        job_id: &str,
        spec: &AgentBuildSpec,
    ) -> Result<ArtifactLocator, LocalBuildError> {
        let scratch = self.scratch_dir(job_id)?;
        let project = scaffold(scratch.path(), spec)?;
        info!(job_id = %job_id, dir = %project.root.display(), "scaffolded agent crate");

        let stage = self.build_stage(&project.manifest, spec.build_target);
        let result = run_stage(&stage)
            .await
            .map_err(|e| LocalBuildError::Unavailable(format!("cannot run cargo: {e}")))?;
        if !result.passed() {
            return Err(classify_failure(&result, spec.build_target));
        }

        let built = project.artifact_path(spec.build_target);
        let extension = built
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_string();
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let file_name = format!("{job_id}-{}.{extension}", spec.sanitized_name());
        let dest = self.config.output_dir.join(&file_name);
        let size = tokio::fs::copy(&built, &dest).await?;
        let dest = tokio::fs::canonicalize(&dest).await?;

        info!(job_id = %job_id, artifact = %dest.display(), size, "local build finished");
        Ok(ArtifactLocator {
            name: file_name,
            download_url: format!("file://{}", dest.display()),
            size_bytes: Some(size),
        })
    }
}

fn classify_failure(result: &StageResult, target: BuildTarget) -> LocalBuildError {
    let missing_target = result.stderr.contains("target may not be installed")
        || result.stderr.contains("can't find crate for `std`");
    if missing_target {
        warn!(target = target.platform(), "rust target not installed locally");
        return LocalBuildError::Unavailable(format!(
            "rust target {} not installed",
            target.platform()
        ));
    }
    LocalBuildError::Failed {
        stage: result.stage_name.clone(),
        message: result.stderr_tail(20),
    }
}

/// Files written for one local build.
#[derive(Debug, Clone)]
pub struct ScaffoldedCrate {
    pub root: PathBuf,
    pub manifest: PathBuf,
    pub package: String,
}

impl ScaffoldedCrate {
    /// Where cargo leaves the library for `target`.
    pub fn artifact_path(&self, target: BuildTarget) -> PathBuf {
        let lib = self.package.replace('-', "_");
        match target {
            BuildTarget::SandboxedBytecode => self
                .root
                .join("target")
                .join(target.platform())
                .join("release")
                .join(format!("{lib}.wasm")),
            BuildTarget::NativePlugin => self.root.join("target").join("release").join(format!(
                "{}{lib}{}",
                std::env::consts::DLL_PREFIX,
                std::env::consts::DLL_SUFFIX
            )),
        }
    }
}

/// Write a standalone cdylib crate embedding `spec` under `dir`.
pub fn scaffold(dir: &Path, spec: &AgentBuildSpec) -> Result<ScaffoldedCrate, LocalBuildError> {
    let package = format!("agentkiln-{}", spec.sanitized_name());
    std::fs::create_dir_all(dir.join("src"))?;

    let spec_json = serde_json::to_string_pretty(spec)
        .map_err(|e| LocalBuildError::Failed {
            stage: "scaffold".to_string(),
            message: e.to_string(),
        })?;
    let digest = spec.digest().map_err(|e| LocalBuildError::Failed {
        stage: "scaffold".to_string(),
        message: e.to_string(),
    })?;

    let manifest = dir.join("Cargo.toml");
    std::fs::write(&manifest, render_manifest(&package, &spec.version))?;
    std::fs::write(dir.join("agent.json"), spec_json)?;
    std::fs::write(dir.join("src").join("lib.rs"), render_lib(spec, &digest))?;

    Ok(ScaffoldedCrate {
        root: dir.to_path_buf(),
        manifest,
        package,
    })
}

fn render_manifest(package: &str, version: &str) -> String {
    // Empty [workspace] keeps cargo from attaching to an enclosing workspace.
    format!(
        r#"[package]
name = "{package}"
version = "{version}"
edition = "2021"
publish = false

[lib]
crate-type = ["cdylib"]
path = "src/lib.rs"

[workspace]

[profile.release]
opt-level = "z"
lto = true
codegen-units = 1
strip = true
panic = "abort"
"#
    )
}

fn render_lib(spec: &AgentBuildSpec, digest: &str) -> String {
    let mut tools = String::new();
    for tool in &spec.tools {
        let binding = match &tool.implementation {
            ToolImplementation::Builtin { function } => format!("builtin:{function}"),
            ToolImplementation::Script { runtime, .. } => format!("script:{runtime}"),
        };
        tools.push_str(&format!("    ({:?}, {:?}),\n", tool.name, binding));
    }

    format!(
        r#"//! Generated by agentkiln. Do not edit.

pub const AGENT_NAME: &str = {name:?};
pub const AGENT_VERSION: &str = {version:?};
pub const SPEC_DIGEST: &str = {digest:?};
pub const MODEL: &str = {model:?};

/// (tool name, binding) pairs resolved by the runtime host.
pub static TOOLS: &[(&str, &str)] = &[
{tools}];

pub static AGENT_JSON: &str = include_str!("../agent.json");

#[no_mangle]
pub extern "C" fn agentkiln_manifest_ptr() -> *const u8 {{
    AGENT_JSON.as_ptr()
}}

#[no_mangle]
pub extern "C" fn agentkiln_manifest_len() -> usize {{
    AGENT_JSON.len()
}}
"#,
        name = spec.name,
        version = spec.version,
        model = spec.model.model,
    )
}
