//! Picks the artifact that belongs to a job out of a run's artifacts.
//!
//! Tiers, strongest first: the run's deployment manifest, a name containing
//! the job id, a name containing a build marker, the only artifact of the
//! run. Anything past the job-id tier is logged as a fallback.

use agentkiln_core::metrics::METRICS;
use agentkiln_core::obs::emit_artifact_fallback;
use agentkiln_core::ArtifactLocator;

use crate::provider::{DeploymentManifest, RunArtifact};

/// Name fragments produced by the build workflow's upload step.
pub const ARTIFACT_MARKERS: &[&str] = &["plugin", "agent"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Manifest,
    JobId,
    Marker,
    Sole,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Manifest => "manifest",
            MatchTier::JobId => "job_id",
            MatchTier::Marker => "marker",
            MatchTier::Sole => "sole",
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, MatchTier::Marker | MatchTier::Sole)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMatch {
    pub artifact: ArtifactLocator,
    pub tier: MatchTier,
}

fn locator(artifact: &RunArtifact) -> ArtifactLocator {
    ArtifactLocator {
        name: artifact.name.clone(),
        download_url: artifact.download_url.clone(),
        size_bytes: artifact.size_bytes,
    }
}

fn select<'a>(
    job_id: &str,
    artifacts: &'a [RunArtifact],
    manifest: Option<&DeploymentManifest>,
) -> Option<(&'a RunArtifact, MatchTier)> {
    if let Some(manifest) = manifest.filter(|m| m.job_id == job_id) {
        if let Some(a) = artifacts.iter().find(|a| a.name == manifest.artifact_name) {
            return Some((a, MatchTier::Manifest));
        }
    }
    if let Some(a) = artifacts.iter().find(|a| a.name.contains(job_id)) {
        return Some((a, MatchTier::JobId));
    }
    for marker in ARTIFACT_MARKERS {
        if let Some(a) = artifacts.iter().find(|a| a.name.contains(marker)) {
            return Some((a, MatchTier::Marker));
        }
    }
    match artifacts {
        [only] => Some((only, MatchTier::Sole)),
        _ => None,
    }
}

/// Resolve the artifact for `job_id`, or `None` when nothing qualifies.
pub fn match_artifact(
    job_id: &str,
    artifacts: &[RunArtifact],
    manifest: Option<&DeploymentManifest>,
) -> Option<ArtifactMatch> {
    let (artifact, tier) = select(job_id, artifacts, manifest)?;
    if tier.is_fallback() {
        METRICS.inc_artifact_fallbacks();
        emit_artifact_fallback(job_id, tier.as_str(), &artifact.name);
    }
    Some(ArtifactMatch {
        artifact: locator(artifact),
        tier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(id: u64, name: &str) -> RunArtifact {
        RunArtifact {
            id,
            name: name.to_string(),
            size_bytes: Some(10),
            download_url: format!("https://ci.test/artifacts/{id}.zip"),
            expired: false,
        }
    }

    #[test]
    fn test_job_id_match() {
        let artifacts = vec![artifact(1, "logs"), artifact(2, "x-compile-123.zip")];
        let m = match_artifact("compile-123", &artifacts, None).expect("match");
        assert_eq!(m.tier, MatchTier::JobId);
        assert_eq!(m.artifact.name, "x-compile-123.zip");
    }

    #[test]
    fn test_sole_artifact_with_marker() {
        let artifacts = vec![artifact(1, "agent-plugin.zip")];
        let m = match_artifact("compile-999", &artifacts, None).expect("match");
        assert_eq!(m.tier, MatchTier::Marker);
        assert_eq!(m.artifact.name, "agent-plugin.zip");
    }

    #[test]
    fn test_sole_artifact_without_marker() {
        let artifacts = vec![artifact(1, "bundle.zip")];
        let m = match_artifact("compile-999", &artifacts, None).expect("match");
        assert_eq!(m.tier, MatchTier::Sole);
    }

    #[test]
    fn test_no_artifacts() {
        assert_eq!(match_artifact("compile-1", &[], None), None);
    }

    #[test]
    fn test_ambiguous_artifacts_do_not_match() {
        let artifacts = vec![artifact(1, "logs"), artifact(2, "coverage")];
        assert_eq!(match_artifact("compile-1", &artifacts, None), None);
    }

    #[test]
    fn test_manifest_beats_job_id() {
        let artifacts = vec![
            artifact(1, "compile-7-debug"),
            artifact(2, "release-bundle"),
        ];
        let manifest = DeploymentManifest {
            job_id: "compile-7".to_string(),
            artifact_name: "release-bundle".to_string(),
        };
        let m = match_artifact("compile-7", &artifacts, Some(&manifest)).expect("match");
        assert_eq!(m.tier, MatchTier::Manifest);
        assert_eq!(m.artifact.name, "release-bundle");

        let other_job = DeploymentManifest {
            job_id: "compile-8".to_string(),
            ..manifest
        };
        let m = match_artifact("compile-7", &artifacts, Some(&other_job)).expect("match");
        assert_eq!(m.tier, MatchTier::JobId);
    }
}
