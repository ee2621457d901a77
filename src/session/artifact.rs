//! Pipeline artifacts and the stage state machine
//!
//! A session accumulates one artifact per pipeline stage. Writing a stage's
//! artifact *is* the state transition; re-running a stage replaces its
//! artifact. Tools check their prerequisite stage before running unless the
//! caller passes an explicit override.

use crate::analyzer::RepoAnalysis;
use crate::scanner::ScanReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analyze,
    Dockerfile,
    Build,
    Scan,
    Manifests,
    Deploy,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Analyze,
        Stage::Dockerfile,
        Stage::Build,
        Stage::Scan,
        Stage::Manifests,
        Stage::Deploy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Analyze => "analyze",
            Stage::Dockerfile => "dockerfile",
            Stage::Build => "build",
            Stage::Scan => "scan",
            Stage::Manifests => "manifests",
            Stage::Deploy => "deploy",
        }
    }

    pub fn parse(name: &str) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// The stage whose artifact must exist before this one may run.
    pub fn prerequisite(&self) -> Option<Stage> {
        match self {
            Stage::Analyze => None,
            Stage::Dockerfile => Some(Stage::Analyze),
            Stage::Build => Some(Stage::Dockerfile),
            Stage::Scan => Some(Stage::Build),
            Stage::Manifests => Some(Stage::Build),
            Stage::Deploy => Some(Stage::Manifests),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Origin of a Dockerfile artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DockerfileOrigin {
    Generated,
    User,
    Fixed,
}

/// A Dockerfile plus the policy report that admitted it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DockerfileArtifact {
    pub content: String,
    pub origin: DockerfileOrigin,
    /// Policy evaluation at generation time, serialised report
    pub policy_report: serde_json::Value,
    /// Sampling iterations it took to satisfy policy
    pub iterations: u32,
}

/// A built container image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageArtifact {
    /// Local tag, e.g. `demo:1`
    pub reference: String,
    /// Registry-qualified reference once pushed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Tail of the build log, for diagnosis
    pub build_log_excerpt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Generated Kubernetes manifests, keyed `kind/name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestsArtifact {
    pub manifests: BTreeMap<String, String>,
    pub policy_report: serde_json::Value,
}

/// Result of a cluster deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentArtifact {
    pub namespace: String,
    pub resources: Vec<String>,
    pub ready: bool,
    pub readiness_message: String,
}

/// Tagged artifact union, one variant per stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineArtifact {
    RepoAnalysis(RepoAnalysis),
    Dockerfile(DockerfileArtifact),
    Image(ImageArtifact),
    ScanReport(ScanReport),
    Manifests(ManifestsArtifact),
    Deployment(DeploymentArtifact),
}

impl PipelineArtifact {
    /// The stage this artifact belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineArtifact::RepoAnalysis(_) => Stage::Analyze,
            PipelineArtifact::Dockerfile(_) => Stage::Dockerfile,
            PipelineArtifact::Image(_) => Stage::Build,
            PipelineArtifact::ScanReport(_) => Stage::Scan,
            PipelineArtifact::Manifests(_) => Stage::Manifests,
            PipelineArtifact::Deployment(_) => Stage::Deploy,
        }
    }
}

/// An artifact with its provenance envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredArtifact {
    pub created_at: DateTime<Utc>,
    /// Fingerprint of the inputs that produced this artifact
    pub fingerprint: String,
    #[serde(flatten)]
    pub artifact: PipelineArtifact,
}

impl StoredArtifact {
    pub fn new(artifact: PipelineArtifact, fingerprint: String) -> Self {
        Self {
            created_at: Utc::now(),
            fingerprint,
            artifact,
        }
    }
}
