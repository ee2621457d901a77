//! analyze_repository tool

use super::{SideEffect, Tool, ToolContext, ToolDefinition, decode_args};
use crate::analyzer;
use crate::common::fingerprint::fingerprint_inputs;
use crate::error::Result;
use crate::session::{PipelineArtifact, StoredArtifact};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct AnalyzeArgs {
    /// Repository path, relative to the session workspace
    #[serde(default)]
    path: Option<String>,
}

/// Walks the repository under the jail and records a `RepoAnalysis` artifact.
pub struct AnalyzeRepositoryTool;

#[async_trait]
impl Tool for AnalyzeRepositoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "analyze_repository",
            version: "1.0.0",
            description: "Analyze a source repository: detect language, framework, dependencies, entry points, listening port, application server, and database usage.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Repository path relative to the session workspace. Defaults to the workspace root."
                    }
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "analysis": {"type": "object"},
                    "stage": {"type": "string"}
                },
                "required": ["analysis"]
            }),
            side_effects: vec![SideEffect::ReadsWorkspace],
            default_timeout: Duration::from_secs(60),
            requires_session: true,
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: AnalyzeArgs = decode_args(args)?;
        let raw_path = args.path.unwrap_or_else(|| ".".to_string());

        ctx.progress(1, 3, "running", "validating repository path");
        let root = ctx.jail()?.secure_target(&raw_path)?;

        ctx.check_cancelled()?;
        ctx.progress(2, 3, "running", "detecting languages and dependencies");
        let analysis =
            tokio::task::spawn_blocking(move || analyzer::analyze_repository(&root))
                .await
                .map_err(|e| crate::error::AssistError::internal(format!("analysis task failed: {}", e)))??;

        ctx.check_cancelled()?;
        ctx.progress(3, 3, "running", "storing analysis artifact");
        let fingerprint = fingerprint_inputs(&[("path", &json!(raw_path))]);
        let analysis_value = serde_json::to_value(&analysis)?;
        ctx.session()?
            .put_artifact(StoredArtifact::new(
                PipelineArtifact::RepoAnalysis(analysis),
                fingerprint,
            ))
            .await?;

        ctx.progress(3, 3, "completed", "analysis complete");
        Ok(json!({
            "analysis": analysis_value,
            "stage": "analyze"
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::{InvokeOptions, ToolExecutor, ToolRegistry};
    use crate::{
        common::CommandRunner, config::Config, config::SessionConfig, policy::PolicyEngine,
        sampling::SamplingClient, session::SessionManager, session::Stage, store::KvStore,
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn executor_with_session(dir: &TempDir) -> (Arc<ToolExecutor>, String) {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(AnalyzeRepositoryTool)).unwrap();
        let sessions = SessionManager::new(
            SessionConfig {
                workspace_root: dir.path().to_path_buf(),
                ..SessionConfig::default()
            },
            KvStore::temporary().unwrap(),
        )
        .unwrap();
        let id = sessions.create(Value::Null).await.unwrap();
        let executor = ToolExecutor::new(
            registry,
            sessions,
            Arc::new(CommandRunner::new()),
            Arc::new(PolicyEngine::empty()),
            Arc::new(SamplingClient::disconnected()),
            Arc::new(Config::default()),
        );
        (executor, id)
    }

    #[tokio::test]
    async fn analyzes_workspace_and_stores_artifact() {
        let dir = TempDir::new().unwrap();
        let (executor, session_id) = executor_with_session(&dir).await;
        let workspace = executor.sessions().get(&session_id).unwrap();
        std::fs::write(
            workspace.workspace().join("package.json"),
            r#"{"dependencies":{"express":"^4.18.0"}}"#,
        )
        .unwrap();

        let result = executor
            .invoke(
                "analyze_repository",
                json!({}),
                InvokeOptions {
                    session_id: Some(session_id.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result["analysis"]["language"], "javascript");
        assert_eq!(result["session_id"], session_id);
        let stored = executor
            .sessions()
            .get_artifact(&session_id, Stage::Analyze)
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn traversal_path_is_rejected_by_jail() {
        let dir = TempDir::new().unwrap();
        let (executor, session_id) = executor_with_session(&dir).await;
        let err = executor
            .invoke(
                "analyze_repository",
                json!({"path": "../outside"}),
                InvokeOptions {
                    session_id: Some(session_id),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
        assert!(err.message.contains("outside workspace root"));
    }
}
