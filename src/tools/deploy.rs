//! deploy tool
//!
//! Applies the session's manifests with server-side apply (idempotent by
//! construction) and polls pod readiness until ready or deadline, emitting a
//! progress event at each poll tick.

use super::{SideEffect, Tool, ToolContext, ToolDefinition, decode_args, require_prerequisite};
use crate::common::CommandSpec;
use crate::common::fingerprint::fingerprint_inputs;
use crate::error::{AssistError, Result};
use crate::session::{
    DeploymentArtifact, ManifestsArtifact, PipelineArtifact, Stage, StoredArtifact,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DeployArgs {
    #[serde(default)]
    namespace: Option<String>,
    /// Label selector for readiness polling; defaults to `app=<name>` from
    /// the first Deployment manifest
    #[serde(default)]
    selector: Option<String>,
    /// Skip the readiness wait entirely
    #[serde(default)]
    skip_wait: bool,
    #[serde(default, rename = "override")]
    override_prerequisites: bool,
}

/// Applies manifests to the target cluster and waits for readiness.
pub struct DeployTool;

#[async_trait]
impl Tool for DeployTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "deploy",
            version: "1.0.0",
            description: "Apply the session's Kubernetes manifests idempotently and poll pod readiness until ready or deadline.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "namespace": {"type": "string"},
                    "selector": {"type": "string"},
                    "skip_wait": {"type": "boolean"},
                    "override": {"type": "boolean"}
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "namespace": {"type": "string"},
                    "resources": {"type": "array"},
                    "ready": {"type": "boolean"}
                },
                "required": ["namespace", "resources", "ready"]
            }),
            side_effects: vec![SideEffect::InvokesK8s, SideEffect::InvokesNetwork],
            default_timeout: Duration::from_secs(300),
            requires_session: true,
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: DeployArgs = decode_args(args)?;
        require_prerequisite(ctx, Stage::Deploy, args.override_prerequisites)?;

        let manifests = match ctx.session()?.get_artifact(Stage::Manifests)? {
            Some(StoredArtifact {
                artifact: PipelineArtifact::Manifests(ManifestsArtifact { manifests, .. }),
                ..
            }) => manifests,
            _ => {
                return Err(AssistError::precondition_failed(
                    "no manifests artifact in session",
                )
                .with_hint("run generate_manifests first"));
            }
        };

        let namespace = args
            .namespace
            .unwrap_or_else(|| ctx.config.kubernetes.namespace.clone());

        // stage the bundle in scratch for a single apply
        let scratch = ctx.session()?.scratch_dir()?;
        let bundle_path = scratch.join("deploy.yaml");
        let bundle = manifests
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n---\n");
        tokio::fs::write(&bundle_path, &bundle)
            .await
            .map_err(|e| AssistError::io(format!("cannot stage manifests: {}", e)))?;

        ctx.progress(1, 2, "running", &format!("applying {} manifest(s)", manifests.len()));
        let apply = CommandSpec::new("kubectl")
            .args([
                "apply",
                "--server-side",
                "--field-manager",
                "containerization-assist",
                "-n",
                &namespace,
                "-f",
            ])
            .arg(bundle_path.to_string_lossy())
            .deadline(Duration::from_secs(60));
        let output = ctx.runner.run(apply, ctx.cancel_token()).await?;
        if !output.success() {
            return Err(AssistError::external_tool(format!(
                "kubectl apply failed with status {}: {}",
                output.exit_code,
                output.stderr.trim()
            ))
            .with_tool("kubectl")
            .with_exit_code(output.exit_code));
        }
        let resources: Vec<String> = output
            .stdout
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(String::from)
            .collect();

        let selector = args.selector.unwrap_or_else(|| {
            manifests
                .keys()
                .find(|k| k.starts_with("Deployment/"))
                .and_then(|k| k.split('/').nth(1))
                .map(|name| format!("app={}", name))
                .unwrap_or_else(|| "app".to_string())
        });

        let (ready, readiness_message) = if args.skip_wait {
            (false, "readiness wait skipped".to_string())
        } else {
            poll_readiness(ctx, &namespace, &selector).await?
        };

        let fingerprint = fingerprint_inputs(&[
            ("namespace", &json!(namespace)),
            ("resources", &json!(resources)),
        ]);
        ctx.session()?
            .put_artifact(StoredArtifact::new(
                PipelineArtifact::Deployment(DeploymentArtifact {
                    namespace: namespace.clone(),
                    resources: resources.clone(),
                    ready,
                    readiness_message: readiness_message.clone(),
                }),
                fingerprint,
            ))
            .await?;

        ctx.progress(2, 2, "completed", &readiness_message);
        Ok(json!({
            "namespace": namespace,
            "resources": resources,
            "ready": ready,
            "message": readiness_message
        }))
    }
}

/// Poll pod readiness under the configured deadline, one progress event per
/// tick.
async fn poll_readiness(
    ctx: &ToolContext,
    namespace: &str,
    selector: &str,
) -> Result<(bool, String)> {
    let deadline = tokio::time::Instant::now() + ctx.config.kubernetes.readiness_deadline;
    let mut tick = 0u32;
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Ok((
                false,
                format!("pods matching {} not ready before deadline", selector),
            ));
        }
        ctx.check_cancelled()?;
        tick += 1;

        let get = CommandSpec::new("kubectl")
            .args(["get", "pods", "-n", namespace, "-l", selector, "-o", "json"])
            .deadline(Duration::from_secs(30));
        let output = ctx.runner.run(get, ctx.cancel_token()).await?;
        if output.success() {
            let (ready, total) = count_ready_pods(&output.stdout);
            ctx.progress(
                tick,
                0,
                "running",
                &format!("readiness: {}/{} pod(s) ready", ready, total),
            );
            if total > 0 && ready == total {
                return Ok((true, format!("{}/{} pod(s) ready", ready, total)));
            }
        } else {
            ctx.progress(tick, 0, "running", "readiness: pod query failed, retrying");
        }

        tokio::select! {
            _ = tokio::time::sleep(ctx.config.kubernetes.poll_interval) => {}
            _ = ctx.cancel_token().cancelled() => {
                return Err(AssistError::cancelled("deploy cancelled during readiness wait"));
            }
        }
    }
}

/// Count `(ready, total)` pods from `kubectl get pods -o json` output.
fn count_ready_pods(json_text: &str) -> (usize, usize) {
    let Ok(parsed) = serde_json::from_str::<Value>(json_text) else {
        return (0, 0);
    };
    let Some(items) = parsed["items"].as_array() else {
        return (0, 0);
    };
    let total = items.len();
    let ready = items
        .iter()
        .filter(|pod| {
            pod["status"]["conditions"]
                .as_array()
                .map(|conditions| {
                    conditions.iter().any(|c| {
                        c["type"] == "Ready" && c["status"] == "True"
                    })
                })
                .unwrap_or(false)
        })
        .count();
    (ready, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_ready_pods() {
        let payload = json!({
            "items": [
                {"status": {"conditions": [{"type": "Ready", "status": "True"}]}},
                {"status": {"conditions": [{"type": "Ready", "status": "False"}]}},
                {"status": {}}
            ]
        })
        .to_string();
        assert_eq!(count_ready_pods(&payload), (1, 3));
        assert_eq!(count_ready_pods("not json"), (0, 0));
        assert_eq!(count_ready_pods(r#"{"items": []}"#), (0, 0));
    }

    #[test]
    fn definition_declares_k8s() {
        let def = DeployTool.definition();
        assert!(def.side_effects.contains(&SideEffect::InvokesK8s));
        assert_eq!(def.name, "deploy");
    }
}
