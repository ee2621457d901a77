//! generate_manifests tool
//!
//! Prompt-driven Kubernetes manifest production. The image reference comes
//! from the session's build stage by name; artifacts never hold pointers to
//! each other, only stage lookups.

use super::{SideEffect, Tool, ToolContext, ToolDefinition, decode_args, require_prerequisite};
use crate::common::fingerprint::fingerprint_inputs;
use crate::error::{AssistError, Result};
use crate::policy::engine::EvalContext;
use crate::sampling::SamplingRequest;
use crate::session::{
    ImageArtifact, ManifestsArtifact, PipelineArtifact, Stage, StoredArtifact,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

static MANIFESTS_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "minProperties": 1,
        "additionalProperties": {"type": "string"}
    })
});

#[derive(Debug, Deserialize)]
struct ManifestsArgs {
    /// Application name; defaults to the image name
    #[serde(default)]
    app_name: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    replicas: Option<u32>,
    /// Also produce an Ingress resource
    #[serde(default)]
    ingress: bool,
    #[serde(default)]
    ingress_host: Option<String>,
    /// Image reference override; defaults to the build artifact
    #[serde(default)]
    image: Option<String>,
    #[serde(default, rename = "override")]
    override_prerequisites: bool,
}

/// Generates Deployment/Service (and optional Ingress) manifests.
pub struct GenerateManifestsTool;

#[async_trait]
impl Tool for GenerateManifestsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "generate_manifests",
            version: "1.0.0",
            description: "Generate Kubernetes manifests (Deployment, Service, optional Ingress) for the session's image, gated by policy.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "app_name": {"type": "string"},
                    "namespace": {"type": "string"},
                    "replicas": {"type": "integer", "minimum": 1},
                    "ingress": {"type": "boolean"},
                    "ingress_host": {"type": "string"},
                    "image": {"type": "string"},
                    "override": {"type": "boolean"}
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "manifests": {"type": "object"},
                    "policy": {"type": "object"}
                },
                "required": ["manifests"]
            }),
            side_effects: vec![SideEffect::WritesWorkspace],
            default_timeout: Duration::from_secs(120),
            requires_session: true,
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ManifestsArgs = decode_args(args)?;
        require_prerequisite(ctx, Stage::Manifests, args.override_prerequisites)?;

        let image = match args.image {
            Some(image) => image,
            None => match ctx.session()?.get_artifact(Stage::Build)? {
                Some(StoredArtifact {
                    artifact: PipelineArtifact::Image(ImageArtifact { reference, .. }),
                    ..
                }) => reference,
                _ => {
                    return Err(AssistError::precondition_failed(
                        "no image artifact in session and none supplied",
                    )
                    .with_hint("run build_image first or pass image explicitly"));
                }
            },
        };

        let app_name = args.app_name.unwrap_or_else(|| {
            image
                .rsplit('/')
                .next()
                .unwrap_or(&image)
                .split(':')
                .next()
                .unwrap_or("app")
                .to_string()
        });
        let namespace = args
            .namespace
            .unwrap_or_else(|| ctx.config.kubernetes.namespace.clone());

        let port = match ctx.session()?.get_artifact(Stage::Analyze)? {
            Some(StoredArtifact {
                artifact: PipelineArtifact::RepoAnalysis(analysis),
                ..
            }) => analysis.port,
            _ => 0,
        };

        let mut prompt_ctx = tera::Context::new();
        prompt_ctx.insert("image", &image);
        prompt_ctx.insert("app_name", &app_name);
        prompt_ctx.insert("namespace", &namespace);
        prompt_ctx.insert("port", &(port != 0).then_some(port));
        prompt_ctx.insert("replicas", &args.replicas);
        prompt_ctx.insert("ingress", &args.ingress);
        prompt_ctx.insert(
            "ingress_host",
            &args.ingress_host.as_deref().unwrap_or("app.example.com"),
        );
        let prompt = ctx
            .sampling
            .templates()
            .render("manifests/generate", &prompt_ctx)?;

        ctx.progress(1, 3, "running", "sampling manifests");
        let request = SamplingRequest::new(prompt).with_schema(MANIFESTS_SCHEMA.clone());
        let response = ctx
            .sampling
            .sample(request, ctx.remaining(), ctx.cancel_token())
            .await?;
        let extracted = response
            .json
            .ok_or_else(|| AssistError::internal("schema-validated reply missing JSON"))?;
        let manifests: BTreeMap<String, String> = serde_json::from_value(extracted)?;

        ctx.check_cancelled()?;
        ctx.progress(2, 3, "running", "evaluating manifests against policy");
        let bundle = manifests
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n---\n");
        let report = ctx.policy.evaluate("manifests", &bundle, &EvalContext::default());
        if !report.allow {
            return Err(AssistError::policy_violation(format!(
                "generated manifests violate policy: {}",
                report.summary
            )));
        }

        ctx.progress(3, 3, "running", "writing manifests to workspace");
        let manifests_dir = ctx.jail()?.secure_target("manifests")?;
        tokio::fs::create_dir_all(&manifests_dir)
            .await
            .map_err(|e| AssistError::io(format!("cannot create manifests dir: {}", e)))?;
        for (key, yaml) in &manifests {
            let file_name = format!("{}.yaml", key.replace('/', "-").to_lowercase());
            tokio::fs::write(manifests_dir.join(&file_name), yaml)
                .await
                .map_err(|e| AssistError::io(format!("cannot write {}: {}", file_name, e)))?;
        }

        let report_value = serde_json::to_value(&report)?;
        let fingerprint = fingerprint_inputs(&[
            ("image", &json!(image)),
            ("app_name", &json!(app_name)),
            ("namespace", &json!(namespace)),
        ]);
        let manifests_value = serde_json::to_value(&manifests)?;
        ctx.session()?
            .put_artifact(StoredArtifact::new(
                PipelineArtifact::Manifests(ManifestsArtifact {
                    manifests,
                    policy_report: report_value.clone(),
                }),
                fingerprint,
            ))
            .await?;

        ctx.progress(3, 3, "completed", "manifests ready");
        Ok(json!({
            "manifests": manifests_value,
            "policy": report_value,
            "path": "manifests"
        }))
    }
}
