//! Dockerfile tools: generate_dockerfile, validate_dockerfile, fix_dockerfile

use super::{SideEffect, Tool, ToolContext, ToolDefinition, decode_args, require_prerequisite};
use crate::common::fingerprint::{fingerprint_inputs, fingerprint_text};
use crate::error::{AssistError, Result};
use crate::policy::engine::EvalContext;
use crate::policy::{Enforcement, PolicyReport};
use crate::sampling::SamplingRequest;
use crate::session::{
    DockerfileArtifact, DockerfileOrigin, PipelineArtifact, Stage, StoredArtifact,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

static DOCKERFILE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "dockerfile": {"type": "string"},
            "base_image": {"type": "string"},
            "notes": {"type": "string"}
        },
        "required": ["dockerfile"]
    })
});

#[derive(Debug, Deserialize)]
struct GenerateArgs {
    /// Opaque knowledge-pack data folded into the prompt
    #[serde(default)]
    knowledge: Option<Value>,
    #[serde(default, rename = "override")]
    override_prerequisites: bool,
}

/// Prompt-driven Dockerfile generation with a policy re-prompt loop.
pub struct GenerateDockerfileTool;

#[async_trait]
impl Tool for GenerateDockerfileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "generate_dockerfile",
            version: "1.0.0",
            description: "Generate a Dockerfile from the session's repository analysis, iterating with the sampler until the result satisfies policy.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "knowledge": {
                        "description": "Optional knowledge-pack data merged into the prompt",
                        "type": ["object", "string", "null"]
                    },
                    "override": {
                        "type": "boolean",
                        "description": "Skip the analyze-stage prerequisite check"
                    }
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "dockerfile": {"type": "string"},
                    "policy": {"type": "object"},
                    "iterations": {"type": "integer"}
                },
                "required": ["dockerfile", "iterations"]
            }),
            side_effects: vec![SideEffect::ReadsWorkspace, SideEffect::WritesWorkspace],
            default_timeout: Duration::from_secs(120),
            requires_session: true,
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: GenerateArgs = decode_args(args)?;
        require_prerequisite(ctx, Stage::Dockerfile, args.override_prerequisites)?;

        let analysis = match ctx.session()?.get_artifact(Stage::Analyze)? {
            Some(StoredArtifact {
                artifact: PipelineArtifact::RepoAnalysis(analysis),
                ..
            }) => analysis,
            _ => crate::analyzer::RepoAnalysis::default(),
        };

        let knowledge_text = args
            .knowledge
            .as_ref()
            .map(|k| match k {
                Value::String(s) => s.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_default(),
            })
            .unwrap_or_default();

        let mut prompt_ctx = tera::Context::new();
        prompt_ctx.insert("language", &analysis.language);
        prompt_ctx.insert("language_version", &analysis.language_version);
        prompt_ctx.insert("framework", &analysis.framework);
        prompt_ctx.insert("port", &analysis.port);
        prompt_ctx.insert("entry_points", &analysis.entry_points);
        let dep_names: Vec<&str> = analysis
            .dependencies
            .iter()
            .filter(|d| !d.dev)
            .map(|d| d.name.as_str())
            .collect();
        prompt_ctx.insert("dependencies", &dep_names);
        prompt_ctx.insert("knowledge", &knowledge_text);
        let base_prompt = ctx
            .sampling
            .templates()
            .render("dockerfile/generate", &prompt_ctx)?;

        let max_iterations = ctx.config.policy.max_fix_iterations.max(1);
        let mut prompt = base_prompt.clone();
        let mut iterations = 0u32;
        let mut last: Option<(String, PolicyReport)> = None;

        while iterations < max_iterations {
            ctx.check_cancelled()?;
            iterations += 1;
            ctx.progress(
                iterations,
                max_iterations,
                "running",
                &format!("sampling dockerfile (iteration {})", iterations),
            );

            let request = SamplingRequest::new(prompt.clone())
                .with_schema(DOCKERFILE_SCHEMA.clone());
            let response = ctx
                .sampling
                .sample(request, ctx.remaining(), ctx.cancel_token())
                .await?;
            let extracted = response
                .json
                .ok_or_else(|| AssistError::internal("schema-validated reply missing JSON"))?;
            let dockerfile = extracted["dockerfile"]
                .as_str()
                .unwrap_or_default()
                .to_string();

            let report = ctx.policy.evaluate(
                "dockerfile",
                &dockerfile,
                &EvalContext {
                    workspace: ctx.session().ok().map(|s| s.workspace().as_path()),
                    ..Default::default()
                },
            );

            if report.allow {
                return finish(ctx, dockerfile, report, iterations, DockerfileOrigin::Generated)
                    .await;
            }

            let violations: Vec<String> = report
                .violations
                .iter()
                .map(|v| format!("[{}] {}", v.rule_id, v.message))
                .collect();
            log::info!(
                "generated dockerfile violates policy ({}), re-prompting",
                violations.join("; ")
            );
            prompt = format!(
                "{}\n\nThe previous Dockerfile violated these policies:\n{}\nRegenerate a Dockerfile that satisfies every one of them.",
                base_prompt,
                violations
                    .iter()
                    .map(|v| format!("- {}", v))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
            last = Some((dockerfile, report));
        }

        let (dockerfile, report) = last.ok_or_else(|| {
            AssistError::internal("dockerfile generation loop ended without a candidate")
        })?;
        if report.enforcement == Enforcement::Strict {
            return Err(AssistError::policy_violation(format!(
                "generated Dockerfile still violates policy after {} iteration(s): {}",
                iterations, report.summary
            ))
            .with_hint("relax the policy, raise max_fix_iterations, or adjust the prompt"));
        }
        finish(ctx, dockerfile, report, iterations, DockerfileOrigin::Generated).await
    }
}

async fn finish(
    ctx: &ToolContext,
    dockerfile: String,
    report: PolicyReport,
    iterations: u32,
    origin: DockerfileOrigin,
) -> Result<Value> {
    let path = ctx.jail()?.secure_target("Dockerfile")?;
    tokio::fs::write(&path, &dockerfile)
        .await
        .map_err(|e| AssistError::io(format!("cannot write Dockerfile: {}", e)))?;

    let report_value = serde_json::to_value(&report)?;
    let fingerprint = fingerprint_text(&dockerfile);
    ctx.session()?
        .put_artifact(StoredArtifact::new(
            PipelineArtifact::Dockerfile(DockerfileArtifact {
                content: dockerfile.clone(),
                origin,
                policy_report: report_value.clone(),
                iterations,
            }),
            fingerprint,
        ))
        .await?;

    ctx.progress(iterations, iterations, "completed", "dockerfile ready");
    Ok(json!({
        "dockerfile": dockerfile,
        "policy": report_value,
        "iterations": iterations,
        "path": "Dockerfile"
    }))
}

#[derive(Debug, Deserialize)]
struct ValidateArgs {
    /// Inline Dockerfile text; mutually exclusive with `path`
    #[serde(default)]
    dockerfile: Option<String>,
    /// Workspace-relative Dockerfile path
    #[serde(default)]
    path: Option<String>,
}

/// Policy evaluation over a user-supplied Dockerfile.
pub struct ValidateDockerfileTool;

#[async_trait]
impl Tool for ValidateDockerfileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "validate_dockerfile",
            version: "1.0.0",
            description: "Evaluate a Dockerfile against the loaded policy set and report violations, warnings, and suggestions.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "dockerfile": {"type": "string", "description": "Inline Dockerfile text"},
                    "path": {"type": "string", "description": "Workspace-relative path to a Dockerfile"}
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {"policy": {"type": "object"}},
                "required": ["policy"]
            }),
            side_effects: vec![SideEffect::ReadsWorkspace],
            default_timeout: Duration::from_secs(30),
            requires_session: true,
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ValidateArgs = decode_args(args)?;
        let dockerfile = load_dockerfile(ctx, args.dockerfile, args.path).await?;
        let report = ctx.policy.evaluate(
            "dockerfile",
            &dockerfile,
            &EvalContext {
                workspace: ctx.session().ok().map(|s| s.workspace().as_path()),
                ..Default::default()
            },
        );
        Ok(json!({"policy": serde_json::to_value(&report)?}))
    }
}

#[derive(Debug, Deserialize)]
struct FixArgs {
    #[serde(default)]
    dockerfile: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

/// Sampler-assisted Dockerfile repair, re-checked against policy.
pub struct FixDockerfileTool;

#[async_trait]
impl Tool for FixDockerfileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "fix_dockerfile",
            version: "1.0.0",
            description: "Ask the sampler to correct a Dockerfile's policy violations, then re-evaluate the result.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "dockerfile": {"type": "string"},
                    "path": {"type": "string"}
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "dockerfile": {"type": "string"},
                    "policy": {"type": "object"},
                    "changes": {"type": "array"}
                },
                "required": ["dockerfile", "policy"]
            }),
            side_effects: vec![SideEffect::ReadsWorkspace, SideEffect::WritesWorkspace],
            default_timeout: Duration::from_secs(120),
            requires_session: true,
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: FixArgs = decode_args(args)?;
        let original = load_dockerfile(ctx, args.dockerfile, args.path).await?;

        let before = ctx.policy.evaluate("dockerfile", &original, &EvalContext::default());
        if before.violations.is_empty() && before.warnings.is_empty() {
            return Ok(json!({
                "dockerfile": original,
                "policy": serde_json::to_value(&before)?,
                "changes": []
            }));
        }

        let issues: Vec<String> = before
            .violations
            .iter()
            .chain(before.warnings.iter())
            .map(|f| format!("[{}] {}", f.rule_id, f.message))
            .collect();
        ctx.progress(1, 2, "running", "requesting dockerfile fix");
        let fixed = ctx
            .sampling
            .fix_dockerfile(&original, &issues, ctx.remaining(), ctx.cancel_token())
            .await?;
        let dockerfile = fixed["dockerfile"].as_str().unwrap_or(&original).to_string();
        let changes = fixed["changes"].clone();

        ctx.progress(2, 2, "running", "re-evaluating policy");
        let after = ctx.policy.evaluate("dockerfile", &dockerfile, &EvalContext::default());

        let fingerprint = fingerprint_inputs(&[
            ("original", &json!(fingerprint_text(&original))),
            ("fixed", &json!(fingerprint_text(&dockerfile))),
        ]);
        ctx.session()?
            .put_artifact(StoredArtifact::new(
                PipelineArtifact::Dockerfile(DockerfileArtifact {
                    content: dockerfile.clone(),
                    origin: DockerfileOrigin::Fixed,
                    policy_report: serde_json::to_value(&after)?,
                    iterations: 1,
                }),
                fingerprint,
            ))
            .await?;

        Ok(json!({
            "dockerfile": dockerfile,
            "policy": serde_json::to_value(&after)?,
            "changes": changes
        }))
    }
}

async fn load_dockerfile(
    ctx: &ToolContext,
    inline: Option<String>,
    path: Option<String>,
) -> Result<String> {
    if let Some(text) = inline {
        return Ok(text);
    }
    let relative = path.unwrap_or_else(|| "Dockerfile".to_string());
    let target = ctx.jail()?.secure_target(&relative)?;
    tokio::fs::read_to_string(&target).await.map_err(|e| {
        AssistError::not_found(format!("cannot read {}: {}", relative, e))
            .with_path(relative)
    })
}
