//! build_image tool
//!
//! Materialises the session's Dockerfile into a scratch directory, drives
//! `docker build`, and optionally validates the image by starting a container
//! and watching its logs for configured success or failure patterns.

use super::{SideEffect, Tool, ToolContext, ToolDefinition, decode_args, require_prerequisite};
use crate::common::CommandSpec;
use crate::common::fingerprint::fingerprint_text;
use crate::error::{AssistError, Result};
use crate::session::{ImageArtifact, PipelineArtifact, Stage, StoredArtifact};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Tail length of the build log kept in the artifact.
const BUILD_LOG_EXCERPT: usize = 4096;

#[derive(Debug, Deserialize)]
struct BuildArgs {
    /// Image tag, e.g. `demo:1`
    tag: String,
    /// Build context path relative to the workspace
    #[serde(default)]
    context: Option<String>,
    /// Inline Dockerfile override; defaults to the session's artifact
    #[serde(default)]
    dockerfile: Option<String>,
    /// Start the container afterwards and check its logs
    #[serde(default)]
    runtime_validation: bool,
    /// Patterns that mark startup as successful
    #[serde(default)]
    success_patterns: Vec<String>,
    /// Patterns that mark startup as failed
    #[serde(default)]
    failure_patterns: Vec<String>,
    #[serde(default, rename = "override")]
    override_prerequisites: bool,
}

/// Builds the session's Dockerfile into a local image.
pub struct BuildImageTool;

#[async_trait]
impl Tool for BuildImageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "build_image",
            version: "1.0.0",
            description: "Build a container image from the session's Dockerfile, optionally validating that the container starts cleanly.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tag": {"type": "string", "description": "Image tag to build, e.g. demo:1"},
                    "context": {"type": "string", "description": "Build context path relative to the workspace"},
                    "dockerfile": {"type": "string", "description": "Inline Dockerfile text overriding the session artifact"},
                    "runtime_validation": {"type": "boolean"},
                    "success_patterns": {"type": "array", "items": {"type": "string"}},
                    "failure_patterns": {"type": "array", "items": {"type": "string"}},
                    "override": {"type": "boolean"}
                },
                "required": ["tag"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "image": {"type": "string"},
                    "image_id": {"type": "string"},
                    "size_bytes": {"type": ["integer", "null"]},
                    "validated": {"type": "boolean"}
                },
                "required": ["image"]
            }),
            side_effects: vec![SideEffect::ReadsWorkspace, SideEffect::InvokesDocker],
            default_timeout: Duration::from_secs(300),
            requires_session: true,
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: BuildArgs = decode_args(args)?;
        require_prerequisite(ctx, Stage::Build, args.override_prerequisites)?;

        let dockerfile = match args.dockerfile {
            Some(inline) => inline,
            None => match ctx.session()?.get_artifact(Stage::Dockerfile)? {
                Some(StoredArtifact {
                    artifact: PipelineArtifact::Dockerfile(artifact),
                    ..
                }) => artifact.content,
                _ => {
                    return Err(AssistError::precondition_failed(
                        "no Dockerfile artifact in session and none supplied",
                    )
                    .with_hint("run generate_dockerfile first or pass dockerfile inline"));
                }
            },
        };

        // the Dockerfile goes into scratch so the build context stays clean
        let scratch = ctx.session()?.scratch_dir()?;
        let dockerfile_path = scratch.join("Dockerfile");
        tokio::fs::write(&dockerfile_path, &dockerfile)
            .await
            .map_err(|e| AssistError::io(format!("cannot stage Dockerfile: {}", e)))?;

        let context_rel = args.context.unwrap_or_else(|| ".".to_string());
        let context_path = ctx.jail()?.secure_target(&context_rel)?;

        ctx.progress(1, 4, "running", &format!("building {}", args.tag));
        let build = CommandSpec::new("docker")
            .args(["build", "-q", "-f"])
            .arg(dockerfile_path.to_string_lossy())
            .args(["-t", &args.tag])
            .arg(context_path.to_string_lossy())
            .deadline(ctx.remaining());
        let output = ctx.runner.run(build, ctx.cancel_token()).await?;
        if !output.success() {
            return Err(AssistError::external_tool(format!(
                "docker build failed with status {}: {}",
                output.exit_code,
                tail(&output.stderr, 512)
            ))
            .with_tool("docker")
            .with_exit_code(output.exit_code)
            .with_hint("inspect the Dockerfile and build context"));
        }
        let image_id = output.stdout.trim().to_string();

        ctx.check_cancelled()?;
        ctx.progress(2, 4, "running", "inspecting image");
        let size_bytes = inspect_size(ctx, &args.tag).await;
        let digest = inspect_digest(ctx, &args.tag).await;

        let mut validated = false;
        if args.runtime_validation {
            ctx.progress(3, 4, "running", "starting container for validation");
            validate_runtime(ctx, &args.tag, &args.success_patterns, &args.failure_patterns)
                .await?;
            validated = true;
        }

        ctx.check_cancelled()?;
        ctx.progress(4, 4, "running", "recording image artifact");
        let build_log_excerpt = tail(&output.combined(), BUILD_LOG_EXCERPT);
        ctx.session()?
            .put_artifact(StoredArtifact::new(
                PipelineArtifact::Image(ImageArtifact {
                    reference: args.tag.clone(),
                    registry_reference: None,
                    digest,
                    build_log_excerpt,
                    size_bytes,
                }),
                fingerprint_text(&dockerfile),
            ))
            .await?;

        ctx.progress(4, 4, "completed", "image built");
        Ok(json!({
            "image": args.tag,
            "image_id": image_id,
            "size_bytes": size_bytes,
            "validated": validated
        }))
    }
}

async fn inspect_size(ctx: &ToolContext, tag: &str) -> Option<u64> {
    let spec = CommandSpec::new("docker")
        .args(["image", "inspect", "--format", "{{.Size}}", tag])
        .deadline(Duration::from_secs(10));
    match ctx.runner.run(spec, ctx.cancel_token()).await {
        Ok(output) if output.success() => output.stdout.trim().parse().ok(),
        _ => None,
    }
}

async fn inspect_digest(ctx: &ToolContext, tag: &str) -> Option<String> {
    let spec = CommandSpec::new("docker")
        .args(["image", "inspect", "--format", "{{.Id}}", tag])
        .deadline(Duration::from_secs(10));
    match ctx.runner.run(spec, ctx.cancel_token()).await {
        Ok(output) if output.success() => {
            let id = output.stdout.trim();
            (!id.is_empty()).then(|| id.to_string())
        }
        _ => None,
    }
}

/// Start the image detached and watch its logs under the startup deadline.
///
/// A failure pattern in the logs fails validation with
/// `precondition_failed`; with no patterns configured, any startup that does
/// not immediately exit counts as success.
async fn validate_runtime(
    ctx: &ToolContext,
    tag: &str,
    success_patterns: &[String],
    failure_patterns: &[String],
) -> Result<()> {
    let success_patterns = if success_patterns.is_empty() {
        ctx.config.docker.success_patterns.clone()
    } else {
        success_patterns.to_vec()
    };
    let failure_patterns = if failure_patterns.is_empty() {
        ctx.config.docker.failure_patterns.clone()
    } else {
        failure_patterns.to_vec()
    };

    let run = CommandSpec::new("docker")
        .args(["run", "--rm", "-d", tag])
        .deadline(Duration::from_secs(30));
    let output = ctx.runner.run(run, ctx.cancel_token()).await?;
    if !output.success() {
        return Err(AssistError::precondition_failed(format!(
            "container failed to start: {}",
            tail(&output.stderr, 512)
        ))
        .with_tool("docker"));
    }
    let container_id = output.stdout.trim().to_string();

    let deadline = tokio::time::Instant::now() + ctx.config.docker.startup_deadline;
    // no early `?` returns in this loop: the container must be torn down on
    // every exit path, including cancellation
    let verdict = loop {
        if tokio::time::Instant::now() >= deadline {
            // no pattern seen either way: silence within the window passes
            break Ok(());
        }
        if let Err(e) = ctx.check_cancelled() {
            break Err(e);
        }

        let logs = CommandSpec::new("docker")
            .args(["logs", &container_id])
            .deadline(Duration::from_secs(10));
        let combined = match ctx.runner.run(logs, ctx.cancel_token()).await {
            Ok(logs) => logs.combined(),
            Err(e) => break Err(e),
        };

        match judge_startup_logs(&combined, &success_patterns, &failure_patterns) {
            StartupVerdict::Failed(pattern) => {
                break Err(AssistError::precondition_failed(format!(
                    "container logs matched failure pattern {:?}",
                    pattern
                ))
                .with_tool("docker")
                .with_hint("inspect the container logs and entrypoint"));
            }
            StartupVerdict::Succeeded => break Ok(()),
            StartupVerdict::Undecided => {}
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    };

    // best effort teardown; runs on a fresh token so a cancelled invocation
    // still stops its container
    let stop = CommandSpec::new("docker")
        .args(["rm", "-f", &container_id])
        .deadline(Duration::from_secs(15));
    let teardown_token = tokio_util::sync::CancellationToken::new();
    if let Err(e) = ctx.runner.run(stop, &teardown_token).await {
        log::warn!("validation container {} not removed: {}", container_id, e.message);
    }

    verdict
}

/// Outcome of inspecting container logs against the configured patterns.
#[derive(Debug, PartialEq, Eq)]
enum StartupVerdict {
    /// A failure pattern matched; the named pattern is the culprit
    Failed(String),
    Succeeded,
    Undecided,
}

/// Failure patterns dominate success patterns; with neither matched the
/// caller keeps polling until its deadline, which counts as success when no
/// patterns are configured at all.
fn judge_startup_logs(
    logs: &str,
    success_patterns: &[String],
    failure_patterns: &[String],
) -> StartupVerdict {
    if let Some(pattern) = failure_patterns.iter().find(|p| logs.contains(p.as_str())) {
        return StartupVerdict::Failed(pattern.clone());
    }
    if success_patterns.iter().any(|p| logs.contains(p.as_str())) {
        return StartupVerdict::Succeeded;
    }
    StartupVerdict::Undecided
}

fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let cut = text.len() - max;
    let boundary = (cut..text.len())
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(cut);
    text[boundary..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_suffix() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 10), "ab");
    }

    #[test]
    fn failure_pattern_fails_validation() {
        let failure = vec!["panic:".to_string()];
        let verdict = judge_startup_logs("boot ok\npanic: cannot bind port\n", &[], &failure);
        assert_eq!(verdict, StartupVerdict::Failed("panic:".to_string()));
    }

    #[test]
    fn failure_dominates_success() {
        let success = vec!["listening".to_string()];
        let failure = vec!["fatal".to_string()];
        let verdict = judge_startup_logs("listening on 8080\nfatal error\n", &success, &failure);
        assert!(matches!(verdict, StartupVerdict::Failed(_)));
    }

    #[test]
    fn success_pattern_passes() {
        let success = vec!["listening".to_string()];
        let verdict = judge_startup_logs("listening on 8080\n", &success, &[]);
        assert_eq!(verdict, StartupVerdict::Succeeded);
    }

    #[test]
    fn no_patterns_stays_undecided_until_deadline() {
        // with nothing configured the poll loop rides out the startup window
        // and an error-free startup counts as success
        let verdict = judge_startup_logs("some ordinary log line\n", &[], &[]);
        assert_eq!(verdict, StartupVerdict::Undecided);
    }

    #[test]
    fn definition_declares_docker() {
        let def = BuildImageTool.definition();
        assert!(def.side_effects.contains(&SideEffect::InvokesDocker));
        assert_eq!(def.default_timeout, Duration::from_secs(300));
        assert_eq!(def.name, "build_image");
    }
}
