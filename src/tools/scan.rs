//! scan_image tool
//!
//! Prefers trivy, falls back to grype, and when both are installed runs them
//! in parallel and merges their findings with agreement metrics.

use super::{SideEffect, Tool, ToolContext, ToolDefinition, decode_args, require_prerequisite};
use crate::common::fingerprint::fingerprint_inputs;
use crate::error::{AssistError, Result};
use crate::scanner::{self, ScanReport, merge_findings};
use crate::session::{ImageArtifact, PipelineArtifact, Stage, StoredArtifact};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ScanArgs {
    /// Image reference; defaults to the session's build artifact
    #[serde(default)]
    image: Option<String>,
    #[serde(default, rename = "override")]
    override_prerequisites: bool,
}

/// Runs the configured vulnerability scanners against an image.
pub struct ScanImageTool;

#[async_trait]
impl Tool for ScanImageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "scan_image",
            version: "1.0.0",
            description: "Scan a container image for vulnerabilities with trivy and/or grype, producing a merged report with remediation steps.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "image": {"type": "string", "description": "Image reference; defaults to the session's built image"},
                    "override": {"type": "boolean"}
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {"report": {"type": "object"}},
                "required": ["report"]
            }),
            side_effects: vec![SideEffect::InvokesDocker, SideEffect::InvokesNetwork],
            default_timeout: Duration::from_secs(300),
            requires_session: true,
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ScanArgs = decode_args(args)?;
        require_prerequisite(ctx, Stage::Scan, args.override_prerequisites)?;

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

        let trivy_available = scanner::trivy::is_available();
        let grype_available = scanner::grype::is_available();
        let deadline = ctx.remaining();

        let report = match (trivy_available, grype_available) {
            (true, true) => {
                ctx.progress(1, 2, "running", "scanning with trivy and grype in parallel");
                let (trivy_result, grype_result) = tokio::join!(
                    scanner::trivy::scan(&ctx.runner, &image, deadline, ctx.cancel_token()),
                    scanner::grype::scan(&ctx.runner, &image, deadline, ctx.cancel_token()),
                );
                // a single scanner failing degrades to the other's findings
                match (trivy_result, grype_result) {
                    (Ok(trivy), Ok(grype)) => {
                        let outcome = merge_findings(trivy.vulnerabilities, grype);
                        ScanReport::assemble(
                            image.clone(),
                            vec!["trivy".into(), "grype".into()],
                            outcome.vulnerabilities,
                            Some(outcome.agreement_rate),
                            Some(outcome.discrepancies),
                            trivy.base_image_eosl,
                        )
                    }
                    (Ok(trivy), Err(e)) => {
                        log::warn!("grype failed, using trivy alone: {}", e.message);
                        ScanReport::assemble(
                            image.clone(),
                            vec!["trivy".into()],
                            trivy.vulnerabilities,
                            None,
                            None,
                            trivy.base_image_eosl,
                        )
                    }
                    (Err(e), Ok(grype)) => {
                        log::warn!("trivy failed, using grype alone: {}", e.message);
                        ScanReport::assemble(
                            image.clone(),
                            vec!["grype".into()],
                            grype,
                            None,
                            None,
                            false,
                        )
                    }
                    (Err(e), Err(_)) => return Err(e),
                }
            }
            (true, false) => {
                ctx.progress(1, 2, "running", "scanning with trivy");
                let trivy = scanner::trivy::scan(&ctx.runner, &image, deadline, ctx.cancel_token())
                    .await?;
                ScanReport::assemble(
                    image.clone(),
                    vec!["trivy".into()],
                    trivy.vulnerabilities,
                    None,
                    None,
                    trivy.base_image_eosl,
                )
            }
            (false, true) => {
                ctx.progress(1, 2, "running", "scanning with grype");
                let grype = scanner::grype::scan(&ctx.runner, &image, deadline, ctx.cancel_token())
                    .await?;
                ScanReport::assemble(image.clone(), vec!["grype".into()], grype, None, None, false)
            }
            (false, false) => {
                return Err(AssistError::precondition_failed(
                    "no vulnerability scanner available",
                )
                .with_hint("install trivy (preferred) or grype"));
            }
        };

        ctx.check_cancelled()?;
        ctx.progress(2, 2, "running", "recording scan report");
        let fingerprint = fingerprint_inputs(&[
            ("image", &json!(image)),
            ("scanners", &json!(report.scanners)),
        ]);
        let report_value = serde_json::to_value(&report)?;
        ctx.session()?
            .put_artifact(StoredArtifact::new(
                PipelineArtifact::ScanReport(report),
                fingerprint,
            ))
            .await?;

        ctx.progress(2, 2, "completed", "scan complete");
        Ok(json!({"report": report_value}))
    }
}
