//! push_image tool
//!
//! Tags the session's image for a registry and pushes it. Login state is
//! cached per registry for a fixed window; when stale, the tool performs the
//! configured login flow with credentials delivered over stdin, never on the
//! argument vector.

use super::{SideEffect, Tool, ToolContext, ToolDefinition, decode_args};
use crate::common::CommandSpec;
use crate::error::{AssistError, Result};
use crate::session::{ImageArtifact, PipelineArtifact, Stage, StoredArtifact};
use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::{Duration, Instant};

/// Process-wide login cache: registry host -> last verified login.
static AUTH_CACHE: Lazy<DashMap<String, Instant>> = Lazy::new(DashMap::new);

#[derive(Debug, Deserialize)]
struct Credentials {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushArgs {
    /// Local image reference; defaults to the session's build artifact
    #[serde(default)]
    image: Option<String>,
    /// Registry host, e.g. `ghcr.io/acme`
    registry: String,
    /// Tag for the pushed reference; defaults to the local tag
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    credentials: Option<Credentials>,
}

/// Pushes a built image to a registry.
pub struct PushImageTool;

#[async_trait]
impl Tool for PushImageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "push_image",
            version: "1.0.0",
            description: "Tag and push the session's image to a container registry, logging in first when the cached login has expired.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "image": {"type": "string"},
                    "registry": {"type": "string", "description": "Registry host and namespace, e.g. ghcr.io/acme"},
                    "tag": {"type": "string"},
                    "credentials": {
                        "type": "object",
                        "properties": {
                            "username": {"type": "string"},
                            "password": {"type": "string"},
                            "token": {"type": "string"}
                        }
                    }
                },
                "required": ["registry"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "pushed": {"type": "string"},
                    "digest": {"type": ["string", "null"]}
                },
                "required": ["pushed"]
            }),
            side_effects: vec![SideEffect::InvokesDocker, SideEffect::InvokesNetwork],
            default_timeout: Duration::from_secs(300),
            requires_session: true,
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: PushArgs = decode_args(args)?;

        let blocked = ctx.policy.registry_block();
        if blocked.iter().any(|b| args.registry.starts_with(b.as_str())) {
            return Err(AssistError::policy_violation(format!(
                "registry {} is blocked by policy",
                args.registry
            )));
        }

        let stored_image = match ctx.session()?.get_artifact(Stage::Build)? {
            Some(StoredArtifact {
                artifact: PipelineArtifact::Image(image),
                fingerprint,
                ..
            }) => Some((image, fingerprint)),
            _ => None,
        };
        let local = match (&args.image, &stored_image) {
            (Some(image), _) => image.clone(),
            (None, Some((image, _))) => image.reference.clone(),
            (None, None) => {
                return Err(AssistError::precondition_failed(
                    "no image artifact in session and none supplied",
                )
                .with_hint("run build_image first or pass image explicitly"));
            }
        };

        let registry_host = args
            .registry
            .split('/')
            .next()
            .unwrap_or(&args.registry)
            .to_string();
        ensure_login(ctx, &registry_host, args.credentials.as_ref()).await?;

        let tag = args.tag.unwrap_or_else(|| {
            local
                .rsplit_once(':')
                .map(|(_, t)| t.to_string())
                .unwrap_or_else(|| "latest".to_string())
        });
        let name = local
            .rsplit_once(':')
            .map(|(n, _)| n)
            .unwrap_or(local.as_str())
            .rsplit('/')
            .next()
            .unwrap_or("image")
            .to_string();
        let remote = format!("{}/{}:{}", args.registry.trim_end_matches('/'), name, tag);

        ctx.progress(1, 3, "running", &format!("tagging {} as {}", local, remote));
        let retag = CommandSpec::new("docker")
            .args(["tag", &local, &remote])
            .deadline(Duration::from_secs(30));
        ctx.runner.run_combined(retag, ctx.cancel_token()).await?;

        ctx.check_cancelled()?;
        ctx.progress(2, 3, "running", &format!("pushing {}", remote));
        let push = CommandSpec::new("docker")
            .args(["push", &remote])
            .deadline(ctx.remaining());
        let output = ctx.runner.run(push, ctx.cancel_token()).await?;
        if !output.success() {
            return Err(classify_push_failure(&registry_host, &output.stderr, output.exit_code));
        }
        let digest = extract_digest(&output.stdout);

        ctx.progress(3, 3, "running", "updating image artifact");
        if let Some((mut image, fingerprint)) = stored_image {
            image.registry_reference = Some(remote.clone());
            if image.digest.is_none() {
                image.digest = digest.clone();
            }
            ctx.session()?
                .put_artifact(StoredArtifact::new(
                    PipelineArtifact::Image(image),
                    fingerprint,
                ))
                .await?;
        }

        ctx.progress(3, 3, "completed", "push complete");
        Ok(json!({"pushed": remote, "digest": digest}))
    }
}

/// Verify or refresh the registry login.
async fn ensure_login(
    ctx: &ToolContext,
    registry_host: &str,
    credentials: Option<&Credentials>,
) -> Result<()> {
    let ttl = ctx.config.docker.auth_cache_ttl;
    if let Some(entry) = AUTH_CACHE.get(registry_host) {
        if entry.elapsed() < ttl {
            log::debug!("login to {} still cached", registry_host);
            return Ok(());
        }
    }

    let Some(creds) = credentials else {
        return Err(AssistError::unauthorized(format!(
            "no cached login for {} and no credentials supplied",
            registry_host
        ))
        .with_hint("pass credentials.username/password or credentials.token"));
    };

    // password or token flow; the secret always travels via stdin
    let (username, secret) = match (&creds.username, &creds.password, &creds.token) {
        (Some(username), Some(password), _) => (username.clone(), password.clone()),
        (_, _, Some(token)) => ("oauth2accesstoken".to_string(), token.clone()),
        _ => {
            return Err(AssistError::invalid_argument(
                "credentials need username+password or token",
            ));
        }
    };

    let login = CommandSpec::new("docker")
        .args(["login", registry_host, "-u", &username, "--password-stdin"])
        .stdin(secret.into_bytes())
        .deadline(Duration::from_secs(30));
    let output = ctx.runner.run(login, ctx.cancel_token()).await?;
    if !output.success() {
        return Err(AssistError::unauthorized(format!(
            "docker login to {} failed: {}",
            registry_host,
            output.stderr.trim()
        ))
        .with_tool("docker")
        .with_exit_code(output.exit_code));
    }
    AUTH_CACHE.insert(registry_host.to_string(), Instant::now());
    Ok(())
}

/// Classify a push failure from docker's stderr.
fn classify_push_failure(registry: &str, stderr: &str, exit_code: i32) -> AssistError {
    let lower = stderr.to_lowercase();
    let err = if lower.contains("unauthorized")
        || lower.contains("authentication required")
        || lower.contains("denied")
    {
        AUTH_CACHE.remove(registry);
        AssistError::unauthorized(format!("push to {} denied: {}", registry, stderr.trim()))
            .with_hint("refresh credentials; the cached login was invalidated")
    } else if lower.contains("no such host")
        || lower.contains("connection refused")
        || lower.contains("timeout")
        || lower.contains("tls")
    {
        AssistError::network(format!("cannot reach {}: {}", registry, stderr.trim()))
    } else if lower.contains("not found") || lower.contains("does not exist") {
        AssistError::not_found(format!("image missing locally: {}", stderr.trim()))
    } else {
        AssistError::external_tool(format!("docker push failed: {}", stderr.trim()))
    };
    err.with_tool("docker").with_exit_code(exit_code)
}

fn extract_digest(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.split_whitespace().find(|w| w.starts_with("sha256:")))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_classification() {
        let auth = classify_push_failure("ghcr.io", "denied: permission_denied", 1);
        assert_eq!(auth.kind, crate::error::ErrorKind::Unauthorized);

        let net = classify_push_failure("ghcr.io", "dial tcp: connection refused", 1);
        assert_eq!(net.kind, crate::error::ErrorKind::Network);

        let missing = classify_push_failure("ghcr.io", "tag does not exist locally", 1);
        assert_eq!(missing.kind, crate::error::ErrorKind::NotFound);

        let generic = classify_push_failure("ghcr.io", "blob upload invalid", 125);
        assert_eq!(generic.kind, crate::error::ErrorKind::ExternalTool);
        assert_eq!(generic.exit_code, Some(125));
    }

    #[test]
    fn digest_extraction() {
        let stdout = "1: digest: sha256:abcdef size: 1234\n";
        assert_eq!(extract_digest(stdout).as_deref(), Some("sha256:abcdef"));
        assert!(extract_digest("no digest here").is_none());
    }

    #[test]
    fn definition_requires_registry() {
        let def = PushImageTool.definition();
        assert_eq!(def.name, "push_image");
        assert_eq!(def.input_schema["required"][0], "registry");
    }
}
