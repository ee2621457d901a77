//! Tool runtime
//!
//! Every operation the server exposes is a [`Tool`]: a named, versioned,
//! schema-described unit registered once at startup and dispatched by the
//! executor. Tools are pure functions over `(input, context)`; everything
//! they touch (session, jail, runner, policy, sampling, progress) arrives
//! through the [`ToolContext`].

pub mod analyze;
pub mod build;
pub mod context;
pub mod deploy;
pub mod dockerfile;
pub mod manifests;
pub mod ops;
pub mod progress;
pub mod push;
pub mod registry;
pub mod scan;
pub mod workspace_ops;

pub use context::ToolContext;
pub use progress::{NullProgressSink, PeerProgressSink, ProgressEvent, ProgressSink};
pub use registry::{ToolExecutor, ToolRegistry};

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Declared side-effects, used for preflight gating and discovery metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SideEffect {
    ReadsWorkspace,
    WritesWorkspace,
    InvokesNetwork,
    InvokesDocker,
    InvokesK8s,
}

/// Immutable description of one tool. Registered once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub output_schema: Value,
    pub side_effects: Vec<SideEffect>,
    #[serde(serialize_with = "serialize_secs")]
    pub default_timeout: Duration,
    /// Whether the executor must bind (or create) a session for this tool
    pub requires_session: bool,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// A schema-described operation invocable by the caller.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Run the tool body. Input has already passed schema validation.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Decode validated tool input into the tool's typed argument struct.
///
/// Schema validation runs first in the executor, so a decode failure here
/// means the schema and the struct drifted apart; it still surfaces as
/// `invalid_argument` rather than panicking.
pub fn decode_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| {
        crate::error::AssistError::invalid_argument(format!("cannot decode arguments: {}", e))
    })
}

/// Enforce a tool's pipeline prerequisite unless the caller overrides it.
///
/// A stage may run only once the stage before it has an artifact in the
/// session; the `override` input escape hatch lets callers run stages out of
/// order deliberately.
pub fn require_prerequisite(
    ctx: &ToolContext,
    stage: crate::session::Stage,
    override_flag: bool,
) -> Result<()> {
    if override_flag {
        return Ok(());
    }
    let Some(prerequisite) = stage.prerequisite() else {
        return Ok(());
    };
    if ctx.session()?.get_artifact(prerequisite)?.is_none() {
        return Err(crate::error::AssistError::precondition_failed(format!(
            "stage {} requires a {} artifact in the session",
            stage.name(),
            prerequisite.name()
        ))
        .with_hint(format!(
            "run the {} stage first, or pass override=true",
            prerequisite.name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn side_effects_serialize_kebab_case() {
        let value = serde_json::to_value(SideEffect::InvokesDocker).unwrap();
        assert_eq!(value, json!("invokes-docker"));
    }

    #[test]
    fn definition_serializes_timeout_as_seconds() {
        let def = ToolDefinition {
            name: "demo",
            version: "1.0.0",
            description: "demo tool",
            input_schema: json!({"type": "object"}),
            output_schema: json!({"type": "object"}),
            side_effects: vec![SideEffect::ReadsWorkspace],
            default_timeout: Duration::from_secs(60),
            requires_session: true,
        };
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["default_timeout"], 60);
        assert_eq!(value["side_effects"][0], "reads-workspace");
    }

    #[test]
    fn decode_args_reports_field() {
        #[derive(Debug, serde::Deserialize)]
        struct Args {
            #[allow(dead_code)]
            path: String,
        }
        let err = decode_args::<Args>(json!({"path": 42})).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }
}
