//! Operational tools: ping, server_status, list_sessions

use super::{Tool, ToolContext, ToolDefinition};
use crate::common::CommandRunner;
use crate::error::Result;
use crate::session::SessionManager;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Liveness probe.
pub struct PingTool;

#[async_trait]
impl Tool for PingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "ping",
            version: "1.0.0",
            description: "Liveness check; echoes an optional payload.",
            input_schema: json!({
                "type": "object",
                "properties": {"payload": {"type": "string"}}
            }),
            output_schema: json!({
                "type": "object",
                "properties": {"pong": {"type": "boolean"}},
                "required": ["pong"]
            }),
            side_effects: vec![],
            default_timeout: Duration::from_secs(30),
            requires_session: false,
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        Ok(json!({
            "pong": true,
            "payload": args.get("payload").cloned().unwrap_or(Value::Null)
        }))
    }
}

/// Server diagnostics: version, uptime, session count, external tooling.
pub struct ServerStatusTool {
    sessions: Arc<SessionManager>,
    started_at: Instant,
}

impl ServerStatusTool {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            started_at: Instant::now(),
        }
    }
}

#[async_trait]
impl Tool for ServerStatusTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "server_status",
            version: "1.0.0",
            description: "Report server version, uptime, active sessions, and external tool availability.",
            input_schema: json!({"type": "object", "properties": {}}),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "version": {"type": "string"},
                    "uptime_seconds": {"type": "integer"},
                    "active_sessions": {"type": "integer"}
                },
                "required": ["version", "uptime_seconds", "active_sessions"]
            }),
            side_effects: vec![],
            default_timeout: Duration::from_secs(30),
            requires_session: false,
        }
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
        let (docker, trivy, grype, kubectl) = tokio::task::spawn_blocking(|| {
            (
                CommandRunner::is_available("docker"),
                CommandRunner::is_available("trivy"),
                CommandRunner::is_available("grype"),
                CommandRunner::is_available("kubectl"),
            )
        })
        .await
        .unwrap_or((false, false, false, false));

        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.started_at.elapsed().as_secs(),
            "active_sessions": self.sessions.active_count(),
            "external_tools": {
                "docker": docker,
                "trivy": trivy,
                "grype": grype,
                "kubectl": kubectl
            }
        }))
    }
}

/// Enumerates sessions with their completed stages.
pub struct ListSessionsTool {
    sessions: Arc<SessionManager>,
}

impl ListSessionsTool {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for ListSessionsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_sessions",
            version: "1.0.0",
            description: "List sessions with status, timestamps, and completed pipeline stages.",
            input_schema: json!({"type": "object", "properties": {}}),
            output_schema: json!({
                "type": "object",
                "properties": {"sessions": {"type": "array"}},
                "required": ["sessions"]
            }),
            side_effects: vec![],
            default_timeout: Duration::from_secs(30),
            requires_session: false,
        }
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
        let rows = self.sessions.list();
        Ok(json!({
            "sessions": serde_json::to_value(&rows)?,
            "total": rows.len()
        }))
    }
}
