//! Workspace file accessors: read_file, list_directory, file_exists
//!
//! Narrow, jail-confined filesystem access for the caller. Reads are capped
//! and sensitive extensions are refused.

use super::{SideEffect, Tool, ToolContext, ToolDefinition, decode_args};
use crate::error::{AssistError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Default read cap for `read_file`.
const DEFAULT_READ_CAP: u64 = 10 * 1024 * 1024;

/// Directory listing depth bound for recursive listings.
const MAX_LIST_DEPTH: usize = 3;

const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", "target", "__pycache__", "dist", "build"];

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    #[serde(default)]
    start_line: Option<usize>,
    #[serde(default)]
    end_line: Option<usize>,
}

/// Reads a file from the session workspace.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file",
            version: "1.0.0",
            description: "Read a file from the session workspace, optionally a line range. Reads are size-capped and sensitive file types are refused.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Workspace-relative file path"},
                    "start_line": {"type": "integer", "minimum": 1},
                    "end_line": {"type": "integer", "minimum": 1}
                },
                "required": ["path"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string"},
                    "total_lines": {"type": "integer"}
                },
                "required": ["content"]
            }),
            side_effects: vec![SideEffect::ReadsWorkspace],
            default_timeout: Duration::from_secs(30),
            requires_session: true,
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ReadFileArgs = decode_args(args)?;
        let target = ctx.jail()?.validate_readable(&args.path, DEFAULT_READ_CAP)?;
        let content = tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| AssistError::io(format!("cannot read {}: {}", args.path, e)))?;
        let total_lines = content.lines().count();

        let content = match (args.start_line, args.end_line) {
            (None, None) => content,
            (start, end) => {
                let start = start.unwrap_or(1).saturating_sub(1);
                let end = end.unwrap_or(total_lines).min(total_lines);
                if start >= total_lines {
                    return Err(AssistError::invalid_argument(format!(
                        "start_line {} exceeds file length {}",
                        start + 1,
                        total_lines
                    )));
                }
                content
                    .lines()
                    .skip(start)
                    .take(end.saturating_sub(start))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };

        Ok(json!({
            "path": args.path,
            "content": content,
            "total_lines": total_lines
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ListDirectoryArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
}

/// Lists a workspace directory.
pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_directory",
            version: "1.0.0",
            description: "List a directory in the session workspace, optionally recursively (bounded depth).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Workspace-relative directory, default root"},
                    "recursive": {"type": "boolean"}
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {"entries": {"type": "array"}},
                "required": ["entries"]
            }),
            side_effects: vec![SideEffect::ReadsWorkspace],
            default_timeout: Duration::from_secs(30),
            requires_session: true,
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ListDirectoryArgs = decode_args(args)?;
        let relative = args.path.unwrap_or_else(|| ".".to_string());
        let root = ctx.jail()?.secure_target(&relative)?;
        if !root.is_dir() {
            return Err(AssistError::not_found(format!("{} is not a directory", relative))
                .with_path(relative));
        }

        let max_depth = if args.recursive { MAX_LIST_DEPTH } else { 1 };
        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(&root)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|e| {
                e.file_name()
                    .to_str()
                    .map(|name| !SKIPPED_DIRS.contains(&name))
                    .unwrap_or(true)
            })
            .filter_map(|e| e.ok())
        {
            let meta = entry.metadata().ok();
            let is_dir = meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);
            let relative_path = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            entries.push(json!({
                "path": relative_path,
                "type": if is_dir { "directory" } else { "file" },
                "size": if is_dir { Value::Null } else { json!(meta.map(|m| m.len()).unwrap_or(0)) }
            }));
        }
        entries.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));

        Ok(json!({
            "path": relative,
            "entries": entries,
            "total_count": entries.len()
        }))
    }
}

#[derive(Debug, Deserialize)]
struct FileExistsArgs {
    path: String,
}

/// Existence probe inside the workspace.
pub struct FileExistsTool;

#[async_trait]
impl Tool for FileExistsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_exists",
            version: "1.0.0",
            description: "Check whether a path exists in the session workspace.",
            input_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "exists": {"type": "boolean"},
                    "type": {"type": ["string", "null"]}
                },
                "required": ["exists"]
            }),
            side_effects: vec![SideEffect::ReadsWorkspace],
            default_timeout: Duration::from_secs(30),
            requires_session: true,
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: FileExistsArgs = decode_args(args)?;
        let target = ctx.jail()?.secure_target(&args.path)?;
        let kind = match std::fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_dir() => Some("directory"),
            Ok(meta) if meta.is_file() => Some("file"),
            Ok(_) => Some("other"),
            Err(_) => None,
        };
        Ok(json!({
            "path": args.path,
            "exists": kind.is_some(),
            "type": kind
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::policy::PolicyEngine;
    use crate::sampling::SamplingClient;
    use crate::session::SessionManager;
    use crate::store::KvStore;
    use crate::tools::registry::{InvokeOptions, ToolExecutor, ToolRegistry};
    use crate::{common::CommandRunner, config::Config};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn executor(dir: &TempDir) -> (Arc<ToolExecutor>, String) {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(ReadFileTool)).unwrap();
        registry.register(Box::new(ListDirectoryTool)).unwrap();
        registry.register(Box::new(FileExistsTool)).unwrap();
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

    fn opts(session_id: &str) -> InvokeOptions {
        InvokeOptions {
            session_id: Some(session_id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn read_file_with_line_range() {
        let dir = TempDir::new().unwrap();
        let (executor, id) = executor(&dir).await;
        let workspace = executor.sessions().get(&id).unwrap();
        std::fs::write(workspace.workspace().join("notes.txt"), "a\nb\nc\nd\n").unwrap();

        let result = executor
            .invoke(
                "read_file",
                json!({"path": "notes.txt", "start_line": 2, "end_line": 3}),
                opts(&id),
            )
            .await
            .unwrap();
        assert_eq!(result["content"], "b\nc");
        assert_eq!(result["total_lines"], 4);
    }

    #[tokio::test]
    async fn read_outside_workspace_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (executor, id) = executor(&dir).await;
        let err = executor
            .invoke("read_file", json!({"path": "../etc/passwd"}), opts(&id))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
        assert!(err.message.contains("outside workspace root"));
    }

    #[tokio::test]
    async fn list_directory_skips_heavy_dirs() {
        let dir = TempDir::new().unwrap();
        let (executor, id) = executor(&dir).await;
        let workspace = executor.sessions().get(&id).unwrap();
        let ws = workspace.workspace();
        std::fs::create_dir(ws.join("src")).unwrap();
        std::fs::write(ws.join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::create_dir(ws.join("node_modules")).unwrap();
        std::fs::write(ws.join("node_modules/x.js"), "x").unwrap();

        let result = executor
            .invoke("list_directory", json!({"recursive": true}), opts(&id))
            .await
            .unwrap();
        let paths: Vec<&str> = result["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["path"].as_str().unwrap())
            .collect();
        assert!(paths.contains(&"src"));
        assert!(paths.contains(&"src/main.rs"));
        assert!(!paths.iter().any(|p| p.contains("node_modules")));
    }

    #[tokio::test]
    async fn file_exists_reports_type() {
        let dir = TempDir::new().unwrap();
        let (executor, id) = executor(&dir).await;
        let workspace = executor.sessions().get(&id).unwrap();
        std::fs::write(workspace.workspace().join("x.txt"), "x").unwrap();

        let hit = executor
            .invoke("file_exists", json!({"path": "x.txt"}), opts(&id))
            .await
            .unwrap();
        assert_eq!(hit["exists"], true);
        assert_eq!(hit["type"], "file");

        let miss = executor
            .invoke("file_exists", json!({"path": "missing.txt"}), opts(&id))
            .await
            .unwrap();
        assert_eq!(miss["exists"], false);
    }
}
