//! # Containerization Assist Server
//!
//! A long-running co-process that exposes containerization operations
//! (repository analysis, Dockerfile and manifest generation, image builds,
//! vulnerability scans, registry pushes, cluster deploys) to an AI assistant
//! over a newline-delimited JSON-RPC channel on stdin/stdout.
//!
//! ## Architecture
//!
//! - **Tool runtime** (`tools`): a static registry of schema-described tools
//!   dispatched by an executor that validates inputs, gates side-effects,
//!   enforces deadlines and cancellation, and contains panics.
//! - **Sessions** (`session`, `store`): per-client state with a jailed
//!   workspace and a pipeline stage table, persisted in an embedded store so
//!   sessions survive restarts.
//! - **Sampling** (`sampling`): generative work is delegated back to the RPC
//!   peer with retries, JSON extraction, and schema-repair loops; the server
//!   itself runs no model.
//! - **Policy** (`policy`): declarative YAML rules gate generated artifacts.
//! - **Adapters** (`common`, `scanner`): narrow process launchers for docker,
//!   git, kubectl, and the vulnerability scanners.
//!
//! ## Example
//!
//! ```rust,no_run
//! use containerization_assist::analyzer::analyze_repository;
//! use std::path::Path;
//!
//! # fn main() -> containerization_assist::Result<()> {
//! let analysis = analyze_repository(Path::new("./my-service"))?;
//! println!("{} on port {}", analysis.language, analysis.port);
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod common;
pub mod config;
pub mod error;
pub mod policy;
pub mod rpc;
pub mod sampling;
pub mod scanner;
pub mod session;
pub mod store;
pub mod tools;

pub use config::Config;
pub use error::{AssistError, ErrorKind, Result};

use crate::session::SessionManager;
use std::sync::Arc;

/// The current version of the server
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Register the full tool set.
///
/// Called once at startup; a duplicate name or invalid schema here is a
/// fatal configuration error.
pub fn build_registry(sessions: &Arc<SessionManager>) -> Result<tools::ToolRegistry> {
    use tools::*;

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(analyze::AnalyzeRepositoryTool))?;
    registry.register(Box::new(dockerfile::GenerateDockerfileTool))?;
    registry.register(Box::new(dockerfile::ValidateDockerfileTool))?;
    registry.register(Box::new(dockerfile::FixDockerfileTool))?;
    registry.register(Box::new(build::BuildImageTool))?;
    registry.register(Box::new(scan::ScanImageTool))?;
    registry.register(Box::new(push::PushImageTool))?;
    registry.register(Box::new(manifests::GenerateManifestsTool))?;
    registry.register(Box::new(deploy::DeployTool))?;
    registry.register(Box::new(workspace_ops::ReadFileTool))?;
    registry.register(Box::new(workspace_ops::ListDirectoryTool))?;
    registry.register(Box::new(workspace_ops::FileExistsTool))?;
    registry.register(Box::new(ops::PingTool))?;
    registry.register(Box::new(ops::ServerStatusTool::new(Arc::clone(sessions))))?;
    registry.register(Box::new(ops::ListSessionsTool::new(Arc::clone(sessions))))?;
    Ok(registry)
}
