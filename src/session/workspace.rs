//! Workspace directory allocation
//!
//! Each session owns one directory under the configured sessions root. The
//! directory name is the session id, so a workspace path can never collide
//! and cleanup is a single recursive remove.

use crate::error::{AssistError, Result};
use std::path::{Path, PathBuf};

/// Create the workspace directory tree for a session.
///
/// Layout: `<root>/sessions/<id>/workspace`. The `workspace` leaf is what
/// tools see; siblings (scratch build contexts) live next to it.
pub fn allocate(root: &Path, session_id: &str) -> Result<PathBuf> {
    let workspace = session_dir(root, session_id).join("workspace");
    std::fs::create_dir_all(&workspace).map_err(|e| {
        AssistError::io(format!(
            "cannot create workspace {}: {}",
            workspace.display(),
            e
        ))
        .with_path(workspace.display().to_string())
    })?;
    Ok(workspace)
}

/// The per-session directory holding the workspace and scratch space.
pub fn session_dir(root: &Path, session_id: &str) -> PathBuf {
    root.join("sessions").join(session_id)
}

/// Scratch directory for transient build inputs, created on demand.
pub fn scratch_dir(root: &Path, session_id: &str) -> Result<PathBuf> {
    let scratch = session_dir(root, session_id).join("scratch");
    std::fs::create_dir_all(&scratch)
        .map_err(|e| AssistError::io(format!("cannot create scratch dir: {}", e)))?;
    Ok(scratch)
}

/// Remove a session's directory tree.
///
/// Failure is reported but non-fatal to session removal: the session leaves
/// the active set regardless, and the sweeper retries the delete later.
pub fn remove(root: &Path, session_id: &str) -> Result<()> {
    let dir = session_dir(root, session_id);
    if !dir.exists() {
        return Ok(());
    }
    std::fs::remove_dir_all(&dir).map_err(|e| {
        AssistError::io(format!("cannot remove workspace {}: {}", dir.display(), e))
            .with_path(dir.display().to_string())
    })
}
