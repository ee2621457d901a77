//! Filesystem jail
//!
//! Every path a tool touches is mediated by a [`Jail`] rooted at the
//! session's workspace. Validation is defence in depth: lexical screening of
//! components (no `..`, no `...` sequences), symlink rejection on every
//! existing component, a containment check against the canonicalised root,
//! and a deny-list of system prefixes that must never be reachable even if
//! containment were somehow subverted.
//!
//! URLs handed to git or fetch-like operations get their own screening, and
//! git argument vectors are wrapped to neutralise hook and local-protocol
//! tricks.

use crate::error::{AssistError, Result};
use std::path::{Component, Path, PathBuf};

/// Absolute prefixes that no validated path may ever fall under.
const RESTRICTED_PREFIXES: &[&str] = &[
    "/etc/", "/root/", "/proc/", "/sys/", "/dev/", "/var/log/", "/usr/bin/", "/usr/sbin/",
    "/bin/", "/sbin/", "/lib/", "/lib64/",
];

/// Substrings that disqualify a URL outright.
const URL_FORBIDDEN: &[&str] = &["..", "~", "$(", "`", "|", ";", "&", "<", ">", "${"];

/// File extensions the read tools refuse to serve.
const BLOCKED_EXTENSIONS: &[&str] = &["pem", "key", "p12", "pfx", "der", "keystore", "jks"];

/// Where git hooks get pointed so repository-supplied hooks never run.
#[cfg(unix)]
const NULL_HOOKS_PATH: &str = "/dev/null";
#[cfg(not(unix))]
const NULL_HOOKS_PATH: &str = "NUL";

/// A filesystem policy confining all I/O to one workspace root.
#[derive(Debug, Clone)]
pub struct Jail {
    root: PathBuf,
    allow_symlinks: bool,
}

impl Jail {
    /// Construct a jail over `root`, which must exist and be a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| {
            AssistError::invalid_argument(format!(
                "workspace root {} is not usable: {}",
                root.display(),
                e
            ))
            .with_path(root.display().to_string())
        })?;
        if !canonical.is_dir() {
            return Err(AssistError::invalid_argument(format!(
                "workspace root {} is not a directory",
                canonical.display()
            ))
            .with_path(canonical.display().to_string()));
        }
        Ok(Self {
            root: canonical,
            allow_symlinks: false,
        })
    }

    /// Permit symlink components inside the workspace. Off by default.
    pub fn allow_symlinks(mut self, allow: bool) -> Self {
        self.allow_symlinks = allow;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate a path without returning the resolved form.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<()> {
        self.secure_target(path).map(|_| ())
    }

    /// Resolve `path` to its canonical in-jail form, or fail.
    ///
    /// Relative paths resolve against the workspace root. The target itself
    /// may not exist yet (a tool about to write it); every existing ancestor
    /// is still checked for symlinks.
    pub fn secure_target(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let mut resolved = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::ParentDir => {
                    return Err(self.reject(path, "path traversal component '..'"));
                }
                Component::Normal(part) => {
                    let part_str = part.to_string_lossy();
                    if part_str.contains("...") {
                        return Err(self.reject(path, "suspicious '...' sequence"));
                    }
                    resolved.push(part);
                    self.check_symlink(&resolved, path)?;
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => {
                    resolved.push(component.as_os_str());
                }
            }
        }

        if !resolved.starts_with(&self.root) {
            return Err(AssistError::invalid_argument(format!(
                "path {} is outside workspace root {}",
                path.display(),
                self.root.display()
            ))
            .with_path(path.display().to_string())
            .with_hint("use a path relative to the session workspace"));
        }

        let display = resolved.to_string_lossy();
        for prefix in RESTRICTED_PREFIXES {
            if display.starts_with(prefix) || display == prefix[..prefix.len() - 1] {
                return Err(self.reject(path, "restricted system prefix"));
            }
        }

        Ok(resolved)
    }

    fn check_symlink(&self, candidate: &Path, original: &Path) -> Result<()> {
        if self.allow_symlinks {
            return Ok(());
        }
        match std::fs::symlink_metadata(candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                Err(self.reject(original, "symlink component"))
            }
            _ => Ok(()),
        }
    }

    fn reject(&self, path: &Path, reason: &str) -> AssistError {
        AssistError::invalid_argument(format!(
            "path {} rejected: {} (outside workspace root policy)",
            path.display(),
            reason
        ))
        .with_path(path.display().to_string())
    }

    /// Screen a URL before it is handed to git or any fetching process.
    pub fn validate_url(&self, url: &str) -> Result<()> {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("file://") {
            return Err(AssistError::invalid_argument(format!(
                "URL {} rejected: file scheme is not allowed",
                url
            )));
        }
        for forbidden in URL_FORBIDDEN {
            if url.contains(forbidden) {
                return Err(AssistError::invalid_argument(format!(
                    "URL {} rejected: contains {:?}",
                    url, forbidden
                )));
            }
        }
        Ok(())
    }

    /// Harden a git argument vector.
    ///
    /// Prepends config overrides that disable repository hooks and the local
    /// file transport, and rejects arguments that smuggle traversal or home
    /// expansion.
    pub fn wrap_git_args<I, S>(&self, args: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut wrapped = vec![
            "-c".to_string(),
            format!("core.hooksPath={}", NULL_HOOKS_PATH),
            "-c".to_string(),
            "protocol.file.allow=never".to_string(),
        ];
        for arg in args {
            let arg = arg.into();
            if arg.contains("..") || arg.contains('~') {
                return Err(AssistError::invalid_argument(format!(
                    "git argument {:?} rejected",
                    arg
                )));
            }
            wrapped.push(arg);
        }
        Ok(wrapped)
    }

    /// Check that a file may be served by the read tools.
    pub fn validate_readable(&self, path: impl AsRef<Path>, max_size: u64) -> Result<PathBuf> {
        let target = self.secure_target(path.as_ref())?;
        if let Some(ext) = target.extension().and_then(|e| e.to_str()) {
            if BLOCKED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                return Err(AssistError::unauthorized(format!(
                    "file type .{} is blocked from reading",
                    ext
                ))
                .with_path(target.display().to_string()));
            }
        }
        let meta = std::fs::metadata(&target).map_err(|e| {
            AssistError::not_found(format!("{}: {}", path.as_ref().display(), e))
                .with_path(path.as_ref().display().to_string())
        })?;
        if meta.len() > max_size {
            return Err(AssistError::invalid_argument(format!(
                "file is {} bytes, read cap is {}",
                meta.len(),
                max_size
            ))
            .with_path(target.display().to_string()));
        }
        Ok(target)
    }
}
