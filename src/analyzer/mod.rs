//! Repository analysis
//!
//! Detects the facts a containerization pipeline needs from a source tree:
//! primary language and version, framework, dependencies, entry points,
//! listening port, Java application server, and database usage. Detection is
//! rule-table driven; each concern lives in its own submodule.

pub mod app_server;
pub mod database;
pub mod dependencies;
pub mod entry_points;
pub mod framework;
pub mod language;
pub mod ports;

pub use dependencies::Dependency;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Directories never descended into during analysis walks.
pub const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "build",
    "dist",
    ".next",
    "__pycache__",
    ".venv",
    "venv",
    "vendor",
];

/// Per-file read cap during content scans.
pub const MAX_SCAN_FILE_SIZE: u64 = 1024 * 1024;

/// Maximum directory depth for annotation and entry-point searches.
pub const MAX_SCAN_DEPTH: usize = 6;

/// The analysis artifact for a repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoAnalysis {
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_system: Option<String>,
    pub dependencies: Vec<Dependency>,
    /// Workspace-relative entry point files
    pub entry_points: Vec<String>,
    /// Detected listening port, zero when unknown
    pub port: u16,
    /// Java application server, when one is identifiable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_server: Option<String>,
    /// Database technologies referenced by the project
    pub databases: Vec<String>,
}

impl Default for RepoAnalysis {
    fn default() -> Self {
        Self {
            language: "unknown".to_string(),
            language_version: None,
            framework: None,
            build_system: None,
            dependencies: Vec::new(),
            entry_points: Vec::new(),
            port: 0,
            app_server: None,
            databases: Vec::new(),
        }
    }
}

/// Analyze the repository rooted at `root`.
///
/// `root` must already be jail-validated by the caller; this function only
/// reads beneath it.
pub fn analyze_repository(root: &Path) -> Result<RepoAnalysis> {
    let detection = language::detect_language(root)?;
    let language_name = detection.language.clone();

    let dependencies = dependencies::extract_dependencies(root, &language_name)?;
    let dep_names: Vec<String> = dependencies.iter().map(|d| d.name.clone()).collect();

    let framework = framework::detect_framework(&language_name, &dep_names);
    let entry_points = entry_points::find_entry_points(root, &language_name)?;

    let app_server = if language_name == "java" {
        app_server::detect_app_server(root, &dep_names)
    } else {
        None
    };

    // Frameworks with an embedded server imply their default port when no
    // explicit configuration names one
    let port = ports::detect_port(root, &entry_points)?
        .or_else(|| framework.as_deref().and_then(framework::default_port))
        .unwrap_or(0);

    let mut databases: BTreeSet<String> = database::detect_from_dependencies(&dep_names)
        .into_iter()
        .collect();
    databases.extend(database::detect_from_config_files(root)?);

    Ok(RepoAnalysis {
        language: language_name,
        language_version: detection.version,
        framework,
        build_system: detection.build_system,
        dependencies,
        entry_points,
        port,
        app_server,
        databases: databases.into_iter().collect(),
    })
}

/// Walk `root` collecting files, honouring the ignore list and a depth bound.
pub(crate) fn collect_files(root: &Path, max_depth: usize) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| !IGNORED_DIRS.contains(&name))
                .unwrap_or(true)
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// Read a file for scanning, skipping anything over the size cap.
pub(crate) fn read_capped(path: &Path) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.len() > MAX_SCAN_FILE_SIZE {
        return None;
    }
    std::fs::read_to_string(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn spring_boot_maven_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("pom.xml"),
            r#"<project>
  <properties>
    <maven.compiler.target>17</maven.compiler.target>
  </properties>
  <dependencies>
    <dependency>
      <groupId>org.springframework.boot</groupId>
      <artifactId>spring-boot-starter-web</artifactId>
      <version>3.2.0</version>
    </dependency>
  </dependencies>
</project>"#,
        )
        .unwrap();

        let analysis = analyze_repository(dir.path()).unwrap();
        assert_eq!(analysis.language, "java");
        assert_eq!(analysis.language_version.as_deref(), Some("17"));
        assert!(analysis
            .framework
            .as_deref()
            .map(|f| f.starts_with("spring"))
            .unwrap_or(false));
        assert!(analysis.port == 8080 || analysis.port == 0);
        assert!(analysis
            .dependencies
            .iter()
            .any(|d| d.name == "spring-boot-starter-web"));
    }

    #[test]
    fn node_express_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name":"svc","main":"server.js","dependencies":{"express":"^4.18.0","pg":"^8.0.0"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("server.js"), "app.listen(process.env.PORT)").unwrap();
        std::fs::write(dir.path().join(".env"), "PORT=3000\n").unwrap();

        let analysis = analyze_repository(dir.path()).unwrap();
        assert_eq!(analysis.language, "javascript");
        assert_eq!(analysis.framework.as_deref(), Some("express"));
        assert_eq!(analysis.port, 3000);
        assert!(analysis.databases.iter().any(|d| d == "postgresql"));
    }

    #[test]
    fn empty_repo_is_unknown() {
        let dir = TempDir::new().unwrap();
        let analysis = analyze_repository(dir.path()).unwrap();
        assert_eq!(analysis.language, "unknown");
        assert_eq!(analysis.port, 0);
    }

    #[test]
    fn ignored_dirs_are_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/junk.js"), "x").unwrap();
        let files = collect_files(dir.path(), MAX_SCAN_DEPTH);
        assert!(files.is_empty());
    }
}
