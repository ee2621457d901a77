//! Entry point enumeration by language-specific globs

use crate::error::Result;
use std::path::Path;

/// Candidate entry files per language, shallow paths first.
fn entry_globs(language: &str) -> &'static [&'static str] {
    match language {
        "javascript" => &[
            "server.js",
            "app.js",
            "index.js",
            "main.js",
            "src/server.js",
            "src/server.ts",
            "src/app.js",
            "src/app.ts",
            "src/index.js",
            "src/index.ts",
            "src/main.js",
            "src/main.ts",
        ],
        "python" => &[
            "main.py",
            "app.py",
            "wsgi.py",
            "asgi.py",
            "manage.py",
            "src/main.py",
            "src/app.py",
        ],
        "go" => &["main.go", "cmd/*/main.go"],
        "java" => &[
            "src/main/java/**/*Application.java",
            "src/main/java/**/Main.java",
        ],
        "rust" => &["src/main.rs", "src/bin/*.rs"],
        "ruby" => &["config.ru", "app.rb", "main.rb"],
        "php" => &["public/index.php", "index.php"],
        "csharp" => &["Program.cs", "src/*/Program.cs"],
        _ => &[],
    }
}

/// Find entry point files, returned as root-relative path strings.
pub fn find_entry_points(root: &Path, language: &str) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for pattern in entry_globs(language) {
        let absolute = root.join(pattern);
        let Some(pattern_str) = absolute.to_str() else {
            continue;
        };
        let Ok(paths) = glob::glob(pattern_str) else {
            continue;
        };
        for path in paths.flatten() {
            if !path.is_file() {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(root) {
                let rel = relative.to_string_lossy().to_string();
                if !found.contains(&rel) {
                    found.push(rel);
                }
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn finds_node_entry_points_in_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("server.js"), "x").unwrap();
        std::fs::write(dir.path().join("index.js"), "x").unwrap();
        let entries = find_entry_points(dir.path(), "javascript").unwrap();
        assert_eq!(entries, vec!["server.js", "index.js"]);
    }

    #[test]
    fn java_application_glob() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("src/main/java/com/example");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("DemoApplication.java"), "x").unwrap();
        let entries = find_entry_points(dir.path(), "java").unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].ends_with("DemoApplication.java"));
    }

    #[test]
    fn go_cmd_layout() {
        let dir = TempDir::new().unwrap();
        let cmd = dir.path().join("cmd/server");
        std::fs::create_dir_all(&cmd).unwrap();
        std::fs::write(cmd.join("main.go"), "x").unwrap();
        let entries = find_entry_points(dir.path(), "go").unwrap();
        assert_eq!(entries, vec!["cmd/server/main.go"]);
    }

    #[test]
    fn unknown_language_finds_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.whatever"), "x").unwrap();
        assert!(find_entry_points(dir.path(), "fortran").unwrap().is_empty());
    }
}
