//! Primary language detection
//!
//! Build files decide first, in a fixed priority order; when no build file is
//! present the extension census of the tree breaks the tie. Version extraction
//! is best effort per ecosystem.

use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// Outcome of language detection.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageDetection {
    pub language: String,
    pub version: Option<String>,
    pub build_system: Option<String>,
}

/// Build-file priority table: first match wins.
const BUILD_FILE_PRIORITY: &[(&str, &str, &str)] = &[
    // (file name, language, build system)
    ("package.json", "javascript", "npm"),
    ("go.mod", "go", "go"),
    ("requirements.txt", "python", "pip"),
    ("Pipfile", "python", "pipenv"),
    ("pyproject.toml", "python", "poetry"),
    ("pom.xml", "java", "maven"),
    ("build.gradle", "java", "gradle"),
    ("build.gradle.kts", "java", "gradle"),
    ("Cargo.toml", "rust", "cargo"),
    ("composer.json", "php", "composer"),
    ("Gemfile", "ruby", "bundler"),
];

/// Extensions counted in the fallback census.
const EXTENSION_LANGUAGES: &[(&str, &str)] = &[
    ("js", "javascript"),
    ("mjs", "javascript"),
    ("ts", "javascript"),
    ("tsx", "javascript"),
    ("go", "go"),
    ("py", "python"),
    ("java", "java"),
    ("kt", "java"),
    ("rs", "rust"),
    ("php", "php"),
    ("rb", "ruby"),
    ("cs", "csharp"),
];

/// Detect the repository's primary language.
pub fn detect_language(root: &Path) -> Result<LanguageDetection> {
    for (file, language, build_system) in BUILD_FILE_PRIORITY {
        let path = root.join(file);
        if path.exists() {
            return Ok(LanguageDetection {
                language: language.to_string(),
                version: detect_version(root, language, file),
                build_system: Some(build_system.to_string()),
            });
        }
    }

    // *.csproj has no fixed name; glob for it
    if let Some(csproj) = find_by_extension(root, "csproj") {
        return Ok(LanguageDetection {
            language: "csharp".to_string(),
            version: extract_csproj_target(&csproj),
            build_system: Some("dotnet".to_string()),
        });
    }

    Ok(extension_census(root))
}

fn find_by_extension(root: &Path, ext: &str) -> Option<std::path::PathBuf> {
    super::collect_files(root, 3)
        .into_iter()
        .find(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
}

fn extension_census(root: &Path) -> LanguageDetection {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for file in super::collect_files(root, super::MAX_SCAN_DEPTH) {
        if let Some(ext) = file.extension().and_then(|e| e.to_str()) {
            if let Some((_, language)) = EXTENSION_LANGUAGES
                .iter()
                .find(|(e, _)| *e == ext.to_ascii_lowercase())
            {
                *counts.entry(language).or_default() += 1;
            }
        }
    }
    let language = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(language, _)| language.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    LanguageDetection {
        language,
        version: None,
        build_system: None,
    }
}

fn detect_version(root: &Path, language: &str, build_file: &str) -> Option<String> {
    let content = super::read_capped(&root.join(build_file))?;
    match language {
        "java" => extract_java_version(&content),
        "go" => extract_go_version(&content),
        "javascript" => extract_node_version(&content),
        "python" => extract_python_version(&content),
        "rust" => extract_rust_version(&content),
        _ => None,
    }
}

static MAVEN_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"<maven\.compiler\.(?:target|release)>\s*([\d.]+)\s*</maven\.compiler\.(?:target|release)>",
    )
    .expect("valid regex")
});
static JAVA_VERSION_PROP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<java\.version>\s*([\d.]+)\s*</java\.version>").expect("valid regex"));
static GRADLE_TOOLCHAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)languageVersion.*?(\d+)").expect("valid regex"));

fn extract_java_version(content: &str) -> Option<String> {
    MAVEN_TARGET
        .captures(content)
        .or_else(|| JAVA_VERSION_PROP.captures(content))
        .or_else(|| GRADLE_TOOLCHAIN.captures(content))
        .map(|c| c[1].to_string())
}

static GO_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^go\s+([\d.]+)").expect("valid regex"));

fn extract_go_version(content: &str) -> Option<String> {
    GO_DIRECTIVE.captures(content).map(|c| c[1].to_string())
}

fn extract_node_version(content: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(content).ok()?;
    parsed["engines"]["node"]
        .as_str()
        .map(|v| v.trim_start_matches(['^', '~', '>', '=', ' ']).to_string())
}

static PYTHON_REQUIRES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:requires-python|python_requires)\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});

fn extract_python_version(content: &str) -> Option<String> {
    PYTHON_REQUIRES
        .captures(content)
        .map(|c| c[1].trim_start_matches(['^', '~', '>', '=', ' ']).to_string())
}

static RUST_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^rust-version\s*=\s*"([^"]+)""#).expect("valid regex")
});

fn extract_rust_version(content: &str) -> Option<String> {
    RUST_VERSION.captures(content).map(|c| c[1].to_string())
}

static CSPROJ_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<TargetFramework>net([\d.]+)</TargetFramework>").expect("valid regex")
});

fn extract_csproj_target(path: &Path) -> Option<String> {
    let content = super::read_capped(path)?;
    CSPROJ_TARGET.captures(&content).map(|c| c[1].to_string())
}
