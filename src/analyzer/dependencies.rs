//! Dependency extraction per ecosystem
//!
//! NPM manifests parse as JSON; pip requirements parse line-wise as
//! `name[op]version`; Maven POMs are scanned for `<dependency>` elements;
//! Go modules are read from their `require` blocks. Cargo manifests parse
//! with the TOML reader already in the tree.

use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A single declared dependency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dependency {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// True for dev/test-scoped dependencies
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dev: bool,
}

impl Dependency {
    fn new(name: impl Into<String>, version: Option<String>, dev: bool) -> Self {
        Self {
            name: name.into(),
            version,
            dev,
        }
    }
}

/// Extract declared dependencies for the detected language.
pub fn extract_dependencies(root: &Path, language: &str) -> Result<Vec<Dependency>> {
    let deps = match language {
        "javascript" => parse_npm(root),
        "python" => parse_pip(root),
        "java" => parse_maven(root).or_else(|| parse_gradle(root)),
        "go" => parse_go_mod(root),
        "rust" => parse_cargo(root),
        _ => None,
    };
    Ok(deps.unwrap_or_default())
}

fn parse_npm(root: &Path) -> Option<Vec<Dependency>> {
    let content = super::read_capped(&root.join("package.json"))?;
    let parsed: serde_json::Value = serde_json::from_str(&content).ok()?;
    let mut deps = Vec::new();
    for (section, dev) in [("dependencies", false), ("devDependencies", true)] {
        if let Some(map) = parsed[section].as_object() {
            for (name, version) in map {
                deps.push(Dependency::new(
                    name,
                    version.as_str().map(String::from),
                    dev,
                ));
            }
        }
    }
    Some(deps)
}

static PIP_LINE: Lazy<Regex> = Lazy::new(|| {
    // name, optional extras, optional operator + version
    Regex::new(r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*(?:(?:==|>=|<=|~=|!=|>|<)\s*([^\s;#]+))?")
        .expect("valid regex")
});

fn parse_pip(root: &Path) -> Option<Vec<Dependency>> {
    let content = super::read_capped(&root.join("requirements.txt"))
        .or_else(|| super::read_capped(&root.join("requirements/base.txt")))?;
    let mut deps = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
            continue;
        }
        if let Some(captures) = PIP_LINE.captures(line) {
            deps.push(Dependency::new(
                captures[1].to_lowercase(),
                captures.get(2).map(|m| m.as_str().to_string()),
                false,
            ));
        }
    }
    Some(deps)
}

static MAVEN_DEPENDENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<dependency>(.*?)</dependency>").expect("valid regex")
});
static MAVEN_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(groupId|artifactId|version|scope)>\s*([^<]+?)\s*</(?:groupId|artifactId|version|scope)>")
        .expect("valid regex")
});

fn parse_maven(root: &Path) -> Option<Vec<Dependency>> {
    let content = super::read_capped(&root.join("pom.xml"))?;
    let mut deps = Vec::new();
    for element in MAVEN_DEPENDENCY.captures_iter(&content) {
        let mut artifact = None;
        let mut version = None;
        let mut scope = None;
        for field in MAVEN_FIELD.captures_iter(&element[1]) {
            match &field[1] {
                "artifactId" => artifact = Some(field[2].to_string()),
                "version" => version = Some(field[2].to_string()),
                "scope" => scope = Some(field[2].to_string()),
                _ => {}
            }
        }
        if let Some(artifact) = artifact {
            let dev = matches!(scope.as_deref(), Some("test") | Some("provided"));
            // property placeholders like ${spring.version} carry no signal
            let version = version.filter(|v| !v.starts_with("${"));
            deps.push(Dependency::new(artifact, version, dev));
        }
    }
    Some(deps)
}

static GRADLE_DEPENDENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*(implementation|api|compileOnly|runtimeOnly|testImplementation)\s*[\( ]\s*["']([^:"']+):([^:"']+)(?::([^"']+))?["']"#)
        .expect("valid regex")
});

fn parse_gradle(root: &Path) -> Option<Vec<Dependency>> {
    let content = super::read_capped(&root.join("build.gradle"))
        .or_else(|| super::read_capped(&root.join("build.gradle.kts")))?;
    let mut deps = Vec::new();
    for captures in GRADLE_DEPENDENCY.captures_iter(&content) {
        let dev = &captures[1] == "testImplementation";
        deps.push(Dependency::new(
            captures[3].to_string(),
            captures.get(4).map(|m| m.as_str().to_string()),
            dev,
        ));
    }
    Some(deps)
}

static GO_REQUIRE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)require\s*\((.*?)\)").expect("valid regex"));
static GO_REQUIRE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*([^\s/]+)\s+(v[^\s/]+)(\s*//\s*indirect)?").expect("valid regex")
});
static GO_SINGLE_REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^require\s+([^\s(]+)\s+(v\S+)").expect("valid regex")
});

fn parse_go_mod(root: &Path) -> Option<Vec<Dependency>> {
    let content = super::read_capped(&root.join("go.mod"))?;
    let mut deps = Vec::new();
    for block in GO_REQUIRE_BLOCK.captures_iter(&content) {
        for line in GO_REQUIRE_LINE.captures_iter(&block[1]) {
            deps.push(Dependency::new(
                line[1].to_string(),
                Some(line[2].to_string()),
                line.get(3).is_some(),
            ));
        }
    }
    for single in GO_SINGLE_REQUIRE.captures_iter(&content) {
        deps.push(Dependency::new(
            single[1].to_string(),
            Some(single[2].to_string()),
            false,
        ));
    }
    Some(deps)
}

fn parse_cargo(root: &Path) -> Option<Vec<Dependency>> {
    let content = super::read_capped(&root.join("Cargo.toml"))?;
    let parsed: toml::Value = toml::from_str(&content).ok()?;
    let mut deps = Vec::new();
    for (section, dev) in [("dependencies", false), ("dev-dependencies", true)] {
        if let Some(table) = parsed.get(section).and_then(|v| v.as_table()) {
            for (name, spec) in table {
                let version = match spec {
                    toml::Value::String(v) => Some(v.clone()),
                    toml::Value::Table(t) => t
                        .get("version")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    _ => None,
                };
                deps.push(Dependency::new(name, version, dev));
            }
        }
    }
    Some(deps)
}
