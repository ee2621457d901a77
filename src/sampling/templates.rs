//! Prompt template store
//!
//! Templates are data, not source: tera files loaded from `templates/` at
//! startup, with embedded fallbacks compiled in so a bare deployment still
//! has a working set. Lookup is by logical name (`dockerfile/generate`,
//! `dockerfile/fix`, `manifests/generate`, plus the analysis prompts).

use crate::error::{AssistError, Result};
use std::path::Path;
use tera::Tera;

const EMBEDDED_TEMPLATES: &[(&str, &str)] = &[
    (
        "dockerfile/generate",
        include_str!("../../templates/dockerfile_generate.tera"),
    ),
    (
        "dockerfile/fix",
        include_str!("../../templates/dockerfile_fix.tera"),
    ),
    (
        "manifests/generate",
        include_str!("../../templates/manifests_generate.tera"),
    ),
    (
        "analysis/dockerfile",
        include_str!("../../templates/analysis_dockerfile.tera"),
    ),
    (
        "analysis/manifest",
        include_str!("../../templates/analysis_manifest.tera"),
    ),
    (
        "analysis/scan",
        include_str!("../../templates/analysis_scan.tera"),
    ),
];

/// Loaded template set.
pub struct TemplateStore {
    tera: Tera,
    sources: std::collections::BTreeMap<String, String>,
}

impl TemplateStore {
    /// Load embedded defaults, then overlay any `*.tera` files found under
    /// `dir` (file `dockerfile_generate.tera` overrides
    /// `dockerfile/generate`).
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut tera = Tera::default();
        let mut sources = std::collections::BTreeMap::new();
        for (name, source) in EMBEDDED_TEMPLATES {
            tera.add_raw_template(name, source)?;
            sources.insert(name.to_string(), source.to_string());
        }
        if let Some(dir) = dir {
            if dir.is_dir() {
                for entry in std::fs::read_dir(dir)
                    .map_err(|e| AssistError::io(format!("cannot read template dir: {}", e)))?
                    .flatten()
                {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("tera") {
                        continue;
                    }
                    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    let name = stem.replacen('_', "/", 1);
                    match std::fs::read_to_string(&path) {
                        Ok(source) => {
                            tera.add_raw_template(&name, &source)?;
                            sources.insert(name, source);
                        }
                        Err(e) => {
                            log::warn!("template {} unreadable, keeping default: {}", path.display(), e)
                        }
                    }
                }
            }
        }
        Ok(Self { tera, sources })
    }

    /// Raw template source, for the prompt discovery surface.
    pub fn source(&self, name: &str) -> Option<&str> {
        self.sources.get(name).map(String::as_str)
    }

    /// Render a template with the given context.
    pub fn render(&self, name: &str, context: &tera::Context) -> Result<String> {
        self.tera.render(name, context).map_err(|e| {
            AssistError::internal(format!("template {} failed to render: {}", name, e))
        })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tera
            .get_template_names()
            .map(String::from)
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_set_loads() {
        let store = TemplateStore::load(None).unwrap();
        let names = store.names();
        assert!(names.contains(&"dockerfile/generate".to_string()));
        assert!(names.contains(&"analysis/scan".to_string()));
    }

    #[test]
    fn generate_template_renders() {
        let store = TemplateStore::load(None).unwrap();
        let mut ctx = tera::Context::new();
        ctx.insert("language", "java");
        ctx.insert("language_version", "17");
        ctx.insert("framework", "spring");
        ctx.insert("port", &8080u16);
        ctx.insert("entry_points", &vec!["src/main/java/App.java"]);
        ctx.insert("dependencies", &vec!["spring-boot-starter-web"]);
        ctx.insert("knowledge", "");
        let rendered = store.render("dockerfile/generate", &ctx).unwrap();
        assert!(rendered.contains("java"));
        assert!(rendered.contains("8080"));
    }

    #[test]
    fn file_overlay_overrides_embedded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("dockerfile_generate.tera"),
            "OVERRIDDEN {{ language }}",
        )
        .unwrap();
        let store = TemplateStore::load(Some(dir.path())).unwrap();
        let mut ctx = tera::Context::new();
        ctx.insert("language", "go");
        let rendered = store.render("dockerfile/generate", &ctx).unwrap();
        assert_eq!(rendered, "OVERRIDDEN go");
    }

    #[test]
    fn unknown_template_errors() {
        let store = TemplateStore::load(None).unwrap();
        assert!(store.render("nope/nothing", &tera::Context::new()).is_err());
    }
}
