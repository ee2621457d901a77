//! Policy document loading and merging
//!
//! Documents load from a directory in lexicographic filename order, or from a
//! single explicit file. Merging is by rule id: a later document's rule
//! replaces an earlier one's, and each `defaults` key set by a later document
//! overrides that key alone. Invalid documents are skipped with a warning;
//! they never take the server down.

use super::{Enforcement, PolicyDefaults, PolicyDocument, Rule};
use crate::error::{AssistError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// The merged, validated policy set before compilation.
#[derive(Debug, Clone, Default)]
pub struct MergedPolicies {
    pub enforcement: Enforcement,
    pub registry_allow: Vec<String>,
    pub registry_block: Vec<String>,
    pub require_non_root: bool,
    pub require_pinned_base: bool,
    /// Rules by id, each carrying the name of the document that won
    pub rules: Vec<Rule>,
}

/// Load and merge all policy documents from a directory or single file.
pub fn load_policies(dir: &Path, explicit_file: Option<&Path>) -> Result<MergedPolicies> {
    let mut documents = Vec::new();

    if let Some(file) = explicit_file {
        if let Some(doc) = load_one(file) {
            documents.push(doc);
        } else {
            return Err(AssistError::invalid_argument(format!(
                "explicit policy file {} failed to load",
                file.display()
            ))
            .with_path(file.display().to_string()));
        }
    } else if dir.is_dir() {
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| AssistError::io(format!("cannot read policy dir: {}", e)))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        // merge order is lexicographic ascending; later files win
        paths.sort();
        for path in paths {
            if let Some(doc) = load_one(&path) {
                documents.push(doc);
            }
        }
    }

    Ok(merge(documents))
}

fn load_one(path: &Path) -> Option<PolicyDocument> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("policy {} unreadable, skipping: {}", path.display(), e);
            return None;
        }
    };
    let doc: PolicyDocument = match serde_yaml::from_str(&content) {
        Ok(doc) => doc,
        Err(e) => {
            log::warn!("policy {} invalid, skipping: {}", path.display(), e);
            return None;
        }
    };
    if let Err(reason) = validate(&doc) {
        log::warn!("policy {} rejected, skipping: {}", path.display(), reason);
        return None;
    }
    Some(doc)
}

fn validate(doc: &PolicyDocument) -> std::result::Result<(), String> {
    if doc.version.trim().is_empty() {
        return Err("missing version".to_string());
    }
    for rule in &doc.rules {
        if rule.id.trim().is_empty() {
            return Err("rule with empty id".to_string());
        }
        if !(1..=100).contains(&rule.priority) {
            return Err(format!(
                "rule {} priority {} outside 1..=100",
                rule.id, rule.priority
            ));
        }
        if rule.conditions.is_empty() {
            return Err(format!("rule {} has no conditions", rule.id));
        }
        if rule.actions.is_empty() {
            return Err(format!("rule {} has no actions", rule.id));
        }
    }
    Ok(())
}

fn merge(documents: Vec<PolicyDocument>) -> MergedPolicies {
    let mut defaults = PolicyDefaults::default();
    let mut rules: BTreeMap<String, Rule> = BTreeMap::new();

    for doc in documents {
        // later documents override individual default keys
        if let Some(enforcement) = doc.defaults.enforcement {
            defaults.enforcement = Some(enforcement);
        }
        if !doc.defaults.registry_allow.is_empty() {
            defaults.registry_allow = doc.defaults.registry_allow;
        }
        if !doc.defaults.registry_block.is_empty() {
            defaults.registry_block = doc.defaults.registry_block;
        }
        if let Some(flag) = doc.defaults.require_non_root {
            defaults.require_non_root = Some(flag);
        }
        if let Some(flag) = doc.defaults.require_pinned_base {
            defaults.require_pinned_base = Some(flag);
        }
        for rule in doc.rules {
            rules.insert(rule.id.clone(), rule);
        }
    }

    let mut rules: Vec<Rule> = rules.into_values().collect();
    // evaluation and reporting order: priority descending, then id
    rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

    MergedPolicies {
        enforcement: defaults.enforcement.unwrap_or_default(),
        registry_allow: defaults.registry_allow,
        registry_block: defaults.registry_block,
        require_non_root: defaults.require_non_root.unwrap_or(false),
        require_pinned_base: defaults.require_pinned_base.unwrap_or(false),
        rules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DOC_A: &str = r#"
version: "1.0"
metadata: { name: a }
defaults:
  enforcement: advisory
  require_non_root: true
rules:
  - id: shared-rule
    category: dockerfile
    priority: 50
    conditions: [{ larger_than: { bytes: 100 } }]
    actions: [{ warn: "from a" }]
  - id: only-a
    category: dockerfile
    priority: 90
    conditions: [{ larger_than: { bytes: 100 } }]
    actions: [{ block: "a only" }]
"#;

    const DOC_B: &str = r#"
version: "1.0"
metadata: { name: b }
defaults:
  enforcement: strict
rules:
  - id: shared-rule
    category: dockerfile
    priority: 70
    conditions: [{ larger_than: { bytes: 200 } }]
    actions: [{ block: "from b" }]
"#;

    #[test]
    fn later_file_wins_rule_and_default_collisions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.yaml"), DOC_A).unwrap();
        std::fs::write(dir.path().join("b.yaml"), DOC_B).unwrap();

        let merged = load_policies(dir.path(), None).unwrap();
        // b overrides enforcement; a's require_non_root key survives
        assert_eq!(merged.enforcement, Enforcement::Strict);
        assert!(merged.require_non_root);

        assert_eq!(merged.rules.len(), 2);
        let shared = merged.rules.iter().find(|r| r.id == "shared-rule").unwrap();
        assert_eq!(shared.priority, 70);
        assert!(matches!(shared.actions[0], crate::policy::Action::Block(_)));
    }

    #[test]
    fn rules_sorted_by_priority_then_id() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.yaml"), DOC_A).unwrap();
        std::fs::write(dir.path().join("b.yaml"), DOC_B).unwrap();
        let merged = load_policies(dir.path(), None).unwrap();
        let ids: Vec<&str> = merged.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["only-a", "shared-rule"]);
    }

    #[test]
    fn invalid_document_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.yaml"), DOC_A).unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "version: \"1.0\"\nmetadata: {name: x}\nrules:\n  - id: bad\n    category: c\n    priority: 500\n    conditions: [{ larger_than: { bytes: 1 } }]\n    actions: [{ warn: w }]\n").unwrap();
        std::fs::write(dir.path().join("noise.yaml"), ":::not yaml at all").unwrap();

        let merged = load_policies(dir.path(), None).unwrap();
        assert_eq!(merged.rules.len(), 2);
        assert!(merged.rules.iter().all(|r| r.id != "bad"));
    }

    #[test]
    fn empty_dir_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let merged = load_policies(dir.path(), None).unwrap();
        assert_eq!(merged.enforcement, Enforcement::Strict);
        assert!(merged.rules.is_empty());
    }

    #[test]
    fn explicit_file_takes_precedence() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("only.yaml");
        std::fs::write(&file, DOC_B).unwrap();
        let merged = load_policies(Path::new("/nonexistent"), Some(&file)).unwrap();
        assert_eq!(merged.rules.len(), 1);
    }

    #[test]
    fn missing_explicit_file_is_fatal() {
        assert!(load_policies(Path::new("/nonexistent"), Some(Path::new("/no/file.yaml"))).is_err());
    }
}
