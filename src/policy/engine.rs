//! Policy evaluation
//!
//! Documents compile once into a [`Ruleset`]: regexes built with their
//! declared flags, predicates resolved. Evaluation is a pure function of the
//! artifact content (plus the optional scan report and workspace), so the
//! same inputs always produce byte-identical output. Reload builds a new
//! ruleset and swaps the shared pointer; in-flight evaluations finish on the
//! set they started with.

use super::loader::{self, MergedPolicies};
use super::{Action, Condition, Enforcement, Rule, RuleSeverity};
use crate::config::PolicyConfig;
use crate::error::Result;
use crate::scanner::{ScanReport, Severity};
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// One rule finding in a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyFinding {
    pub rule_id: String,
    pub category: String,
    pub priority: u8,
    pub severity: RuleSeverity,
    pub message: String,
}

/// Result of evaluating one artifact against the ruleset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyReport {
    pub allow: bool,
    pub enforcement: Enforcement,
    pub violations: Vec<PolicyFinding>,
    pub warnings: Vec<PolicyFinding>,
    pub suggestions: Vec<PolicyFinding>,
    pub summary: String,
}

impl PolicyReport {
    /// A report that admits everything; used when no policy is configured.
    pub fn permissive() -> Self {
        Self {
            allow: true,
            enforcement: Enforcement::Strict,
            violations: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
            summary: "no policy rules loaded".to_string(),
        }
    }
}

enum CompiledCondition {
    Regex { regex: Regex, min_matches: usize },
    FileExists { path: String },
    LargerThan { bytes: u64 },
    HasVulnerabilities { severities: Vec<Severity> },
}

struct CompiledRule {
    rule: Rule,
    conditions: Vec<CompiledCondition>,
}

/// An immutable compiled policy set.
pub struct Ruleset {
    enforcement: Enforcement,
    rules: Vec<CompiledRule>,
    registry_block: Vec<String>,
}

impl Ruleset {
    fn compile(merged: MergedPolicies) -> Self {
        let mut rules = Vec::new();
        for rule in merged.rules {
            match compile_rule(&rule) {
                Ok(conditions) => rules.push(CompiledRule { rule, conditions }),
                Err(reason) => {
                    log::warn!("rule {} dropped at compile: {}", rule.id, reason);
                }
            }
        }
        Self {
            enforcement: merged.enforcement,
            rules,
            registry_block: merged.registry_block,
        }
    }
}

fn compile_rule(rule: &Rule) -> std::result::Result<Vec<CompiledCondition>, String> {
    rule.conditions
        .iter()
        .map(|condition| match condition {
            Condition::Regex {
                pattern,
                flags,
                min_matches,
            } => Ok(CompiledCondition::Regex {
                regex: build_regex(pattern, flags)?,
                min_matches: min_matches.unwrap_or(1),
            }),
            Condition::HasPattern { pattern, flags } => Ok(CompiledCondition::Regex {
                regex: build_regex(pattern, flags)?,
                min_matches: 1,
            }),
            Condition::FileExists { path } => Ok(CompiledCondition::FileExists {
                path: path.clone(),
            }),
            Condition::LargerThan { bytes } => Ok(CompiledCondition::LargerThan { bytes: *bytes }),
            Condition::HasVulnerabilities { severities } => {
                Ok(CompiledCondition::HasVulnerabilities {
                    severities: severities
                        .iter()
                        .map(|s| Severity::from_str_loose(s))
                        .collect(),
                })
            }
        })
        .collect()
}

fn build_regex(pattern: &str, flags: &str) -> std::result::Result<Regex, String> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            other => return Err(format!("unknown regex flag {:?}", other)),
        }
    }
    builder.build().map_err(|e| e.to_string())
}

/// Evaluation context beyond the artifact bytes.
#[derive(Default)]
pub struct EvalContext<'a> {
    pub scan_report: Option<&'a ScanReport>,
    pub workspace: Option<&'a Path>,
}

/// The policy engine: holds the current ruleset, reloadable at runtime.
pub struct PolicyEngine {
    config: PolicyConfig,
    ruleset: RwLock<Arc<Ruleset>>,
}

impl PolicyEngine {
    /// Load, merge, and compile policies per the configuration.
    pub fn new(config: PolicyConfig) -> Result<Self> {
        let merged = loader::load_policies(&config.policy_dir, config.policy_file.as_deref())?;
        let ruleset = Arc::new(Ruleset::compile(merged));
        log::info!(
            "policy engine loaded {} rule(s), enforcement {:?}",
            ruleset.rules.len(),
            ruleset.enforcement
        );
        Ok(Self {
            config,
            ruleset: RwLock::new(ruleset),
        })
    }

    /// An engine with no rules; admits everything.
    pub fn empty() -> Self {
        Self {
            config: PolicyConfig::default(),
            ruleset: RwLock::new(Arc::new(Ruleset {
                enforcement: Enforcement::Strict,
                rules: Vec::new(),
                registry_block: Vec::new(),
            })),
        }
    }

    /// Reload documents and swap in the new compiled set.
    pub fn reload(&self) -> Result<()> {
        let merged =
            loader::load_policies(&self.config.policy_dir, self.config.policy_file.as_deref())?;
        let ruleset = Arc::new(Ruleset::compile(merged));
        *self.ruleset.write() = ruleset;
        Ok(())
    }

    pub fn enforcement(&self) -> Enforcement {
        self.ruleset.read().enforcement
    }

    pub fn rule_count(&self) -> usize {
        self.ruleset.read().rules.len()
    }

    /// Registries that artifacts must not be pushed to.
    pub fn registry_block(&self) -> Vec<String> {
        self.ruleset.read().registry_block.clone()
    }

    /// Evaluate `content` for an artifact kind.
    ///
    /// Rules emit in priority-descending order then id, so output is
    /// deterministic for identical inputs.
    pub fn evaluate(&self, artifact_kind: &str, content: &str, ctx: &EvalContext) -> PolicyReport {
        let ruleset = Arc::clone(&self.ruleset.read());
        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        for compiled in &ruleset.rules {
            if !rule_matches(compiled, content, ctx) {
                continue;
            }
            for action in &compiled.rule.actions {
                let finding = PolicyFinding {
                    rule_id: compiled.rule.id.clone(),
                    category: compiled.rule.category.clone(),
                    priority: compiled.rule.priority,
                    severity: compiled.rule.effective_severity(),
                    message: action.message().to_string(),
                };
                match action {
                    Action::Block(_) => violations.push(finding),
                    Action::Warn(_) => warnings.push(finding),
                    Action::Suggest(_) => suggestions.push(finding),
                }
            }
        }

        let allow = match ruleset.enforcement {
            Enforcement::Strict => violations.is_empty(),
            Enforcement::Advisory => true,
            // lenient gates on severity: only critical violations block
            Enforcement::Lenient => !violations
                .iter()
                .any(|v| v.severity == RuleSeverity::Critical),
        };

        let summary = format!(
            "{}: {} violation(s), {} warning(s), {} suggestion(s) under {:?} enforcement",
            artifact_kind,
            violations.len(),
            warnings.len(),
            suggestions.len(),
            ruleset.enforcement
        );

        PolicyReport {
            allow,
            enforcement: ruleset.enforcement,
            violations,
            warnings,
            suggestions,
            summary,
        }
    }
}

fn rule_matches(compiled: &CompiledRule, content: &str, ctx: &EvalContext) -> bool {
    compiled.conditions.iter().all(|condition| match condition {
        CompiledCondition::Regex { regex, min_matches } => {
            if *min_matches <= 1 {
                regex.is_match(content)
            } else {
                regex.find_iter(content).take(*min_matches).count() >= *min_matches
            }
        }
        CompiledCondition::FileExists { path } => ctx
            .workspace
            .map(|workspace| workspace.join(path).exists())
            .unwrap_or(false),
        CompiledCondition::LargerThan { bytes } => content.len() as u64 > *bytes,
        CompiledCondition::HasVulnerabilities { severities } => ctx
            .scan_report
            .map(|report| {
                report
                    .vulnerabilities
                    .iter()
                    .any(|v| severities.contains(&v.severity))
            })
            .unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{ScanReport, Severity, Vulnerability};
    use tempfile::TempDir;

    fn engine_from(yaml: &str) -> PolicyEngine {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("policy.yaml"), yaml).unwrap();
        let config = PolicyConfig {
            policy_dir: dir.path().to_path_buf(),
            policy_file: None,
            max_fix_iterations: 3,
        };
        PolicyEngine::new(config).unwrap()
    }

    const LATEST_TAG_POLICY: &str = r#"
version: "1.0"
metadata: { name: baseline }
defaults: { enforcement: strict }
rules:
  - id: no-latest-tag
    category: dockerfile
    priority: 85
    conditions:
      - regex:
          pattern: 'FROM\s+[^:]+:latest'
          flags: im
    actions:
      - block: "base image must not use the latest tag"
"#;

    #[test]
    fn latest_tag_blocks_under_strict() {
        let engine = engine_from(LATEST_TAG_POLICY);
        let report = engine.evaluate(
            "dockerfile",
            "FROM node:latest\nRUN npm ci\n",
            &EvalContext::default(),
        );
        assert!(!report.allow);
        assert_eq!(report.violations.len(), 1);
        assert!(report.violations[0].priority >= 80);
        assert!(report.violations[0].message.contains("latest"));
    }

    #[test]
    fn pinned_tag_passes() {
        let engine = engine_from(LATEST_TAG_POLICY);
        let report = engine.evaluate(
            "dockerfile",
            "FROM node:20.11-alpine\n",
            &EvalContext::default(),
        );
        assert!(report.allow);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let engine = engine_from(LATEST_TAG_POLICY);
        let content = "FROM node:latest\n";
        let a = engine.evaluate("dockerfile", content, &EvalContext::default());
        let b = engine.evaluate("dockerfile", content, &EvalContext::default());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn advisory_forces_allow() {
        let engine = engine_from(&LATEST_TAG_POLICY.replace("strict", "advisory"));
        let report = engine.evaluate("dockerfile", "FROM node:latest\n", &EvalContext::default());
        assert!(report.allow);
        // the rule still evaluated
        assert_eq!(report.violations.len(), 1);
    }

    #[test]
    fn lenient_gates_on_critical_severity_only() {
        let yaml = r#"
version: "1.0"
metadata: { name: lenient }
defaults: { enforcement: lenient }
rules:
  - id: high-block
    category: dockerfile
    priority: 80
    conditions: [{ has_pattern: { pattern: "ADD " } }]
    actions: [{ block: "use COPY" }]
  - id: critical-block
    category: dockerfile
    priority: 95
    conditions: [{ has_pattern: { pattern: "curl.*\\| sh" } }]
    actions: [{ block: "no pipe to shell" }]
"#;
        let engine = engine_from(yaml);

        let report = engine.evaluate("dockerfile", "ADD . /app\n", &EvalContext::default());
        assert!(report.allow, "high severity block passes lenient");

        let report = engine.evaluate(
            "dockerfile",
            "RUN curl http://x | sh\n",
            &EvalContext::default(),
        );
        assert!(!report.allow, "critical severity block fails lenient");
    }

    #[test]
    fn min_matches_threshold() {
        let yaml = r#"
version: "1.0"
metadata: { name: layers }
defaults: { enforcement: strict }
rules:
  - id: too-many-runs
    category: dockerfile
    priority: 40
    conditions:
      - regex: { pattern: '^RUN ', flags: m, min_matches: 3 }
    actions: [{ warn: "consider combining RUN layers" }]
"#;
        let engine = engine_from(yaml);
        let two = "RUN a\nRUN b\n";
        let three = "RUN a\nRUN b\nRUN c\n";
        assert!(engine.evaluate("dockerfile", two, &EvalContext::default()).warnings.is_empty());
        assert_eq!(
            engine.evaluate("dockerfile", three, &EvalContext::default()).warnings.len(),
            1
        );
    }

    #[test]
    fn file_exists_predicate_needs_workspace() {
        let yaml = r#"
version: "1.0"
metadata: { name: files }
defaults: { enforcement: strict }
rules:
  - id: dockerignore-present
    category: hygiene
    priority: 30
    conditions: [{ file_exists: { path: ".dockerignore" } }]
    actions: [{ suggest: "good, .dockerignore found" }]
"#;
        let engine = engine_from(yaml);
        let workspace = TempDir::new().unwrap();
        std::fs::write(workspace.path().join(".dockerignore"), "target\n").unwrap();

        let without = engine.evaluate("dockerfile", "FROM x:1\n", &EvalContext::default());
        assert!(without.suggestions.is_empty());

        let ctx = EvalContext {
            workspace: Some(workspace.path()),
            ..Default::default()
        };
        let with = engine.evaluate("dockerfile", "FROM x:1\n", &ctx);
        assert_eq!(with.suggestions.len(), 1);
    }

    #[test]
    fn has_vulnerabilities_predicate() {
        let yaml = r#"
version: "1.0"
metadata: { name: vulns }
defaults: { enforcement: strict }
rules:
  - id: no-critical-vulns
    category: scan
    priority: 95
    conditions: [{ has_vulnerabilities: { severities: ["critical"] } }]
    actions: [{ block: "image has critical vulnerabilities" }]
"#;
        let engine = engine_from(yaml);
        let report = ScanReport::assemble(
            "demo:1".into(),
            vec!["trivy".into()],
            vec![Vulnerability {
                id: "CVE-1".into(),
                severity: Severity::Critical,
                package: "openssl".into(),
                installed_version: None,
                fixed_version: None,
                title: None,
                sources: vec!["trivy".into()],
            }],
            None,
            None,
            false,
        );
        let ctx = EvalContext {
            scan_report: Some(&report),
            ..Default::default()
        };
        let result = engine.evaluate("scan", "", &ctx);
        assert!(!result.allow);
    }

    #[test]
    fn reload_swaps_ruleset() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("policy.yaml"), LATEST_TAG_POLICY).unwrap();
        let config = PolicyConfig {
            policy_dir: dir.path().to_path_buf(),
            policy_file: None,
            max_fix_iterations: 3,
        };
        let engine = PolicyEngine::new(config).unwrap();
        assert_eq!(engine.rule_count(), 1);

        std::fs::write(
            dir.path().join("zz-extra.yaml"),
            LATEST_TAG_POLICY.replace("no-latest-tag", "second-rule"),
        )
        .unwrap();
        engine.reload().unwrap();
        assert_eq!(engine.rule_count(), 2);
    }
}
