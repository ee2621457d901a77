//! Policy engine
//!
//! Declarative rule documents constrain generated artifacts. Documents load
//! from YAML, merge by rule id (lexicographically later file wins), compile
//! into an immutable ruleset, and evaluate as a pure function over artifact
//! content. Reload swaps the compiled set atomically; a running evaluation
//! keeps the set it started with.

pub mod engine;
pub mod loader;

pub use engine::{PolicyEngine, PolicyFinding, PolicyReport};
pub use loader::load_policies;

use serde::{Deserialize, Serialize};

/// Enforcement posture applied when deriving the aggregate `allow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    #[default]
    Strict,
    Advisory,
    Lenient,
}

/// Severity attached to a rule, used by lenient enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// A policy document as parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub version: String,
    pub metadata: PolicyMetadata,
    #[serde(default)]
    pub defaults: PolicyDefaults,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyMetadata {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Document-level defaults. All keys optional so later documents can
/// override individual keys without restating the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforcement: Option<Enforcement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registry_allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registry_block: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_non_root: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_pinned_base: Option<bool>,
}

/// One rule: a conjunction of conditions driving a set of actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub category: String,
    /// 1..=100, higher evaluates (and reports) first
    pub priority: u8,
    /// Explicit severity; derived from priority when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<RuleSeverity>,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

impl Rule {
    /// Severity for lenient gating: explicit wins, else priority >= 90 is
    /// critical, >= 70 high, >= 40 medium, low otherwise.
    pub fn effective_severity(&self) -> RuleSeverity {
        if let Some(severity) = self.severity {
            return severity;
        }
        match self.priority {
            90..=100 => RuleSeverity::Critical,
            70..=89 => RuleSeverity::High,
            40..=69 => RuleSeverity::Medium,
            _ => RuleSeverity::Low,
        }
    }
}

/// A condition. `regex` is the general matcher; the rest are the closed set
/// of named predicates. Adding a predicate is a code change, not a
/// configuration change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Regex {
        pattern: String,
        #[serde(default)]
        flags: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        min_matches: Option<usize>,
    },
    HasPattern {
        pattern: String,
        #[serde(default)]
        flags: String,
    },
    FileExists {
        path: String,
    },
    LargerThan {
        bytes: u64,
    },
    HasVulnerabilities {
        severities: Vec<String>,
    },
}

/// Rule outcome directive with its human message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Block(String),
    Warn(String),
    Suggest(String),
}

impl Action {
    pub fn message(&self) -> &str {
        match self {
            Action::Block(m) | Action::Warn(m) | Action::Suggest(m) => m,
        }
    }
}
