//! Vulnerability scanning
//!
//! External scanners (trivy preferred, grype as fallback) run against a built
//! image; their JSON output parses into one canonical [`ScanReport`]. When
//! both scanners are present they run in parallel and their findings merge,
//! keyed by `(id, package)`, yielding an agreement rate and a discrepancy
//! count alongside the union of findings.

pub mod grype;
pub mod merge;
pub mod remediation;
pub mod trivy;

pub use merge::merge_findings;
pub use remediation::generate_remediation;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vulnerability severity, ordered most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    /// Parse scanner output tolerantly; anything unrecognised is `Unknown`.
    pub fn from_str_loose(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" | "moderate" => Severity::Medium,
            "low" | "negligible" => Severity::Low,
            _ => Severity::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vulnerability {
    pub id: String,
    pub severity: Severity,
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Scanners that reported this finding
    pub sources: Vec<String>,
}

/// Severity histogram over a report.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unknown: usize,
    pub total: usize,
}

impl SummaryCounts {
    pub fn from_vulnerabilities(vulnerabilities: &[Vulnerability]) -> Self {
        let mut counts = SummaryCounts::default();
        for vuln in vulnerabilities {
            match vuln.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
                Severity::Unknown => counts.unknown += 1,
            }
            counts.total += 1;
        }
        counts
    }
}

/// A prioritised remediation step. Priority 1 is most urgent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemediationStep {
    pub priority: u32,
    pub action: String,
    pub details: String,
}

/// Canonical scan artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanReport {
    pub image: String,
    pub scanners: Vec<String>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub summary: SummaryCounts,
    pub remediation: Vec<RemediationStep>,
    /// False when critical or high findings are present
    pub success: bool,
    /// Fraction of merged findings both scanners agreed on (dual-scan only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreement_rate: Option<f64>,
    /// Findings reported by only one of two scanners (dual-scan only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discrepancies: Option<usize>,
    /// Base image is past its end of support, when a scanner reports it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub base_image_eosl: bool,
}

impl ScanReport {
    /// Assemble a report from canonical findings, deriving summary,
    /// remediation, and the success gate.
    pub fn assemble(
        image: String,
        scanners: Vec<String>,
        vulnerabilities: Vec<Vulnerability>,
        agreement_rate: Option<f64>,
        discrepancies: Option<usize>,
        base_image_eosl: bool,
    ) -> Self {
        let summary = SummaryCounts::from_vulnerabilities(&vulnerabilities);
        let remediation = generate_remediation(&vulnerabilities, &summary, base_image_eosl);
        let success = summary.critical == 0 && summary.high == 0;
        Self {
            image,
            scanners,
            vulnerabilities,
            summary,
            remediation,
            success,
            agreement_rate,
            discrepancies,
            base_image_eosl,
        }
    }
}
