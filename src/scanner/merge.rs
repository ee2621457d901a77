//! Dual-scanner result merging
//!
//! Findings key by `(id, package)`. A key reported by both scanners counts
//! towards agreement and keeps the more severe rating; a key one scanner
//! missed is a discrepancy. Output ordering is severity, then id, then
//! package, so merged reports are deterministic.

use super::{Severity, Vulnerability};
use std::collections::BTreeMap;

/// Outcome of merging two scanners' findings.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub vulnerabilities: Vec<Vulnerability>,
    /// agreed keys / total keys, 1.0 for two empty result sets
    pub agreement_rate: f64,
    /// keys reported by exactly one scanner
    pub discrepancies: usize,
}

/// Merge findings from two scanners.
pub fn merge_findings(first: Vec<Vulnerability>, second: Vec<Vulnerability>) -> MergeOutcome {
    let mut merged: BTreeMap<(String, String), Vulnerability> = BTreeMap::new();

    for vuln in first.into_iter().chain(second) {
        let key = (vuln.id.clone(), vuln.package.clone());
        match merged.get_mut(&key) {
            None => {
                merged.insert(key, vuln);
            }
            Some(existing) => {
                for source in &vuln.sources {
                    if !existing.sources.contains(source) {
                        existing.sources.push(source.clone());
                    }
                }
                // scanners disagree on ratings sometimes; keep the worst
                if vuln.severity < existing.severity {
                    existing.severity = vuln.severity;
                }
                if existing.fixed_version.is_none() {
                    existing.fixed_version = vuln.fixed_version;
                }
                if existing.title.is_none() {
                    existing.title = vuln.title;
                }
            }
        }
    }

    let total = merged.len();
    let agreed = merged.values().filter(|v| v.sources.len() >= 2).count();
    let discrepancies = total - agreed;
    let agreement_rate = if total == 0 {
        1.0
    } else {
        agreed as f64 / total as f64
    };

    let mut vulnerabilities: Vec<Vulnerability> = merged.into_values().collect();
    vulnerabilities.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.package.cmp(&b.package))
    });

    MergeOutcome {
        vulnerabilities,
        agreement_rate,
        discrepancies,
    }
}
