//! Remediation step generation
//!
//! Turns a scan's findings into a prioritised action list: severity gates
//! first, then concrete fixable upgrades, then base-image staleness, then
//! general hygiene. Steps emit in priority order.

use super::{RemediationStep, SummaryCounts, Vulnerability};
use std::collections::BTreeMap;

/// Cap on the number of package upgrades enumerated in one step.
const MAX_UPGRADES_LISTED: usize = 10;

/// Build the remediation list for a report.
pub fn generate_remediation(
    vulnerabilities: &[Vulnerability],
    summary: &SummaryCounts,
    base_image_eosl: bool,
) -> Vec<RemediationStep> {
    let mut steps = Vec::new();

    if summary.critical > 0 {
        steps.push(RemediationStep {
            priority: 1,
            action: "Fix critical vulnerabilities".to_string(),
            details: format!(
                "{} critical finding(s) must be resolved before this image ships",
                summary.critical
            ),
        });
    }

    if base_image_eosl {
        steps.push(RemediationStep {
            priority: 2,
            action: "Update base image".to_string(),
            details: "the base image OS is past end of support and no longer receives security patches"
                .to_string(),
        });
    }

    if summary.high > 0 {
        steps.push(RemediationStep {
            priority: 2,
            action: "Fix high severity vulnerabilities".to_string(),
            details: format!("{} high severity finding(s) present", summary.high),
        });
    }

    let upgrades = fixable_upgrades(vulnerabilities);
    if !upgrades.is_empty() {
        let mut listed: Vec<String> = upgrades
            .iter()
            .take(MAX_UPGRADES_LISTED)
            .map(|(package, version)| format!("{} -> {}", package, version))
            .collect();
        if upgrades.len() > MAX_UPGRADES_LISTED {
            listed.push(format!("and {} more", upgrades.len() - MAX_UPGRADES_LISTED));
        }
        steps.push(RemediationStep {
            priority: 3,
            action: "Upgrade packages with available fixes".to_string(),
            details: listed.join(", "),
        });
    }

    if summary.total > 0 {
        steps.push(RemediationStep {
            priority: 4,
            action: "Rebuild from an updated base image".to_string(),
            details: "refreshing the base layer picks up distribution patches for OS packages"
                .to_string(),
        });
    }

    steps.push(RemediationStep {
        priority: 5,
        action: "Keep images minimal".to_string(),
        details: "fewer installed packages mean fewer vulnerable packages; prefer slim or distroless bases"
            .to_string(),
    });

    steps.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.action.cmp(&b.action)));
    steps
}

/// Unique `package -> fixed version` pairs, in package order.
fn fixable_upgrades(vulnerabilities: &[Vulnerability]) -> BTreeMap<String, String> {
    let mut upgrades = BTreeMap::new();
    for vuln in vulnerabilities {
        if let Some(fixed) = &vuln.fixed_version {
            // a later entry for the same package keeps the first suggestion
            upgrades
                .entry(vuln.package.clone())
                .or_insert_with(|| fixed.clone());
        }
    }
    upgrades
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Severity;

    fn vuln(id: &str, severity: Severity, package: &str, fixed: Option<&str>) -> Vulnerability {
        Vulnerability {
            id: id.to_string(),
            severity,
            package: package.to_string(),
            installed_version: None,
            fixed_version: fixed.map(String::from),
            title: None,
            sources: vec!["trivy".to_string()],
        }
    }

    #[test]
    fn critical_step_has_priority_one() {
        let vulns = vec![vuln("CVE-1", Severity::Critical, "openssl", Some("1.1.1w"))];
        let summary = SummaryCounts::from_vulnerabilities(&vulns);
        let steps = generate_remediation(&vulns, &summary, false);
        assert_eq!(steps[0].priority, 1);
        assert_eq!(steps[0].action, "Fix critical vulnerabilities");
    }

    #[test]
    fn fixable_upgrades_are_listed() {
        let vulns = vec![
            vuln("CVE-1", Severity::High, "openssl", Some("1.1.1w")),
            vuln("CVE-2", Severity::High, "openssl", Some("3.0.1")),
            vuln("CVE-3", Severity::Medium, "zlib", Some("1.2.13")),
        ];
        let summary = SummaryCounts::from_vulnerabilities(&vulns);
        let steps = generate_remediation(&vulns, &summary, false);
        let upgrade = steps.iter().find(|s| s.priority == 3).unwrap();
        assert!(upgrade.details.contains("openssl -> 1.1.1w"));
        assert!(upgrade.details.contains("zlib -> 1.2.13"));
    }

    #[test]
    fn eosl_base_image_hint() {
        let steps = generate_remediation(&[], &SummaryCounts::default(), true);
        assert!(steps.iter().any(|s| s.action == "Update base image"));
    }

    #[test]
    fn hygiene_always_present() {
        let steps = generate_remediation(&[], &SummaryCounts::default(), false);
        assert!(steps.iter().any(|s| s.action == "Keep images minimal"));
        assert!(!steps.iter().any(|s| s.priority < 5));
    }
}
