//! Grype scanner integration
//!
//! Runs `grype <image> -o json` and maps its match list into canonical
//! findings. Mirrors only the consumed fields.

use super::{Severity, Vulnerability};
use crate::common::{CommandRunner, CommandSpec};
use crate::error::{AssistError, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const SCANNER_NAME: &str = "grype";

/// Whether grype is runnable on this host.
pub fn is_available() -> bool {
    CommandRunner::is_available(SCANNER_NAME)
}

/// Scan `image` with grype.
pub async fn scan(
    runner: &CommandRunner,
    image: &str,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<Vulnerability>> {
    let spec = CommandSpec::new(SCANNER_NAME)
        .args([image, "-o", "json", "--quiet"])
        .deadline(deadline);
    let output = runner.run(spec, cancel).await?;
    if !output.success() {
        return Err(AssistError::external_tool(format!(
            "grype exited with status {}: {}",
            output.exit_code,
            output.stderr.trim()
        ))
        .with_tool(SCANNER_NAME)
        .with_exit_code(output.exit_code));
    }
    parse_report(&output.stdout)
}

/// Parse a grype JSON report into canonical findings.
pub fn parse_report(json: &str) -> Result<Vec<Vulnerability>> {
    let report: GrypeReport = serde_json::from_str(json).map_err(|e| {
        AssistError::external_tool(format!("cannot parse grype output: {}", e))
            .with_tool(SCANNER_NAME)
    })?;

    Ok(report
        .matches
        .unwrap_or_default()
        .into_iter()
        .map(|m| Vulnerability {
            id: m.vulnerability.id,
            severity: Severity::from_str_loose(&m.vulnerability.severity),
            package: m.artifact.name,
            installed_version: Some(m.artifact.version),
            fixed_version: m
                .vulnerability
                .fix
                .and_then(|f| f.versions.into_iter().next()),
            title: m.vulnerability.description,
            sources: vec![SCANNER_NAME.to_string()],
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct GrypeReport {
    matches: Option<Vec<GrypeMatch>>,
}

#[derive(Debug, Deserialize)]
struct GrypeMatch {
    vulnerability: GrypeVulnerability,
    artifact: GrypeArtifact,
}

#[derive(Debug, Deserialize)]
struct GrypeVulnerability {
    id: String,
    severity: String,
    description: Option<String>,
    fix: Option<GrypeFix>,
}

#[derive(Debug, Deserialize, Default)]
struct GrypeFix {
    #[serde(default)]
    versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GrypeArtifact {
    name: String,
    version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "matches": [
            {
                "vulnerability": {
                    "id": "CVE-2024-0001",
                    "severity": "Critical",
                    "description": "openssl overflow",
                    "fix": {"versions": ["1.1.1w"], "state": "fixed"}
                },
                "artifact": {"name": "openssl", "version": "1.1.1"}
            },
            {
                "vulnerability": {
                    "id": "GHSA-xxxx",
                    "severity": "Negligible",
                    "fix": {"versions": [], "state": "not-fixed"}
                },
                "artifact": {"name": "bash", "version": "5.0"}
            }
        ]
    }"#;

    #[test]
    fn parses_matches() {
        let vulns = parse_report(SAMPLE).unwrap();
        assert_eq!(vulns.len(), 2);
        assert_eq!(vulns[0].id, "CVE-2024-0001");
        assert_eq!(vulns[0].severity, Severity::Critical);
        assert_eq!(vulns[0].fixed_version.as_deref(), Some("1.1.1w"));
        assert_eq!(vulns[1].severity, Severity::Low);
        assert!(vulns[1].fixed_version.is_none());
    }

    #[test]
    fn empty_report_parses() {
        assert!(parse_report("{}").unwrap().is_empty());
    }
}
