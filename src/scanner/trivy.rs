//! Trivy scanner integration
//!
//! Runs `trivy image --format json` and maps the report into canonical
//! findings. The JSON mirror structs cover only the fields we consume.

use super::{Severity, Vulnerability};
use crate::common::{CommandRunner, CommandSpec};
use crate::error::{AssistError, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const SCANNER_NAME: &str = "trivy";

/// Whether trivy is runnable on this host.
pub fn is_available() -> bool {
    CommandRunner::is_available(SCANNER_NAME)
}

/// Parsed trivy result: findings plus the end-of-support flag for the base OS.
#[derive(Debug, Clone)]
pub struct TrivyScan {
    pub vulnerabilities: Vec<Vulnerability>,
    pub base_image_eosl: bool,
}

/// Scan `image` with trivy.
pub async fn scan(
    runner: &CommandRunner,
    image: &str,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<TrivyScan> {
    let spec = CommandSpec::new(SCANNER_NAME)
        .args([
            "image",
            "--format",
            "json",
            "--quiet",
            "--scanners",
            "vuln",
            image,
        ])
        .deadline(deadline);
    let output = runner.run(spec, cancel).await?;
    if !output.success() {
        return Err(AssistError::external_tool(format!(
            "trivy exited with status {}: {}",
            output.exit_code,
            output.stderr.trim()
        ))
        .with_tool(SCANNER_NAME)
        .with_exit_code(output.exit_code));
    }
    parse_report(&output.stdout)
}

/// Parse a trivy JSON report into canonical findings.
pub fn parse_report(json: &str) -> Result<TrivyScan> {
    let report: TrivyReport = serde_json::from_str(json).map_err(|e| {
        AssistError::external_tool(format!(
            "cannot parse trivy output at line {} column {}: {}",
            e.line(),
            e.column(),
            e
        ))
        .with_tool(SCANNER_NAME)
    })?;

    let mut vulnerabilities = Vec::new();
    for result in report.results.unwrap_or_default() {
        for vuln in result.vulnerabilities.unwrap_or_default() {
            vulnerabilities.push(Vulnerability {
                id: vuln.vulnerability_id,
                severity: Severity::from_str_loose(&vuln.severity),
                package: vuln.pkg_name,
                installed_version: Some(vuln.installed_version),
                fixed_version: vuln.fixed_version.filter(|v| !v.is_empty()),
                title: vuln.title,
                sources: vec![SCANNER_NAME.to_string()],
            });
        }
    }
    let base_image_eosl = report
        .metadata
        .and_then(|m| m.os)
        .map(|os| os.eosl.unwrap_or(false))
        .unwrap_or(false);
    Ok(TrivyScan {
        vulnerabilities,
        base_image_eosl,
    })
}

// Trivy JSON output structures (minimal, add fields as needed)

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyReport {
    results: Option<Vec<TrivyResult>>,
    metadata: Option<TrivyMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyResult {
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    vulnerability_id: String,
    pkg_name: String,
    installed_version: String,
    fixed_version: Option<String>,
    severity: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyMetadata {
    #[serde(rename = "OS")]
    os: Option<TrivyOs>,
}

#[derive(Debug, Deserialize)]
struct TrivyOs {
    #[serde(rename = "EOSL")]
    eosl: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "Metadata": {"OS": {"Family": "debian", "Name": "10.3", "EOSL": true}},
        "Results": [{
            "Target": "demo:1 (debian 10.3)",
            "Vulnerabilities": [
                {
                    "VulnerabilityID": "CVE-2024-0001",
                    "PkgName": "openssl",
                    "InstalledVersion": "1.1.1",
                    "FixedVersion": "1.1.1w",
                    "Severity": "CRITICAL",
                    "Title": "openssl overflow"
                },
                {
                    "VulnerabilityID": "CVE-2024-0002",
                    "PkgName": "zlib",
                    "InstalledVersion": "1.2.11",
                    "FixedVersion": "",
                    "Severity": "LOW"
                }
            ]
        }]
    }"#;

    #[test]
    fn parses_findings_and_eosl() {
        let scan = parse_report(SAMPLE).unwrap();
        assert_eq!(scan.vulnerabilities.len(), 2);
        assert!(scan.base_image_eosl);

        let critical = &scan.vulnerabilities[0];
        assert_eq!(critical.id, "CVE-2024-0001");
        assert_eq!(critical.severity, Severity::Critical);
        assert_eq!(critical.package, "openssl");
        assert_eq!(critical.fixed_version.as_deref(), Some("1.1.1w"));

        // empty FixedVersion normalises to None
        assert!(scan.vulnerabilities[1].fixed_version.is_none());
    }

    #[test]
    fn empty_report_parses() {
        let scan = parse_report("{}").unwrap();
        assert!(scan.vulnerabilities.is_empty());
        assert!(!scan.base_image_eosl);
    }

    #[test]
    fn malformed_json_is_external_tool_error() {
        let err = parse_report("not json").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ExternalTool);
        assert_eq!(err.tool.as_deref(), Some("trivy"));
    }
}
