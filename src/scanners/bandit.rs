//! Bandit adapter: Python static security analysis.

use super::{output, run_tool, ScanContext, ScannerAdapter, ScannerError, ToolRunner};
use crate::models::{Finding, ScanResult, Severity};
use crate::plugins::{
    Accuracy, Capability, CapabilityKind, Coverage, FalsePositiveRate, PerformanceProfile,
    PluginCategory, PluginMetadata, ResourceRequirements, Speed,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;

const SUPPORTED_KINDS: &[&str] = &["pypi", "filesystem"];

/// Bandit exits 1 when issues were found; that is a successful scan.
const FINDINGS_EXIT_CODES: &[i32] = &[0, 1];

pub struct BanditAdapter {
    tool: ToolRunner,
}

impl BanditAdapter {
    pub fn new() -> Self {
        Self {
            tool: ToolRunner::new("bandit", "--version"),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            tool: ToolRunner::new(binary, "--version"),
        }
    }
}

impl Default for BanditAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct BanditReport {
    #[serde(default)]
    results: Vec<BanditIssue>,
}

#[derive(Debug, Deserialize)]
struct BanditIssue {
    #[serde(default)]
    test_id: String,
    #[serde(default)]
    test_name: String,
    #[serde(default)]
    issue_severity: String,
    #[serde(default)]
    issue_confidence: String,
    #[serde(default)]
    issue_text: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    line_number: u64,
    #[serde(default)]
    more_info: String,
}

fn parse_report(raw: &str) -> Result<Vec<Finding>, String> {
    let report: BanditReport = output::parse_first_json(raw)?;
    let findings = report
        .results
        .iter()
        .enumerate()
        .map(|(n, issue)| {
            let severity = if issue.issue_severity.is_empty() {
                Severity::from_missing()
            } else {
                Severity::normalize(&issue.issue_severity)
            };
            let references = if issue.more_info.is_empty() {
                vec![]
            } else {
                vec![issue.more_info.clone()]
            };
            Finding {
                id: format!("BANDIT-{}-{}", issue.test_id, n + 1),
                cve: None,
                severity,
                title: issue.test_name.clone(),
                description: format!(
                    "{} ({}:{}, confidence {})",
                    issue.issue_text, issue.filename, issue.line_number, issue.issue_confidence
                ),
                package: issue.filename.clone(),
                version: String::new(),
                fixed_version: None,
                cvss: None,
                references,
            }
        })
        .collect();
    Ok(findings)
}

#[async_trait]
impl ScannerAdapter for BanditAdapter {
    fn name(&self) -> &str {
        "bandit"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: "bandit".to_string(),
            name: "Bandit".to_string(),
            version: "adapter/0.1".to_string(),
            categories: vec![PluginCategory::Security, PluginCategory::Quality],
            tags: vec!["python".to_string(), "sast".to_string()],
            priority: 60,
            resources: ResourceRequirements::low(),
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability {
            kind: CapabilityKind::StaticAnalysis,
            confidence: 0.8,
            profile: PerformanceProfile {
                speed: Speed::Fast,
                accuracy: Accuracy::Medium,
                coverage: Coverage::Moderate,
                false_positive_rate: FalsePositiveRate::Medium,
            },
        }]
    }

    fn supported_kinds(&self) -> &[&str] {
        SUPPORTED_KINDS
    }

    async fn version(&self) -> String {
        self.tool.version().await
    }

    async fn available(&self) -> bool {
        self.tool.available().await
    }

    async fn scan(
        &self,
        ctx: &ScanContext,
        artifact_path: &str,
        kind: &str,
    ) -> Result<ScanResult, ScannerError> {
        let started = Instant::now();
        let args = vec!["-r", artifact_path, "-f", "json", "-q"];

        let out = run_tool(ctx, self.name(), self.tool.binary(), &args, None).await?;

        if !FINDINGS_EXIT_CODES.contains(&out.exit_code) {
            return Err(ScannerError::Process {
                scanner: self.name().to_string(),
                exit_code: out.exit_code,
                stderr_head: out.stderr_head(),
            });
        }

        let findings = parse_report(&out.stdout).map_err(|message| ScannerError::Output {
            scanner: self.name().to_string(),
            message,
        })?;

        let mut result =
            ScanResult::new(self.name(), self.version().await, kind).with_findings(findings);
        result.duration_seconds = started.elapsed().as_secs_f64();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"
{
  "results": [
    {
      "test_id": "B602",
      "test_name": "subprocess_popen_with_shell_equals_true",
      "issue_severity": "HIGH",
      "issue_confidence": "HIGH",
      "issue_text": "subprocess call with shell=True identified",
      "filename": "app/runner.py",
      "line_number": 42,
      "more_info": "https://bandit.readthedocs.io/en/latest/plugins/b602.html"
    },
    {
      "test_id": "B105",
      "test_name": "hardcoded_password_string",
      "issue_severity": "LOW",
      "issue_confidence": "MEDIUM",
      "issue_text": "Possible hardcoded password",
      "filename": "app/config.py",
      "line_number": 7,
      "more_info": ""
    }
  ]
}
"#;

    #[test]
    fn synthesizes_ids_and_maps_severity() {
        let findings = parse_report(REPORT).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].id, "BANDIT-B602-1");
        assert_eq!(findings[0].severity, Severity::High);
        assert!(findings[0].description.contains("app/runner.py:42"));
        assert_eq!(findings[1].id, "BANDIT-B105-2");
        assert_eq!(findings[1].severity, Severity::Low);
        assert!(findings[1].references.is_empty());
    }

    #[test]
    fn clean_scan_has_no_findings() {
        let findings = parse_report("{\"results\": []}").unwrap();
        assert!(findings.is_empty());
    }
}
