//! Gitleaks adapter: rule-based secret detection.
//!
//! Gitleaks reports leaks as a bare JSON array and uses exit code 1 to
//! signal leaks present.

use super::{output, run_tool, ScanContext, ScannerAdapter, ScannerError, ToolRunner};
use crate::models::{Finding, ScanResult, Severity};
use crate::plugins::{
    Accuracy, Capability, CapabilityKind, Coverage, FalsePositiveRate, PerformanceProfile,
    PluginCategory, PluginMetadata, ResourceRequirements, Speed,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;

const SUPPORTED_KINDS: &[&str] = &["filesystem", "npm", "pypi", "maven", "generic"];

const FINDINGS_EXIT_CODES: &[i32] = &[0, 1];

pub struct GitleaksAdapter {
    tool: ToolRunner,
}

impl GitleaksAdapter {
    pub fn new() -> Self {
        Self {
            tool: ToolRunner::new("gitleaks", "version"),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            tool: ToolRunner::new(binary, "version"),
        }
    }
}

impl Default for GitleaksAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct GitleaksLeak {
    #[serde(rename = "RuleID", default)]
    rule_id: String,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "File", default)]
    file: String,
    #[serde(rename = "StartLine", default)]
    start_line: u64,
}

fn parse_report(raw: &str) -> Result<Vec<Finding>, String> {
    let clean = output::strip_ansi(raw);
    let trimmed = clean.trim();
    if trimmed.is_empty() {
        return Ok(vec![]);
    }

    let array = output::first_json_array(&clean).ok_or_else(|| "no JSON array in output".to_string())?;
    let leaks: Vec<GitleaksLeak> =
        serde_json::from_str(array).map_err(|e| format!("malformed leak array: {e}"))?;

    Ok(leaks
        .iter()
        .enumerate()
        .map(|(n, leak)| Finding {
            id: format!("SECRET-{}-{}", leak.rule_id, n + 1),
            cve: None,
            severity: Severity::High,
            title: leak.description.clone(),
            description: format!("{} at {}:{}", leak.description, leak.file, leak.start_line),
            package: leak.file.clone(),
            version: String::new(),
            fixed_version: None,
            cvss: None,
            references: vec![],
        })
        .collect())
}

#[async_trait]
impl ScannerAdapter for GitleaksAdapter {
    fn name(&self) -> &str {
        "gitleaks"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: "gitleaks".to_string(),
            name: "Gitleaks".to_string(),
            version: "adapter/0.1".to_string(),
            categories: vec![PluginCategory::Security],
            tags: vec!["secrets".to_string()],
            priority: 65,
            resources: ResourceRequirements::low(),
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability {
            kind: CapabilityKind::SecretDetection,
            confidence: 0.85,
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
        let args = vec![
            "detect",
            "--source",
            artifact_path,
            "--no-git",
            "--report-format",
            "json",
            "--report-path",
            "/dev/stdout",
            "--no-banner",
        ];

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

    #[test]
    fn parses_leak_array() {
        let raw = r#"[
            {"RuleID": "aws-access-token", "Description": "AWS access token", "File": ".env", "StartLine": 2},
            {"RuleID": "generic-api-key", "Description": "Generic API key", "File": "deploy.sh", "StartLine": 14}
        ]"#;
        let findings = parse_report(raw).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].id, "SECRET-aws-access-token-1");
        assert_eq!(findings[0].severity, Severity::High);
        assert!(findings[1].description.contains("deploy.sh:14"));
    }

    #[test]
    fn empty_output_means_clean() {
        assert!(parse_report("").unwrap().is_empty());
        assert!(parse_report("[]").unwrap().is_empty());
    }

    #[test]
    fn non_json_output_is_parse_error() {
        assert!(parse_report("leaks found: 3").is_err());
    }
}
