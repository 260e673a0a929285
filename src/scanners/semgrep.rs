//! Semgrep adapter: multi-language static analysis.

use super::{output, run_tool, ScanContext, ScannerAdapter, ScannerError, ToolRunner};
use crate::models::{Finding, ScanResult, Severity};
use crate::plugins::{
    Accuracy, Capability, CapabilityKind, Coverage, FalsePositiveRate, PerformanceProfile,
    PluginCategory, PluginMetadata, ResourceLevel, ResourceRequirements, Speed,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;

const SUPPORTED_KINDS: &[&str] = &["filesystem", "npm", "pypi", "maven", "generic"];

/// Semgrep exits 1 when findings exist and --error is set.
const FINDINGS_EXIT_CODES: &[i32] = &[0, 1];

pub struct SemgrepAdapter {
    tool: ToolRunner,
}

impl SemgrepAdapter {
    pub fn new() -> Self {
        Self {
            tool: ToolRunner::new("semgrep", "--version"),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            tool: ToolRunner::new(binary, "--version"),
        }
    }

    /// Semgrep's ERROR/WARNING/INFO levels mapped onto the canonical set.
    fn map_severity(level: &str) -> Severity {
        match level.to_uppercase().as_str() {
            "ERROR" => Severity::High,
            "WARNING" => Severity::Medium,
            "INFO" => Severity::Low,
            other => Severity::normalize(other),
        }
    }
}

impl Default for SemgrepAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SemgrepReport {
    #[serde(default)]
    results: Vec<SemgrepResult>,
}

#[derive(Debug, Deserialize)]
struct SemgrepResult {
    #[serde(default)]
    check_id: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    start: SemgrepPosition,
    #[serde(default)]
    extra: SemgrepExtra,
}

#[derive(Debug, Deserialize, Default)]
struct SemgrepPosition {
    #[serde(default)]
    line: u64,
}

#[derive(Debug, Deserialize, Default)]
struct SemgrepExtra {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    metadata: SemgrepMetadata,
}

#[derive(Debug, Deserialize, Default)]
struct SemgrepMetadata {
    #[serde(default)]
    references: Vec<String>,
}

fn parse_report(raw: &str) -> Result<Vec<Finding>, String> {
    let report: SemgrepReport = output::parse_first_json(raw)?;
    Ok(report
        .results
        .iter()
        .enumerate()
        .map(|(n, result)| {
            let rule = result
                .check_id
                .rsplit('.')
                .next()
                .unwrap_or(&result.check_id);
            Finding {
                id: format!("SEMGREP-{}-{}", rule, n + 1),
                cve: None,
                severity: SemgrepAdapter::map_severity(&result.extra.severity),
                title: result.check_id.clone(),
                description: format!(
                    "{} ({}:{})",
                    result.extra.message, result.path, result.start.line
                ),
                package: result.path.clone(),
                version: String::new(),
                fixed_version: None,
                cvss: None,
                references: result.extra.metadata.references.clone(),
            }
        })
        .collect())
}

#[async_trait]
impl ScannerAdapter for SemgrepAdapter {
    fn name(&self) -> &str {
        "semgrep"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: "semgrep".to_string(),
            name: "Semgrep".to_string(),
            version: "adapter/0.1".to_string(),
            categories: vec![PluginCategory::Security, PluginCategory::Quality],
            tags: vec!["sast".to_string(), "multi-language".to_string()],
            priority: 75,
            resources: ResourceRequirements {
                cpu: ResourceLevel::High,
                memory: ResourceLevel::Medium,
                disk: ResourceLevel::Low,
                network: ResourceLevel::Low,
            },
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability {
            kind: CapabilityKind::StaticAnalysis,
            confidence: 0.85,
            profile: PerformanceProfile {
                speed: Speed::Slow,
                accuracy: Accuracy::High,
                coverage: Coverage::Comprehensive,
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
        let args = vec!["scan", "--json", "--quiet", "--config", "auto", artifact_path];

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
      "check_id": "python.lang.security.dangerous-eval",
      "path": "svc/handler.py",
      "start": {"line": 10},
      "extra": {
        "severity": "ERROR",
        "message": "eval() on user input",
        "metadata": {"references": ["https://owasp.org/eval"]}
      }
    },
    {
      "check_id": "generic.secrets.weak-hash",
      "path": "lib/crypto.js",
      "start": {"line": 3},
      "extra": {"severity": "WARNING", "message": "MD5 in use", "metadata": {}}
    }
  ]
}
"#;

    #[test]
    fn maps_semgrep_levels() {
        assert_eq!(SemgrepAdapter::map_severity("ERROR"), Severity::High);
        assert_eq!(SemgrepAdapter::map_severity("WARNING"), Severity::Medium);
        assert_eq!(SemgrepAdapter::map_severity("INFO"), Severity::Low);
        assert_eq!(SemgrepAdapter::map_severity("bogus"), Severity::Unknown);
    }

    #[test]
    fn parses_results() {
        let findings = parse_report(REPORT).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].id, "SEMGREP-dangerous-eval-1");
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].references.len(), 1);
        assert_eq!(findings[1].severity, Severity::Medium);
        assert!(findings[1].description.contains("lib/crypto.js:3"));
    }
}
