//! OSV-Scanner adapter: open-source vulnerability lookup for package
//! ecosystems via the OSV database.

use super::{output, run_tool, ScanContext, ScannerAdapter, ScannerError, ToolRunner};
use crate::models::{Finding, ScanResult, Severity};
use crate::plugins::{
    Accuracy, Capability, CapabilityKind, Coverage, FalsePositiveRate, PerformanceProfile,
    PluginCategory, PluginMetadata, ResourceLevel, ResourceRequirements, Speed,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;

const SUPPORTED_KINDS: &[&str] = &["npm", "maven", "pypi", "filesystem"];

/// osv-scanner exits 1 when vulnerabilities were found.
const FINDINGS_EXIT_CODES: &[i32] = &[0, 1];

pub struct OsvScannerAdapter {
    tool: ToolRunner,
}

impl OsvScannerAdapter {
    pub fn new() -> Self {
        Self {
            tool: ToolRunner::new("osv-scanner", "--version"),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            tool: ToolRunner::new(binary, "--version"),
        }
    }
}

impl Default for OsvScannerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct OsvReport {
    #[serde(default)]
    results: Vec<OsvSource>,
}

#[derive(Debug, Deserialize)]
struct OsvSource {
    #[serde(default)]
    packages: Vec<OsvPackage>,
}

#[derive(Debug, Deserialize)]
struct OsvPackage {
    package: OsvPackageInfo,
    #[serde(default)]
    vulnerabilities: Vec<OsvVulnerability>,
}

#[derive(Debug, Deserialize)]
struct OsvPackageInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct OsvVulnerability {
    id: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    references: Vec<OsvReference>,
    #[serde(default)]
    database_specific: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OsvReference {
    #[serde(default)]
    url: String,
}

fn parse_report(raw: &str) -> Result<Vec<Finding>, String> {
    let report: OsvReport = output::parse_first_json(raw)?;
    let mut findings = Vec::new();

    for source in &report.results {
        for package in &source.packages {
            for vuln in &package.vulnerabilities {
                let cve = if vuln.id.starts_with("CVE-") {
                    Some(vuln.id.clone())
                } else {
                    vuln.aliases
                        .iter()
                        .find(|a| a.starts_with("CVE-"))
                        .cloned()
                };

                // OSV records often omit a level; database_specific carries
                // one for some ecosystems.
                let severity = vuln
                    .database_specific
                    .get("severity")
                    .and_then(|s| s.as_str())
                    .map(Severity::normalize)
                    .unwrap_or_else(Severity::from_missing);

                let title = if vuln.summary.is_empty() {
                    vuln.id.clone()
                } else {
                    vuln.summary.clone()
                };

                findings.push(Finding {
                    id: vuln.id.clone(),
                    cve,
                    severity,
                    title,
                    description: vuln.details.clone(),
                    package: package.package.name.clone(),
                    version: package.package.version.clone(),
                    fixed_version: None,
                    cvss: None,
                    references: vuln.references.iter().map(|r| r.url.clone()).collect(),
                });
            }
        }
    }

    Ok(findings)
}

#[async_trait]
impl ScannerAdapter for OsvScannerAdapter {
    fn name(&self) -> &str {
        "osv-scanner"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: "osv-scanner".to_string(),
            name: "OSV-Scanner".to_string(),
            version: "adapter/0.1".to_string(),
            categories: vec![PluginCategory::Vulnerability],
            tags: vec!["packages".to_string(), "osv".to_string()],
            priority: 70,
            resources: ResourceRequirements {
                cpu: ResourceLevel::Low,
                memory: ResourceLevel::Low,
                disk: ResourceLevel::Low,
                network: ResourceLevel::High,
            },
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability {
            kind: CapabilityKind::DependencyAudit,
            confidence: 0.85,
            profile: PerformanceProfile {
                speed: Speed::Fast,
                accuracy: Accuracy::High,
                coverage: Coverage::Moderate,
                false_positive_rate: FalsePositiveRate::Low,
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
        let args = vec!["--format", "json", "--recursive", artifact_path];

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
