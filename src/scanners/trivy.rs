//! Trivy adapter: container image and filesystem vulnerability scanning,
//! with license detection on filesystem targets.

use super::{output, run_tool, ScanContext, ScannerAdapter, ScannerError, ToolRunner};
use crate::models::{Finding, ScanResult, Severity};
use crate::plugins::{
    Accuracy, Capability, CapabilityKind, Coverage, FalsePositiveRate, PerformanceProfile,
    PluginCategory, PluginMetadata, ResourceLevel, ResourceRequirements, Speed,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;
use tracing::debug;

const SUPPORTED_KINDS: &[&str] = &["docker", "filesystem", "helm", "generic"];

pub struct TrivyAdapter {
    tool: ToolRunner,
}

impl TrivyAdapter {
    pub fn new() -> Self {
        Self {
            tool: ToolRunner::new("trivy", "--version"),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            tool: ToolRunner::new(binary, "--version"),
        }
    }

    fn subcommand(kind: &str) -> &'static str {
        match kind {
            "docker" => "image",
            _ => "fs",
        }
    }
}

impl Default for TrivyAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct TrivyReport {
    #[serde(rename = "Results", default)]
    results: Vec<TrivyTarget>,
}

#[derive(Debug, Deserialize)]
struct TrivyTarget {
    #[serde(rename = "Target", default)]
    target: String,
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Vec<TrivyVulnerability>,
}

#[derive(Debug, Deserialize)]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    id: String,
    #[serde(rename = "PkgName", default)]
    package: String,
    #[serde(rename = "InstalledVersion", default)]
    version: String,
    #[serde(rename = "FixedVersion")]
    fixed_version: Option<String>,
    #[serde(rename = "Severity")]
    severity: Option<String>,
    #[serde(rename = "Title", default)]
    title: String,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "References", default)]
    references: Vec<String>,
    #[serde(rename = "CVSS", default)]
    cvss: serde_json::Value,
}

impl TrivyVulnerability {
    /// Highest V3 base score across CVSS sources (nvd, redhat, ...).
    fn max_cvss(&self) -> Option<f64> {
        let sources = self.cvss.as_object()?;
        sources
            .values()
            .filter_map(|entry| entry.get("V3Score").and_then(|s| s.as_f64()))
            .fold(None, |best, score| match best {
                Some(current) if current >= score => Some(current),
                _ => Some(score),
            })
    }
}

fn parse_report(raw: &str) -> Result<(Vec<Finding>, usize), String> {
    let report: TrivyReport = output::parse_first_json(raw)?;
    let mut findings = Vec::new();

    for target in &report.results {
        debug!(
            "trivy target {} reported {} vulnerabilities",
            target.target,
            target.vulnerabilities.len()
        );
        for vuln in &target.vulnerabilities {
            let severity = match &vuln.severity {
                Some(label) => Severity::normalize(label),
                None => Severity::from_missing(),
            };
            let cve = vuln.id.starts_with("CVE-").then(|| vuln.id.clone());
            let title = if vuln.title.is_empty() {
                vuln.id.clone()
            } else {
                vuln.title.clone()
            };
            findings.push(Finding {
                id: vuln.id.clone(),
                cve,
                severity,
                title,
                description: vuln.description.clone(),
                package: vuln.package.clone(),
                version: vuln.version.clone(),
                fixed_version: vuln.fixed_version.clone(),
                cvss: vuln.max_cvss(),
                references: vuln.references.clone(),
            });
        }
    }

    Ok((findings, report.results.len()))
}

#[async_trait]
impl ScannerAdapter for TrivyAdapter {
    fn name(&self) -> &str {
        "trivy"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: "trivy".to_string(),
            name: "Trivy".to_string(),
            version: "adapter/0.1".to_string(),
            categories: vec![PluginCategory::Vulnerability, PluginCategory::License],
            tags: vec!["container".to_string(), "filesystem".to_string()],
            priority: 90,
            resources: ResourceRequirements {
                cpu: ResourceLevel::Medium,
                memory: ResourceLevel::Medium,
                disk: ResourceLevel::Medium,
                network: ResourceLevel::Medium,
            },
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability {
                kind: CapabilityKind::CveDetection,
                confidence: 0.95,
                profile: PerformanceProfile {
                    speed: Speed::Medium,
                    accuracy: Accuracy::High,
                    coverage: Coverage::Comprehensive,
                    false_positive_rate: FalsePositiveRate::Low,
                },
            },
            Capability {
                kind: CapabilityKind::LicenseScanning,
                confidence: 0.7,
                profile: PerformanceProfile {
                    speed: Speed::Medium,
                    accuracy: Accuracy::Medium,
                    coverage: Coverage::Moderate,
                    false_positive_rate: FalsePositiveRate::Medium,
                },
            },
        ]
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
        let subcommand = Self::subcommand(kind);

        let mut args = vec![subcommand, "--format", "json", "--quiet"];
        if subcommand == "image" {
            args.push("--input");
        }
        args.push(artifact_path);

        let out = run_tool(ctx, self.name(), self.tool.binary(), &args, None).await?;

        // Trivy exits non-zero only on operational failure unless --exit-code
        // is set; findings come back with exit 0.
        if out.exit_code != 0 {
            return Err(ScannerError::Process {
                scanner: self.name().to_string(),
                exit_code: out.exit_code,
                stderr_head: out.stderr_head(),
            });
        }

        let (findings, target_count) =
            parse_report(&out.stdout).map_err(|message| ScannerError::Output {
                scanner: self.name().to_string(),
                message,
            })?;

        let mut result = ScanResult::new(self.name(), self.version().await, kind)
            .with_findings(findings);
        result.duration_seconds = started.elapsed().as_secs_f64();
        result
            .metadata
            .insert("targets".to_string(), target_count.to_string());
        Ok(result)
    }
}
