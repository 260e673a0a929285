//! Grype adapter: vulnerability matching over images, directories, and SBOMs.

use super::{output, run_tool, ScanContext, ScannerAdapter, ScannerError, ToolRunner};
use crate::models::{Finding, ScanResult, Severity};
use crate::plugins::{
    Accuracy, Capability, CapabilityKind, Coverage, FalsePositiveRate, PerformanceProfile,
    PluginCategory, PluginMetadata, ResourceLevel, ResourceRequirements, Speed,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;

const SUPPORTED_KINDS: &[&str] = &["docker", "filesystem", "npm", "maven", "pypi", "generic"];

/// Grype signals findings-present with exit code 1 when --fail-on is active.
const FINDINGS_EXIT_CODES: &[i32] = &[0, 1];

pub struct GrypeAdapter {
    tool: ToolRunner,
}

impl GrypeAdapter {
    pub fn new() -> Self {
        Self {
            tool: ToolRunner::new("grype", "--version"),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            tool: ToolRunner::new(binary, "--version"),
        }
    }

    /// Grype addresses targets through scheme prefixes.
    fn target(kind: &str, artifact_path: &str) -> String {
        match kind {
            "docker" => format!("docker-archive:{artifact_path}"),
            "sbom" => format!("sbom:{artifact_path}"),
            _ => format!("dir:{artifact_path}"),
        }
    }
}

impl Default for GrypeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct GrypeReport {
    #[serde(default)]
    matches: Vec<GrypeMatch>,
}

#[derive(Debug, Deserialize)]
struct GrypeMatch {
    vulnerability: GrypeVulnerability,
    #[serde(rename = "relatedVulnerabilities", default)]
    related: Vec<GrypeVulnerability>,
    artifact: GrypeArtifact,
}

#[derive(Debug, Deserialize)]
struct GrypeVulnerability {
    id: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    cvss: Vec<GrypeCvss>,
    #[serde(default)]
    fix: GrypeFix,
}

#[derive(Debug, Deserialize, Default)]
struct GrypeFix {
    #[serde(default)]
    versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GrypeCvss {
    #[serde(default)]
    metrics: GrypeCvssMetrics,
}

#[derive(Debug, Deserialize, Default)]
struct GrypeCvssMetrics {
    #[serde(rename = "baseScore")]
    base_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GrypeArtifact {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
}

fn parse_report(raw: &str) -> Result<Vec<Finding>, String> {
    let report: GrypeReport = output::parse_first_json(raw)?;
    let mut findings = Vec::with_capacity(report.matches.len());

    for entry in &report.matches {
        let vuln = &entry.vulnerability;

        // Prefer the native id when it is a CVE; otherwise look for a
        // related CVE record (GHSA ids usually carry one).
        let cve = if vuln.id.starts_with("CVE-") {
            Some(vuln.id.clone())
        } else {
            entry
                .related
                .iter()
                .find(|r| r.id.starts_with("CVE-"))
                .map(|r| r.id.clone())
        };

        let severity = match &vuln.severity {
            Some(label) => Severity::normalize(label),
            None => Severity::from_missing(),
        };

        let cvss = vuln
            .cvss
            .iter()
            .filter_map(|c| c.metrics.base_score)
            .fold(None, |best: Option<f64>, score| match best {
                Some(current) if current >= score => Some(current),
                _ => Some(score),
            });

        findings.push(Finding {
            id: vuln.id.clone(),
            cve,
            severity,
            title: format!("{} in {}", vuln.id, entry.artifact.name),
            description: vuln.description.clone(),
            package: entry.artifact.name.clone(),
            version: entry.artifact.version.clone(),
            fixed_version: vuln.fix.versions.first().cloned(),
            cvss,
            references: vuln.urls.clone(),
        });
    }

    Ok(findings)
}

#[async_trait]
impl ScannerAdapter for GrypeAdapter {
    fn name(&self) -> &str {
        "grype"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: "grype".to_string(),
            name: "Grype".to_string(),
            version: "adapter/0.1".to_string(),
            categories: vec![PluginCategory::Vulnerability],
            tags: vec!["container".to_string(), "sbom".to_string()],
            priority: 85,
            resources: ResourceRequirements {
                cpu: ResourceLevel::Medium,
                memory: ResourceLevel::High,
                disk: ResourceLevel::Medium,
                network: ResourceLevel::Medium,
            },
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability {
            kind: CapabilityKind::CveDetection,
            confidence: 0.9,
            profile: PerformanceProfile {
                speed: Speed::Fast,
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
        let target = Self::target(kind, artifact_path);
        let args = vec!["-o", "json", "--quiet", target.as_str()];

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
        result.metadata.insert("target".to_string(), target.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"
{
  "matches": [
    {
      "vulnerability": {
        "id": "GHSA-xxxx-yyyy",
        "severity": "High",
        "description": "prototype pollution",
        "urls": ["https://github.com/advisories/GHSA-xxxx-yyyy"],
        "cvss": [{"metrics": {"baseScore": 8.1}}, {"metrics": {"baseScore": 7.4}}],
        "fix": {"versions": ["4.17.21"]}
      },
      "relatedVulnerabilities": [
        {"id": "CVE-2024-0002", "severity": "High"}
      ],
      "artifact": {"name": "lodash", "version": "4.17.15"}
    },
    {
      "vulnerability": {
        "id": "CVE-2024-0001",
        "severity": "medium",
        "description": "",
        "urls": [],
        "cvss": [],
        "fix": {"versions": []}
      },
      "relatedVulnerabilities": [],
      "artifact": {"name": "openssl", "version": "3.1.0"}
    }
  ]
}
"#;

    #[test]
    fn parses_matches_and_resolves_related_cve() {
        let findings = parse_report(REPORT).unwrap();
        assert_eq!(findings.len(), 2);

        let ghsa = &findings[0];
        assert_eq!(ghsa.id, "GHSA-xxxx-yyyy");
        assert_eq!(ghsa.cve.as_deref(), Some("CVE-2024-0002"));
        assert_eq!(ghsa.cvss, Some(8.1));
        assert_eq!(ghsa.fixed_version.as_deref(), Some("4.17.21"));

        let cve = &findings[1];
        assert_eq!(cve.cve.as_deref(), Some("CVE-2024-0001"));
        assert_eq!(cve.severity, Severity::Medium);
        assert_eq!(cve.cvss, None);
    }

    #[test]
    fn target_schemes_per_kind() {
        assert_eq!(
            GrypeAdapter::target("docker", "/a/img.tar"),
            "docker-archive:/a/img.tar"
        );
        assert_eq!(GrypeAdapter::target("npm", "/a/pkg"), "dir:/a/pkg");
    }

    #[test]
    fn empty_report_parses_to_no_findings() {
        let findings = parse_report("{\"matches\": []}").unwrap();
        assert!(findings.is_empty());
    }
}
