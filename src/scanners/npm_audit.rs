//! npm-audit adapter: dependency audit for npm package trees.

use super::{output, run_tool, ScanContext, ScannerAdapter, ScannerError, ToolRunner};
use crate::models::{Finding, ScanResult, Severity};
use crate::plugins::{
    Accuracy, Capability, CapabilityKind, Coverage, FalsePositiveRate, PerformanceProfile,
    PluginCategory, PluginMetadata, ResourceLevel, ResourceRequirements, Speed,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Instant;

const SUPPORTED_KINDS: &[&str] = &["npm"];

pub struct NpmAuditAdapter {
    tool: ToolRunner,
}

impl NpmAuditAdapter {
    pub fn new() -> Self {
        Self {
            tool: ToolRunner::new("npm", "--version"),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            tool: ToolRunner::new(binary, "--version"),
        }
    }
}

impl Default for NpmAuditAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct AuditReport {
    #[serde(default)]
    vulnerabilities: HashMap<String, AuditEntry>,
}

#[derive(Debug, Deserialize)]
struct AuditEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    range: String,
    #[serde(default)]
    via: Vec<serde_json::Value>,
}

fn parse_report(raw: &str) -> Result<Vec<Finding>, String> {
    let report: AuditReport = output::parse_first_json(raw)?;
    let mut findings = Vec::new();

    // Deterministic iteration for stable synthetic ids.
    let mut names: Vec<&String> = report.vulnerabilities.keys().collect();
    names.sort();

    for name in names {
        let entry = &report.vulnerabilities[name];
        let severity = if entry.severity.is_empty() {
            Severity::from_missing()
        } else {
            Severity::normalize(&entry.severity)
        };

        // `via` mixes advisory objects with bare package-name strings for
        // transitive chains; only the objects carry advisory detail.
        let advisory = entry.via.iter().find_map(|v| v.as_object());
        let (title, url, cvss) = match advisory {
            Some(obj) => (
                obj.get("title")
                    .and_then(|t| t.as_str())
                    .unwrap_or(name)
                    .to_string(),
                obj.get("url").and_then(|u| u.as_str()).map(String::from),
                obj.get("cvss")
                    .and_then(|c| c.get("score"))
                    .and_then(|s| s.as_f64()),
            ),
            None => (format!("Vulnerable dependency {name}"), None, None),
        };

        findings.push(Finding {
            id: format!("NPM-AUDIT-{name}"),
            cve: None,
            severity,
            title,
            description: format!("{} vulnerable range: {}", entry.name, entry.range),
            package: entry.name.clone(),
            version: entry.range.clone(),
            fixed_version: None,
            cvss,
            references: url.into_iter().collect(),
        });
    }

    Ok(findings)
}

#[async_trait]
impl ScannerAdapter for NpmAuditAdapter {
    fn name(&self) -> &str {
        "npm-audit"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: "npm-audit".to_string(),
            name: "npm audit".to_string(),
            version: "adapter/0.1".to_string(),
            categories: vec![PluginCategory::Vulnerability],
            tags: vec!["npm".to_string(), "dependencies".to_string()],
            priority: 55,
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
            confidence: 0.75,
            profile: PerformanceProfile {
                speed: Speed::Fast,
                accuracy: Accuracy::Medium,
                coverage: Coverage::Basic,
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
        // --prefix points npm at the package tree without changing cwd.
        let args = vec!["audit", "--json", "--prefix", artifact_path];

        let out = run_tool(ctx, self.name(), self.tool.binary(), &args, None).await?;

        // npm audit exits non-zero whenever vulnerabilities exist; the exit
        // code alone does not distinguish failure, the payload does.
        let findings = parse_report(&out.stdout).map_err(|message| {
            if out.exit_code != 0 && out.stdout.trim().is_empty() {
                ScannerError::Process {
                    scanner: self.name().to_string(),
                    exit_code: out.exit_code,
                    stderr_head: out.stderr_head(),
                }
            } else {
                ScannerError::Output {
                    scanner: self.name().to_string(),
                    message,
                }
            }
        })?;

        let mut result =
            ScanResult::new(self.name(), self.version().await, kind).with_findings(findings);
        result.duration_seconds = started.elapsed().as_secs_f64();
        Ok(result)
    }
}
