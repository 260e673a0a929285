//! TruffleHog adapter: secret detection over filesystem trees.
//!
//! TruffleHog streams NDJSON, one detection per line, interleaved with log
//! lines on stderr (and occasionally stdout).

use super::{output, run_tool, ScanContext, ScannerAdapter, ScannerError, ToolRunner};
use crate::models::{Finding, ScanResult, Severity};
use crate::plugins::{
    Accuracy, Capability, CapabilityKind, Coverage, FalsePositiveRate, PerformanceProfile,
    PluginCategory, PluginMetadata, ResourceRequirements, Speed,
};
use async_trait::async_trait;
use std::time::Instant;

const SUPPORTED_KINDS: &[&str] = &["filesystem", "npm", "pypi", "maven", "generic"];

pub struct TruffleHogAdapter {
    tool: ToolRunner,
}

impl TruffleHogAdapter {
    pub fn new() -> Self {
        Self {
            tool: ToolRunner::new("trufflehog", "--version"),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            tool: ToolRunner::new(binary, "--version"),
        }
    }
}

impl Default for TruffleHogAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_detections(raw: &str) -> Vec<Finding> {
    let mut findings = Vec::new();

    for value in output::ndjson_values(raw) {
        // Skip structured log lines that happen to be JSON.
        let Some(detector) = value.get("DetectorName").and_then(|d| d.as_str()) else {
            continue;
        };
        let verified = value
            .get("Verified")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let file = value
            .pointer("/SourceMetadata/Data/Filesystem/file")
            .and_then(|f| f.as_str())
            .unwrap_or("")
            .to_string();
        let line = value
            .pointer("/SourceMetadata/Data/Filesystem/line")
            .and_then(|l| l.as_u64())
            .unwrap_or(0);

        let n = findings.len() + 1;
        findings.push(Finding {
            id: format!("SECRET-{detector}-{n}"),
            cve: None,
            // A verified credential is live; an unverified match is still a
            // strong signal.
            severity: if verified {
                Severity::Critical
            } else {
                Severity::High
            },
            title: format!("{detector} credential detected"),
            description: format!("{detector} match in {file}:{line} (verified: {verified})"),
            package: file,
            version: String::new(),
            fixed_version: None,
            cvss: None,
            references: vec![],
        });
    }

    findings
}

#[async_trait]
impl ScannerAdapter for TruffleHogAdapter {
    fn name(&self) -> &str {
        "trufflehog"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: "trufflehog".to_string(),
            name: "TruffleHog".to_string(),
            version: "adapter/0.1".to_string(),
            categories: vec![PluginCategory::Security],
            tags: vec!["secrets".to_string()],
            priority: 80,
            resources: ResourceRequirements::low(),
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability {
            kind: CapabilityKind::SecretDetection,
            confidence: 0.9,
            profile: PerformanceProfile {
                speed: Speed::Medium,
                accuracy: Accuracy::High,
                coverage: Coverage::Comprehensive,
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
        let args = vec!["filesystem", artifact_path, "--json", "--no-update"];

        let out = run_tool(ctx, self.name(), self.tool.binary(), &args, None).await?;

        // TruffleHog exits non-zero with --fail when findings exist; both 0
        // and 183 (its documented findings code) are successful scans.
        if out.exit_code != 0 && out.exit_code != 183 {
            return Err(ScannerError::Process {
                scanner: self.name().to_string(),
                exit_code: out.exit_code,
                stderr_head: out.stderr_head(),
            });
        }

        let findings = parse_detections(&out.stdout);

        let mut result =
            ScanResult::new(self.name(), self.version().await, kind).with_findings(findings);
        result.duration_seconds = started.elapsed().as_secs_f64();
        Ok(result)
    }
}
