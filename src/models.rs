use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::HashMap, fmt, str::FromStr};
use uuid::Uuid;

/// Canonical severity levels for findings
///
/// The total order used for sorting and filtering is
/// Critical > High > Medium > Low > Unknown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    /// Numeric rank for ordering; higher is more severe.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
            Severity::Unknown => 0,
        }
    }

    /// Normalizes a tool-reported severity label to the canonical set.
    ///
    /// Unrecognized labels become `Unknown`. Tools that report no level at
    /// all should call [`Severity::from_missing`] instead so the summary can
    /// bucket the finding as low.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "CRITICAL" | "CRIT" => Severity::Critical,
            "HIGH" | "H" => Severity::High,
            "MEDIUM" | "MED" | "M" | "MODERATE" => Severity::Medium,
            "LOW" | "L" => Severity::Low,
            _ => Severity::Unknown,
        }
    }

    /// Severity for a finding whose source tool provides no level.
    pub fn from_missing() -> Self {
        Severity::Low
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Severity::normalize(s))
    }
}

/// A single reported security or quality issue
///
/// Findings are immutable once emitted by an adapter. The identifier is
/// scanner-native (a CVE id, or a synthetic id such as `SECRET-<detector>-<n>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub id: String,
    pub cve: Option<String>,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub package: String,
    pub version: String,
    pub fixed_version: Option<String>,
    pub cvss: Option<f64>,
    pub references: Vec<String>,
}

impl Finding {
    /// Deduplication key: the CVE when present, else `package|id|title`.
    pub fn dedup_key(&self) -> String {
        match &self.cve {
            Some(cve) if !cve.is_empty() => cve.clone(),
            _ => format!("{}|{}|{}", self.package, self.id, self.title),
        }
    }
}

/// Per-level finding counts for a scan or aggregation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeveritySummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unknown: usize,
    pub total: usize,
}

impl SeveritySummary {
    /// Computes a summary over findings, maintaining `total = critical +
    /// high + medium + low`. Unknown findings are tallied separately and do
    /// not contribute to `total`.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = SeveritySummary::default();
        for finding in findings {
            match finding.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
                Severity::Unknown => summary.unknown += 1,
            }
        }
        summary.total = summary.critical + summary.high + summary.medium + summary.low;
        summary
    }
}

/// Result of a single adapter invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scanner: String,
    pub scanner_version: String,
    pub artifact_kind: String,
    pub findings: Vec<Finding>,
    pub summary: SeveritySummary,
    pub duration_seconds: f64,
    pub metadata: HashMap<String, String>,
}

impl ScanResult {
    pub fn new(scanner: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            scanner: scanner.into(),
            scanner_version: version.into(),
            artifact_kind: kind.into(),
            findings: Vec::new(),
            summary: SeveritySummary::default(),
            duration_seconds: 0.0,
            metadata: HashMap::new(),
        }
    }

    /// Attaches findings and recomputes the summary from them.
    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.summary = SeveritySummary::from_findings(&findings);
        self.findings = findings;
        self
    }
}

/// Deduplicated union of all scanner results for one workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub artifact_path: String,
    pub artifact_kind: String,
    pub workflow: String,
    pub findings: Vec<Finding>,
    pub summary: SeveritySummary,
    pub scanner_results: Vec<ScanResult>,
    pub total_scanners: usize,
    pub successful_scanners: usize,
    pub failed_scanners: usize,
    pub total_duration_seconds: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Job priority; higher priority jobs are admitted first under contention
pub type Priority = i32;

/// A scan request submitted by a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub job_id: String,
    pub tenant_id: String,
    pub artifact_id: String,
    pub artifact_path: String,
    pub artifact_kind: String,
    pub workflow_name: Option<String>,
    pub priority: Priority,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    pub requester: String,
    pub metadata: HashMap<String, String>,
}

impl ScanJob {
    pub fn new(
        tenant_id: impl Into<String>,
        artifact_id: impl Into<String>,
        artifact_path: impl Into<String>,
        artifact_kind: impl Into<String>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            artifact_id: artifact_id.into(),
            artifact_path: artifact_path.into(),
            artifact_kind: artifact_kind.into(),
            workflow_name: None,
            priority: 0,
            submitted_at: chrono::Utc::now(),
            requester: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow_name = Some(workflow.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Terminal and transient job states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    CompletedWithWarnings,
    Blocked,
    Quarantined,
    Failed,
    PolicyError,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithWarnings => "completed_with_warnings",
            JobStatus::Blocked => "blocked",
            JobStatus::Quarantined => "quarantined",
            JobStatus::Failed => "failed",
            JobStatus::PolicyError => "policy_error",
        };
        write!(f, "{s}")
    }
}

impl JobStatus {
    /// Derives the terminal status from a policy decision action.
    ///
    /// The mapping is total: unrecognized actions complete the job.
    pub fn from_policy_action(action: &str) -> Self {
        match action {
            "allow" => JobStatus::Completed,
            "warn" => JobStatus::CompletedWithWarnings,
            "quarantine" => JobStatus::Quarantined,
            "block" | "deny" => JobStatus::Blocked,
            _ => JobStatus::Completed,
        }
    }
}

/// The policy engine's verdict for one evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allow: bool,
    pub action: String,
    pub reason: String,
    #[serde(default)]
    pub violations: Vec<serde_json::Value>,
}

/// Outcome of one orchestrated scan job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job: ScanJob,
    pub workflow_id: Option<String>,
    pub aggregated: Option<AggregatedResult>,
    pub decision: Option<PolicyDecision>,
    pub status: JobStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub errors: Vec<String>,
}

impl JobResult {
    pub fn started(job: ScanJob) -> Self {
        Self {
            job,
            workflow_id: None,
            aggregated: None,
            decision: None,
            status: JobStatus::InProgress,
            started_at: chrono::Utc::now(),
            completed_at: None,
            errors: Vec::new(),
        }
    }

    pub fn finish(mut self, status: JobStatus) -> Self {
        self.status = status;
        self.completed_at = Some(chrono::Utc::now());
        self
    }
}

/// Comparator imposing the deterministic global finding order:
/// severity rank descending, then CVSS descending, then CVE ascending.
pub fn finding_order(a: &Finding, b: &Finding) -> Ordering {
    b.severity
        .rank()
        .cmp(&a.severity.rank())
        .then_with(|| {
            let ca = a.cvss.unwrap_or(0.0);
            let cb = b.cvss.unwrap_or(0.0);
            cb.partial_cmp(&ca).unwrap_or(Ordering::Equal)
        })
        .then_with(|| {
            let ca = a.cve.as_deref().unwrap_or("");
            let cb = b.cve.as_deref().unwrap_or("");
            ca.cmp(cb)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(id: &str, severity: Severity, cvss: Option<f64>) -> Finding {
        Finding {
            id: id.to_string(),
            cve: id.starts_with("CVE").then(|| id.to_string()),
            severity,
            title: format!("{id} title"),
            description: String::new(),
            package: "pkg".to_string(),
            version: "1.0.0".to_string(),
            fixed_version: None,
            cvss,
            references: vec![],
        }
    }

    #[test]
    fn severity_normalization_maps_aliases() {
        assert_eq!(Severity::normalize("crit"), Severity::Critical);
        assert_eq!(Severity::normalize("H"), Severity::High);
        assert_eq!(Severity::normalize("moderate"), Severity::Medium);
        assert_eq!(Severity::normalize("l"), Severity::Low);
        assert_eq!(Severity::normalize("negligible"), Severity::Unknown);
        assert_eq!(Severity::normalize(" MEDIUM "), Severity::Medium);
    }

    #[test]
    fn summary_total_excludes_unknown() {
        let findings = vec![
            finding("CVE-2024-0001", Severity::High, Some(7.5)),
            finding("CVE-2024-0002", Severity::Medium, Some(5.0)),
            finding("x", Severity::Unknown, None),
        ];
        let summary = SeveritySummary::from_findings(&findings);
        assert_eq!(summary.high, 1);
        assert_eq!(summary.medium, 1);
        assert_eq!(summary.unknown, 1);
        assert_eq!(
            summary.total,
            summary.critical + summary.high + summary.medium + summary.low
        );
    }

    #[test]
    fn dedup_key_prefers_cve() {
        let with_cve = finding("CVE-2024-0001", Severity::High, None);
        assert_eq!(with_cve.dedup_key(), "CVE-2024-0001");

        let without = finding("GHSA-xxxx", Severity::Low, None);
        assert_eq!(without.dedup_key(), "pkg|GHSA-xxxx|GHSA-xxxx title");
    }

    #[test]
    fn status_mapping_is_total() {
        assert_eq!(JobStatus::from_policy_action("allow"), JobStatus::Completed);
        assert_eq!(
            JobStatus::from_policy_action("warn"),
            JobStatus::CompletedWithWarnings
        );
        assert_eq!(
            JobStatus::from_policy_action("quarantine"),
            JobStatus::Quarantined
        );
        assert_eq!(JobStatus::from_policy_action("block"), JobStatus::Blocked);
        assert_eq!(JobStatus::from_policy_action("deny"), JobStatus::Blocked);
        assert_eq!(
            JobStatus::from_policy_action("anything-else"),
            JobStatus::Completed
        );
    }

    #[test]
    fn finding_order_sorts_by_severity_cvss_cve() {
        let mut findings = vec![
            finding("CVE-2024-0002", Severity::Medium, Some(5.0)),
            finding("CVE-2024-0003", Severity::High, Some(6.0)),
            finding("CVE-2024-0001", Severity::High, Some(7.5)),
        ];
        findings.sort_by(finding_order);
        let ids: Vec<_> = findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["CVE-2024-0001", "CVE-2024-0003", "CVE-2024-0002"]);
    }
}
