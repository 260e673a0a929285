//! Result aggregation: deterministic merge of per-scanner findings.
//!
//! Findings are pre-sorted by (severity rank descending, CVSS descending,
//! CVE ascending) before first-wins deduplication, so the highest-impact
//! variant of a duplicated finding survives regardless of scanner completion
//! order.

use crate::models::{finding_order, AggregatedResult, Finding, ScanResult, Severity, SeveritySummary};
use crate::workflow::{AggregationConfig, AggregationStrategy};
use std::collections::HashSet;
use tracing::debug;

/// Merges per-scanner results into one aggregated result.
///
/// `failed_scanners` counts adapters that errored and therefore contributed
/// no `ScanResult`.
pub fn aggregate(
    results: Vec<ScanResult>,
    artifact_path: &str,
    artifact_kind: &str,
    workflow: &str,
    config: &AggregationConfig,
    failed_scanners: usize,
) -> AggregatedResult {
    // Flatten while remembering the reporting scanner so weighted
    // aggregation can prefer trusted sources among duplicates.
    let mut tagged: Vec<(String, Finding)> = results
        .iter()
        .flat_map(|r| {
            r.findings
                .iter()
                .map(|f| (r.scanner.clone(), f.clone()))
                .collect::<Vec<_>>()
        })
        .collect();

    let weighted = config.strategy == AggregationStrategy::Weighted;
    tagged.sort_by(|a, b| {
        finding_order(&a.1, &b.1).then_with(|| {
            if weighted {
                let wa = config.weights.get(&a.0).copied().unwrap_or(1.0);
                let wb = config.weights.get(&b.0).copied().unwrap_or(1.0);
                wb.partial_cmp(&wa).unwrap_or(std::cmp::Ordering::Equal)
            } else {
                std::cmp::Ordering::Equal
            }
        })
    });

    let deduplicate = config.deduplicate && config.strategy != AggregationStrategy::Union;
    let findings: Vec<Finding> = if deduplicate {
        let mut seen = HashSet::new();
        tagged
            .into_iter()
            .filter_map(|(_, f)| seen.insert(f.dedup_key()).then_some(f))
            .collect()
    } else {
        tagged.into_iter().map(|(_, f)| f).collect()
    };

    debug!(
        "Aggregated {} findings from {} scanner results",
        findings.len(),
        results.len()
    );

    let summary = SeveritySummary::from_findings(&findings);
    let total_duration_seconds = results.iter().map(|r| r.duration_seconds).sum();

    AggregatedResult {
        artifact_path: artifact_path.to_string(),
        artifact_kind: artifact_kind.to_string(),
        workflow: workflow.to_string(),
        findings,
        summary,
        total_scanners: results.len() + failed_scanners,
        successful_scanners: results.len(),
        failed_scanners,
        scanner_results: results,
        total_duration_seconds,
        timestamp: chrono::Utc::now(),
    }
}

/// Findings at or above the given severity, in aggregated order.
///
/// Pure view over the aggregated set; the underlying result is untouched.
pub fn filter_by_severity(aggregated: &AggregatedResult, min: Severity) -> Vec<Finding> {
    aggregated
        .findings
        .iter()
        .filter(|f| f.severity.rank() >= min.rank())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(id: &str, cve: Option<&str>, severity: Severity, cvss: Option<f64>) -> Finding {
        Finding {
            id: id.to_string(),
            cve: cve.map(String::from),
            severity,
            title: format!("{id} title"),
            description: String::new(),
            package: "pkg".to_string(),
            version: "1.0".to_string(),
            fixed_version: None,
            cvss,
            references: vec![],
        }
    }

    fn scan(scanner: &str, findings: Vec<Finding>) -> ScanResult {
        let mut result = ScanResult::new(scanner, "1.0", "docker").with_findings(findings);
        result.duration_seconds = 1.5;
        result
    }

    #[test]
    fn duplicate_cve_keeps_highest_impact_variant() {
        let a = scan(
            "trivy",
            vec![finding("CVE-2024-0001", Some("CVE-2024-0001"), Severity::High, Some(7.5))],
        );
        let b = scan(
            "grype",
            vec![finding("CVE-2024-0001", Some("CVE-2024-0001"), Severity::Medium, Some(5.0))],
        );

        // Order of inputs must not matter.
        for results in [vec![a.clone(), b.clone()], vec![b.clone(), a.clone()]] {
            let aggregated = aggregate(
                results,
                "/a/img.tar",
                "docker",
                "docker-workflow",
                &AggregationConfig::default(),
                0,
            );
            assert_eq!(aggregated.findings.len(), 1);
            assert_eq!(aggregated.findings[0].severity, Severity::High);
            assert_eq!(aggregated.findings[0].cvss, Some(7.5));
        }
    }

    #[test]
    fn summary_recomputed_from_deduplicated_set() {
        let results = vec![
            scan(
                "trivy",
                vec![
                    finding("CVE-2024-0001", Some("CVE-2024-0001"), Severity::High, Some(7.5)),
                    finding("CVE-2024-0002", Some("CVE-2024-0002"), Severity::Medium, Some(5.0)),
                ],
            ),
            scan(
                "grype",
                vec![finding("CVE-2024-0001", Some("CVE-2024-0001"), Severity::High, Some(7.5))],
            ),
        ];
        let aggregated = aggregate(
            results,
            "/a",
            "docker",
            "wf",
            &AggregationConfig::default(),
            0,
        );
        assert_eq!(aggregated.summary.high, 1);
        assert_eq!(aggregated.summary.medium, 1);
        assert_eq!(aggregated.summary.total, 2);
        assert_eq!(
            aggregated.summary.total,
            aggregated.summary.critical
                + aggregated.summary.high
                + aggregated.summary.medium
                + aggregated.summary.low
        );
    }

    #[test]
    fn ordering_is_deterministic() {
        let results = vec![scan(
            "trivy",
            vec![
                finding("CVE-2024-0003", Some("CVE-2024-0003"), Severity::Medium, Some(4.0)),
                finding("CVE-2024-0002", Some("CVE-2024-0002"), Severity::High, Some(7.0)),
                finding("CVE-2024-0001", Some("CVE-2024-0001"), Severity::High, Some(7.0)),
                finding("CVE-2024-0004", Some("CVE-2024-0004"), Severity::Critical, Some(9.8)),
            ],
        )];
        let aggregated = aggregate(
            results,
            "/a",
            "docker",
            "wf",
            &AggregationConfig::default(),
            0,
        );
        let ids: Vec<_> = aggregated.findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["CVE-2024-0004", "CVE-2024-0001", "CVE-2024-0002", "CVE-2024-0003"]
        );
    }

    #[test]
    fn aggregation_is_idempotent() {
        let results = vec![
            scan(
                "trivy",
                vec![
                    finding("CVE-2024-0001", Some("CVE-2024-0001"), Severity::High, Some(7.5)),
                    finding("CVE-2024-0002", Some("CVE-2024-0002"), Severity::Low, None),
                ],
            ),
            scan(
                "grype",
                vec![finding("CVE-2024-0001", Some("CVE-2024-0001"), Severity::Medium, Some(5.0))],
            ),
        ];
        let config = AggregationConfig::default();
        let once = aggregate(results, "/a", "docker", "wf", &config, 0);

        // Re-wrap the deduplicated set as a single scan result and aggregate
        // again; findings and summary must not change.
        let rewrapped = vec![ScanResult::new("combined", "1.0", "docker")
            .with_findings(once.findings.clone())];
        let twice = aggregate(rewrapped, "/a", "docker", "wf", &config, 0);

        assert_eq!(once.findings, twice.findings);
        assert_eq!(once.summary, twice.summary);
    }

    #[test]
    fn union_strategy_keeps_duplicates() {
        let results = vec![
            scan(
                "trivy",
                vec![finding("CVE-2024-0001", Some("CVE-2024-0001"), Severity::High, Some(7.5))],
            ),
            scan(
                "grype",
                vec![finding("CVE-2024-0001", Some("CVE-2024-0001"), Severity::Medium, Some(5.0))],
            ),
        ];
        let config = AggregationConfig {
            strategy: AggregationStrategy::Union,
            ..Default::default()
        };
        let aggregated = aggregate(results, "/a", "docker", "wf", &config, 0);
        assert_eq!(aggregated.findings.len(), 2);
    }

    #[test]
    fn weighted_strategy_breaks_exact_ties_by_scanner_weight() {
        let mut trusted = finding("CVE-2024-0001", Some("CVE-2024-0001"), Severity::High, Some(7.5));
        trusted.description = "from trusted scanner".to_string();
        let mut untrusted = finding("CVE-2024-0001", Some("CVE-2024-0001"), Severity::High, Some(7.5));
        untrusted.description = "from untrusted scanner".to_string();

        let results = vec![scan("noisy", vec![untrusted]), scan("precise", vec![trusted])];
        let mut config = AggregationConfig {
            strategy: AggregationStrategy::Weighted,
            ..Default::default()
        };
        config.weights.insert("precise".to_string(), 2.0);
        config.weights.insert("noisy".to_string(), 0.5);

        let aggregated = aggregate(results, "/a", "docker", "wf", &config, 0);
        assert_eq!(aggregated.findings.len(), 1);
        assert_eq!(aggregated.findings[0].description, "from trusted scanner");
    }

    #[test]
    fn severity_filter_is_monotonic_and_order_preserving() {
        let results = vec![scan(
            "trivy",
            vec![
                finding("CVE-2024-0001", Some("CVE-2024-0001"), Severity::Critical, Some(9.0)),
                finding("CVE-2024-0002", Some("CVE-2024-0002"), Severity::High, Some(7.0)),
                finding("CVE-2024-0003", Some("CVE-2024-0003"), Severity::Low, None),
            ],
        )];
        let aggregated = aggregate(
            results,
            "/a",
            "docker",
            "wf",
            &AggregationConfig::default(),
            0,
        );

        let filtered = filter_by_severity(&aggregated, Severity::High);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|f| f.severity.rank() >= Severity::High.rank()));
        let ids: Vec<_> = filtered.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["CVE-2024-0001", "CVE-2024-0002"]);

        // Filtering must not rewrite the aggregate.
        assert_eq!(aggregated.findings.len(), 3);
    }

    #[test]
    fn counts_and_duration_attach() {
        let results = vec![scan("trivy", vec![]), scan("grype", vec![])];
        let aggregated = aggregate(
            results,
            "/a",
            "docker",
            "wf",
            &AggregationConfig::default(),
            1,
        );
        assert_eq!(aggregated.total_scanners, 3);
        assert_eq!(aggregated.successful_scanners, 2);
        assert_eq!(aggregated.failed_scanners, 1);
        assert!((aggregated.total_duration_seconds - 3.0).abs() < 1e-9);
    }
}
