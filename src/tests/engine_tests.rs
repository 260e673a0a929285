//! Workflow engine behavior: dependency ordering, skips, fail-fast,
//! timeouts, cancellation, and strategy-driven selection.

use super::test_helpers::{cve_finding, StubBehavior, StubScanner};
use crate::models::Severity;
use crate::plugins::strategy::SelectionRequest;
use crate::plugins::PluginManager;
use crate::scanners::{ScanContext, ScannerAdapter};
use crate::workflow::{
    ConditionKind, ConditionOperator, ExecutionConfig, ScannerRule, Stage, StageCondition,
    StageStatus, Workflow, WorkflowEngine, WorkflowRegistry, WorkflowRequest, WorkflowStatus,
};
use crate::AegisError;
use std::sync::Arc;
use std::time::Duration;

fn stage(name: &str, scanners: &[&str], depends_on: &[&str]) -> Stage {
    Stage {
        name: name.to_string(),
        description: String::new(),
        rules: vec![ScannerRule::Fixed {
            scanners: scanners.iter().map(|s| s.to_string()).collect(),
        }],
        parallel: true,
        continue_on_error: false,
        timeout_seconds: 60,
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        conditions: vec![],
    }
}

fn workflow(id: &str, stages: Vec<Stage>, execution: ExecutionConfig) -> Workflow {
    Workflow {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        artifact_kinds: vec!["docker".to_string()],
        stages,
        execution,
        policy_path: None,
        notification_channels: vec![],
        enabled: true,
    }
}

async fn engine_with(scanners: Vec<Arc<dyn ScannerAdapter>>, workflows: Vec<Workflow>) -> WorkflowEngine {
    let plugins = Arc::new(PluginManager::new());
    for scanner in scanners {
        plugins.register_adapter_unchecked(scanner).await;
    }
    let registry = Arc::new(WorkflowRegistry::new());
    for wf in workflows {
        registry.register(wf).await.unwrap();
    }
    WorkflowEngine::new(registry, plugins)
}

fn request() -> WorkflowRequest {
    WorkflowRequest::new("/a/img.tar", "docker")
}

#[tokio::test]
async fn unknown_workflow_is_rejected() {
    let engine = engine_with(vec![], vec![]).await;
    let err = engine
        .execute(&ScanContext::unbounded(), "ghost", request())
        .await
        .unwrap_err();
    assert!(matches!(err, AegisError::WorkflowNotFound(_)));
}

#[tokio::test]
async fn dependent_stage_starts_after_dependency_completes() {
    let slow = Arc::new(StubScanner::new(
        "slow",
        &["docker"],
        StubBehavior::Delayed(
            Duration::from_millis(200),
            vec![cve_finding("CVE-2024-0001", Severity::High, 7.5)],
        ),
    ));
    let fast = Arc::new(StubScanner::new(
        "fast",
        &["docker"],
        StubBehavior::Findings(vec![cve_finding("CVE-2024-0002", Severity::Low, 2.0)]),
    ));
    let slow_events = Arc::clone(&slow.events);
    let fast_events = Arc::clone(&fast.events);

    let engine = engine_with(
        vec![slow, fast],
        vec![workflow(
            "wf",
            vec![stage("first", &["slow"], &[]), stage("second", &["fast"], &["first"])],
            ExecutionConfig::default(),
        )],
    )
    .await;

    let result = engine
        .execute(&ScanContext::unbounded(), "wf", request())
        .await
        .unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed);

    // The dependent's first event must come after the dependency's last.
    let slow_done = slow_events.lock().await.last().unwrap().1;
    let fast_started = fast_events.lock().await.first().unwrap().1;
    assert!(fast_started >= slow_done);
}

#[tokio::test]
async fn condition_skip_propagates_through_dependencies() {
    let alpha = Arc::new(StubScanner::new(
        "alpha",
        &["docker"],
        StubBehavior::Findings(vec![]),
    ));
    let beta = Arc::new(StubScanner::new(
        "beta",
        &["docker"],
        StubBehavior::Findings(vec![]),
    ));
    let alpha_calls = Arc::clone(&alpha.calls);
    let beta_calls = Arc::clone(&beta.calls);

    let mut first = stage("first", &["alpha"], &[]);
    first.conditions = vec![StageCondition {
        kind: ConditionKind::ArtifactType,
        param: String::new(),
        operator: ConditionOperator::Equals,
        value: serde_json::json!("helm"),
    }];
    let second = stage("second", &["beta"], &["first"]);

    let engine = engine_with(
        vec![alpha, beta],
        vec![workflow("wf", vec![first, second], ExecutionConfig::default())],
    )
    .await;

    let result = engine
        .execute(&ScanContext::unbounded(), "wf", request())
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.stages["first"].status, StageStatus::Skipped);
    assert_eq!(result.stages["second"].status, StageStatus::Skipped);
    assert_eq!(alpha_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(beta_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(result.aggregated.unwrap().findings.is_empty());
}

#[tokio::test]
async fn fail_fast_stops_remaining_stages() {
    let broken = Arc::new(StubScanner::new("broken", &["docker"], StubBehavior::Fail));
    let later = Arc::new(StubScanner::new(
        "later",
        &["docker"],
        StubBehavior::Findings(vec![]),
    ));
    let later_calls = Arc::clone(&later.calls);

    let engine = engine_with(
        vec![broken, later],
        vec![workflow(
            "wf",
            vec![stage("first", &["broken"], &[]), stage("second", &["later"], &[])],
            ExecutionConfig {
                fail_fast: true,
                ..ExecutionConfig::default()
            },
        )],
    )
    .await;

    let result = engine
        .execute(&ScanContext::unbounded(), "wf", request())
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(result.stages["first"].status, StageStatus::Failed);
    assert!(!result.stages.contains_key("second"));
    assert_eq!(later_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(result.aggregated.is_none());
}

#[tokio::test]
async fn stage_timeout_bounds_slow_scanners() {
    let stuck = Arc::new(StubScanner::new(
        "stuck",
        &["docker"],
        StubBehavior::Delayed(Duration::from_secs(60), vec![]),
    ));

    let mut slow_stage = stage("only", &["stuck"], &[]);
    slow_stage.timeout_seconds = 1;

    let engine = engine_with(
        vec![stuck],
        vec![workflow(
            "wf",
            vec![slow_stage],
            ExecutionConfig {
                fail_fast: true,
                ..ExecutionConfig::default()
            },
        )],
    )
    .await;

    let started = std::time::Instant::now();
    let result = engine
        .execute(&ScanContext::unbounded(), "wf", request())
        .await
        .unwrap();
    assert_eq!(result.status, WorkflowStatus::Failed);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn cancellation_aborts_execution() {
    let stuck = Arc::new(StubScanner::new(
        "stuck",
        &["docker"],
        StubBehavior::Delayed(Duration::from_secs(60), vec![]),
    ));

    let engine = Arc::new(
        engine_with(
            vec![stuck],
            vec![workflow(
                "wf",
                vec![stage("only", &["stuck"], &[]), stage("after", &["stuck"], &["only"])],
                ExecutionConfig {
                    fail_fast: true,
                    ..ExecutionConfig::default()
                },
            )],
        )
        .await,
    );

    let (handle, ctx) = ScanContext::cancellable();
    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.execute(&ctx, "wf", request()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();

    let result = task.await.unwrap().unwrap();
    // The in-flight scan observes cancellation; partial results are
    // discarded and the workflow reports cancelled.
    assert_eq!(result.status, WorkflowStatus::Cancelled);
    assert!(result.errors.iter().any(|e| e.contains("cancelled")));
    assert!(result.aggregated.is_none());
}

#[tokio::test]
async fn strategy_rule_selects_registered_scanners() {
    let alpha = Arc::new(StubScanner::new(
        "alpha",
        &["docker"],
        StubBehavior::Findings(vec![cve_finding("CVE-2024-0001", Severity::High, 7.5)]),
    ));
    let alpha_calls = Arc::clone(&alpha.calls);

    let strategy_stage = Stage {
        name: "select".to_string(),
        description: String::new(),
        rules: vec![ScannerRule::Strategy {
            strategy: "optimal".to_string(),
            request: SelectionRequest::default(),
            fallback: None,
        }],
        parallel: true,
        continue_on_error: true,
        timeout_seconds: 60,
        depends_on: vec![],
        conditions: vec![],
    };

    let engine = engine_with(
        vec![alpha],
        vec![workflow("wf", vec![strategy_stage], ExecutionConfig::default())],
    )
    .await;

    let result = engine
        .execute(&ScanContext::unbounded(), "wf", request())
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(alpha_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(result.aggregated.unwrap().findings.len(), 1);
}

#[tokio::test]
async fn stop_on_critical_halts_later_stages() {
    let critical = Arc::new(StubScanner::new(
        "critical-finder",
        &["docker"],
        StubBehavior::Findings(vec![cve_finding("CVE-2024-9999", Severity::Critical, 9.8)]),
    ));
    let later = Arc::new(StubScanner::new(
        "later",
        &["docker"],
        StubBehavior::Findings(vec![]),
    ));
    let later_calls = Arc::clone(&later.calls);

    let engine = engine_with(
        vec![critical, later],
        vec![workflow(
            "wf",
            vec![
                stage("first", &["critical-finder"], &[]),
                stage("second", &["later"], &[]),
            ],
            ExecutionConfig {
                stop_on_critical: true,
                ..ExecutionConfig::default()
            },
        )],
    )
    .await;

    let result = engine
        .execute(&ScanContext::unbounded(), "wf", request())
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert!(result.errors.iter().any(|e| e.contains("critical finding")));
    assert_eq!(later_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn conditional_rule_falls_back() {
    let primary = Arc::new(StubScanner::new(
        "primary",
        &["docker"],
        StubBehavior::Findings(vec![]),
    ));
    let fallback = Arc::new(StubScanner::new(
        "fallback",
        &["docker"],
        StubBehavior::Findings(vec![]),
    ));
    let primary_calls = Arc::clone(&primary.calls);
    let fallback_calls = Arc::clone(&fallback.calls);

    let conditional_stage = Stage {
        name: "conditional".to_string(),
        description: String::new(),
        rules: vec![ScannerRule::Conditional {
            condition: StageCondition {
                kind: ConditionKind::ArtifactType,
                param: String::new(),
                operator: ConditionOperator::Equals,
                value: serde_json::json!("npm"),
            },
            rule: Box::new(ScannerRule::Fixed {
                scanners: vec!["primary".to_string()],
            }),
            fallback: Some(Box::new(ScannerRule::Fixed {
                scanners: vec!["fallback".to_string()],
            })),
        }],
        parallel: false,
        continue_on_error: true,
        timeout_seconds: 60,
        depends_on: vec![],
        conditions: vec![],
    };

    let engine = engine_with(
        vec![primary, fallback],
        vec![workflow("wf", vec![conditional_stage], ExecutionConfig::default())],
    )
    .await;

    // Artifact is docker, so the condition fails and the fallback runs.
    let result = engine
        .execute(&ScanContext::unbounded(), "wf", request())
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(primary_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(fallback_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}
