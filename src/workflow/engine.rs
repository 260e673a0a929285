//! Workflow engine: a pure interpreter over declarative workflow data.
//!
//! Stages run in declaration order. A stage first evaluates its conditions,
//! then waits for declared dependencies, then resolves its scanner rules to
//! concrete plugins and runs them under the stage deadline. Skips propagate
//! transitively through hard dependencies; failures respect the stage's
//! `continue_on_error` and the workflow's fail-fast settings.

use super::conditions::{self, ConditionEvaluator};
use super::registry::WorkflowRegistry;
use super::{
    ScannerRule, Stage, StageResult, StageStatus, Workflow, WorkflowExecutionResult,
    WorkflowRequest, WorkflowStatus,
};
use crate::aggregate;
use crate::constants::DEPENDENCY_POLL_INTERVAL_MS;
use crate::models::Severity;
use crate::plugins::registry::PluginHandle;
use crate::plugins::PluginManager;
use crate::scanners::{ScanContext, ScannerError};
use crate::{AegisError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

type StageResultMap = Arc<RwLock<HashMap<String, StageResult>>>;

enum DependencyOutcome {
    Ready,
    Skip(String),
}

pub struct WorkflowEngine {
    registry: Arc<WorkflowRegistry>,
    plugins: Arc<PluginManager>,
    evaluators: HashMap<String, Arc<dyn ConditionEvaluator>>,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<WorkflowRegistry>, plugins: Arc<PluginManager>) -> Self {
        Self {
            registry,
            plugins,
            evaluators: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    /// Registers a named evaluator for `custom` stage conditions.
    pub fn register_evaluator(
        &mut self,
        name: impl Into<String>,
        evaluator: Arc<dyn ConditionEvaluator>,
    ) {
        self.evaluators.insert(name.into(), evaluator);
    }

    /// Executes a workflow to completion under the caller's context.
    pub async fn execute(
        &self,
        ctx: &ScanContext,
        workflow_id: &str,
        request: WorkflowRequest,
    ) -> Result<WorkflowExecutionResult> {
        let workflow = self
            .registry
            .get(workflow_id)
            .await
            .ok_or_else(|| AegisError::WorkflowNotFound(workflow_id.to_string()))?;

        info!(
            "Executing workflow {} for {} ({})",
            workflow.id, request.artifact_path, request.artifact_kind
        );

        let started_at = chrono::Utc::now();
        let outer = ctx.with_timeout(Duration::from_secs(workflow.execution.timeout_seconds));
        let results: StageResultMap = Arc::new(RwLock::new(HashMap::new()));
        let mut errors = Vec::new();
        let mut status = WorkflowStatus::Completed;

        for stage in &workflow.stages {
            if outer.is_cancelled() {
                return Err(AegisError::Cancelled {
                    message: format!("workflow {} cancelled before stage {}", workflow.id, stage.name),
                });
            }

            // Conditions gate the stage before any dependency wait.
            match self.conditions_met(stage, &request, &results).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Stage {} skipped: conditions not met", stage.name);
                    let mut map = results.write().await;
                    map.insert(
                        stage.name.clone(),
                        StageResult::skipped("conditions not met"),
                    );
                    continue;
                }
                Err(e) => {
                    errors.push(format!("stage {} condition error: {e}", stage.name));
                    let mut map = results.write().await;
                    map.insert(
                        stage.name.clone(),
                        StageResult::skipped(format!("condition error: {e}")),
                    );
                    continue;
                }
            }

            match self.wait_for_dependencies(stage, &results, &outer).await? {
                DependencyOutcome::Ready => {}
                DependencyOutcome::Skip(reason) => {
                    debug!("Stage {} skipped: {}", stage.name, reason);
                    let mut map = results.write().await;
                    map.insert(stage.name.clone(), StageResult::skipped(reason));
                    continue;
                }
            }

            let stage_ctx = outer.with_timeout(Duration::from_secs(stage.timeout_seconds));
            let stage_result = self
                .execute_stage(&stage_ctx, &workflow, stage, &request, &results)
                .await?;

            let failed = stage_result.status == StageStatus::Failed;
            let has_critical = stage_result
                .scanner_results
                .iter()
                .flat_map(|r| r.findings.iter())
                .any(|f| f.severity == Severity::Critical);

            {
                let mut map = results.write().await;
                map.insert(stage.name.clone(), stage_result);
            }

            // Cancellation observed mid-workflow wins over every other
            // terminal state; partial results are discarded with it.
            if outer.is_cancelled() {
                errors.push(format!(
                    "workflow {} cancelled during stage {}",
                    workflow.id, stage.name
                ));
                status = WorkflowStatus::Cancelled;
                break;
            }

            if failed && workflow.execution.fail_fast {
                warn!(
                    "Workflow {} failed fast at stage {}",
                    workflow.id, stage.name
                );
                errors.push(format!("stage {} failed", stage.name));
                status = WorkflowStatus::Failed;
                break;
            }

            if has_critical && workflow.execution.stop_on_critical {
                warn!(
                    "Workflow {} halted: critical finding in stage {}",
                    workflow.id, stage.name
                );
                errors.push(format!(
                    "critical finding halted workflow at stage {}",
                    stage.name
                ));
                status = WorkflowStatus::Failed;
                break;
            }
        }

        let stages = results.read().await.clone();

        let aggregated = if status == WorkflowStatus::Completed {
            let scanner_results: Vec<_> = workflow
                .stages
                .iter()
                .filter_map(|s| stages.get(&s.name))
                .flat_map(|r| r.scanner_results.iter().cloned())
                .collect();
            // Skipped stages carry their skip reason in `errors`; only
            // executed stages contribute failed-scanner counts.
            let failed_scanners: usize = stages
                .values()
                .filter(|r| r.status != StageStatus::Skipped)
                .map(|r| r.errors.len())
                .sum();
            Some(aggregate::aggregate(
                scanner_results,
                &request.artifact_path,
                &request.artifact_kind,
                &workflow.name,
                &workflow.execution.aggregation,
                failed_scanners,
            ))
        } else {
            None
        };

        Ok(WorkflowExecutionResult {
            workflow_id: workflow.id.clone(),
            status,
            stages,
            aggregated,
            started_at,
            completed_at: chrono::Utc::now(),
            errors,
        })
    }

    async fn conditions_met(
        &self,
        stage: &Stage,
        request: &WorkflowRequest,
        results: &StageResultMap,
    ) -> Result<bool> {
        if stage.conditions.is_empty() {
            return Ok(true);
        }
        let snapshot = results.read().await.clone();
        for condition in &stage.conditions {
            if !conditions::evaluate(condition, request, &snapshot, &self.evaluators).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Blocks until every declared dependency is recorded, polling at the
    /// dependency tick and honoring cancellation and the outer deadline.
    async fn wait_for_dependencies(
        &self,
        stage: &Stage,
        results: &StageResultMap,
        ctx: &ScanContext,
    ) -> Result<DependencyOutcome> {
        if stage.depends_on.is_empty() {
            return Ok(DependencyOutcome::Ready);
        }

        loop {
            {
                let map = results.read().await;
                let recorded: Vec<_> = stage
                    .depends_on
                    .iter()
                    .filter_map(|dep| map.get(dep).map(|r| (dep, r.status)))
                    .collect();

                if recorded.len() == stage.depends_on.len() {
                    // A skipped dependency skips dependents transitively; a
                    // failed dependency cannot satisfy a hard dependency
                    // either.
                    for (dep, dep_status) in recorded {
                        match dep_status {
                            StageStatus::Completed => {}
                            StageStatus::Skipped => {
                                return Ok(DependencyOutcome::Skip(format!(
                                    "dependency {dep} was skipped"
                                )))
                            }
                            StageStatus::Failed => {
                                return Ok(DependencyOutcome::Skip(format!(
                                    "dependency {dep} failed"
                                )))
                            }
                        }
                    }
                    return Ok(DependencyOutcome::Ready);
                }
            }

            if ctx.deadline_exceeded() {
                return Err(AegisError::Timeout {
                    message: format!("stage {} timed out awaiting dependencies", stage.name),
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(DEPENDENCY_POLL_INTERVAL_MS)) => {}
                _ = ctx.cancelled() => {
                    return Err(AegisError::Cancelled {
                        message: format!("stage {} cancelled awaiting dependencies", stage.name),
                    });
                }
            }
        }
    }

    /// Resolves every rule of the stage and runs the selected scanners.
    async fn execute_stage(
        &self,
        ctx: &ScanContext,
        workflow: &Workflow,
        stage: &Stage,
        request: &WorkflowRequest,
        results: &StageResultMap,
    ) -> Result<StageResult> {
        let started_at = chrono::Utc::now();
        let started = std::time::Instant::now();
        debug!("Executing stage {} of {}", stage.name, workflow.id);

        let snapshot = results.read().await.clone();
        let mut handles: Vec<PluginHandle> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for rule in &stage.rules {
            match self.resolve_rule(rule, request, &snapshot).await {
                Ok(resolved) => {
                    for handle in resolved {
                        if !handles.iter().any(|h| h.id() == handle.id()) {
                            handles.push(handle);
                        }
                    }
                }
                Err(e) => {
                    if stage.continue_on_error {
                        errors.push(format!("rule resolution failed: {e}"));
                    } else {
                        return Ok(StageResult {
                            status: StageStatus::Failed,
                            started_at,
                            completed_at: chrono::Utc::now(),
                            duration_seconds: started.elapsed().as_secs_f64(),
                            scanner_results: vec![],
                            errors: vec![format!("rule resolution failed: {e}")],
                        });
                    }
                }
            }
        }

        if let Some(whitelist) = request.scanner_whitelist() {
            let before = handles.len();
            handles.retain(|h| whitelist.contains(&h.id()));
            if handles.len() < before {
                debug!(
                    "Scanner whitelist trimmed stage {} from {} to {} scanners",
                    stage.name,
                    before,
                    handles.len()
                );
            }
        }

        let outcomes = if stage.parallel {
            self.run_parallel(ctx, workflow, &handles, request).await
        } else {
            self.run_sequential(ctx, &handles, request).await
        };

        let mut scanner_results = Vec::new();
        let mut scan_failed = false;
        for (scanner, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    self.plugins.record_outcome(&scanner, true).await;
                    scanner_results.push(result);
                }
                Err(e) => {
                    self.plugins.record_outcome(&scanner, false).await;
                    let message = format!("{scanner}: {e}");
                    warn!("Scanner failure in stage {}: {}", stage.name, message);
                    errors.push(message);
                    if !stage.continue_on_error {
                        scan_failed = true;
                    }
                }
            }
        }

        let status = if scan_failed {
            StageStatus::Failed
        } else {
            StageStatus::Completed
        };

        Ok(StageResult {
            status,
            started_at,
            completed_at: chrono::Utc::now(),
            duration_seconds: started.elapsed().as_secs_f64(),
            scanner_results,
            errors,
        })
    }

    async fn run_sequential(
        &self,
        ctx: &ScanContext,
        handles: &[PluginHandle],
        request: &WorkflowRequest,
    ) -> Vec<(String, std::result::Result<crate::models::ScanResult, ScannerError>)> {
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            let outcome = handle
                .adapter
                .scan(ctx, &request.artifact_path, &request.artifact_kind)
                .await;
            outcomes.push((handle.id().to_string(), outcome));
        }
        outcomes
    }

    /// Task-per-scanner fan-out bounded by the workflow's concurrency limit.
    async fn run_parallel(
        &self,
        ctx: &ScanContext,
        workflow: &Workflow,
        handles: &[PluginHandle],
        request: &WorkflowRequest,
    ) -> Vec<(String, std::result::Result<crate::models::ScanResult, ScannerError>)> {
        let semaphore = Arc::new(Semaphore::new(workflow.execution.max_concurrency.max(1)));
        let mut set = JoinSet::new();

        for handle in handles.iter().cloned() {
            let ctx = ctx.clone();
            let path = request.artifact_path.clone();
            let kind = request.artifact_kind.clone();
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire().await;
                let id = handle.id().to_string();
                let outcome = handle.adapter.scan(&ctx, &path, &kind).await;
                (id, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    // A panicking scan task is isolated to its scanner.
                    warn!("Scanner task panicked: {}", e);
                    outcomes.push((
                        "unknown".to_string(),
                        Err(ScannerError::Process {
                            scanner: "unknown".to_string(),
                            exit_code: -1,
                            stderr_head: format!("scan task panicked: {e}"),
                        }),
                    ));
                }
            }
        }
        // Deterministic recording order regardless of completion order.
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }

    /// Resolves a scanner rule into concrete plugin handles.
    fn resolve_rule<'a>(
        &'a self,
        rule: &'a ScannerRule,
        request: &'a WorkflowRequest,
        stage_results: &'a HashMap<String, StageResult>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PluginHandle>>> + Send + 'a>> {
        Box::pin(async move {
            match rule {
                ScannerRule::Fixed { scanners } => {
                    let mut handles = Vec::with_capacity(scanners.len());
                    for id in scanners {
                        match self.plugins.get(id).await {
                            Some(handle) => handles.push(handle),
                            None => {
                                return Err(AegisError::ConfigurationError(format!(
                                    "unknown scanner: {id}"
                                )))
                            }
                        }
                    }
                    Ok(handles)
                }
                ScannerRule::Strategy {
                    strategy,
                    request: selection,
                    fallback,
                } => {
                    let mut selection = selection.clone();
                    selection.artifact_kind = request.artifact_kind.clone();
                    let selected = self.plugins.select_scanners(strategy, &selection).await?;
                    if selected.is_empty() {
                        if let Some(fallback) = fallback.as_deref() {
                            debug!(
                                "Strategy {} selected nothing; using fallback rule",
                                strategy
                            );
                            return self.resolve_rule(fallback, request, stage_results).await;
                        }
                    }
                    Ok(selected)
                }
                ScannerRule::Conditional {
                    condition,
                    rule,
                    fallback,
                } => {
                    let matched = conditions::evaluate(
                        condition,
                        request,
                        stage_results,
                        &self.evaluators,
                    )
                    .await?;
                    if matched {
                        self.resolve_rule(rule, request, stage_results).await
                    } else if let Some(fallback) = fallback.as_deref() {
                        self.resolve_rule(fallback, request, stage_results).await
                    } else {
                        Ok(vec![])
                    }
                }
            }
        })
    }
}
