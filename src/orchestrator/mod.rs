//! Scan orchestrator: the single entry point driving a job through workflow
//! selection, tenant gating, workflow execution, policy evaluation, status
//! derivation, notification, and persistence.

pub mod circuit_breaker;
pub mod performance;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use performance::{PerformanceConfig, PerformanceLayer, ScanMetricsSnapshot};

use crate::models::{JobResult, JobStatus, ScanJob};
use crate::notify::{NotificationService, ViolationNotification};
use crate::policy::{PolicyEvaluator, PolicyInput};
use crate::scanners::ScanContext;
use crate::store::{OutputStore, ScanOutputRecord};
use crate::tenant::TenantConfigService;
use crate::workflow::{Workflow, WorkflowEngine, WorkflowRequest, WorkflowStatus};
use crate::AegisError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct ScanOrchestrator {
    engine: Arc<WorkflowEngine>,
    tenants: Arc<TenantConfigService>,
    policy: Arc<dyn PolicyEvaluator>,
    notifications: Arc<NotificationService>,
    store: Arc<dyn OutputStore>,
    performance: Arc<PerformanceLayer>,
    default_policy_path: String,
}

impl ScanOrchestrator {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        tenants: Arc<TenantConfigService>,
        policy: Arc<dyn PolicyEvaluator>,
        notifications: Arc<NotificationService>,
        store: Arc<dyn OutputStore>,
    ) -> Self {
        Self {
            engine,
            tenants,
            policy,
            notifications,
            store,
            performance: Arc::new(PerformanceLayer::new(PerformanceConfig::default())),
            default_policy_path: "/v1/data/aegis/scan".to_string(),
        }
    }

    pub fn with_performance(mut self, config: PerformanceConfig) -> Self {
        self.performance = Arc::new(PerformanceLayer::new(config));
        self
    }

    pub fn with_default_policy_path(mut self, path: impl Into<String>) -> Self {
        self.default_policy_path = path.into();
        self
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn performance(&self) -> &Arc<PerformanceLayer> {
        &self.performance
    }

    /// Starts background maintenance: health sweeps and cache eviction.
    pub async fn start_background_tasks(&self) {
        self.engine.plugins().start_health_checks().await;
        Arc::clone(&self.performance).start_cache_sweep().await;
    }

    pub async fn shutdown(&self) {
        info!("Shutting down scan orchestrator");
        self.performance.shutdown().await;
        self.engine.plugins().shutdown().await;
        info!("Scan orchestrator shutdown complete");
    }

    /// Drives one job through the full pipeline.
    ///
    /// Always returns a `JobResult` with a terminal status; every non-fatal
    /// issue encountered along the way is appended to its `errors`.
    pub async fn execute_job(&self, ctx: &ScanContext, job: ScanJob) -> JobResult {
        debug!("Executing job {} for tenant {}", job.job_id, job.tenant_id);
        let mut result = JobResult::started(job.clone());

        // Workflow selection: explicit name first, else first workflow
        // matching the artifact kind.
        let workflow = match self.select_workflow(&job).await {
            Ok(workflow) => workflow,
            Err(e) => {
                result.errors.push(e.to_string());
                let result = result.finish(JobStatus::Failed);
                return self.persist(result).await;
            }
        };
        result.workflow_id = Some(workflow.id.clone());

        // Tenant gate: a disabled workflow blocks the job before any scanner
        // runs and without touching the policy service.
        if !self
            .tenants
            .is_workflow_enabled(&job.tenant_id, &workflow)
            .await
        {
            info!(
                "Workflow {} disabled for tenant {}; blocking job {}",
                workflow.id, job.tenant_id, job.job_id
            );
            result.errors.push(
                AegisError::TenantDisabled {
                    tenant: job.tenant_id.clone(),
                    workflow: workflow.id.clone(),
                }
                .to_string(),
            );
            let result = result.finish(JobStatus::Blocked);
            return self.persist(result).await;
        }

        // Workflow execution, honoring the tenant's scanner whitelist.
        let mut request = WorkflowRequest::new(&job.artifact_path, &job.artifact_kind);
        if let Some(whitelist) = self.tenants.scanner_whitelist(&job.tenant_id).await {
            request = request.with_scanner_whitelist(&whitelist);
        }
        let execution = match self.engine.execute(ctx, &workflow.id, request).await {
            Ok(execution) => execution,
            Err(AegisError::Cancelled { message }) => {
                // Partial results are discarded on cancellation.
                result.errors.push(format!("cancelled: {message}"));
                let result = result.finish(JobStatus::Failed);
                return self.persist(result).await;
            }
            Err(e) => {
                result.errors.push(e.to_string());
                let result = result.finish(JobStatus::Failed);
                return self.persist(result).await;
            }
        };

        if execution.status != WorkflowStatus::Completed {
            result.errors.push(
                AegisError::WorkflowExecution {
                    workflow: workflow.id.clone(),
                    message: execution.errors.join("; "),
                }
                .to_string(),
            );
            let result = result.finish(JobStatus::Failed);
            return self.persist(result).await;
        }

        let Some(aggregated) = execution.aggregated.clone() else {
            result
                .errors
                .push("workflow completed without aggregated result".to_string());
            let result = result.finish(JobStatus::Failed);
            return self.persist(result).await;
        };
        result.aggregated = Some(aggregated.clone());

        // Policy evaluation. The policy path resolves tenant override first,
        // then the workflow default, then the system default.
        let policy_path = match self.tenants.policy_path(&job.tenant_id).await {
            Some(path) => path,
            None => workflow
                .policy_path
                .clone()
                .unwrap_or_else(|| self.default_policy_path.clone()),
        };
        let input = PolicyInput::from_aggregated(&job, &workflow.id, &workflow.name, &aggregated);

        let status = match self.policy.evaluate(&policy_path, &input).await {
            Ok(decision) => {
                let status = JobStatus::from_policy_action(&decision.action);
                result.decision = Some(decision);
                status
            }
            Err(e) => {
                error!("Policy evaluation failed for job {}: {}", job.job_id, e);
                result.errors.push(e.to_string());
                JobStatus::PolicyError
            }
        };

        let mut result = result.finish(status);

        // Violation notifications for every non-allow outcome.
        if matches!(
            status,
            JobStatus::Blocked | JobStatus::Quarantined | JobStatus::CompletedWithWarnings
        ) {
            if let Some(notification) = ViolationNotification::from_job(&result) {
                let channels = match self.tenants.notification_channels(&job.tenant_id).await {
                    Some(channels) => channels,
                    None => workflow.notification_channels.clone(),
                };
                let errors = self.notifications.dispatch(&notification, &channels).await;
                result.errors.extend(errors);
            }
        }

        self.persist(result).await
    }

    /// Performance-optimized entry point: cache, circuit breaker, bounded
    /// concurrency, and retries around [`Self::execute_job`].
    pub async fn execute_job_optimized(&self, ctx: &ScanContext, job: ScanJob) -> JobResult {
        self.performance.check_memory_pressure();

        let workflow_key = job.workflow_name.clone().unwrap_or_else(|| "auto".to_string());
        let cache_key = PerformanceLayer::cache_key(&job, &workflow_key);

        if let Some(cached) = self.performance.cache_get(&cache_key).await {
            debug!("Job {} served from result cache", job.job_id);
            let mut result = JobResult::started(job);
            result.aggregated = Some(cached.aggregated);
            // The cached terminal status is replayed as-is.
            return result.finish(cached.status);
        }

        let breaker_key = PerformanceLayer::breaker_key(&job);
        let breaker = self.performance.breaker(&breaker_key).await;
        if !breaker.should_allow_request().await {
            self.performance.record_circuit_break();
            let mut result = JobResult::started(job);
            result
                .errors
                .push(AegisError::CircuitOpen { key: breaker_key }.to_string());
            return result.finish(JobStatus::Failed);
        }

        let _slot = match self.performance.acquire_slot(ctx).await {
            Ok(permit) => permit,
            Err(e) => {
                let mut result = JobResult::started(job);
                result.errors.push(e.to_string());
                return result.finish(JobStatus::Failed);
            }
        };

        self.performance.record_scan_started();
        let started = Instant::now();

        let mut attempt: u32 = 0;
        let result = loop {
            let result = self.execute_job(ctx, job.clone()).await;
            if result.status != JobStatus::Failed {
                break result;
            }
            attempt += 1;
            if attempt > self.performance.max_retries() || ctx.is_cancelled() {
                break result;
            }
            let delay = self.performance.retry_delay(attempt);
            debug!(
                "Job {} failed; retry {}/{} after {:?}",
                job.job_id,
                attempt,
                self.performance.max_retries(),
                delay
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => break result,
            }
        };

        let success = !matches!(result.status, JobStatus::Failed | JobStatus::PolicyError);
        if success {
            breaker.record_success().await;
            if let Some(aggregated) = &result.aggregated {
                self.performance
                    .cache_put(cache_key, result.status, aggregated.clone())
                    .await;
            }
        } else {
            breaker.record_failure().await;
        }
        self.performance
            .record_scan_finished(started.elapsed(), success)
            .await;

        result
    }

    /// Fans out one task per job, each under the same performance gating.
    pub async fn execute_jobs_parallel(
        self: &Arc<Self>,
        ctx: &ScanContext,
        jobs: Vec<ScanJob>,
    ) -> Vec<JobResult> {
        let mut set = JoinSet::new();
        for (index, job) in jobs.into_iter().enumerate() {
            let orchestrator = Arc::clone(self);
            let ctx = ctx.clone();
            set.spawn(async move {
                let result = orchestrator.execute_job_optimized(&ctx, job).await;
                (index, result)
            });
        }

        let mut indexed = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => indexed.push(pair),
                Err(e) => error!("Job task panicked: {}", e),
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    /// Explicit workflow by name or id, else first registered workflow for
    /// the artifact kind (preferring one enabled for the tenant).
    async fn select_workflow(&self, job: &ScanJob) -> crate::Result<Arc<Workflow>> {
        let registry = self.engine.registry();

        if let Some(name) = &job.workflow_name {
            if let Some(workflow) = registry.get(name).await {
                return Ok(workflow);
            }
            for id in registry.ids().await {
                if let Some(workflow) = registry.get(&id).await {
                    if &workflow.name == name {
                        return Ok(workflow);
                    }
                }
            }
            return Err(AegisError::WorkflowNotFound(name.clone()));
        }

        let candidates = registry.all_for_kind(&job.artifact_kind).await;
        if candidates.is_empty() {
            return Err(AegisError::NoWorkflow(job.artifact_kind.clone()));
        }
        for candidate in &candidates {
            if self
                .tenants
                .is_workflow_enabled(&job.tenant_id, candidate)
                .await
            {
                return Ok(Arc::clone(candidate));
            }
        }
        // Every matching workflow is tenant-disabled; hand the first to the
        // gate so the job blocks with a clear reason.
        Ok(Arc::clone(&candidates[0]))
    }

    /// Persists scanner outputs and the final status; persistence errors are
    /// appended to the job's error list and never change its status.
    async fn persist(&self, mut result: JobResult) -> JobResult {
        if let Some(aggregated) = &result.aggregated {
            if !aggregated.scanner_results.is_empty() {
                let records: Vec<ScanOutputRecord> = aggregated
                    .scanner_results
                    .iter()
                    .map(|scan| {
                        let mut summary: HashMap<String, serde_json::Value> = HashMap::new();
                        summary.insert(
                            "severity".to_string(),
                            serde_json::to_value(&scan.summary).unwrap_or_default(),
                        );
                        summary.insert(
                            "duration_seconds".to_string(),
                            serde_json::json!(scan.duration_seconds),
                        );
                        summary.insert(
                            "findings".to_string(),
                            serde_json::json!(scan.findings.len()),
                        );
                        ScanOutputRecord {
                            tool: scan.scanner.clone(),
                            output_raw: serde_json::to_vec_pretty(scan).unwrap_or_default(),
                            summary,
                        }
                    })
                    .collect();

                if let Err(e) = self
                    .store
                    .save_scan_results(&result.job.job_id, &records)
                    .await
                {
                    warn!("Persisting scan results for {} failed: {}", result.job.job_id, e);
                    result.errors.push(e.to_string());
                }
            }
        }

        if let Err(e) = self
            .store
            .mark_job_completed(&result.job.job_id, &result.status.to_string())
            .await
        {
            warn!("Marking job {} completed failed: {}", result.job.job_id, e);
            result.errors.push(e.to_string());
        }

        info!(
            "Job {} finished with status {} ({} errors)",
            result.job.job_id,
            result.status,
            result.errors.len()
        );
        result
    }
}
