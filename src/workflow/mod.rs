//! Declarative scan workflows: data model, configuration document loading,
//! registration-time validation, and the staged DAG executor.
//!
//! A workflow binds artifact kinds to an ordered list of stages. Each stage
//! groups scanner rules under shared parallelism, timeout, and error policy;
//! the engine is a pure interpreter over this data.

pub mod conditions;
pub mod config;
pub mod engine;
pub mod registry;

pub use conditions::{ConditionEvaluator, ConditionKind, ConditionOperator, StageCondition};
pub use engine::WorkflowEngine;
pub use registry::WorkflowRegistry;

use crate::models::{AggregatedResult, ScanResult};
use crate::plugins::strategy::SelectionRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a stage picks its scanners
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScannerRule {
    /// Invoke the enumerated plugins directly.
    Fixed { scanners: Vec<String> },
    /// Delegate to a named selection strategy.
    Strategy {
        strategy: String,
        #[serde(default)]
        request: SelectionRequest,
        #[serde(default)]
        fallback: Option<Box<ScannerRule>>,
    },
    /// Evaluate a condition, then dispatch to one of two rules.
    Conditional {
        condition: StageCondition,
        rule: Box<ScannerRule>,
        #[serde(default)]
        fallback: Option<Box<ScannerRule>>,
    },
}

impl ScannerRule {
    /// All plugin ids a Fixed rule (recursively) can name. Used for
    /// registration-time validation of unknown scanner names.
    pub fn fixed_scanner_ids(&self) -> Vec<&str> {
        match self {
            ScannerRule::Fixed { scanners } => scanners.iter().map(String::as_str).collect(),
            ScannerRule::Strategy { fallback, .. } => fallback
                .as_deref()
                .map(ScannerRule::fixed_scanner_ids)
                .unwrap_or_default(),
            ScannerRule::Conditional { rule, fallback, .. } => {
                let mut ids = rule.fixed_scanner_ids();
                if let Some(fb) = fallback.as_deref() {
                    ids.extend(fb.fixed_scanner_ids());
                }
                ids
            }
        }
    }
}

/// One unit of execution within a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<ScannerRule>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default = "default_stage_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<StageCondition>,
}

fn default_stage_timeout() -> u64 {
    crate::constants::DEFAULT_STAGE_TIMEOUT_SECS
}

/// Retry behavior applied by the performance layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::constants::DEFAULT_MAX_RETRIES,
            backoff_factor: 2.0,
            initial_delay_ms: crate::constants::RETRY_BACKOFF_MS,
            max_delay_ms: 30_000,
        }
    }
}

/// How per-scanner results merge into the aggregate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    Merge,
    Union,
    Weighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub strategy: AggregationStrategy,
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default = "default_true")]
    pub deduplicate: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            strategy: AggregationStrategy::Merge,
            weights: HashMap::new(),
            deduplicate: true,
        }
    }
}

/// Per-workflow execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_workflow_timeout")]
    pub timeout_seconds: u64,
    /// Abort the workflow on the first failed stage.
    #[serde(default)]
    pub fail_fast: bool,
    /// Halt remaining stages once a stage records a critical finding.
    #[serde(default)]
    pub stop_on_critical: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_workflow_timeout() -> u64 {
    crate::constants::DEFAULT_WORKFLOW_TIMEOUT_SECS
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_seconds: default_workflow_timeout(),
            fail_fast: false,
            stop_on_critical: false,
            retry: RetryPolicy::default(),
            aggregation: AggregationConfig::default(),
        }
    }
}

/// Declarative description of a scan procedure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Stable slug used for lookup and tenant gating.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub artifact_kinds: Vec<String>,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub policy_path: Option<String>,
    #[serde(default)]
    pub notification_channels: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Workflow {
    pub fn supports_kind(&self, kind: &str) -> bool {
        self.artifact_kinds.iter().any(|k| k == kind)
    }
}

/// Input to one workflow execution
#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub artifact_path: String,
    pub artifact_kind: String,
    pub options: HashMap<String, String>,
}

impl WorkflowRequest {
    pub fn new(artifact_path: impl Into<String>, artifact_kind: impl Into<String>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            artifact_kind: artifact_kind.into(),
            options: HashMap::new(),
        }
    }

    /// Restricts execution to the named scanners (tenant whitelist).
    pub fn with_scanner_whitelist(mut self, scanners: &[String]) -> Self {
        self.options
            .insert("scanner_whitelist".to_string(), scanners.join(","));
        self
    }

    /// Parsed scanner whitelist, when one was attached.
    pub fn scanner_whitelist(&self) -> Option<Vec<&str>> {
        self.options
            .get("scanner_whitelist")
            .map(|raw| raw.split(',').filter(|s| !s.is_empty()).collect())
    }
}

/// Stage lifecycle as recorded in the execution context
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub status: StageStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
    pub duration_seconds: f64,
    pub scanner_results: Vec<ScanResult>,
    pub errors: Vec<String>,
}

impl StageResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            status: StageStatus::Skipped,
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            scanner_results: vec![],
            errors: vec![reason.into()],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Outcome of one workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub stages: HashMap<String, StageResult>,
    pub aggregated: Option<AggregatedResult>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
    pub errors: Vec<String>,
}
