//! Workflow configuration document.
//!
//! Loaded once at startup from a JSON file. Workflows may spell out explicit
//! stages, or use the shorthand `scanners` list which expands into a single
//! stage whose parallelism and error policy come from the execution block.

use super::{AggregationConfig, ExecutionConfig, ScannerRule, Stage, Workflow};
use crate::{AegisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub version: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub workflows: Vec<WorkflowEntry>,
    #[serde(default)]
    pub policies: PolicySection,
    #[serde(default)]
    pub default_execution: DefaultExecution,
    #[serde(default)]
    pub tenants: TenantSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub maintainer: String,
    #[serde(default)]
    pub last_updated: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEntry {
    pub name: String,
    pub artifact_types: Vec<String>,
    /// Shorthand scanner list; mutually exclusive with `stages`.
    #[serde(default)]
    pub scanners: Vec<ScannerRef>,
    /// Explicit stage list; takes precedence over `scanners`.
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub policy_path: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub execution: WorkflowExecutionEntry,
    #[serde(default)]
    pub notifications: NotificationEntry,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionEntry {
    /// `parallel` or `sequential`.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// `continue` or `stop_on_critical`.
    #[serde(default = "default_failure_policy")]
    pub failure_policy: String,
}

fn default_strategy() -> String {
    "parallel".to_string()
}

fn default_failure_policy() -> String {
    "continue".to_string()
}

impl Default for WorkflowExecutionEntry {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            failure_policy: default_failure_policy(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationEntry {
    #[serde(default)]
    pub on_violation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySection {
    #[serde(default = "default_policy_base_url")]
    pub base_url: String,
    #[serde(default = "default_policy_ttl")]
    pub default_ttl: u64,
    #[serde(default = "default_evaluation_mode")]
    pub evaluation_mode: String,
}

fn default_policy_base_url() -> String {
    "http://localhost:8181".to_string()
}

fn default_policy_ttl() -> u64 {
    300
}

fn default_evaluation_mode() -> String {
    "enforcing".to_string()
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            base_url: default_policy_base_url(),
            default_ttl: default_policy_ttl(),
            evaluation_mode: default_evaluation_mode(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultExecution {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_failure_policy")]
    pub failure_policy: String,
    #[serde(default = "default_true")]
    pub notify_on_violation: bool,
    #[serde(default)]
    pub triggers: Vec<String>,
}

impl Default for DefaultExecution {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            failure_policy: default_failure_policy(),
            notify_on_violation: true,
            triggers: vec!["on_submit".to_string()],
        }
    }
}

/// Per-tenant override block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantOverride {
    /// Workflow names explicitly disabled for the tenant.
    #[serde(default)]
    pub disabled_workflows: Vec<String>,
    /// When set, only these scanners may run for the tenant.
    #[serde(default)]
    pub scanner_whitelist: Option<Vec<String>>,
    #[serde(default)]
    pub execution_strategy: Option<String>,
    #[serde(default)]
    pub policy_path: Option<String>,
    #[serde(default)]
    pub notification_channels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSection {
    #[serde(default = "default_true")]
    pub allow_override: bool,
    #[serde(default = "default_evaluation_mode")]
    pub default_policy_mode: String,
    #[serde(default)]
    pub overrides: HashMap<String, TenantOverride>,
}

impl Default for TenantSection {
    fn default() -> Self {
        Self {
            allow_override: true,
            default_policy_mode: default_evaluation_mode(),
            overrides: HashMap::new(),
        }
    }
}

impl ConfigDocument {
    /// Parses a document from JSON text.
    pub fn from_json(raw: &str) -> Result<Self> {
        let document: ConfigDocument = serde_json::from_str(raw)?;
        if document.version.is_empty() {
            return Err(AegisError::ConfigurationError(
                "configuration document missing version".to_string(),
            ));
        }
        Ok(document)
    }

    /// Loads and parses a document from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            AegisError::ConfigurationError(format!(
                "cannot read workflow configuration {}: {e}",
                path.display()
            ))
        })?;
        let document = Self::from_json(&raw)?;
        info!(
            "Loaded workflow configuration {} (version {}, {} workflows)",
            path.display(),
            document.version,
            document.workflows.len()
        );
        Ok(document)
    }

    /// Expands every entry into the internal workflow model.
    pub fn to_workflows(&self) -> Result<Vec<Workflow>> {
        self.workflows.iter().map(|e| e.to_workflow()).collect()
    }
}

impl WorkflowEntry {
    fn to_workflow(&self) -> Result<Workflow> {
        let parallel = self.execution.strategy == "parallel";
        let stop_on_critical = self.execution.failure_policy == "stop_on_critical";

        let stages = if !self.stages.is_empty() {
            self.stages.clone()
        } else if !self.scanners.is_empty() {
            // Shorthand: one stage running every named scanner.
            vec![Stage {
                name: "scan".to_string(),
                description: format!("{} scan stage", self.name),
                rules: vec![ScannerRule::Fixed {
                    scanners: self.scanners.iter().map(|s| s.name.clone()).collect(),
                }],
                parallel,
                continue_on_error: self.execution.failure_policy == "continue",
                timeout_seconds: crate::constants::DEFAULT_STAGE_TIMEOUT_SECS,
                depends_on: vec![],
                conditions: vec![],
            }]
        } else {
            return Err(AegisError::ConfigurationError(format!(
                "workflow {} declares neither scanners nor stages",
                self.name
            )));
        };

        Ok(Workflow {
            id: slugify(&self.name),
            name: self.name.clone(),
            description: self.description.clone(),
            artifact_kinds: self.artifact_types.clone(),
            stages,
            execution: ExecutionConfig {
                stop_on_critical,
                aggregation: AggregationConfig::default(),
                ..ExecutionConfig::default()
            },
            policy_path: self.policy_path.clone(),
            notification_channels: self.notifications.on_violation.clone(),
            enabled: self.enabled,
        })
    }
}

/// `DockerWorkflow` -> `docker-workflow`; lossy but stable.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                slug.push('-');
            }
            slug.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_ascii_alphanumeric() {
            slug.push(c);
            prev_lower = true;
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
            prev_lower = false;
        }
    }
    slug.trim_end_matches('-').to_string()
}
