//! Workflow registry: lookup by id, first-match-by-kind selection, and
//! registration-time validation of the stage dependency graph.

use super::{ExecutionConfig, ScannerRule, Stage, Workflow};
use crate::plugins::strategy::SelectionRequest;
use crate::{AegisError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<String, Arc<Workflow>>>,
    /// Insertion order; first-match workflow selection depends on it.
    order: RwLock<Vec<String>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a workflow. A new version under an existing
    /// id replaces the object wholesale.
    pub async fn register(&self, workflow: Workflow) -> Result<()> {
        validate_structure(&workflow)?;

        let id = workflow.id.clone();
        let mut workflows = self.workflows.write().await;
        let mut order = self.order.write().await;
        if !order.contains(&id) {
            order.push(id.clone());
        }
        info!("Registered workflow {} ({} stages)", id, workflow.stages.len());
        workflows.insert(id, Arc::new(workflow));
        Ok(())
    }

    /// Rejects workflows whose fixed rules name scanners the plugin registry
    /// does not hold. Called at startup, after adapters are registered.
    pub async fn validate_scanners(&self, known_ids: &[String]) -> Result<()> {
        let workflows = self.workflows.read().await;
        for workflow in workflows.values() {
            for stage in &workflow.stages {
                for rule in &stage.rules {
                    for id in rule.fixed_scanner_ids() {
                        if !known_ids.iter().any(|k| k == id) {
                            return Err(AegisError::ConfigurationError(format!(
                                "workflow {} stage {} names unknown scanner {}",
                                workflow.id, stage.name, id
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Workflow>> {
        let workflows = self.workflows.read().await;
        workflows.get(id).cloned()
    }

    /// First registered workflow supporting the kind, regardless of tenant.
    pub async fn first_for_kind(&self, kind: &str) -> Option<Arc<Workflow>> {
        let order = self.order.read().await;
        let workflows = self.workflows.read().await;
        for id in order.iter() {
            if let Some(workflow) = workflows.get(id) {
                if workflow.enabled && workflow.supports_kind(kind) {
                    return Some(Arc::clone(workflow));
                }
            }
        }
        None
    }

    /// All registered workflows supporting the kind, in registration order.
    pub async fn all_for_kind(&self, kind: &str) -> Vec<Arc<Workflow>> {
        let order = self.order.read().await;
        let workflows = self.workflows.read().await;
        order
            .iter()
            .filter_map(|id| workflows.get(id))
            .filter(|w| w.enabled && w.supports_kind(kind))
            .cloned()
            .collect()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.order.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.workflows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Structural validation: unique stage names, no dangling dependencies, no
/// dependency cycles.
fn validate_structure(workflow: &Workflow) -> Result<()> {
    if workflow.id.is_empty() {
        return Err(AegisError::ConfigurationError(
            "workflow id cannot be empty".to_string(),
        ));
    }
    if workflow.stages.is_empty() {
        return Err(AegisError::ConfigurationError(format!(
            "workflow {} declares no stages",
            workflow.id
        )));
    }

    let mut names = HashSet::new();
    for stage in &workflow.stages {
        if !names.insert(stage.name.as_str()) {
            return Err(AegisError::ConfigurationError(format!(
                "workflow {} has duplicate stage name {}",
                workflow.id, stage.name
            )));
        }
    }

    for stage in &workflow.stages {
        for dep in &stage.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(AegisError::ConfigurationError(format!(
                    "workflow {} stage {} depends on unknown stage {}",
                    workflow.id, stage.name, dep
                )));
            }
            if dep == &stage.name {
                return Err(AegisError::ConfigurationError(format!(
                    "workflow {} stage {} depends on itself",
                    workflow.id, stage.name
                )));
            }
        }
    }

    detect_cycles(workflow)?;
    Ok(())
}

/// Depth-first cycle detection over the dependency graph.
fn detect_cycles(workflow: &Workflow) -> Result<()> {
    let deps: HashMap<&str, &Vec<String>> = workflow
        .stages
        .iter()
        .map(|s| (s.name.as_str(), &s.depends_on))
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        deps: &HashMap<&'a str, &'a Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> bool {
        match marks.get(node) {
            Some(Mark::Done) => return true,
            Some(Mark::Visiting) => return false,
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        if let Some(children) = deps.get(node) {
            for child in children.iter() {
                if !visit(child.as_str(), deps, marks) {
                    return false;
                }
            }
        }
        marks.insert(node, Mark::Done);
        true
    }

    let mut marks = HashMap::new();
    for stage in &workflow.stages {
        if !visit(stage.name.as_str(), &deps, &mut marks) {
            return Err(AegisError::ConfigurationError(format!(
                "workflow {} has a cyclic stage dependency involving {}",
                workflow.id, stage.name
            )));
        }
    }
    Ok(())
}

/// Stock workflows covering the supported artifact kinds.
///
/// Deployments normally load workflows from the configuration document;
/// these built-ins keep the service useful without one.
pub fn builtin_workflows() -> Vec<Workflow> {
    vec![
        Workflow {
            id: "docker-workflow".to_string(),
            name: "DockerWorkflow".to_string(),
            description: "Container image scanning: inventory, vulnerabilities, secrets"
                .to_string(),
            artifact_kinds: vec!["docker".to_string()],
            stages: vec![
                Stage {
                    name: "inventory".to_string(),
                    description: "SBOM generation".to_string(),
                    rules: vec![ScannerRule::Fixed {
                        scanners: vec!["syft".to_string()],
                    }],
                    parallel: false,
                    continue_on_error: true,
                    timeout_seconds: 300,
                    depends_on: vec![],
                    conditions: vec![],
                },
                Stage {
                    name: "vulnerabilities".to_string(),
                    description: "CVE detection over the image".to_string(),
                    rules: vec![ScannerRule::Fixed {
                        scanners: vec!["trivy".to_string(), "grype".to_string()],
                    }],
                    parallel: true,
                    continue_on_error: false,
                    timeout_seconds: 600,
                    depends_on: vec!["inventory".to_string()],
                    conditions: vec![],
                },
                Stage {
                    name: "secrets".to_string(),
                    description: "Credential detection in image layers".to_string(),
                    rules: vec![ScannerRule::Strategy {
                        strategy: "security_focused".to_string(),
                        request: SelectionRequest {
                            required_capabilities: vec![
                                crate::plugins::CapabilityKind::SecretDetection,
                            ],
                            max_scanners: Some(2),
                            ..Default::default()
                        },
                        fallback: Some(Box::new(ScannerRule::Fixed {
                            scanners: vec!["trufflehog".to_string()],
                        })),
                    }],
                    parallel: true,
                    continue_on_error: true,
                    timeout_seconds: 600,
                    depends_on: vec![],
                    conditions: vec![],
                },
            ],
            execution: ExecutionConfig::default(),
            policy_path: Some("/v1/data/policies/docker".to_string()),
            notification_channels: vec!["slack".to_string()],
            enabled: true,
        },
        Workflow {
            id: "python-workflow".to_string(),
            name: "PythonWorkflow".to_string(),
            description: "PyPI package scanning: static analysis, dependencies, secrets"
                .to_string(),
            artifact_kinds: vec!["pypi".to_string()],
            stages: vec![Stage {
                name: "analysis".to_string(),
                description: "Static analysis and dependency audit".to_string(),
                rules: vec![ScannerRule::Fixed {
                    scanners: vec![
                        "bandit".to_string(),
                        "osv-scanner".to_string(),
                        "trufflehog".to_string(),
                    ],
                }],
                parallel: true,
                continue_on_error: true,
                timeout_seconds: 600,
                depends_on: vec![],
                conditions: vec![],
            }],
            execution: ExecutionConfig::default(),
            policy_path: Some("/v1/data/policies/python".to_string()),
            notification_channels: vec!["slack".to_string()],
            enabled: true,
        },
        Workflow {
            id: "npm-workflow".to_string(),
            name: "NpmWorkflow".to_string(),
            description: "npm package scanning: audit, OSV lookup, secrets".to_string(),
            artifact_kinds: vec!["npm".to_string()],
            stages: vec![Stage {
                name: "audit".to_string(),
                description: "Dependency audit and secret detection".to_string(),
                rules: vec![ScannerRule::Fixed {
                    scanners: vec![
                        "npm-audit".to_string(),
                        "osv-scanner".to_string(),
                        "gitleaks".to_string(),
                    ],
                }],
                parallel: true,
                continue_on_error: true,
                timeout_seconds: 600,
                depends_on: vec![],
                conditions: vec![],
            }],
            execution: ExecutionConfig::default(),
            policy_path: Some("/v1/data/policies/npm".to_string()),
            notification_channels: vec!["slack".to_string()],
            enabled: true,
        },
        Workflow {
            id: "generic-workflow".to_string(),
            name: "GenericWorkflow".to_string(),
            description: "Fallback scanning for uncategorized artifacts".to_string(),
            artifact_kinds: vec![
                "generic".to_string(),
                "filesystem".to_string(),
                "maven".to_string(),
                "helm".to_string(),
            ],
            stages: vec![Stage {
                name: "baseline".to_string(),
                description: "Strategy-selected baseline scan".to_string(),
                rules: vec![ScannerRule::Strategy {
                    strategy: "balanced".to_string(),
                    request: SelectionRequest::default(),
                    fallback: None,
                }],
                parallel: true,
                continue_on_error: true,
                timeout_seconds: 600,
                depends_on: vec![],
                conditions: vec![],
            }],
            execution: ExecutionConfig::default(),
            policy_path: None,
            notification_channels: vec!["slack".to_string()],
            enabled: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, depends_on: &[&str]) -> Stage {
        Stage {
            name: name.to_string(),
            description: String::new(),
            rules: vec![ScannerRule::Fixed {
                scanners: vec!["trivy".to_string()],
            }],
            parallel: false,
            continue_on_error: false,
            timeout_seconds: 60,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            conditions: vec![],
        }
    }

    fn workflow(id: &str, stages: Vec<Stage>) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            artifact_kinds: vec!["docker".to_string()],
            stages,
            execution: ExecutionConfig::default(),
            policy_path: None,
            notification_channels: vec![],
            enabled: true,
        }
    }

    #[tokio::test]
    async fn registers_valid_workflow() {
        let registry = WorkflowRegistry::new();
        registry
            .register(workflow("wf", vec![stage("a", &[]), stage("b", &["a"])]))
            .await
            .unwrap();
        assert!(registry.get("wf").await.is_some());
    }

    #[tokio::test]
    async fn rejects_cyclic_dependencies() {
        let registry = WorkflowRegistry::new();
        let err = registry
            .register(workflow(
                "cyclic",
                vec![stage("a", &["b"]), stage("b", &["c"]), stage("c", &["a"])],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AegisError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn rejects_dangling_dependency() {
        let registry = WorkflowRegistry::new();
        let err = registry
            .register(workflow("dangling", vec![stage("a", &["ghost"])]))
            .await
            .unwrap_err();
        assert!(matches!(err, AegisError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn rejects_duplicate_stage_names() {
        let registry = WorkflowRegistry::new();
        let err = registry
            .register(workflow("dup", vec![stage("a", &[]), stage("a", &[])]))
            .await
            .unwrap_err();
        assert!(matches!(err, AegisError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn first_for_kind_respects_registration_order() {
        let registry = WorkflowRegistry::new();
        registry
            .register(workflow("first", vec![stage("a", &[])]))
            .await
            .unwrap();
        registry
            .register(workflow("second", vec![stage("a", &[])]))
            .await
            .unwrap();
        let selected = registry.first_for_kind("docker").await.unwrap();
        assert_eq!(selected.id, "first");
        assert!(registry.first_for_kind("cargo").await.is_none());
    }

    #[tokio::test]
    async fn scanner_validation_flags_unknown_ids() {
        let registry = WorkflowRegistry::new();
        registry
            .register(workflow("wf", vec![stage("a", &[])]))
            .await
            .unwrap();

        registry
            .validate_scanners(&["trivy".to_string()])
            .await
            .unwrap();

        let err = registry
            .validate_scanners(&["grype".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AegisError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn builtins_validate() {
        let registry = WorkflowRegistry::new();
        for wf in builtin_workflows() {
            registry.register(wf).await.unwrap();
        }
        assert_eq!(registry.len().await, 4);
        assert!(registry.first_for_kind("docker").await.is_some());
        assert!(registry.first_for_kind("pypi").await.is_some());
    }
}
