//! Shared fixtures: stub scanner adapters, counting policy clients,
//! recording notification channels, and orchestrator assembly.

use crate::models::{Finding, PolicyDecision, ScanResult, Severity};
use crate::notify::{NotificationChannel, NotificationService, ViolationNotification};
use crate::orchestrator::{PerformanceConfig, ScanOrchestrator};
use crate::plugins::{
    Accuracy, Capability, CapabilityKind, Coverage, FalsePositiveRate, PerformanceProfile,
    PluginCategory, PluginManager, PluginMetadata, ResourceRequirements, Speed,
};
use crate::policy::{PolicyEvaluator, PolicyInput};
use crate::scanners::{ScanContext, ScannerAdapter, ScannerError};
use crate::store::MemoryOutputStore;
use crate::tenant::TenantConfigService;
use crate::workflow::{WorkflowEngine, WorkflowRegistry};
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// What a stub scanner does when invoked
#[derive(Clone)]
pub enum StubBehavior {
    /// Return these findings immediately.
    Findings(Vec<Finding>),
    /// Sleep, then return findings (respects cancellation and deadline).
    Delayed(Duration, Vec<Finding>),
    /// Fail with a process error.
    Fail,
}

/// Scripted in-process scanner adapter
pub struct StubScanner {
    id: String,
    kinds: Vec<&'static str>,
    behavior: StubBehavior,
    pub calls: Arc<AtomicUsize>,
    /// (scanner id, instant) appended at each scan entry and exit.
    pub events: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl StubScanner {
    pub fn new(id: &str, kinds: &[&'static str], behavior: StubBehavior) -> Self {
        Self {
            id: id.to_string(),
            kinds: kinds.to_vec(),
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ScannerAdapter for StubScanner {
    fn name(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: self.id.clone(),
            name: self.id.clone(),
            version: "stub".to_string(),
            categories: vec![PluginCategory::Vulnerability, PluginCategory::Security],
            tags: vec!["stub".to_string()],
            priority: 50,
            resources: ResourceRequirements::low(),
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability {
            kind: CapabilityKind::CveDetection,
            confidence: 0.9,
            profile: PerformanceProfile {
                speed: Speed::Fast,
                accuracy: Accuracy::High,
                coverage: Coverage::Comprehensive,
                false_positive_rate: FalsePositiveRate::Low,
            },
        }]
    }

    fn supported_kinds(&self) -> &[&str] {
        &self.kinds
    }

    async fn version(&self) -> String {
        "stub".to_string()
    }

    async fn available(&self) -> bool {
        true
    }

    async fn scan(
        &self,
        ctx: &ScanContext,
        _artifact_path: &str,
        kind: &str,
    ) -> std::result::Result<ScanResult, ScannerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().await.push((self.id.clone(), Instant::now()));

        let findings = match &self.behavior {
            StubBehavior::Findings(findings) => findings.clone(),
            StubBehavior::Delayed(delay, findings) => {
                let deadline = ctx.remaining();
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => {}
                    _ = ctx.cancelled() => {
                        return Err(ScannerError::Cancelled { scanner: self.id.clone() });
                    }
                    _ = async {
                        match deadline {
                            Some(remaining) => tokio::time::sleep(remaining).await,
                            None => std::future::pending().await,
                        }
                    } => {
                        return Err(ScannerError::Timeout {
                            scanner: self.id.clone(),
                            seconds: deadline.map(|d| d.as_secs()).unwrap_or(0),
                        });
                    }
                }
                findings.clone()
            }
            StubBehavior::Fail => {
                return Err(ScannerError::Process {
                    scanner: self.id.clone(),
                    exit_code: 2,
                    stderr_head: "synthetic failure".to_string(),
                })
            }
        };

        self.events.lock().await.push((self.id.clone(), Instant::now()));
        let mut result = ScanResult::new(&self.id, "stub", kind).with_findings(findings);
        result.duration_seconds = 0.1;
        Ok(result)
    }
}

/// Finding constructor for test data
pub fn cve_finding(cve: &str, severity: Severity, cvss: f64) -> Finding {
    Finding {
        id: cve.to_string(),
        cve: Some(cve.to_string()),
        severity,
        title: format!("{cve} in test-pkg"),
        description: "synthetic finding".to_string(),
        package: "test-pkg".to_string(),
        version: "1.0.0".to_string(),
        fixed_version: None,
        cvss: Some(cvss),
        references: vec![],
    }
}

/// Policy client that counts evaluations and replays a scripted decision.
pub struct CountingPolicy {
    pub decision: PolicyDecision,
    pub calls: Arc<AtomicUsize>,
}

impl CountingPolicy {
    pub fn allowing() -> Self {
        Self::with_action("allow", "")
    }

    pub fn with_action(action: &str, reason: &str) -> Self {
        Self {
            decision: PolicyDecision {
                allow: action == "allow",
                action: action.to_string(),
                reason: reason.to_string(),
                violations: vec![],
            },
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl PolicyEvaluator for CountingPolicy {
    async fn evaluate(&self, _policy_path: &str, _input: &PolicyInput) -> Result<PolicyDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.decision.clone())
    }
}

/// Notification channel that records everything it delivers.
pub struct RecordingChannel {
    name: String,
    pub delivered: Arc<Mutex<Vec<ViolationNotification>>>,
}

impl RecordingChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delivered: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &ViolationNotification) -> Result<()> {
        self.delivered.lock().await.push(notification.clone());
        Ok(())
    }
}

/// Everything a pipeline test needs, wired together.
pub struct TestHarness {
    pub orchestrator: Arc<ScanOrchestrator>,
    #[allow(dead_code)]
    pub plugins: Arc<PluginManager>,
    #[allow(dead_code)]
    pub workflows: Arc<WorkflowRegistry>,
    pub tenants: Arc<TenantConfigService>,
    pub store: Arc<MemoryOutputStore>,
    pub slack: Arc<RecordingChannel>,
}

/// Builds an orchestrator over stub scanners with in-memory persistence.
///
/// Health is not swept, so every stub starts `Unknown` (eligible for
/// selection) exactly as freshly registered plugins do in production.
pub async fn harness(
    scanners: Vec<Arc<dyn ScannerAdapter>>,
    workflows: Vec<crate::workflow::Workflow>,
    policy: Arc<dyn PolicyEvaluator>,
) -> TestHarness {
    harness_with_performance(
        scanners,
        workflows,
        policy,
        PerformanceConfig {
            max_retries: 0,
            ..PerformanceConfig::default()
        },
    )
    .await
}

/// [`harness`] with an explicit performance configuration.
pub async fn harness_with_performance(
    scanners: Vec<Arc<dyn ScannerAdapter>>,
    workflows: Vec<crate::workflow::Workflow>,
    policy: Arc<dyn PolicyEvaluator>,
    performance: PerformanceConfig,
) -> TestHarness {
    let plugins = Arc::new(PluginManager::new());
    for scanner in scanners {
        plugins.register_adapter_unchecked(scanner).await;
    }

    let registry = Arc::new(WorkflowRegistry::new());
    for workflow in workflows {
        registry.register(workflow).await.expect("valid workflow");
    }

    let tenants = Arc::new(TenantConfigService::new());
    let store = Arc::new(MemoryOutputStore::new());
    let slack = Arc::new(RecordingChannel::new("slack"));

    let mut notifications = NotificationService::new();
    notifications.register(Arc::clone(&slack) as Arc<dyn NotificationChannel>);

    let engine = Arc::new(WorkflowEngine::new(
        Arc::clone(&registry),
        Arc::clone(&plugins),
    ));

    let orchestrator = Arc::new(
        ScanOrchestrator::new(
            engine,
            Arc::clone(&tenants),
            policy,
            Arc::new(notifications),
            Arc::clone(&store) as Arc<dyn crate::store::OutputStore>,
        )
        .with_performance(performance),
    );

    TestHarness {
        orchestrator,
        plugins,
        workflows: registry,
        tenants,
        store,
        slack,
    }
}
