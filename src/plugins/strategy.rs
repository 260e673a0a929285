//! Scanner selection strategies.
//!
//! Every strategy works over the same eligible pool: plugins that support the
//! requested artifact kind, are not cached unhealthy, and clear the optional
//! confidence floor. Scoring differs per strategy; ties always break by
//! priority and then plugin id so selection is deterministic.

use super::registry::PluginHandle;
use super::{CapabilityKind, HealthState, PluginCategory};
use crate::constants::{
    COMPREHENSIVE_MAX_SCANNERS, EFFECTIVENESS_WINDOW, FASTEST_MAX_SCANNERS, OPTIMAL_MAX_SCANNERS,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Parameters of one selection round
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SelectionRequest {
    pub artifact_kind: String,
    pub required_capabilities: Vec<CapabilityKind>,
    pub preferred_categories: Vec<PluginCategory>,
    pub max_scanners: Option<usize>,
    pub max_duration_seconds: Option<u64>,
    pub min_confidence: Option<f64>,
    pub max_resource_penalty: Option<f64>,
    pub custom: HashMap<String, String>,
}

impl SelectionRequest {
    pub fn for_kind(kind: impl Into<String>) -> Self {
        Self {
            artifact_kind: kind.into(),
            ..Default::default()
        }
    }
}

/// Common contract: choose a subset of the candidate plugins
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn select(
        &self,
        request: &SelectionRequest,
        candidates: &[PluginHandle],
    ) -> Vec<PluginHandle>;
}

/// Filters the candidate pool down to plugins any strategy may pick.
fn eligible<'a>(
    request: &SelectionRequest,
    candidates: &'a [PluginHandle],
) -> Vec<&'a PluginHandle> {
    candidates
        .iter()
        .filter(|h| h.health != HealthState::Unhealthy)
        .filter(|h| h.adapter.supports(&request.artifact_kind))
        .filter(|h| match request.min_confidence {
            Some(floor) => h
                .capabilities
                .iter()
                .any(|c| c.confidence >= floor),
            None => true,
        })
        .filter(|h| match request.max_resource_penalty {
            Some(ceiling) => h.metadata.resources.total_penalty() <= ceiling,
            None => true,
        })
        .collect()
}

/// Sorts scored candidates (score desc, priority desc, id asc) and caps.
fn rank_and_cap(mut scored: Vec<(f64, PluginHandle)>, cap: usize) -> Vec<PluginHandle> {
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.metadata.priority.cmp(&a.1.metadata.priority))
            .then_with(|| a.1.metadata.id.cmp(&b.1.metadata.id))
    });
    scored.into_iter().take(cap).map(|(_, h)| h).collect()
}

/// Mean of (speed + accuracy + coverage) over all declared capabilities.
fn performance_score(handle: &PluginHandle) -> f64 {
    if handle.capabilities.is_empty() {
        return 0.0;
    }
    let sum: f64 = handle
        .capabilities
        .iter()
        .map(|c| (c.profile.speed.score() + c.profile.accuracy.score() + c.profile.coverage.score()) / 3.0)
        .sum();
    sum / handle.capabilities.len() as f64
}

/// Best declared speed score.
fn speed_score(handle: &PluginHandle) -> f64 {
    handle
        .capabilities
        .iter()
        .map(|c| c.profile.speed.score())
        .fold(0.0, f64::max)
}

fn optimal_score(request: &SelectionRequest, handle: &PluginHandle) -> f64 {
    let capability_match: f64 = if request.required_capabilities.is_empty() {
        // No explicit requirements: credit the strongest capability.
        handle
            .capabilities
            .iter()
            .map(|c| 50.0 * c.confidence)
            .fold(0.0, f64::max)
    } else {
        handle
            .capabilities
            .iter()
            .filter(|c| request.required_capabilities.contains(&c.kind))
            .map(|c| 50.0 * c.confidence)
            .sum()
    };

    let category_boost: f64 = handle
        .metadata
        .categories
        .iter()
        .filter(|c| request.preferred_categories.contains(c))
        .count() as f64
        * 10.0;

    let resource_score = (50.0 - handle.metadata.resources.total_penalty()).max(0.0);

    handle.metadata.priority as f64
        + capability_match
        + category_boost
        + performance_score(handle)
        + resource_score
}

/// Priority + capability match + performance + resource headroom.
pub struct OptimalStrategy;

#[async_trait]
impl SelectionStrategy for OptimalStrategy {
    fn name(&self) -> &str {
        "optimal"
    }

    async fn select(
        &self,
        request: &SelectionRequest,
        candidates: &[PluginHandle],
    ) -> Vec<PluginHandle> {
        let cap = request.max_scanners.unwrap_or(OPTIMAL_MAX_SCANNERS);
        let scored = eligible(request, candidates)
            .into_iter()
            .map(|h| (optimal_score(request, h), h.clone()))
            .collect();
        rank_and_cap(scored, cap)
    }
}

/// Heavy bias toward declared speed.
pub struct FastestStrategy;

#[async_trait]
impl SelectionStrategy for FastestStrategy {
    fn name(&self) -> &str {
        "fastest"
    }

    async fn select(
        &self,
        request: &SelectionRequest,
        candidates: &[PluginHandle],
    ) -> Vec<PluginHandle> {
        let cap = request.max_scanners.unwrap_or(FASTEST_MAX_SCANNERS);
        let scored = eligible(request, candidates)
            .into_iter()
            .map(|h| (speed_score(h), h.clone()))
            .collect();
        rank_and_cap(scored, cap)
    }
}

/// Coverage and accuracy weighted by confidence.
pub struct ComprehensiveStrategy;

#[async_trait]
impl SelectionStrategy for ComprehensiveStrategy {
    fn name(&self) -> &str {
        "comprehensive"
    }

    async fn select(
        &self,
        request: &SelectionRequest,
        candidates: &[PluginHandle],
    ) -> Vec<PluginHandle> {
        let cap = request.max_scanners.unwrap_or(COMPREHENSIVE_MAX_SCANNERS);
        let scored = eligible(request, candidates)
            .into_iter()
            .map(|h| {
                let score: f64 = h
                    .capabilities
                    .iter()
                    .map(|c| (c.profile.coverage.score() + c.profile.accuracy.score()) * c.confidence)
                    .sum();
                (score, h.clone())
            })
            .collect();
        rank_and_cap(scored, cap)
    }
}

/// Equal weighting of speed, accuracy, coverage, and resource headroom.
pub struct BalancedStrategy;

#[async_trait]
impl SelectionStrategy for BalancedStrategy {
    fn name(&self) -> &str {
        "balanced"
    }

    async fn select(
        &self,
        request: &SelectionRequest,
        candidates: &[PluginHandle],
    ) -> Vec<PluginHandle> {
        let cap = request.max_scanners.unwrap_or(OPTIMAL_MAX_SCANNERS);
        let scored = eligible(request, candidates)
            .into_iter()
            .map(|h| {
                let accuracy = h
                    .capabilities
                    .iter()
                    .map(|c| c.profile.accuracy.score())
                    .fold(0.0, f64::max);
                let coverage = h
                    .capabilities
                    .iter()
                    .map(|c| c.profile.coverage.score())
                    .fold(0.0, f64::max);
                // Penalty tops out at 40 across four resource axes.
                let resources = 100.0 - 2.5 * h.metadata.resources.total_penalty();
                let score = (speed_score(h) + accuracy + coverage + resources) / 4.0;
                (score, h.clone())
            })
            .collect();
        rank_and_cap(scored, cap)
    }
}

/// Optimal scoring restricted to security and vulnerability categories.
pub struct SecurityFocusedStrategy;

#[async_trait]
impl SelectionStrategy for SecurityFocusedStrategy {
    fn name(&self) -> &str {
        "security_focused"
    }

    async fn select(
        &self,
        request: &SelectionRequest,
        candidates: &[PluginHandle],
    ) -> Vec<PluginHandle> {
        let cap = request.max_scanners.unwrap_or(OPTIMAL_MAX_SCANNERS);
        let scored = eligible(request, candidates)
            .into_iter()
            .filter(|h| {
                h.metadata.categories.iter().any(|c| {
                    matches!(c, PluginCategory::Security | PluginCategory::Vulnerability)
                })
            })
            .map(|h| (optimal_score(request, h), h.clone()))
            .collect();
        rank_and_cap(scored, cap)
    }
}

/// Static artifact-kind to ordered plugin-id mapping.
pub struct WorkflowBasedStrategy {
    mapping: HashMap<String, Vec<String>>,
}

impl WorkflowBasedStrategy {
    pub fn new(mapping: HashMap<String, Vec<String>>) -> Self {
        Self { mapping }
    }

    /// Mapping covering the stock artifact kinds.
    pub fn with_defaults() -> Self {
        let mut mapping = HashMap::new();
        mapping.insert(
            "docker".to_string(),
            vec!["trivy", "grype", "syft", "trufflehog"],
        );
        mapping.insert(
            "npm".to_string(),
            vec!["npm-audit", "osv-scanner", "gitleaks", "syft"],
        );
        mapping.insert(
            "pypi".to_string(),
            vec!["bandit", "osv-scanner", "trufflehog", "syft"],
        );
        mapping.insert(
            "maven".to_string(),
            vec!["osv-scanner", "grype", "gitleaks", "syft"],
        );
        mapping.insert("helm".to_string(), vec!["trivy", "syft"]);
        mapping.insert(
            "filesystem".to_string(),
            vec!["trivy", "semgrep", "trufflehog", "syft"],
        );
        mapping.insert("generic".to_string(), vec!["trivy", "trufflehog"]);
        let mapping = mapping
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().map(String::from).collect()))
            .collect();
        Self { mapping }
    }
}

#[async_trait]
impl SelectionStrategy for WorkflowBasedStrategy {
    fn name(&self) -> &str {
        "workflow_based"
    }

    async fn select(
        &self,
        request: &SelectionRequest,
        candidates: &[PluginHandle],
    ) -> Vec<PluginHandle> {
        let Some(order) = self.mapping.get(&request.artifact_kind) else {
            debug!(
                "No workflow-based mapping for kind {}",
                request.artifact_kind
            );
            return vec![];
        };

        let pool = eligible(request, candidates);
        let cap = request.max_scanners.unwrap_or(order.len());

        order
            .iter()
            .filter_map(|id| pool.iter().find(|h| h.id() == id).map(|h| (*h).clone()))
            .take(cap)
            .collect()
    }
}

/// One scan outcome fed back into adaptive selection
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub plugin_id: String,
    pub success: bool,
}

/// Rolling window of recent scan outcomes per plugin.
#[derive(Default)]
pub struct EffectivenessTracker {
    window: RwLock<VecDeque<ScanOutcome>>,
}

impl EffectivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, plugin_id: &str, success: bool) {
        let mut window = self.window.write().await;
        if window.len() >= EFFECTIVENESS_WINDOW {
            window.pop_front();
        }
        window.push_back(ScanOutcome {
            plugin_id: plugin_id.to_string(),
            success,
        });
    }

    /// Success rate over the window scaled to 0..100; 50 when unseen.
    pub async fn score(&self, plugin_id: &str) -> f64 {
        let window = self.window.read().await;
        let outcomes: Vec<_> = window
            .iter()
            .filter(|o| o.plugin_id == plugin_id)
            .collect();
        if outcomes.is_empty() {
            return 50.0;
        }
        let successes = outcomes.iter().filter(|o| o.success).count();
        100.0 * successes as f64 / outcomes.len() as f64
    }
}

/// Optimal score blended with historical effectiveness (30% weight).
pub struct AdaptiveStrategy {
    tracker: Arc<EffectivenessTracker>,
}

impl AdaptiveStrategy {
    pub fn new(tracker: Arc<EffectivenessTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl SelectionStrategy for AdaptiveStrategy {
    fn name(&self) -> &str {
        "adaptive"
    }

    async fn select(
        &self,
        request: &SelectionRequest,
        candidates: &[PluginHandle],
    ) -> Vec<PluginHandle> {
        let cap = request.max_scanners.unwrap_or(OPTIMAL_MAX_SCANNERS);
        let pool = eligible(request, candidates);

        let mut scored = Vec::with_capacity(pool.len());
        for handle in pool {
            let base = optimal_score(request, handle);
            let history = self.tracker.score(handle.id()).await;
            scored.push((0.7 * base + 0.3 * history, handle.clone()));
        }
        rank_and_cap(scored, cap)
    }
}

/// Builds the stock strategy set keyed by name.
pub fn builtin_strategies(
    tracker: Arc<EffectivenessTracker>,
) -> HashMap<String, Arc<dyn SelectionStrategy>> {
    let strategies: Vec<Arc<dyn SelectionStrategy>> = vec![
        Arc::new(OptimalStrategy),
        Arc::new(FastestStrategy),
        Arc::new(ComprehensiveStrategy),
        Arc::new(BalancedStrategy),
        Arc::new(SecurityFocusedStrategy),
        Arc::new(WorkflowBasedStrategy::with_defaults()),
        Arc::new(AdaptiveStrategy::new(tracker)),
    ];
    strategies
        .into_iter()
        .map(|s| (s.name().to_string(), s))
        .collect()
}
