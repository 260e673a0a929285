//! Plugin manager: composition of registry, health checker, selection
//! strategies, and the adaptive effectiveness feed.

use super::health::HealthChecker;
use super::registry::{PluginHandle, PluginRegistry};
use super::strategy::{
    builtin_strategies, EffectivenessTracker, SelectionRequest, SelectionStrategy,
};
use crate::scanners::ScannerAdapter;
use crate::{AegisError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    health: Arc<HealthChecker>,
    strategies: HashMap<String, Arc<dyn SelectionStrategy>>,
    effectiveness: Arc<EffectivenessTracker>,
}

impl PluginManager {
    pub fn new() -> Self {
        let registry = Arc::new(PluginRegistry::new());
        let health = Arc::new(HealthChecker::new(Arc::clone(&registry)));
        let effectiveness = Arc::new(EffectivenessTracker::new());
        let strategies = builtin_strategies(Arc::clone(&effectiveness));
        Self {
            registry,
            health,
            strategies,
            effectiveness,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    /// Registers an adapter if its tool responds to the availability probe.
    ///
    /// Returns whether the adapter was registered. A missing binary is not a
    /// failure; the plugin is simply left out.
    pub async fn register_adapter(&self, adapter: Arc<dyn ScannerAdapter>) -> bool {
        let name = adapter.name().to_string();
        if !adapter.available().await {
            warn!("Scanner {} unavailable; skipping registration", name);
            return false;
        }
        self.registry.register(adapter).await;
        info!("Scanner {} registered", name);
        true
    }

    /// Registers an adapter without probing. Intended for tests and for
    /// deployments that defer availability to the health sweep.
    pub async fn register_adapter_unchecked(&self, adapter: Arc<dyn ScannerAdapter>) {
        self.registry.register(adapter).await;
    }

    /// Resolves a strategy by name and runs selection over the current pool.
    ///
    /// Candidate health is stamped from the checker's cache right before the
    /// strategy sees the pool.
    pub async fn select_scanners(
        &self,
        strategy_name: &str,
        request: &SelectionRequest,
    ) -> Result<Vec<PluginHandle>> {
        let strategy = self.strategies.get(strategy_name).ok_or_else(|| {
            AegisError::ConfigurationError(format!("unknown selection strategy: {strategy_name}"))
        })?;

        let mut candidates = self.registry.all().await;
        for candidate in &mut candidates {
            candidate.health = self.health.state(candidate.id()).await;
        }

        Ok(strategy.select(request, &candidates).await)
    }

    /// Direct lookup used by fixed scanner rules.
    pub async fn get(&self, plugin_id: &str) -> Option<PluginHandle> {
        self.registry.get(plugin_id).await
    }

    pub async fn contains(&self, plugin_id: &str) -> bool {
        self.registry.contains(plugin_id).await
    }

    /// Feeds one scan outcome into the adaptive strategy's window.
    pub async fn record_outcome(&self, plugin_id: &str, success: bool) {
        self.effectiveness.record(plugin_id, success).await;
    }

    pub fn strategy_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }

    /// Starts the background health sweep.
    pub async fn start_health_checks(&self) {
        Arc::clone(&self.health).start().await;
    }

    pub async fn shutdown(&self) {
        self.health.shutdown().await;
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_strategy_is_configuration_error() {
        let manager = PluginManager::new();
        let request = SelectionRequest::for_kind("docker");
        let err = manager
            .select_scanners("no-such-strategy", &request)
            .await
            .unwrap_err();
        assert!(matches!(err, AegisError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn builtin_strategy_names_are_registered() {
        let manager = PluginManager::new();
        let names = manager.strategy_names();
        for expected in [
            "adaptive",
            "balanced",
            "comprehensive",
            "fastest",
            "optimal",
            "security_focused",
            "workflow_based",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
