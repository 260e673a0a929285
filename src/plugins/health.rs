//! Periodic plugin health checking.
//!
//! Probes run in isolation: a probe that panics or overruns its wall-clock
//! ceiling marks the plugin unhealthy without disturbing the sweep.

use super::{registry::PluginRegistry, HealthState, HealthStatus};
use crate::constants::{HEALTH_PROBE_TIMEOUT_SECS, HEALTH_SWEEP_INTERVAL_SECS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Aggregate view over the cached statuses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckerStats {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub last_check: Option<chrono::DateTime<chrono::Utc>>,
    pub check_period_seconds: u64,
}

pub struct HealthChecker {
    registry: Arc<PluginRegistry>,
    statuses: Arc<RwLock<HashMap<String, HealthStatus>>>,
    last_check: Arc<RwLock<Option<chrono::DateTime<chrono::Utc>>>>,
    period: Duration,
    probe_ceiling: Duration,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl HealthChecker {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self::with_periods(
            registry,
            Duration::from_secs(HEALTH_SWEEP_INTERVAL_SECS),
            Duration::from_secs(HEALTH_PROBE_TIMEOUT_SECS),
        )
    }

    pub fn with_periods(
        registry: Arc<PluginRegistry>,
        period: Duration,
        probe_ceiling: Duration,
    ) -> Self {
        Self {
            registry,
            statuses: Arc::new(RwLock::new(HashMap::new())),
            last_check: Arc::new(RwLock::new(None)),
            period,
            probe_ceiling,
            sweep_handle: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Cached status for a plugin; `Unknown` before the first sweep.
    pub async fn status(&self, plugin_id: &str) -> HealthStatus {
        let statuses = self.statuses.read().await;
        statuses
            .get(plugin_id)
            .cloned()
            .unwrap_or_else(HealthStatus::unknown)
    }

    pub async fn state(&self, plugin_id: &str) -> HealthState {
        self.status(plugin_id).await.state
    }

    pub async fn stats(&self) -> HealthCheckerStats {
        let statuses = self.statuses.read().await;
        let mut stats = HealthCheckerStats {
            total: statuses.len(),
            healthy: 0,
            degraded: 0,
            unhealthy: 0,
            unknown: 0,
            last_check: *self.last_check.read().await,
            check_period_seconds: self.period.as_secs(),
        };
        for status in statuses.values() {
            match status.state {
                HealthState::Healthy => stats.healthy += 1,
                HealthState::Degraded => stats.degraded += 1,
                HealthState::Unhealthy => stats.unhealthy += 1,
                HealthState::Unknown => stats.unknown += 1,
            }
        }
        stats
    }

    /// Probes every registered plugin once and refreshes the cache.
    pub async fn sweep(&self) {
        let handles = self.registry.all().await;
        debug!("Health sweep over {} plugins", handles.len());

        for handle in handles {
            let id = handle.metadata.id.clone();
            let status = self.probe(handle.adapter.clone()).await;
            let mut statuses = self.statuses.write().await;
            statuses.insert(id, status);
        }

        let mut last = self.last_check.write().await;
        *last = Some(chrono::Utc::now());
    }

    /// Runs one availability probe in an isolated task under the ceiling.
    async fn probe(
        &self,
        adapter: Arc<dyn crate::scanners::ScannerAdapter>,
    ) -> HealthStatus {
        let started = Instant::now();
        let probe = tokio::spawn(async move { adapter.available().await });

        match tokio::time::timeout(self.probe_ceiling, probe).await {
            Err(_) => {
                warn!("Health probe exceeded {:?} ceiling", self.probe_ceiling);
                HealthStatus::unhealthy("health check timed out")
            }
            Ok(Err(join_error)) => {
                if join_error.is_panic() {
                    warn!("Health probe panicked: {}", join_error);
                    HealthStatus::unhealthy("health check panicked")
                } else {
                    HealthStatus::unhealthy("health check aborted")
                }
            }
            Ok(Ok(false)) => HealthStatus::unhealthy("scanner binary not available"),
            Ok(Ok(true)) => {
                let elapsed = started.elapsed();
                // A probe that needed more than half the ceiling still passed,
                // but the tool is visibly struggling.
                if elapsed > self.probe_ceiling / 2 {
                    let mut status = HealthStatus {
                        state: HealthState::Degraded,
                        message: "slow availability probe".to_string(),
                        checked_at: chrono::Utc::now(),
                        details: HashMap::new(),
                    };
                    status
                        .details
                        .insert("probe_ms".to_string(), elapsed.as_millis().to_string());
                    status
                } else {
                    HealthStatus::healthy()
                }
            }
        }
    }

    /// Starts the periodic sweep loop; idempotent per instance.
    pub async fn start(self: Arc<Self>) {
        let mut handle_guard = self.sweep_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        {
            let mut tx_guard = self.shutdown_tx.lock().await;
            *tx_guard = Some(shutdown_tx);
        }

        let checker = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(checker.period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        checker.sweep().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        });

        *handle_guard = Some(handle);
        info!(
            "Health checker started with {}s sweep interval",
            self.period.as_secs()
        );
    }

    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Health sweep task ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanResult;
    use crate::plugins::{Capability, PluginMetadata, ResourceRequirements};
    use crate::scanners::{ScanContext, ScannerAdapter, ScannerError};
    use async_trait::async_trait;

    struct ProbeAdapter {
        id: &'static str,
        behavior: ProbeBehavior,
    }

    enum ProbeBehavior {
        Available,
        Missing,
        Hangs,
        Panics,
    }

    #[async_trait]
    impl ScannerAdapter for ProbeAdapter {
        fn name(&self) -> &str {
            self.id
        }

        fn metadata(&self) -> PluginMetadata {
            PluginMetadata {
                id: self.id.to_string(),
                name: self.id.to_string(),
                version: "test".to_string(),
                categories: vec![],
                tags: vec![],
                priority: 0,
                resources: ResourceRequirements::low(),
            }
        }

        fn capabilities(&self) -> Vec<Capability> {
            vec![]
        }

        fn supported_kinds(&self) -> &[&str] {
            &["docker"]
        }

        async fn version(&self) -> String {
            "test".to_string()
        }

        async fn available(&self) -> bool {
            match self.behavior {
                ProbeBehavior::Available => true,
                ProbeBehavior::Missing => false,
                ProbeBehavior::Hangs => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    true
                }
                ProbeBehavior::Panics => panic!("probe exploded"),
            }
        }

        async fn scan(
            &self,
            _ctx: &ScanContext,
            _path: &str,
            _kind: &str,
        ) -> Result<ScanResult, ScannerError> {
            unimplemented!("not exercised")
        }
    }

    async fn checker_with(behavior: ProbeBehavior) -> HealthChecker {
        let registry = Arc::new(PluginRegistry::new());
        registry
            .register(Arc::new(ProbeAdapter {
                id: "probe",
                behavior,
            }))
            .await;
        HealthChecker::with_periods(
            registry,
            Duration::from_secs(30),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn available_probe_is_healthy() {
        let checker = checker_with(ProbeBehavior::Available).await;
        checker.sweep().await;
        assert_eq!(checker.state("probe").await, HealthState::Healthy);
    }

    #[tokio::test]
    async fn missing_binary_is_unhealthy() {
        let checker = checker_with(ProbeBehavior::Missing).await;
        checker.sweep().await;
        let status = checker.status("probe").await;
        assert_eq!(status.state, HealthState::Unhealthy);
        assert_eq!(status.message, "scanner binary not available");
    }

    #[tokio::test]
    async fn hanging_probe_times_out() {
        let checker = checker_with(ProbeBehavior::Hangs).await;
        checker.sweep().await;
        let status = checker.status("probe").await;
        assert_eq!(status.state, HealthState::Unhealthy);
        assert_eq!(status.message, "health check timed out");
    }

    #[tokio::test]
    async fn panicking_probe_is_contained() {
        let checker = checker_with(ProbeBehavior::Panics).await;
        checker.sweep().await;
        let status = checker.status("probe").await;
        assert_eq!(status.state, HealthState::Unhealthy);
        assert_eq!(status.message, "health check panicked");
    }

    #[tokio::test]
    async fn stats_reflect_cached_states() {
        let checker = checker_with(ProbeBehavior::Available).await;
        let before = checker.stats().await;
        assert_eq!(before.total, 0);
        assert!(before.last_check.is_none());

        checker.sweep().await;
        let after = checker.stats().await;
        assert_eq!(after.total, 1);
        assert_eq!(after.healthy, 1);
        assert!(after.last_check.is_some());
    }

    #[tokio::test]
    async fn unprobed_plugin_reports_unknown() {
        let checker = checker_with(ProbeBehavior::Available).await;
        assert_eq!(checker.state("never-seen").await, HealthState::Unknown);
    }
}
