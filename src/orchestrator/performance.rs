//! Performance layer: bounded concurrency, TTL result cache, per-key circuit
//! breakers, retry pacing, memory pressure hints, and scan metrics.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};
use crate::constants::{
    CACHE_SWEEP_INTERVAL_SECS, DEFAULT_MAX_RETRIES, GC_PRESSURE_THRESHOLD, RESULT_CACHE_TTL_SECS,
    RETRY_BACKOFF_MS,
};
use crate::models::{AggregatedResult, JobStatus, ScanJob};
use crate::scanners::ScanContext;
use crate::{AegisError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    pub max_concurrent_scans: usize,
    pub cache_ttl: Duration,
    pub failure_threshold: u32,
    pub breaker_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub gc_threshold: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            max_concurrent_scans: cores * 2,
            cache_ttl: Duration::from_secs(RESULT_CACHE_TTL_SECS),
            failure_threshold: CircuitBreakerConfig::default().failure_threshold,
            breaker_timeout: CircuitBreakerConfig::default().timeout_duration,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(RETRY_BACKOFF_MS),
            gc_threshold: GC_PRESSURE_THRESHOLD,
        }
    }
}

/// Cached outcome of a completed job.
///
/// The terminal status is stored alongside the aggregated result so a cache
/// hit replays the original verdict; a quarantined scan stays quarantined.
#[derive(Debug, Clone)]
pub struct CachedJob {
    pub status: JobStatus,
    pub aggregated: AggregatedResult,
    inserted: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMetricsSnapshot {
    pub total_scans: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failed_scans: u64,
    pub circuit_break_events: u64,
    pub average_duration_seconds: f64,
    pub cached_entries: usize,
}

pub struct PerformanceLayer {
    config: PerformanceConfig,
    semaphore: Arc<Semaphore>,
    cache: Mutex<HashMap<String, CachedJob>>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    total_scans: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    failed_scans: AtomicU64,
    circuit_break_events: AtomicU64,
    completed_scans: AtomicU64,
    average_duration: Mutex<f64>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl PerformanceLayer {
    pub fn new(config: PerformanceConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_scans.max(1)));
        Self {
            config,
            semaphore,
            cache: Mutex::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
            total_scans: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            failed_scans: AtomicU64::new(0),
            circuit_break_events: AtomicU64::new(0),
            completed_scans: AtomicU64::new(0),
            average_duration: Mutex::new(0.0),
            sweep_handle: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    /// Cache key: `artifactKind:artifactPath:tenant:workflow`.
    pub fn cache_key(job: &ScanJob, workflow: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            job.artifact_kind, job.artifact_path, job.tenant_id, workflow
        )
    }

    /// Breaker key: `artifactKind-tenant`.
    pub fn breaker_key(job: &ScanJob) -> String {
        format!("{}-{}", job.artifact_kind, job.tenant_id)
    }

    pub async fn cache_get(&self, key: &str) -> Option<CachedJob> {
        let mut cache = self.cache.lock().await;
        match cache.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.config.cache_ttl => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!("Result cache hit for {}", key);
                Some(entry.clone())
            }
            Some(_) => {
                cache.remove(key);
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn cache_put(&self, key: String, status: JobStatus, aggregated: AggregatedResult) {
        let mut cache = self.cache.lock().await;
        cache.insert(
            key,
            CachedJob {
                status,
                aggregated,
                inserted: Instant::now(),
            },
        );
    }

    /// Evicts expired entries; returns how many were removed.
    pub async fn sweep_cache(&self) -> usize {
        let mut cache = self.cache.lock().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.inserted.elapsed() < self.config.cache_ttl);
        let removed = before - cache.len();
        if removed > 0 {
            info!("Evicted {} expired cache entries", removed);
        }
        removed
    }

    /// Breaker for a key, created on first use.
    pub async fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    key.to_string(),
                    CircuitBreakerConfig {
                        failure_threshold: self.config.failure_threshold,
                        timeout_duration: self.config.breaker_timeout,
                        ..CircuitBreakerConfig::default()
                    },
                ))
            })
            .clone()
    }

    pub async fn breaker_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let breakers = self.breakers.lock().await;
        let mut metrics = Vec::with_capacity(breakers.len());
        for breaker in breakers.values() {
            metrics.push(breaker.get_metrics().await);
        }
        metrics
    }

    /// Acquires a concurrency slot, aborting on cancellation.
    ///
    /// An in-flight job holds exactly one slot for its whole execution.
    pub async fn acquire_slot(&self, ctx: &ScanContext) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| AegisError::Cancelled {
                    message: "scan semaphore closed".to_string(),
                })
            }
            _ = ctx.cancelled() => Err(AegisError::Cancelled {
                message: "cancelled awaiting scan slot".to_string(),
            }),
        }
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Backoff before retry `attempt` (1-based): attempt * base + jitter.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff * attempt;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
        base + jitter
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Live/total memory ratio when it exceeds the GC threshold.
    ///
    /// Reads /proc/meminfo on Linux; other platforms never report pressure.
    pub fn memory_pressure(&self) -> Option<f64> {
        #[cfg(target_os = "linux")]
        {
            let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
            let mut total = 0u64;
            let mut available = 0u64;
            for line in meminfo.lines() {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() >= 2 {
                    match parts[0] {
                        "MemTotal:" => total = parts[1].parse().unwrap_or(0),
                        "MemAvailable:" => available = parts[1].parse().unwrap_or(0),
                        _ => {}
                    }
                }
            }
            if total == 0 {
                return None;
            }
            let ratio = (total.saturating_sub(available)) as f64 / total as f64;
            if ratio > self.config.gc_threshold {
                return Some(ratio);
            }
        }
        None
    }

    /// Logs a collection hint when memory pressure is high.
    pub fn check_memory_pressure(&self) {
        if let Some(ratio) = self.memory_pressure() {
            warn!(
                "Memory pressure at {:.0}% exceeds {:.0}% threshold; consider deferring heavy scans",
                ratio * 100.0,
                self.config.gc_threshold * 100.0
            );
        }
    }

    pub fn record_scan_started(&self) {
        self.total_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_scan_finished(&self, duration: Duration, success: bool) {
        if !success {
            self.failed_scans.fetch_add(1, Ordering::Relaxed);
        }
        let completed = self.completed_scans.fetch_add(1, Ordering::Relaxed) + 1;
        let mut average = self.average_duration.lock().await;
        *average =
            (*average * (completed - 1) as f64 + duration.as_secs_f64()) / completed as f64;
    }

    pub fn record_circuit_break(&self) {
        self.circuit_break_events.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn snapshot(&self) -> ScanMetricsSnapshot {
        ScanMetricsSnapshot {
            total_scans: self.total_scans.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            failed_scans: self.failed_scans.load(Ordering::Relaxed),
            circuit_break_events: self.circuit_break_events.load(Ordering::Relaxed),
            average_duration_seconds: *self.average_duration.lock().await,
            cached_entries: self.cache.lock().await.len(),
        }
    }

    /// Starts the periodic cache eviction sweep.
    pub async fn start_cache_sweep(self: Arc<Self>) {
        let mut handle_guard = self.sweep_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        {
            let mut tx_guard = self.shutdown_tx.lock().await;
            *tx_guard = Some(shutdown_tx);
        }

        let layer = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(CACHE_SWEEP_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        layer.sweep_cache().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Cache sweep shutting down");
                        break;
                    }
                }
            }
        });
        *handle_guard = Some(handle);
    }

    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Cache sweep task ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SeveritySummary;

    fn aggregated() -> AggregatedResult {
        AggregatedResult {
            artifact_path: "/a/img.tar".to_string(),
            artifact_kind: "docker".to_string(),
            workflow: "DockerWorkflow".to_string(),
            findings: vec![],
            summary: SeveritySummary::default(),
            scanner_results: vec![],
            total_scanners: 1,
            successful_scanners: 1,
            failed_scanners: 0,
            total_duration_seconds: 1.0,
            timestamp: chrono::Utc::now(),
        }
    }

    fn layer_with_ttl(ttl: Duration) -> PerformanceLayer {
        PerformanceLayer::new(PerformanceConfig {
            cache_ttl: ttl,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn cache_replays_stored_status() {
        let layer = layer_with_ttl(Duration::from_secs(60));
        let job = ScanJob::new("default", "img", "/a/img.tar", "docker");
        let key = PerformanceLayer::cache_key(&job, "DockerWorkflow");

        assert!(layer.cache_get(&key).await.is_none());
        layer
            .cache_put(key.clone(), JobStatus::Quarantined, aggregated())
            .await;

        let hit = layer.cache_get(&key).await.unwrap();
        // The original verdict is replayed, not synthesized as completed.
        assert_eq!(hit.status, JobStatus::Quarantined);

        let snapshot = layer.snapshot().await;
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_evicted() {
        let layer = layer_with_ttl(Duration::from_millis(20));
        let job = ScanJob::new("default", "img", "/a/img.tar", "docker");
        let key = PerformanceLayer::cache_key(&job, "wf");
        layer
            .cache_put(key.clone(), JobStatus::Completed, aggregated())
            .await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(layer.cache_get(&key).await.is_none());

        layer
            .cache_put("other".to_string(), JobStatus::Completed, aggregated())
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(layer.sweep_cache().await, 1);
    }

    #[tokio::test]
    async fn breakers_are_per_key() {
        let layer = PerformanceLayer::new(PerformanceConfig::default());
        let a = layer.breaker("docker-default").await;
        let b = layer.breaker("npm-acme").await;
        let a_again = layer.breaker("docker-default").await;
        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn semaphore_bounds_concurrency() {
        let layer = PerformanceLayer::new(PerformanceConfig {
            max_concurrent_scans: 1,
            ..Default::default()
        });
        let ctx = ScanContext::unbounded();

        let permit = layer.acquire_slot(&ctx).await.unwrap();
        assert_eq!(layer.available_slots(), 0);

        // A second acquisition blocks until the permit drops.
        let (handle, cancel_ctx) = crate::scanners::ScanContext::cancellable();
        let layer = Arc::new(layer);
        let waiter = {
            let layer = Arc::clone(&layer);
            tokio::spawn(async move { layer.acquire_slot(&cancel_ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        handle.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, AegisError::Cancelled { .. }));

        drop(permit);
        assert_eq!(layer.available_slots(), 1);
    }

    #[tokio::test]
    async fn retry_delay_scales_with_attempt() {
        let layer = PerformanceLayer::new(PerformanceConfig {
            retry_backoff: Duration::from_millis(100),
            ..Default::default()
        });
        let first = layer.retry_delay(1);
        let third = layer.retry_delay(3);
        assert!(first >= Duration::from_millis(100));
        assert!(third >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn metrics_average_is_rolling() {
        let layer = PerformanceLayer::new(PerformanceConfig::default());
        layer.record_scan_started();
        layer
            .record_scan_finished(Duration::from_secs(2), true)
            .await;
        layer.record_scan_started();
        layer
            .record_scan_finished(Duration::from_secs(4), false)
            .await;

        let snapshot = layer.snapshot().await;
        assert_eq!(snapshot.total_scans, 2);
        assert_eq!(snapshot.failed_scans, 1);
        assert!((snapshot.average_duration_seconds - 3.0).abs() < 1e-9);
    }
}
