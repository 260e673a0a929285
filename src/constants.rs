//! System-wide tuning constants.

/// Poll interval while a stage waits for its declared dependencies.
pub const DEPENDENCY_POLL_INTERVAL_MS: u64 = 100;

/// Default per-stage timeout when the workflow declares none.
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 300;

/// Default whole-workflow timeout.
pub const DEFAULT_WORKFLOW_TIMEOUT_SECS: u64 = 1800;

/// Ceiling applied to adapter availability probes.
pub const AVAILABILITY_PROBE_TIMEOUT_SECS: u64 = 3;

/// Wall-clock ceiling for a single health probe.
pub const HEALTH_PROBE_TIMEOUT_SECS: u64 = 10;

/// Period of the background health sweep.
pub const HEALTH_SWEEP_INTERVAL_SECS: u64 = 30;

/// TTL for cached job results in performance mode.
pub const RESULT_CACHE_TTL_SECS: u64 = 1800;

/// Period of the cache eviction sweep.
pub const CACHE_SWEEP_INTERVAL_SECS: u64 = 300;

/// Consecutive failures on a key before its circuit opens.
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Time an open circuit waits before admitting a half-open probe.
pub const CIRCUIT_OPEN_TIMEOUT_SECS: u64 = 60;

/// Successful half-open probes required to close a circuit.
pub const CIRCUIT_SUCCESS_THRESHOLD: u32 = 1;

/// Default retry count in performance mode.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Base backoff between retries; attempt N sleeps N * this.
pub const RETRY_BACKOFF_MS: u64 = 500;

/// Live/max memory ratio above which a collection hint is logged.
pub const GC_PRESSURE_THRESHOLD: f64 = 0.85;

/// Client timeout for policy service calls.
pub const POLICY_CLIENT_TIMEOUT_SECS: u64 = 10;

/// Client timeout for notification channel deliveries.
pub const NOTIFY_CLIENT_TIMEOUT_SECS: u64 = 10;

/// Rolling window of scan outcomes kept for adaptive selection.
pub const EFFECTIVENESS_WINDOW: usize = 1000;

/// Bytes of stderr preserved on a scanner process failure.
pub const STDERR_HEAD_BYTES: usize = 2048;

/// Default scanner caps per selection strategy.
pub const OPTIMAL_MAX_SCANNERS: usize = 5;
pub const FASTEST_MAX_SCANNERS: usize = 3;
pub const COMPREHENSIVE_MAX_SCANNERS: usize = 8;
