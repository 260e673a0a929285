//! Scanner adapters wrapping external scan tools.
//!
//! Each adapter declares the artifact kinds it supports, a cheap availability
//! probe, and a `scan` operation that spawns the tool as a child process,
//! captures its output, and parses findings. Parsing tolerates interleaved
//! log lines and ANSI escapes; global finding order is the aggregator's job.

pub mod bandit;
pub mod grype;
pub mod gitleaks;
pub mod npm_audit;
pub mod osv;
pub mod output;
pub mod semgrep;
pub mod syft;
pub mod trivy;
pub mod trufflehog;

pub use bandit::BanditAdapter;
pub use gitleaks::GitleaksAdapter;
pub use grype::GrypeAdapter;
pub use npm_audit::NpmAuditAdapter;
pub use osv::OsvScannerAdapter;
pub use semgrep::SemgrepAdapter;
pub use syft::SyftAdapter;
pub use trivy::TrivyAdapter;
pub use trufflehog::TruffleHogAdapter;

use crate::{
    constants::{AVAILABILITY_PROBE_TIMEOUT_SECS, STDERR_HEAD_BYTES},
    models::ScanResult,
    plugins::{Capability, PluginMetadata},
};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Per-invocation scanner failure modes
#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("scanner unavailable: {scanner}")]
    Unavailable { scanner: String },

    #[error("scanner process failed: {scanner} (exit {exit_code}): {stderr_head}")]
    Process {
        scanner: String,
        exit_code: i32,
        stderr_head: String,
    },

    #[error("scanner output parse error: {scanner}: {message}")]
    Output { scanner: String, message: String },

    #[error("scanner timed out: {scanner} after {seconds}s")]
    Timeout { scanner: String, seconds: u64 },

    #[error("scan cancelled: {scanner}")]
    Cancelled { scanner: String },

    #[error("scanner io error: {scanner}: {source}")]
    Io {
        scanner: String,
        #[source]
        source: std::io::Error,
    },
}

/// Cancellation and deadline carrier for a scan invocation.
///
/// Cancellation cascades from the job: cancelling the sender side makes every
/// derived context observe it at the next suspension point, and in-flight
/// child processes are killed on drop.
#[derive(Debug, Clone)]
pub struct ScanContext {
    deadline: Option<Instant>,
    cancel: watch::Receiver<bool>,
    // Keeps the sender of a never-cancelled context alive so `cancelled()`
    // stays pending instead of observing a closed channel.
    _keepalive: Option<std::sync::Arc<watch::Sender<bool>>>,
}

/// Handle that cancels every context derived from it
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl ScanContext {
    /// Context with no deadline that is never cancelled externally.
    pub fn unbounded() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            deadline: None,
            cancel: rx,
            _keepalive: Some(std::sync::Arc::new(tx)),
        }
    }

    /// Context paired with an explicit cancellation handle.
    pub fn cancellable() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx },
            Self {
                deadline: None,
                cancel: rx,
                _keepalive: None,
            },
        )
    }

    /// Derives a child context whose deadline is the earlier of the parent's
    /// and `now + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(candidate)),
            None => Some(candidate),
        };
        Self {
            deadline,
            cancel: self.cancel.clone(),
            _keepalive: self._keepalive.clone(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn deadline_exceeded(&self) -> bool {
        matches!(self.remaining(), Some(r) if r.is_zero())
    }

    /// Resolves when the context is cancelled. Never resolves for contexts
    /// that cannot be cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        if *rx.borrow() {
            return;
        }
        loop {
            if rx.changed().await.is_err() {
                // Sender dropped without cancelling; park forever.
                std::future::pending::<()>().await;
            }
            if *rx.borrow() {
                return;
            }
        }
    }
}

/// Captured output of a finished scanner process
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ToolOutput {
    /// First bytes of stderr, for error reporting.
    pub fn stderr_head(&self) -> String {
        let head: String = self.stderr.chars().take(STDERR_HEAD_BYTES).collect();
        head
    }
}

/// Spawns a scanner binary and awaits its output under the context deadline.
///
/// The child is spawned with `kill_on_drop`, so both timeout and cancellation
/// terminate it promptly. A non-zero exit is not an error at this layer:
/// several tools use dedicated exit codes to signal findings present.
pub(crate) async fn run_tool(
    ctx: &ScanContext,
    scanner: &str,
    binary: &str,
    args: &[&str],
    stdin: Option<&[u8]>,
) -> Result<ToolOutput, ScannerError> {
    if ctx.is_cancelled() {
        return Err(ScannerError::Cancelled {
            scanner: scanner.to_string(),
        });
    }

    debug!("Spawning {} {:?}", binary, args);

    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ScannerError::Unavailable {
                scanner: scanner.to_string(),
            }
        } else {
            ScannerError::Io {
                scanner: scanner.to_string(),
                source: e,
            }
        }
    })?;

    if let Some(bytes) = stdin {
        if let Some(mut handle) = child.stdin.take() {
            handle
                .write_all(bytes)
                .await
                .map_err(|e| ScannerError::Io {
                    scanner: scanner.to_string(),
                    source: e,
                })?;
            // Close stdin so the tool sees EOF.
            drop(handle);
        }
    }

    let wait = child.wait_with_output();
    tokio::pin!(wait);

    let timeout_secs = ctx.remaining().map(|r| r.as_secs().max(1));
    let output = tokio::select! {
        result = &mut wait => result.map_err(|e| ScannerError::Io {
            scanner: scanner.to_string(),
            source: e,
        })?,
        _ = ctx.cancelled() => {
            return Err(ScannerError::Cancelled { scanner: scanner.to_string() });
        }
        _ = sleep_until_deadline(ctx) => {
            return Err(ScannerError::Timeout {
                scanner: scanner.to_string(),
                seconds: timeout_secs.unwrap_or(0),
            });
        }
    };

    Ok(ToolOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

async fn sleep_until_deadline(ctx: &ScanContext) {
    match ctx.remaining() {
        Some(remaining) => tokio::time::sleep(remaining).await,
        None => std::future::pending().await,
    }
}

/// Locates a scanner binary and lazily probes its version.
///
/// The availability probe runs the tool with its version flag under a short
/// ceiling; it is cheap, side-effect free, and never blocks indefinitely.
#[derive(Debug)]
pub struct ToolRunner {
    binary: String,
    version_arg: &'static str,
    version: tokio::sync::OnceCell<String>,
}

impl ToolRunner {
    pub fn new(binary: impl Into<String>, version_arg: &'static str) -> Self {
        Self {
            binary: binary.into(),
            version_arg,
            version: tokio::sync::OnceCell::new(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn probe(&self) -> Option<std::process::Output> {
        let mut command = Command::new(&self.binary);
        command
            .arg(self.version_arg)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(
            Duration::from_secs(AVAILABILITY_PROBE_TIMEOUT_SECS),
            command.output(),
        )
        .await
        {
            Ok(Ok(out)) => Some(out),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!("Availability probe for {} timed out", self.binary);
                None
            }
        }
    }

    /// Checks whether the tool responds to its version flag within the probe
    /// ceiling.
    pub async fn available(&self) -> bool {
        matches!(self.probe().await, Some(out) if out.status.success())
    }

    /// Tool version string, probed once and cached for the process lifetime.
    pub async fn version(&self) -> String {
        self.version
            .get_or_init(|| async {
                match self.probe().await {
                    Some(out) if out.status.success() => {
                        let text = String::from_utf8_lossy(&out.stdout);
                        output::version_token(&text).unwrap_or_else(|| "unknown".to_string())
                    }
                    _ => "unknown".to_string(),
                }
            })
            .await
            .clone()
    }
}

/// Contract implemented by every scanner adapter
#[async_trait]
pub trait ScannerAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Plugin metadata used for registry indexing and selection scoring.
    fn metadata(&self) -> PluginMetadata;

    /// Declared capabilities with confidence and performance profile.
    fn capabilities(&self) -> Vec<Capability>;

    fn supported_kinds(&self) -> &[&str];

    fn supports(&self, kind: &str) -> bool {
        self.supported_kinds().contains(&kind)
    }

    /// Tool version as reported by the binary, or "unknown".
    async fn version(&self) -> String;

    /// Cheap, bounded, side-effect-free availability probe.
    async fn available(&self) -> bool;

    /// Runs the tool against the artifact and parses its findings.
    ///
    /// Honors the context deadline and cancellation; spawned children are
    /// killed promptly on either. Findings come back in the tool's natural
    /// order.
    async fn scan(
        &self,
        ctx: &ScanContext,
        artifact_path: &str,
        kind: &str,
    ) -> Result<ScanResult, ScannerError>;
}
