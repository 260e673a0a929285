//! Output store: persistence of per-scanner raw output and final job status.
//!
//! Persistence errors are reported to the caller, who appends them to the
//! job's error list; they never change the job status.

use crate::{AegisError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

/// One persisted scanner output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutputRecord {
    pub tool: String,
    /// Raw scanner result JSON as produced by the adapter layer.
    pub output_raw: Vec<u8>,
    pub summary: HashMap<String, serde_json::Value>,
}

#[async_trait]
pub trait OutputStore: Send + Sync {
    async fn save_scan_results(&self, job_id: &str, results: &[ScanOutputRecord]) -> Result<()>;
    async fn mark_job_completed(&self, job_id: &str, status: &str) -> Result<()>;
}

/// Filesystem store: one directory per job under the configured root.
pub struct FsOutputStore {
    root: PathBuf,
}

impl FsOutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        // Job ids are UUIDs minted by the orchestrator; sanitize anyway so a
        // hostile id cannot escape the root.
        let safe: String = job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join(safe)
    }
}

#[async_trait]
impl OutputStore for FsOutputStore {
    async fn save_scan_results(&self, job_id: &str, results: &[ScanOutputRecord]) -> Result<()> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AegisError::Persistence {
                message: format!("cannot create {}: {e}", dir.display()),
            })?;

        for record in results {
            let path = dir.join(format!("{}.json", record.tool));
            tokio::fs::write(&path, &record.output_raw)
                .await
                .map_err(|e| AegisError::Persistence {
                    message: format!("cannot write {}: {e}", path.display()),
                })?;

            let summary_path = dir.join(format!("{}.summary.json", record.tool));
            let summary = serde_json::to_vec_pretty(&record.summary)?;
            tokio::fs::write(&summary_path, summary)
                .await
                .map_err(|e| AegisError::Persistence {
                    message: format!("cannot write {}: {e}", summary_path.display()),
                })?;
        }

        debug!("Persisted {} scanner outputs for job {}", results.len(), job_id);
        Ok(())
    }

    async fn mark_job_completed(&self, job_id: &str, status: &str) -> Result<()> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AegisError::Persistence {
                message: format!("cannot create {}: {e}", dir.display()),
            })?;
        let path = dir.join("status");
        tokio::fs::write(&path, status)
            .await
            .map_err(|e| AegisError::Persistence {
                message: format!("cannot write {}: {e}", path.display()),
            })?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryOutputStore {
    saved: Mutex<HashMap<String, Vec<ScanOutputRecord>>>,
    statuses: Mutex<Vec<(String, String)>>,
}

impl MemoryOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn saved_results(&self, job_id: &str) -> Vec<ScanOutputRecord> {
        let saved = self.saved.lock().await;
        saved.get(job_id).cloned().unwrap_or_default()
    }

    pub async fn save_calls(&self) -> usize {
        self.saved.lock().await.len()
    }

    pub async fn statuses(&self) -> Vec<(String, String)> {
        self.statuses.lock().await.clone()
    }
}

#[async_trait]
impl OutputStore for MemoryOutputStore {
    async fn save_scan_results(&self, job_id: &str, results: &[ScanOutputRecord]) -> Result<()> {
        let mut saved = self.saved.lock().await;
        saved.insert(job_id.to_string(), results.to_vec());
        Ok(())
    }

    async fn mark_job_completed(&self, job_id: &str, status: &str) -> Result<()> {
        let mut statuses = self.statuses.lock().await;
        statuses.push((job_id.to_string(), status.to_string()));
        Ok(())
    }
}

/// Store that always fails; exercises the non-fatal persistence path.
#[cfg(test)]
pub struct FailingOutputStore;

#[cfg(test)]
#[async_trait]
impl OutputStore for FailingOutputStore {
    async fn save_scan_results(&self, _job_id: &str, _results: &[ScanOutputRecord]) -> Result<()> {
        Err(AegisError::Persistence {
            message: "store unavailable".to_string(),
        })
    }

    async fn mark_job_completed(&self, _job_id: &str, _status: &str) -> Result<()> {
        Err(AegisError::Persistence {
            message: "store unavailable".to_string(),
        })
    }
}
