//! # Aegis Core
//!
//! Aegis Core is a multi-tenant artifact security-scanning service: tenants
//! submit artifacts (container images, language packages, charts, binaries),
//! and the service runs a configurable set of third-party scanners against
//! them, aggregates and deduplicates the findings, evaluates the outcome
//! against tenant policy, persists results, and emits notifications.
//!
//! ## Architecture
//!
//! The system consists of:
//! - **Scanner Adapters**: Thin wrappers around external scan tools
//! - **Plugin Manager**: Registry, health checking, and selection strategies
//! - **Workflow Engine**: Staged DAG executor over declarative workflows
//! - **Result Aggregator**: Deterministic finding merge and deduplication
//! - **Orchestrator**: Drives jobs through scanning, policy, and persistence
//! - **Performance Layer**: Caching, circuit breakers, bounded concurrency
//!
//! ## Usage
//!
//! The service runs as a standalone long-lived process; scanners are probed
//! and registered at startup and workflows load from a static configuration
//! document.

/// Result aggregation and severity filtering
pub mod aggregate;
/// Service configuration from environment
pub mod config;
/// System-wide constants
pub mod constants;
/// Error types and handling
pub mod error;
/// Core data models
pub mod models;
/// Violation notification channels
pub mod notify;
/// Scan orchestration and performance management
pub mod orchestrator;
/// Plugin registry, health checking, and selection strategies
pub mod plugins;
/// Policy service client
pub mod policy;
/// Scanner adapters for external tools
pub mod scanners;
/// Persistence of scan outputs and job status
pub mod store;
/// Tenant gating and overrides
pub mod tenant;
/// Declarative workflows and the staged executor
pub mod workflow;

#[cfg(test)]
mod tests;

pub use error::{AegisError, Result};
