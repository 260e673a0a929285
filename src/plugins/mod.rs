//! Scanner plugin registry, health checking, and selection strategies.

pub mod health;
pub mod manager;
pub mod registry;
pub mod strategy;

pub use health::{HealthChecker, HealthCheckerStats};
pub use manager::PluginManager;
pub use registry::PluginRegistry;
pub use strategy::{SelectionRequest, SelectionStrategy};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Categories a plugin may be indexed under
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PluginCategory {
    Vulnerability,
    Security,
    Sbom,
    License,
    Quality,
    Compliance,
}

/// Coarse resource demand levels declared by a plugin
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLevel {
    Low,
    Medium,
    High,
}

impl ResourceLevel {
    /// Penalty contribution used by resource-aware scoring.
    pub fn penalty(&self) -> f64 {
        match self {
            ResourceLevel::Low => 0.0,
            ResourceLevel::Medium => 5.0,
            ResourceLevel::High => 10.0,
        }
    }
}

/// Declared resource requirements of a plugin
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRequirements {
    pub cpu: ResourceLevel,
    pub memory: ResourceLevel,
    pub disk: ResourceLevel,
    pub network: ResourceLevel,
}

impl ResourceRequirements {
    pub fn low() -> Self {
        Self {
            cpu: ResourceLevel::Low,
            memory: ResourceLevel::Low,
            disk: ResourceLevel::Low,
            network: ResourceLevel::Low,
        }
    }

    pub fn total_penalty(&self) -> f64 {
        self.cpu.penalty() + self.memory.penalty() + self.disk.penalty() + self.network.penalty()
    }
}

/// Stable identity and indexing data for one registered scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    pub categories: Vec<PluginCategory>,
    pub tags: Vec<String>,
    pub priority: i32,
    pub resources: ResourceRequirements,
}

/// What a scanner can detect
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    CveDetection,
    SecretDetection,
    SbomGeneration,
    StaticAnalysis,
    LicenseScanning,
    DependencyAudit,
    ConfigAudit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Speed {
    Fast,
    Medium,
    Slow,
}

impl Speed {
    pub fn score(&self) -> f64 {
        match self {
            Speed::Fast => 100.0,
            Speed::Medium => 50.0,
            Speed::Slow => 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    Low,
    Medium,
    High,
}

impl Accuracy {
    pub fn score(&self) -> f64 {
        match self {
            Accuracy::High => 100.0,
            Accuracy::Medium => 60.0,
            Accuracy::Low => 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    Basic,
    Moderate,
    Comprehensive,
}

impl Coverage {
    pub fn score(&self) -> f64 {
        match self {
            Coverage::Comprehensive => 100.0,
            Coverage::Moderate => 60.0,
            Coverage::Basic => 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FalsePositiveRate {
    Low,
    Medium,
    High,
}

/// Performance characteristics of one capability
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub speed: Speed,
    pub accuracy: Accuracy,
    pub coverage: Coverage,
    pub false_positive_rate: FalsePositiveRate,
}

/// A declared detection capability with confidence in [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub kind: CapabilityKind,
    pub confidence: f64,
    pub profile: PerformanceProfile,
}

/// Cached probe verdict for one plugin
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub state: HealthState,
    pub message: String,
    pub checked_at: chrono::DateTime<chrono::Utc>,
    pub details: HashMap<String, String>,
}

impl HealthStatus {
    pub fn unknown() -> Self {
        Self {
            state: HealthState::Unknown,
            message: "not yet checked".to_string(),
            checked_at: chrono::Utc::now(),
            details: HashMap::new(),
        }
    }

    pub fn healthy() -> Self {
        Self {
            state: HealthState::Healthy,
            message: "ok".to_string(),
            checked_at: chrono::Utc::now(),
            details: HashMap::new(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            state: HealthState::Unhealthy,
            message: message.into(),
            checked_at: chrono::Utc::now(),
            details: HashMap::new(),
        }
    }
}
