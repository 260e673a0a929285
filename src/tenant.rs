//! Tenant configuration: workflow enablement gates and per-tenant overrides.

use crate::workflow::config::{TenantOverride, TenantSection};
use crate::workflow::Workflow;
use tokio::sync::RwLock;
use tracing::debug;

/// Answers tenant gating questions and exposes per-tenant overrides.
///
/// State is loaded from the configuration document's `tenants` section at
/// startup and replaced wholesale on reconfiguration.
pub struct TenantConfigService {
    section: RwLock<TenantSection>,
}

impl TenantConfigService {
    pub fn new() -> Self {
        Self {
            section: RwLock::new(TenantSection::default()),
        }
    }

    pub fn from_section(section: TenantSection) -> Self {
        Self {
            section: RwLock::new(section),
        }
    }

    pub async fn replace(&self, section: TenantSection) {
        let mut current = self.section.write().await;
        *current = section;
    }

    /// Whether the workflow may run for the tenant.
    ///
    /// Disabled entries match either the workflow's display name or its id
    /// slug. Unknown tenants inherit the defaults (everything enabled).
    pub async fn is_workflow_enabled(&self, tenant: &str, workflow: &Workflow) -> bool {
        let section = self.section.read().await;
        if !section.allow_override {
            return true;
        }
        let Some(overrides) = section.overrides.get(tenant) else {
            return true;
        };
        let disabled = overrides
            .disabled_workflows
            .iter()
            .any(|w| w == &workflow.name || w == &workflow.id);
        if disabled {
            debug!(
                "Workflow {} disabled for tenant {} by override",
                workflow.id, tenant
            );
        }
        !disabled
    }

    pub async fn override_for(&self, tenant: &str) -> Option<TenantOverride> {
        let section = self.section.read().await;
        if !section.allow_override {
            return None;
        }
        section.overrides.get(tenant).cloned()
    }

    /// Tenant policy path override, if any.
    pub async fn policy_path(&self, tenant: &str) -> Option<String> {
        self.override_for(tenant).await.and_then(|o| o.policy_path)
    }

    /// Tenant scanner whitelist, if any.
    pub async fn scanner_whitelist(&self, tenant: &str) -> Option<Vec<String>> {
        self.override_for(tenant)
            .await
            .and_then(|o| o.scanner_whitelist)
    }

    /// Tenant notification channel override, if any.
    pub async fn notification_channels(&self, tenant: &str) -> Option<Vec<String>> {
        self.override_for(tenant)
            .await
            .and_then(|o| o.notification_channels)
    }
}

impl Default for TenantConfigService {
    fn default() -> Self {
        Self::new()
    }
}
