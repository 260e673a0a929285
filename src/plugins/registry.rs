//! Plugin registry: id-keyed adapter store with category and tag indices.
//!
//! Reads are lock-shared and never block each other; writes happen only
//! during startup registration.

use super::{PluginCategory, PluginMetadata};
use crate::scanners::ScannerAdapter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A registered scanner with its cached metadata and capabilities
#[derive(Clone)]
pub struct PluginHandle {
    pub adapter: Arc<dyn ScannerAdapter>,
    pub metadata: PluginMetadata,
    pub capabilities: Vec<super::Capability>,
    /// Health snapshot stamped by the manager before selection.
    pub health: super::HealthState,
}

impl PluginHandle {
    pub fn new(adapter: Arc<dyn ScannerAdapter>) -> Self {
        let metadata = adapter.metadata();
        let capabilities = adapter.capabilities();
        Self {
            adapter,
            metadata,
            capabilities,
            health: super::HealthState::Unknown,
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("id", &self.metadata.id)
            .field("health", &self.health)
            .finish()
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, PluginHandle>>,
    by_category: RwLock<HashMap<PluginCategory, Vec<String>>>,
    by_tag: RwLock<HashMap<String, Vec<String>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter and indexes it by category and tag.
    ///
    /// Re-registering an id replaces the previous entry; the indices keep a
    /// single occurrence.
    pub async fn register(&self, adapter: Arc<dyn ScannerAdapter>) {
        let handle = PluginHandle::new(adapter);
        let id = handle.metadata.id.clone();

        {
            let mut by_category = self.by_category.write().await;
            for category in &handle.metadata.categories {
                let ids = by_category.entry(*category).or_default();
                if !ids.contains(&id) {
                    ids.push(id.clone());
                }
            }
        }
        {
            let mut by_tag = self.by_tag.write().await;
            for tag in &handle.metadata.tags {
                let ids = by_tag.entry(tag.clone()).or_default();
                if !ids.contains(&id) {
                    ids.push(id.clone());
                }
            }
        }

        let mut plugins = self.plugins.write().await;
        debug!("Registered plugin {}", id);
        plugins.insert(id, handle);
    }

    pub async fn get(&self, id: &str) -> Option<PluginHandle> {
        let plugins = self.plugins.read().await;
        plugins.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        let plugins = self.plugins.read().await;
        plugins.contains_key(id)
    }

    pub async fn all(&self) -> Vec<PluginHandle> {
        let plugins = self.plugins.read().await;
        let mut handles: Vec<_> = plugins.values().cloned().collect();
        handles.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));
        handles
    }

    pub async fn ids(&self) -> Vec<String> {
        let plugins = self.plugins.read().await;
        let mut ids: Vec<_> = plugins.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn by_category(&self, category: PluginCategory) -> Vec<PluginHandle> {
        let ids = {
            let by_category = self.by_category.read().await;
            by_category.get(&category).cloned().unwrap_or_default()
        };
        let plugins = self.plugins.read().await;
        ids.iter().filter_map(|id| plugins.get(id).cloned()).collect()
    }

    pub async fn by_tag(&self, tag: &str) -> Vec<PluginHandle> {
        let ids = {
            let by_tag = self.by_tag.read().await;
            by_tag.get(tag).cloned().unwrap_or_default()
        };
        let plugins = self.plugins.read().await;
        ids.iter().filter_map(|id| plugins.get(id).cloned()).collect()
    }

    pub async fn len(&self) -> usize {
        let plugins = self.plugins.read().await;
        plugins.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanners::TrivyAdapter;

    #[tokio::test]
    async fn register_and_lookup_by_indices() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(TrivyAdapter::new())).await;

        assert!(registry.contains("trivy").await);
        assert_eq!(registry.len().await, 1);

        let vuln = registry.by_category(PluginCategory::Vulnerability).await;
        assert_eq!(vuln.len(), 1);
        assert_eq!(vuln[0].id(), "trivy");

        let tagged = registry.by_tag("container").await;
        assert_eq!(tagged.len(), 1);

        assert!(registry.by_tag("nonexistent").await.is_empty());
    }

    #[tokio::test]
    async fn reregistration_does_not_duplicate_indices() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(TrivyAdapter::new())).await;
        registry.register(Arc::new(TrivyAdapter::new())).await;

        assert_eq!(registry.len().await, 1);
        assert_eq!(
            registry.by_category(PluginCategory::Vulnerability).await.len(),
            1
        );
    }
}
