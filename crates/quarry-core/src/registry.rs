use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AppError;
use crate::traits::Connector;

/// Lookup table from source id to a shared connector handle.
///
/// Owned by whoever builds the orchestrator; there is no global registry.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connector` under its own source id, replacing any previous one.
    pub fn register(&mut self, connector: Arc<dyn Connector>) -> Option<Arc<dyn Connector>> {
        let source_id = connector.source_id().to_string();
        let previous = self.connectors.insert(source_id.clone(), connector);
        if previous.is_some() {
            tracing::warn!(%source_id, "Replacing previously registered connector");
        }
        previous
    }

    pub fn with(mut self, connector: Arc<dyn Connector>) -> Self {
        self.register(connector);
        self
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(source_id).cloned()
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.connectors.contains_key(source_id)
    }

    /// Registered source ids, sorted.
    pub fn source_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Resolve `source_ids` in order, failing on the first unknown id.
    pub fn resolve(&self, source_ids: &[String]) -> Result<Vec<Arc<dyn Connector>>, AppError> {
        source_ids
            .iter()
            .map(|id| {
                self.get(id).ok_or_else(|| {
                    AppError::ConfigError(format!("No connector registered for source '{id}'"))
                })
            })
            .collect()
    }
}
