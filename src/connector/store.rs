//! Loaded-connector store, keyed by connector id.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::ConfigError;

use super::model::Connector;

/// Owns every loaded connector for the process run.
///
/// Built once at startup and shared read-only with the strategies; no global
/// state is involved.
#[derive(Debug, Clone, Default)]
pub struct ConnectorStore {
    connectors: BTreeMap<String, Arc<Connector>>,
}

impl ConnectorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add one connector.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` on invalid content or a
    /// duplicate id.
    pub fn add(&mut self, connector: Connector) -> Result<(), ConfigError> {
        connector.validate()?;
        let id = connector.connector_id.clone();
        if self.connectors.contains_key(&id) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate connector id: '{id}'"
            )));
        }
        self.connectors.insert(id, Arc::new(connector));
        Ok(())
    }

    /// Look up a connector by id.
    pub fn get(&self, connector_id: &str) -> Option<Arc<Connector>> {
        self.connectors.get(connector_id).cloned()
    }

    /// Connector ids in deterministic (sorted) order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.connectors.keys().map(String::as_str)
    }

    /// Iterate connectors in deterministic (sorted-id) order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Connector>> {
        self.connectors.values()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Load every connector YAML document from a directory.
    ///
    /// Non-YAML files are skipped; parse or validation failures name the
    /// offending file.
    pub fn load_from_dir(dir_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir_path.as_ref();
        if !dir.exists() {
            return Err(ConfigError::ValidationError(format!(
                "connector directory '{}' does not exist",
                dir.display()
            )));
        }
        if !dir.is_dir() {
            return Err(ConfigError::ValidationError(format!(
                "connector path '{}' is not a directory",
                dir.display()
            )));
        }

        let mut store = Self::new();
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|entry| entry.path())
            .collect();
        // Deterministic load order regardless of directory iteration order.
        paths.sort();

        for path in paths {
            if !path.is_file() {
                continue;
            }
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext != "yaml" && ext != "yml" {
                continue;
            }

            tracing::debug!(file = %path.display(), "Loading connector");
            let content = std::fs::read_to_string(&path)?;
            let connector: Connector = serde_yaml::from_str(&content).map_err(|e| {
                ConfigError::ValidationError(format!("failed to parse '{}': {e}", path.display()))
            })?;
            store.add(connector).map_err(|e| {
                ConfigError::ValidationError(format!("in '{}': {e}", path.display()))
            })?;
        }

        tracing::info!(count = store.len(), dir = %dir.display(), "Connectors loaded");
        Ok(store)
    }
}
