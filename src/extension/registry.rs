//! Extension registry: capability-based dispatch of sources and criteria.

use std::sync::Arc;

use tracing::info;

use crate::connector::{CriterionType, SourceType};
use crate::extension::http::HttpExtension;
use crate::extension::oscommand::CommandLineExtension;
use crate::extension::ProtocolExtension;

/// Registered protocol extensions, dispatched by declared capability.
///
/// Registration order is significant: when two extensions claim the same
/// source or criterion kind, the earlier registration wins.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Arc<dyn ProtocolExtension>>,
}

impl ExtensionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry preloaded with the built-in extensions.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HttpExtension::new()));
        registry.register(Arc::new(CommandLineExtension::new()));
        registry
    }

    /// Register an extension.
    pub fn register(&mut self, extension: Arc<dyn ProtocolExtension>) {
        info!(protocol = extension.protocol(), "Protocol extension registered");
        self.extensions.push(extension);
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Protocol identifiers of all registered extensions, in registration
    /// order.
    pub fn protocols(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.protocol()).collect()
    }

    /// First extension able to execute the given source kind.
    pub fn extension_for_source(
        &self,
        source_type: SourceType,
    ) -> Option<Arc<dyn ProtocolExtension>> {
        self.extensions
            .iter()
            .find(|e| e.supported_sources().contains(&source_type))
            .map(Arc::clone)
    }

    /// First extension able to test the given criterion kind.
    pub fn extension_for_criterion(
        &self,
        criterion_type: CriterionType,
    ) -> Option<Arc<dyn ProtocolExtension>> {
        self.extensions
            .iter()
            .find(|e| e.supported_criteria().contains(&criterion_type))
            .map(Arc::clone)
    }

    /// Extension registered under the given protocol identifier.
    ///
    /// Section keys may carry an instance suffix (`http-backup`); dispatch
    /// strips it, so one extension serves every instance of its protocol.
    pub fn extension_for_protocol(&self, protocol: &str) -> Option<Arc<dyn ProtocolExtension>> {
        let base = protocol_base(protocol);
        self.extensions
            .iter()
            .find(|e| e.protocol() == base)
            .map(Arc::clone)
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("protocols", &self.protocols())
            .finish_non_exhaustive()
    }
}

/// Strip an instance suffix from a protocol section key (`http-backup` ->
/// `http`).
fn protocol_base(key: &str) -> &str {
    key.split('-').next().unwrap_or(key)
}
