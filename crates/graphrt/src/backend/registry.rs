//! Process-wide backend registry.
//!
//! Nothing registers itself at load time: the host application populates the
//! registry explicitly (typically through `register_all_backends()`), then
//! creates backends by identity.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use super::Backend;
use crate::error::{BackendError, BackendResult};

/// Builds a backend from its free-form configuration string. An empty string
/// means the default configuration.
pub type BackendFactory = Arc<dyn Fn(&str) -> BackendResult<Arc<dyn Backend>> + Send + Sync>;

struct BackendRegistry {
    factories: RwLock<HashMap<String, BackendFactory>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, identity: String, factory: BackendFactory) {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if factories.insert(identity.clone(), factory).is_some() {
            tracing::debug!(identity, "replaced backend factory");
        }
    }

    fn factory(&self, identity: &str) -> Option<BackendFactory> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.get(identity).cloned()
    }

    fn unregister(&self, identity: &str) -> bool {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        factories.remove(identity).is_some()
    }

    fn identities(&self) -> Vec<String> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let mut identities: Vec<String> = factories.keys().cloned().collect();
        identities.sort();
        identities
    }
}

static GLOBAL_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();

fn global_registry() -> &'static BackendRegistry {
    GLOBAL_REGISTRY.get_or_init(BackendRegistry::new)
}

/// Registers a factory under a short uppercase identity such as `"CPU"`.
/// Registering an identity again replaces the previous factory.
pub fn register_backend<F>(identity: impl Into<String>, factory: F)
where
    F: Fn(&str) -> BackendResult<Arc<dyn Backend>> + Send + Sync + 'static,
{
    global_registry().register(identity.into(), Arc::new(factory));
}

/// Creates a backend by identity. This is the only construction path hosts need.
pub fn create_backend(identity: &str, configuration: &str) -> BackendResult<Arc<dyn Backend>> {
    let factory = global_registry()
        .factory(identity)
        .ok_or_else(|| BackendError::UnknownBackend(identity.to_string()))?;
    tracing::debug!(identity, configuration, "creating backend");
    factory(configuration)
}

/// Registered identities, sorted.
pub fn list_backends() -> Vec<String> {
    global_registry().identities()
}

pub fn has_backend(identity: &str) -> bool {
    global_registry().factory(identity).is_some()
}

pub fn unregister_backend(identity: &str) -> bool {
    global_registry().unregister(identity)
}
