//! Per-backend compilation cache: at most one artifact per function.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{CallFrame, ExternalFunction};
use crate::graph::FunctionId;

/// An artifact together with the call frame bound to it.
pub struct CompiledFunction {
    pub external: Arc<dyn ExternalFunction>,
    pub call_frame: Box<dyn CallFrame>,
}

#[derive(Default)]
pub struct InstanceState {
    pub performance_counters_enabled: bool,
    pub compiled: Option<CompiledFunction>,
}

/// Cache entry for one (backend, function) pair.
///
/// The state lock serialises lowering and call-frame use for this function only;
/// other functions proceed independently.
#[derive(Default)]
pub struct FunctionInstance {
    state: Mutex<InstanceState>,
}

impl FunctionInstance {
    pub fn lock(&self) -> MutexGuard<'_, InstanceState> {
        // A panic inside a kernel leaves the state itself consistent: the artifact
        // is either fully built or absent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Entries are keyed by [`FunctionId`] and outlive the `Function` they were
/// built from: an entry, and the artifact it owns, stays until
/// [`FunctionCache::remove`] is called for it or the cache is dropped.
#[derive(Default)]
pub struct FunctionCache {
    entries: Mutex<HashMap<FunctionId, Arc<FunctionInstance>>>,
}

impl FunctionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `id`, creating an empty one if needed.
    pub fn instance(&self, id: FunctionId) -> Arc<FunctionInstance> {
        let mut entries = self.entries();
        Arc::clone(entries.entry(id).or_default())
    }

    pub fn get(&self, id: FunctionId) -> Option<Arc<FunctionInstance>> {
        self.entries().get(&id).cloned()
    }

    pub fn remove(&self, id: FunctionId) -> bool {
        self.entries().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<FunctionId, Arc<FunctionInstance>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FunctionBuilder;
    use crate::tensor::DType;

    #[test]
    fn entries_outlive_their_function_until_removed() {
        let cache = FunctionCache::new();
        let id = {
            let mut builder = FunctionBuilder::new("dropped");
            let x = builder.parameter(DType::F32, [1]);
            let function = builder.finish(&[x]).unwrap();
            cache.instance(function.id()).lock().performance_counters_enabled = true;
            function.id()
        };
        let instance = cache.get(id).expect("entry survives the function");
        assert!(instance.lock().performance_counters_enabled);
        assert_eq!(cache.len(), 1);

        assert!(cache.remove(id));
        assert!(cache.is_empty());
        assert!(!cache.remove(id));
    }
}
