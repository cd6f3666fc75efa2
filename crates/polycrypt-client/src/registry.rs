use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use polycrypt_wire::OperationId;
use tracing::trace;

use crate::config::RegistryConfig;
use crate::messenger::{Link, Messenger};

/// Id allocator and dispatch table for live operations.
///
/// Ids start at 0, strictly increase, and are never reused, even after an
/// entry has been released.
#[derive(Debug)]
pub struct OperationRegistry {
    next_id: AtomicU64,
    table: Mutex<HashMap<OperationId, Arc<Messenger>>>,
    config: RegistryConfig,
}

impl OperationRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            table: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Reserve a fresh operation id.
    pub fn allocate(&self) -> OperationId {
        OperationId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate an id and register a messenger bound to it.
    pub fn open(self: &Arc<Self>, link: &Link) -> Arc<Messenger> {
        let messenger =
            Messenger::with_registry(self.allocate(), link.clone(), Arc::downgrade(self));
        self.register(messenger.clone());
        messenger
    }

    pub fn register(&self, messenger: Arc<Messenger>) {
        trace!(operation = %messenger.id(), "operation registered");
        self.lock().insert(messenger.id(), messenger);
    }

    pub fn get(&self, id: OperationId) -> Option<Arc<Messenger>> {
        self.lock().get(&id).cloned()
    }

    /// Drop an entry from the dispatch table. Returns false if it was absent.
    pub fn release(&self, id: OperationId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            trace!(operation = %id, "operation released");
        }
        removed
    }

    /// Number of routable operations.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OperationId, Arc<Messenger>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
