//! Transaction registry
//!
//! Maps transaction id → saga graph builder. Every builder sits behind its own
//! mutex so same-id events are applied one at a time, while different ids only
//! share a DashMap shard lock for the duration of a lookup.

use crate::config::PlanSettings;
use crate::error::{Result, SagaError};
use crate::event::TransactionId;
use crate::graph::SagaGraphBuilder;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared handle to one transaction's builder
pub type BuilderHandle = Arc<Mutex<SagaGraphBuilder>>;

/// Registry operations. Implementations must make each operation atomic per
/// key: insert-if-absent, remove-if-present and lookup.
pub trait TransactionRegistry: Send + Sync {
    /// Create a fresh builder; `DuplicateTransaction` if one exists
    fn begin(&self, transaction_id: &TransactionId) -> Result<BuilderHandle>;

    /// Builder for in-progress mutation; `UnknownTransaction` if absent
    fn get_for_mutation(&self, transaction_id: &TransactionId) -> Result<BuilderHandle>;

    /// Remove and return the builder; `UnknownTransaction` if absent
    fn remove(&self, transaction_id: &TransactionId) -> Result<BuilderHandle>;

    /// Number of builders currently registered
    fn active_count(&self) -> usize;
}

/// In-memory registry backed by DashMap
pub struct InMemoryTransactionRegistry {
    builders: DashMap<TransactionId, BuilderHandle>,
    settings: Arc<PlanSettings>,
}

impl InMemoryTransactionRegistry {
    pub fn new(settings: PlanSettings) -> Self {
        Self {
            builders: DashMap::new(),
            settings: Arc::new(settings),
        }
    }

    pub fn contains(&self, transaction_id: &TransactionId) -> bool {
        self.builders.contains_key(transaction_id)
    }
}

impl Default for InMemoryTransactionRegistry {
    fn default() -> Self {
        Self::new(PlanSettings::default())
    }
}

impl TransactionRegistry for InMemoryTransactionRegistry {
    fn begin(&self, transaction_id: &TransactionId) -> Result<BuilderHandle> {
        match self.builders.entry(transaction_id.clone()) {
            Entry::Occupied(_) => Err(SagaError::DuplicateTransaction(transaction_id.clone())),
            Entry::Vacant(slot) => {
                let builder = Arc::new(Mutex::new(SagaGraphBuilder::new(
                    transaction_id.clone(),
                    self.settings.clone(),
                )));
                slot.insert(builder.clone());
                Ok(builder)
            }
        }
    }

    fn get_for_mutation(&self, transaction_id: &TransactionId) -> Result<BuilderHandle> {
        // Clone the Arc out so the shard lock is released before the caller
        // takes the builder mutex.
        self.builders
            .get(transaction_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SagaError::UnknownTransaction(transaction_id.clone()))
    }

    fn remove(&self, transaction_id: &TransactionId) -> Result<BuilderHandle> {
        self.builders
            .remove(transaction_id)
            .map(|(_, builder)| builder)
            .ok_or_else(|| SagaError::UnknownTransaction(transaction_id.clone()))
    }

    fn active_count(&self) -> usize {
        self.builders.len()
    }
}
