//! Shared backlog storage
//!
//! The scheduler keeps one `QueueState` record per state key. Every
//! backend must apply `update` as a single atomic read-modify-write, so
//! concurrent schedulers never compute their delay from the same snapshot.

mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::{StoreBackend, StoreConfig};
use crate::scheduler::QueueState;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;

/// Mutation applied inside an atomic update
pub type StateUpdate = Box<dyn FnOnce(Option<QueueState>) -> QueueState + Send>;

/// Record before and after an atomic update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub previous: Option<QueueState>,
    pub current: QueueState,
}

/// Errors from a state store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State store unavailable: {0}")]
    Unavailable(String),

    #[error("State store backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Persistent(#[from] statestore::StoreError),
}

/// Key-value store holding backlog records
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a record
    async fn get(&self, key: &str) -> Result<Option<QueueState>, StoreError>;

    /// Overwrite a record
    async fn set(&self, key: &str, state: QueueState) -> Result<(), StoreError>;

    /// Atomically replace a record with `f(previous)`
    async fn update(&self, key: &str, f: StateUpdate) -> Result<StateTransition, StoreError>;
}

/// Open the backend named in the configuration
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn StateStore>, StoreError> {
    debug!(?config, "open_store: called");
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStateStore::new())),
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStateStore::open(&config.path)?)),
    }
}
