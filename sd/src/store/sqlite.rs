//! SQLite-backed state store shared across processes

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use statestore::Store;
use tracing::{debug, info};

use super::{StateStore, StateTransition, StateUpdate, StoreError};
use crate::scheduler::QueueState;

/// Adapter over `statestore::Store`
///
/// SQLite calls block, so each one runs on the blocking pool. Atomicity
/// across processes comes from the immediate transaction inside
/// `Store::update`.
#[derive(Clone)]
pub struct SqliteStateStore {
    inner: Arc<Mutex<Store>>,
}

impl SqliteStateStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!(path = %path.display(), "Opening state store");
        let store = Store::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(store)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Store::open_in_memory()?;
        Ok(Self {
            inner: Arc::new(Mutex::new(store)),
        })
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Store) -> Result<T, statestore::StoreError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut store = inner
                .lock()
                .map_err(|_| StoreError::Backend("state store lock poisoned".to_string()))?;
            f(&mut store).map_err(StoreError::from)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {}", e)))?
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<QueueState>, StoreError> {
        let key = key.to_string();
        self.with_store(move |store| store.get::<QueueState>(&key)).await
    }

    async fn set(&self, key: &str, state: QueueState) -> Result<(), StoreError> {
        let key = key.to_string();
        self.with_store(move |store| store.set(&key, &state)).await
    }

    async fn update(&self, key: &str, f: StateUpdate) -> Result<StateTransition, StoreError> {
        let key = key.to_string();
        let updated = self.with_store(move |store| store.update::<QueueState, _>(&key, f)).await?;
        debug!(previous = ?updated.previous, current = ?updated.current, "SqliteStateStore::update: committed");
        Ok(StateTransition {
            previous: updated.previous,
            current: updated.current,
        })
    }
}
