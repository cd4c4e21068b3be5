//! In-process state store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{StateStore, StateTransition, StateUpdate, StoreError};
use crate::scheduler::QueueState;

/// Records kept in memory; the lock is held for the whole update
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, QueueState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<QueueState>, StoreError> {
        Ok(self.records.lock().await.get(key).copied())
    }

    async fn set(&self, key: &str, state: QueueState) -> Result<(), StoreError> {
        self.records.lock().await.insert(key.to_string(), state);
        Ok(())
    }

    async fn update(&self, key: &str, f: StateUpdate) -> Result<StateTransition, StoreError> {
        let mut records = self.records.lock().await;
        let previous = records.get(key).copied();
        let current = f(previous);
        records.insert(key.to_string(), current);
        debug!(%key, ?previous, ?current, "MemoryStateStore::update: applied");
        Ok(StateTransition { previous, current })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_update_sees_previous() {
        let store = MemoryStateStore::new();
        let first = store.update("k", Box::new(|_: Option<QueueState>| QueueState::new(10, 1))).await.unwrap();
        assert_eq!(first.previous, None);

        let second = store
            .update("k", Box::new(|prev: Option<QueueState>| prev.unwrap_or_default().scheduled(20)))
            .await
            .unwrap();
        assert_eq!(second.previous, Some(QueueState::new(10, 1)));
        assert_eq!(second.current, QueueState::new(20, 2));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStateStore::new();
        store.set("a", QueueState::new(1, 1)).await.unwrap();
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(MemoryStateStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update("k", Box::new(|prev: Option<QueueState>| prev.unwrap_or_default().scheduled(0)))
                    .await
                    .unwrap()
            }));
        }

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap().previous.map(|s| s.pending_requests).unwrap_or(0));
        }
        seen.sort_unstable();

        // Each update observed a distinct predecessor
        assert_eq!(seen, (0..50).collect::<Vec<u64>>());
        assert_eq!(store.get("k").await.unwrap().unwrap().pending_requests, 50);
    }
}
