//! Staging store for intermediate task outputs.
//!
//! Outputs are addressed by `(run id, task id)`. A key is written at most
//! once per run; downstream tasks only ever read.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::EngineError;

/// Address of one staged output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageKey {
    pub run_id: Uuid,
    pub task_id: String,
}

impl StageKey {
    pub fn new(run_id: Uuid, task_id: impl Into<String>) -> Self {
        Self {
            run_id,
            task_id: task_id.into(),
        }
    }
}

/// Opaque key → value storage shared by all runs.
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Stage a value.
    ///
    /// # Errors
    /// [`EngineError::StageConflict`] if the key was already written.
    async fn put(&self, key: StageKey, value: Value) -> Result<(), EngineError>;

    /// Read a staged value, `None` if the task never produced one.
    async fn get(&self, key: &StageKey) -> Result<Option<Value>, EngineError>;

    /// Drop every value staged by `run_id`; returns how many were removed.
    async fn clear_run(&self, run_id: Uuid) -> Result<usize, EngineError>;
}

/// Stage a serializable value.
pub async fn put_typed<T: Serialize + Sync>(
    store: &dyn StagingStore,
    key: StageKey,
    value: &T,
) -> Result<(), EngineError> {
    let value = serde_json::to_value(value).map_err(|source| EngineError::StageDecode {
        task_id: key.task_id.clone(),
        source,
    })?;
    store.put(key, value).await
}

/// Read a staged value back into `T`.
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn StagingStore,
    key: &StageKey,
) -> Result<Option<T>, EngineError> {
    match store.get(key).await? {
        None => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| EngineError::StageDecode {
                task_id: key.task_id.clone(),
                source,
            }),
    }
}

/// Process-local [`StagingStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<StageKey, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StagingStore for InMemoryStore {
    async fn put(&self, key: StageKey, value: Value) -> Result<(), EngineError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&key) {
            return Err(EngineError::StageConflict {
                run_id: key.run_id,
                task_id: key.task_id,
            });
        }
        entries.insert(key, value);
        Ok(())
    }

    async fn get(&self, key: &StageKey) -> Result<Option<Value>, EngineError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn clear_run(&self, run_id: Uuid) -> Result<usize, EngineError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| key.run_id != run_id);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn second_write_to_a_key_conflicts() {
        let store = InMemoryStore::new();
        let key = StageKey::new(Uuid::new_v4(), "load_data");

        store.put(key.clone(), json!(1)).await.unwrap();
        let err = store.put(key.clone(), json!(2)).await.unwrap_err();
        assert!(matches!(err, EngineError::StageConflict { .. }));
        assert_eq!(store.get(&key).await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn same_task_in_different_runs_does_not_conflict() {
        let store = InMemoryStore::new();
        store.put(StageKey::new(Uuid::new_v4(), "t"), json!(1)).await.unwrap();
        store.put(StageKey::new(Uuid::new_v4(), "t"), json!(2)).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn typed_round_trip_and_shape_errors() {
        let store = InMemoryStore::new();
        let key = StageKey::new(Uuid::new_v4(), "counts");
        put_typed(&store, key.clone(), &vec![1u32, 2, 3]).await.unwrap();

        let counts: Option<Vec<u32>> = get_typed(&store, &key).await.unwrap();
        assert_eq!(counts, Some(vec![1, 2, 3]));

        let wrong = get_typed::<String>(&store, &key).await;
        assert!(matches!(wrong, Err(EngineError::StageDecode { .. })));
    }

    #[tokio::test]
    async fn clear_run_only_touches_that_run() {
        let store = InMemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.put(StageKey::new(a, "x"), json!(1)).await.unwrap();
        store.put(StageKey::new(a, "y"), json!(2)).await.unwrap();
        store.put(StageKey::new(b, "x"), json!(3)).await.unwrap();

        assert_eq!(store.clear_run(a).await.unwrap(), 2);
        assert_eq!(store.len().await, 1);
        assert!(store.get(&StageKey::new(b, "x")).await.unwrap().is_some());
    }
}
