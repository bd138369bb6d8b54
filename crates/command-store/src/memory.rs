use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use protocol::{CommandId, CommandRecord, CommandStatus};

use crate::{now_rfc3339, CommandRepository, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    last_id: CommandId,
    records: BTreeMap<CommandId, CommandRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandRepository for MemoryStore {
    async fn create(
        &self,
        script: &str,
        status: CommandStatus,
    ) -> Result<CommandRecord, StoreError> {
        let mut inner = self.inner.lock();
        inner.last_id += 1;
        let record = CommandRecord {
            id: inner.last_id,
            script: script.to_string(),
            status,
            output: String::new(),
            created_at: now_rfc3339(),
        };
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, record: &CommandRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let stored = inner
            .records
            .get_mut(&record.id)
            .ok_or(StoreError::NotFound(record.id))?;
        stored.script = record.script.clone();
        stored.status = record.status;
        stored.output = record.output.clone();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CommandRecord>, StoreError> {
        Ok(self.inner.lock().records.values().cloned().collect())
    }

    async fn get(&self, id: CommandId) -> Result<CommandRecord, StoreError> {
        self.inner
            .lock()
            .records
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_assigns_monotonic_ids() {
        let store = MemoryStore::new();
        let first = store
            .create("echo a", CommandStatus::InProcess)
            .await
            .expect("create");
        let second = store
            .create("echo b", CommandStatus::InProcess)
            .await
            .expect("create");
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(!first.created_at.is_empty());
    }

    #[tokio::test]
    async fn update_keeps_id_and_created_at() {
        let store = MemoryStore::new();
        let mut record = store
            .create("echo a", CommandStatus::InProcess)
            .await
            .expect("create");
        let created_at = record.created_at.clone();
        record.status = CommandStatus::Completed;
        record.output = "a\n".to_string();
        record.created_at = "overwritten".to_string();
        store.update(&record).await.expect("update");

        let stored = store.get(record.id).await.expect("get");
        assert_eq!(stored.status, CommandStatus::Completed);
        assert_eq!(stored.output, "a\n");
        assert_eq!(stored.created_at, created_at);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get(42).await.expect_err("missing");
        assert!(matches!(err, StoreError::NotFound(42)));

        let ghost = CommandRecord {
            id: 42,
            script: "true".to_string(),
            status: CommandStatus::Completed,
            output: String::new(),
            created_at: String::new(),
        };
        let err = store.update(&ghost).await.expect_err("missing");
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[tokio::test]
    async fn list_is_ordered_by_id() {
        let store = MemoryStore::new();
        for script in ["a", "b", "c"] {
            store
                .create(script, CommandStatus::Pending)
                .await
                .expect("create");
        }
        let scripts: Vec<_> = store
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|record| record.script)
            .collect();
        assert_eq!(scripts, vec!["a", "b", "c"]);
    }
}
