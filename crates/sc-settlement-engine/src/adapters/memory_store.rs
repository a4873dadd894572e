use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use crate::ports::outbound::{
    Collection, Filter, Precondition, RecordStore, Row, StoreError, WriteOutcome,
};

type Table = BTreeMap<String, Row>;

/// In-memory record store.
///
/// Every operation runs under one mutex, so a precondition check and the
/// write it guards are a single atomic step, the same guarantee a database
/// gives with a conditional `UPDATE ... WHERE` or a unique-constraint insert.
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: Mutex<HashMap<Collection, Table>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in `collection`.
    pub fn len(&self, collection: Collection) -> usize {
        self.tables
            .lock()
            .get(&collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, collection: Collection, id: &str, row: Row) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let table = tables.entry(collection).or_default();
        if table.contains_key(id) {
            return Err(StoreError::AlreadyExists {
                collection,
                id: id.to_string(),
            });
        }
        table.insert(id.to_string(), row);
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Row>, StoreError> {
        Ok(self
            .tables
            .lock()
            .get(&collection)
            .and_then(|table| table.get(id))
            .cloned())
    }

    async fn select(&self, collection: Collection, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        Ok(self
            .tables
            .lock()
            .get(&collection)
            .map(|table| {
                table
                    .values()
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        row: Row,
        precondition: Precondition,
    ) -> Result<WriteOutcome, StoreError> {
        let mut tables = self.tables.lock();
        let table = tables.entry(collection).or_default();
        match table.get_mut(id) {
            Some(current) if precondition.holds(Some(current)) => {
                *current = row;
                Ok(WriteOutcome::Applied)
            }
            _ => Ok(WriteOutcome::Rejected),
        }
    }

    async fn conditional_write(
        &self,
        collection: Collection,
        id: &str,
        row: Row,
        precondition: Precondition,
    ) -> Result<WriteOutcome, StoreError> {
        let mut tables = self.tables.lock();
        let table = tables.entry(collection).or_default();
        if !precondition.holds(table.get(id)) {
            return Ok(WriteOutcome::Rejected);
        }
        table.insert(id.to_string(), row);
        Ok(WriteOutcome::Applied)
    }

    async fn delete(
        &self,
        collection: Collection,
        id: &str,
        precondition: Precondition,
    ) -> Result<WriteOutcome, StoreError> {
        let mut tables = self.tables.lock();
        let table = tables.entry(collection).or_default();
        match table.get(id) {
            Some(current) if precondition.holds(Some(current)) => {
                table.remove(id);
                Ok(WriteOutcome::Applied)
            }
            _ => Ok(WriteOutcome::Rejected),
        }
    }

    async fn delete_where(
        &self,
        collection: Collection,
        precondition: Precondition,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.lock();
        let Some(table) = tables.get_mut(&collection) else {
            return Ok(0);
        };
        let before = table.len();
        table.retain(|_, row| !precondition.holds(Some(row)));
        Ok(before - table.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let store = InMemoryRecordStore::new();
        store.insert(Collection::Group, "g1", json!({"id": "g1"})).await.unwrap();
        let err = store
            .insert(Collection::Group, "g1", json!({"id": "g1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(store.len(Collection::Group), 1);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = InMemoryRecordStore::new();
        store.insert(Collection::Group, "x", json!({})).await.unwrap();
        store.insert(Collection::Member, "x", json!({})).await.unwrap();
        assert!(store.get(Collection::Transaction, "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_select_by_filter() {
        let store = InMemoryRecordStore::new();
        for (id, group) in [("m1", "g1"), ("m2", "g1"), ("m3", "g2")] {
            store
                .insert(Collection::Member, id, json!({"id": id, "group_id": group}))
                .await
                .unwrap();
        }
        let rows = store
            .select(Collection::Member, &Filter::new().eq("group_id", "g1"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_update_is_compare_and_swap() {
        let store = InMemoryRecordStore::new();
        store
            .insert(Collection::Group, "g", json!({"pos": 0}))
            .await
            .unwrap();

        let guard = Precondition::field_equals("pos", 0);
        let first = store
            .update(Collection::Group, "g", json!({"pos": 1}), guard.clone())
            .await
            .unwrap();
        let second = store
            .update(Collection::Group, "g", json!({"pos": 1}), guard)
            .await
            .unwrap();
        assert_eq!(first, WriteOutcome::Applied);
        assert_eq!(second, WriteOutcome::Rejected);

        let missing = store
            .update(Collection::Group, "nope", json!({}), Precondition::Always)
            .await
            .unwrap();
        assert_eq!(missing, WriteOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_delete_where_removes_matching_rows() {
        let store = InMemoryRecordStore::new();
        for (id, exp) in [("a", 10), ("b", 20), ("c", 30)] {
            store
                .insert(Collection::LockLease, id, json!({"expires_at_ms": exp}))
                .await
                .unwrap();
        }
        let removed = store
            .delete_where(Collection::LockLease, Precondition::field_less_than("expires_at_ms", 25))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(Collection::LockLease), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_conditional_write_has_single_winner() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .conditional_write(
                        Collection::LockLease,
                        "k",
                        json!({"holder_id": i}),
                        Precondition::Absent,
                    )
                    .await
                    .unwrap()
            }));
        }
        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().is_applied() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }
}
