//! Embedded document store backed by process memory.
//!
//! Serves as the default backend in `main` and as the store for every test.
//! Transactions take the store's write lock for their whole span, so they
//! are fully serialized: a transaction that re-checks a key (for example the
//! direct-conversation pair index) cannot race another writer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::store::{DocumentStore, Filter, StoreError, Txn};

type Collections = HashMap<String, BTreeMap<String, Value>>;

#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryTxn<'a> {
    base: &'a Collections,
    staged: Collections,
}

impl Txn for MemoryTxn<'_> {
    fn get(&self, collection: &str, key: &str) -> Option<Value> {
        if let Some(doc) = self.staged.get(collection).and_then(|c| c.get(key)) {
            return Some(doc.clone());
        }
        self.base
            .get(collection)
            .and_then(|c| c.get(key))
            .cloned()
    }

    fn set(&mut self, collection: &str, key: &str, doc: Value) {
        self.staged
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), doc);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.get(collection).and_then(|c| c.get(key)).cloned())
    }

    async fn set(&self, collection: &str, key: &str, doc: Value) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), doc);
        Ok(())
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let guard = self.inner.read().await;
        let docs = match guard.get(collection) {
            Some(c) => c.values().filter(|d| filter.matches(d)).cloned().collect(),
            None => Vec::new(),
        };
        Ok(docs)
    }

    async fn transact(
        &self,
        op: &mut (dyn for<'t> FnMut(&'t mut (dyn Txn + 't)) -> Result<(), AppError> + Send),
    ) -> Result<(), AppError> {
        let mut guard = self.inner.write().await;
        let mut txn = MemoryTxn {
            base: &*guard,
            staged: Collections::new(),
        };
        op(&mut txn)?;
        let MemoryTxn { staged, .. } = txn;
        for (collection, docs) in staged {
            let target = guard.entry(collection).or_default();
            for (key, doc) in docs {
                target.insert(key, doc);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = MemoryStore::new();
        store
            .set("things", "a", json!({"x": 1}))
            .await
            .unwrap();
        let doc = store.get("things", "a").await.unwrap();
        assert_eq!(doc, Some(json!({"x": 1})));
        assert_eq!(store.get("things", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn query_applies_equality_filter() {
        let store = MemoryStore::new();
        store.set("msgs", "1", json!({"conv": "c1", "n": 1})).await.unwrap();
        store.set("msgs", "2", json!({"conv": "c2", "n": 2})).await.unwrap();
        store.set("msgs", "3", json!({"conv": "c1", "n": 3})).await.unwrap();

        let got = store
            .query("msgs", &Filter::Eq("conv", json!("c1")))
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|d| d["conv"] == "c1"));
    }

    #[tokio::test]
    async fn failed_transaction_leaves_no_partial_write() {
        let store = MemoryStore::new();
        store.set("docs", "kept", json!({"v": 1})).await.unwrap();

        let err = store
            .transact(&mut |txn| {
                txn.set("docs", "kept", json!({"v": 2}));
                txn.set("docs", "new", json!({"v": 3}));
                Err(AppError::ConflictingState("abort".into()))
            })
            .await;
        assert!(err.is_err());

        assert_eq!(store.get("docs", "kept").await.unwrap(), Some(json!({"v": 1})));
        assert_eq!(store.get("docs", "new").await.unwrap(), None);
    }

    #[tokio::test]
    async fn transaction_reads_its_own_writes() {
        let store = MemoryStore::new();
        store
            .transact(&mut |txn| {
                assert!(txn.get("docs", "a").is_none());
                txn.set("docs", "a", json!({"v": 1}));
                assert_eq!(txn.get("docs", "a"), Some(json!({"v": 1})));
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(store.get("docs", "a").await.unwrap(), Some(json!({"v": 1})));
    }
}
