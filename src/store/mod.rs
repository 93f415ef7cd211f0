//! Durable-store boundary.
//!
//! The messaging core is written against a narrow document-store interface:
//! document get/set by `(collection, key)`, a collection query with a
//! single-field equality filter, and a transactional read-modify-write
//! primitive spanning multiple documents. Composite filtering and ordering
//! happen in memory in the services, which keeps the core portable across
//! simple document stores (no multi-field composite indexes required).

pub mod memory;

use crate::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryStore;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Single-field filter for collection queries.
#[derive(Debug, Clone)]
pub enum Filter {
    All,
    Eq(&'static str, Value),
}

impl Filter {
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => doc.get(*field) == Some(expected),
        }
    }
}

/// Read-modify-write view handed to a transaction closure.
///
/// Reads observe the closure's own staged writes; nothing is visible to
/// other callers until the closure returns `Ok` and the store commits.
pub trait Txn {
    fn get(&self, collection: &str, key: &str) -> Option<Value>;
    fn set(&mut self, collection: &str, key: &str, doc: Value);
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, collection: &str, key: &str, doc: Value) -> Result<(), StoreError>;

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError>;

    /// Runs `op` atomically: either every `set` it performs commits, or none
    /// does. A domain error returned by the closure aborts the transaction
    /// and is surfaced unchanged to the caller.
    async fn transact(
        &self,
        op: &mut (dyn for<'t> FnMut(&'t mut (dyn Txn + 't)) -> Result<(), AppError> + Send),
    ) -> Result<(), AppError>;
}
