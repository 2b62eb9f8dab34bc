//! Storage behind the approval ledger.
//!
//! The store holds two partitions: pending records in submission order and
//! completed records in resolution order. It does no locking of its own
//! across calls; the ledger serializes every multi-step mutation.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::model::ApprovalRecord;
use crate::error::StoreError;

/// Backend-agnostic storage for approval records.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Whether `id` is present in either partition.
    async fn contains(&self, id: &str) -> Result<bool, StoreError>;

    /// Append a record to the pending partition.
    async fn insert_pending(&self, record: ApprovalRecord) -> Result<(), StoreError>;

    /// Remove a pending record, returning it with its position in the
    /// pending order.
    async fn take_pending(&self, id: &str) -> Result<Option<(usize, ApprovalRecord)>, StoreError>;

    /// Put a record taken by `take_pending` back at its old position.
    async fn restore_pending(
        &self,
        position: usize,
        record: ApprovalRecord,
    ) -> Result<(), StoreError>;

    /// Store a resolved record in the completed partition.
    async fn insert_completed(&self, record: ApprovalRecord) -> Result<(), StoreError>;

    /// Look up a record in either partition.
    async fn get(&self, id: &str) -> Result<Option<ApprovalRecord>, StoreError>;

    /// All pending records, oldest first.
    async fn list_pending(&self) -> Result<Vec<ApprovalRecord>, StoreError>;

    /// All completed records, in resolution order.
    async fn list_completed(&self) -> Result<Vec<ApprovalRecord>, StoreError>;
}

#[derive(Default)]
struct Partitions {
    pending: Vec<ApprovalRecord>,
    completed: Vec<ApprovalRecord>,
    completed_index: HashMap<String, usize>,
}

/// In-memory store. State is lost on restart.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Partitions>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryStore {
    async fn contains(&self, id: &str) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.completed_index.contains_key(id) || inner.pending.iter().any(|r| r.id == id))
    }

    async fn insert_pending(&self, record: ApprovalRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.completed_index.contains_key(&record.id)
            || inner.pending.iter().any(|r| r.id == record.id)
        {
            return Err(StoreError::Duplicate { id: record.id });
        }
        inner.pending.push(record);
        Ok(())
    }

    async fn take_pending(
        &self,
        id: &str,
    ) -> Result<Option<(usize, ApprovalRecord)>, StoreError> {
        let mut inner = self.inner.write().await;
        let position = inner.pending.iter().position(|r| r.id == id);
        Ok(position.map(|i| (i, inner.pending.remove(i))))
    }

    async fn restore_pending(
        &self,
        position: usize,
        record: ApprovalRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.completed_index.contains_key(&record.id)
            || inner.pending.iter().any(|r| r.id == record.id)
        {
            return Err(StoreError::Duplicate { id: record.id });
        }
        let position = position.min(inner.pending.len());
        inner.pending.insert(position, record);
        Ok(())
    }

    async fn insert_completed(&self, record: ApprovalRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.completed_index.contains_key(&record.id) {
            return Err(StoreError::Duplicate { id: record.id });
        }
        let index = inner.completed.len();
        inner.completed_index.insert(record.id.clone(), index);
        inner.completed.push(record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ApprovalRecord>, StoreError> {
        let inner = self.inner.read().await;
        if let Some(record) = inner.pending.iter().find(|r| r.id == id) {
            return Ok(Some(record.clone()));
        }
        Ok(inner
            .completed_index
            .get(id)
            .map(|&i| inner.completed[i].clone()))
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRecord>, StoreError> {
        Ok(self.inner.read().await.pending.clone())
    }

    async fn list_completed(&self) -> Result<Vec<ApprovalRecord>, StoreError> {
        Ok(self.inner.read().await.completed.clone())
    }
}
