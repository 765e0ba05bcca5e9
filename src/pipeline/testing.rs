//! Test doubles shared by the stage tests

use super::Pipeline;
use crate::config::PipelineSettings;
use crate::error::PipelineError;
use crate::plaid::MockFinancialApi;
use crate::store::{
    to_document, Document, DocumentStore, InMemoryDocumentStore, StoredDocument, WriteBatch,
    WriteOp, STAGE_RUNS,
};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;

/// Wraps the in-memory store and fails selected operations
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryDocumentStore,
    fail_reads_of: Option<String>,
    fail_deletes_in: Option<String>,
    supersede_on_write_to: Option<String>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads_of(mut self, collection: &str) -> Self {
        self.fail_reads_of = Some(collection.to_string());
        self
    }

    /// Reject any batch that deletes from `collection`
    pub fn fail_deletes_in(mut self, collection: &str) -> Self {
        self.fail_deletes_in = Some(collection.to_string());
        self
    }

    /// Before a batch writes into `collection`, hand every stage marker to another run
    pub fn supersede_on_write_to(mut self, collection: &str) -> Self {
        self.supersede_on_write_to = Some(collection.to_string());
        self
    }

    async fn take_over_stages(&self) -> Result<()> {
        let mut takeover = WriteBatch::new();
        for mut marker in self.inner.get_all(STAGE_RUNS).await? {
            marker
                .data
                .insert("runId".to_string(), "newer-run".into());
            takeover.set(STAGE_RUNS, marker.id, marker.data);
        }
        self.inner.commit(takeover).await
    }
}

#[async_trait::async_trait]
impl DocumentStore for FlakyStore {
    async fn get_all(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        if self.fail_reads_of.as_deref() == Some(collection) {
            return Err(PipelineError::Store(format!("read of {} failed", collection)));
        }
        self.inner.get_all(collection).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.inner.delete(collection, id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let rejected = batch.ops().iter().any(|op| {
            matches!(op, WriteOp::Delete { collection, .. }
                if self.fail_deletes_in.as_deref() == Some(collection.as_str()))
        });
        if rejected {
            return Err(PipelineError::Store("batch commit failed".to_string()));
        }

        let superseding = batch.ops().iter().any(|op| {
            matches!(op, WriteOp::Set { collection, .. }
                if self.supersede_on_write_to.as_deref() == Some(collection.as_str()))
        });
        if superseding {
            self.take_over_stages().await?;
        }

        self.inner.commit(batch).await
    }
}

pub fn settings(institutions: &[&str]) -> PipelineSettings {
    PipelineSettings {
        institution_ids: institutions.iter().map(|s| s.to_string()).collect(),
        ..PipelineSettings::default()
    }
}

pub fn pipeline(
    store: Arc<dyn DocumentStore>,
    api: Arc<MockFinancialApi>,
    institutions: &[&str],
) -> Pipeline {
    Pipeline::new(store, api, settings(institutions))
}

/// Write documents straight into a collection, bypassing any stage
pub async fn seed<T: Serialize>(store: &dyn DocumentStore, collection: &str, items: &[(&str, T)]) {
    let mut batch = WriteBatch::new();
    for (id, item) in items {
        batch.set(collection, *id, to_document(item).unwrap());
    }
    store.commit(batch).await.unwrap();
}
