//! In-memory document store for development and tests

use super::{Document, DocumentStore, StoredDocument, WriteBatch, WriteOp};
use crate::error::PipelineError;
use crate::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type Collections = HashMap<String, BTreeMap<String, Document>>;

/// Collections keyed by name, documents ordered by id
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<Collections>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections.get(collection).map_or(0, BTreeMap::len)
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_all(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        let collections = self.collections.read().await;

        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| StoredDocument {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(docs) = collections.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        // Single write lock: preconditions and ops observe the same state
        let mut collections = self.collections.write().await;

        for pre in batch.preconditions() {
            let actual = collections
                .get(&pre.collection)
                .and_then(|docs| docs.get(&pre.id))
                .and_then(|doc| doc.get(&pre.field));

            if actual != Some(&pre.expected) {
                return Err(PipelineError::RunSuperseded(format!(
                    "{}/{} field {} is {:?}, expected {}",
                    pre.collection, pre.id, pre.field, actual, pre.expected
                )));
            }
        }

        for op in batch.ops() {
            match op {
                WriteOp::Set {
                    collection,
                    id,
                    data,
                } => {
                    collections
                        .entry(collection.clone())
                        .or_default()
                        .insert(id.clone(), data.clone());
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(docs) = collections.get_mut(collection) {
                        docs.remove(id);
                    }
                }
            }
        }

        Ok(())
    }
}
