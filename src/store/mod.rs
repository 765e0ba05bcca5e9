//! Document store layer
//!
//! Collections of opaque documents with atomic batch commits.
//! Ships an in-memory backend; a hosted document database plugs in behind the same trait.

use crate::error::PipelineError;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

pub mod memory;
pub use memory::InMemoryDocumentStore;

pub const PUBLIC_TOKENS: &str = "publicTokens";
pub const ACCESS_TOKENS: &str = "accessTokens";
pub const TRANSACTIONS: &str = "transactions";
pub const STAGE_RUNS: &str = "stageRuns";

/// A document body: field → value
pub type Document = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Document,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or overwrite
    Set {
        collection: String,
        id: String,
        data: Document,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Field that must hold `expected` at commit time, or the whole batch is rejected
#[derive(Debug, Clone, PartialEq)]
pub struct Precondition {
    pub collection: String,
    pub id: String,
    pub field: String,
    pub expected: Value,
}

/// Atomic multi-document write: every op applies or none does
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
    preconditions: Vec<Precondition>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, collection: &str, id: impl Into<String>, data: Document) -> &mut Self {
        self.ops.push(WriteOp::Set {
            collection: collection.to_string(),
            id: id.into(),
            data,
        });
        self
    }

    pub fn delete(&mut self, collection: &str, id: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.into(),
        });
        self
    }

    pub fn expect(
        &mut self,
        collection: &str,
        id: impl Into<String>,
        field: &str,
        expected: Value,
    ) -> &mut Self {
        self.preconditions.push(Precondition {
            collection: collection.to_string(),
            id: id.into(),
            field: field.to_string(),
            expected,
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn preconditions(&self) -> &[Precondition] {
        &self.preconditions
    }

    /// Number of queued writes; preconditions are not counted
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Trait for document persistence
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_all(&self, collection: &str) -> Result<Vec<StoredDocument>>;
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Commit a batch atomically.
    ///
    /// Fails with [`PipelineError::RunSuperseded`] when a precondition does not hold,
    /// in which case nothing is written.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}

/// Auto-generated document id for collections without a natural key
pub fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(PipelineError::Store(format!(
            "expected an object document, got {}",
            other
        ))),
    }
}

pub fn from_document<T: DeserializeOwned>(document: &StoredDocument) -> Result<T> {
    serde_json::from_value(Value::Object(document.data.clone())).map_err(|e| {
        PipelineError::Store(format!("malformed document {}: {}", document.id, e))
    })
}

/// Batch deleting every listed document
pub fn clear_batch(collection: &str, existing: &[StoredDocument]) -> WriteBatch {
    let mut batch = WriteBatch::new();
    for doc in existing {
        batch.delete(collection, doc.id.clone());
    }
    batch
}
