//! Per-stage run exclusion
//!
//! Two layers: an in-process lock per stage, so a second concurrent invocation fails fast,
//! and a run marker document in `stageRuns` naming the run allowed to write. Every batch a
//! run commits is fenced on that marker, so a run overtaken by a newer one (another process
//! sharing the store) has its writes rejected instead of interleaved.

use crate::error::PipelineError;
use crate::models::Stage;
use crate::store::{from_document, to_document, DocumentStore, StoredDocument, WriteBatch, STAGE_RUNS};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;
use uuid::Uuid;

const RUN_ID_FIELD: &str = "runId";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// Contents of `stageRuns/{stage}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMarker {
    pub run_id: Uuid,
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
}

pub struct RunGuard {
    locks: HashMap<Stage, Arc<Mutex<()>>>,
}

impl RunGuard {
    pub fn new() -> Self {
        let locks = [Stage::TokenLifecycle, Stage::Exchange, Stage::TransactionSync]
            .into_iter()
            .map(|stage| (stage, Arc::new(Mutex::new(()))))
            .collect();
        Self { locks }
    }

    /// Take the stage's in-process lock without waiting. Writes nothing.
    pub fn acquire(&self, stage: Stage) -> Result<StageLock> {
        let lock = self.locks.get(&stage).ok_or_else(|| {
            PipelineError::InvalidRequest(format!("{} does not take a run lock", stage))
        })?;

        let permit = lock
            .clone()
            .try_lock_owned()
            .map_err(|_| PipelineError::StageBusy(stage.to_string()))?;

        Ok(StageLock {
            stage,
            _permit: permit,
        })
    }
}

impl Default for RunGuard {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StageLock {
    stage: Stage,
    _permit: OwnedMutexGuard<()>,
}

impl StageLock {
    /// Write a fresh run marker, superseding any earlier run of this stage
    pub async fn start_run(self, store: &dyn DocumentStore) -> Result<RunTicket> {
        let marker_id = self.stage.as_str();

        let previous = match store.get(STAGE_RUNS, marker_id).await? {
            Some(data) => {
                let stored = StoredDocument {
                    id: marker_id.to_string(),
                    data,
                };
                Some(from_document::<RunMarker>(&stored)?)
            }
            None => None,
        };

        let marker = RunMarker {
            run_id: Uuid::new_v4(),
            sequence: previous.map_or(1, |m| m.sequence + 1),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
        };

        let mut batch = WriteBatch::new();
        batch.set(STAGE_RUNS, marker_id, to_document(&marker)?);
        store.commit(batch).await?;

        Ok(RunTicket {
            marker,
            lock: self,
        })
    }
}

/// Proof that this invocation owns the stage's current run
pub struct RunTicket {
    marker: RunMarker,
    lock: StageLock,
}

impl RunTicket {
    pub fn run_id(&self) -> Uuid {
        self.marker.run_id
    }

    pub fn sequence(&self) -> u64 {
        self.marker.sequence
    }

    /// Make the batch conditional on this run still owning the stage
    pub fn fence(&self, mut batch: WriteBatch) -> WriteBatch {
        batch.expect(
            STAGE_RUNS,
            self.lock.stage.as_str(),
            RUN_ID_FIELD,
            serde_json::Value::String(self.marker.run_id.to_string()),
        );
        batch
    }

    /// Stamp the marker with the outcome. Best effort: a failure here is logged only.
    pub async fn finish<T>(self, store: &dyn DocumentStore, result: &Result<T>) {
        let marker = RunMarker {
            finished_at: Some(Utc::now()),
            status: if result.is_ok() {
                RunStatus::Succeeded
            } else {
                RunStatus::Failed
            },
            ..self.marker.clone()
        };

        let write = to_document(&marker).map(|doc| {
            let mut batch = WriteBatch::new();
            batch.set(STAGE_RUNS, self.lock.stage.as_str(), doc);
            self.fence(batch)
        });

        let committed = match write {
            Ok(batch) => store.commit(batch).await,
            Err(e) => Err(e),
        };

        if let Err(e) = committed {
            warn!(
                stage = %self.lock.stage,
                run_id = %self.marker.run_id,
                error = %e,
                "Could not record run outcome"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;

    async fn marker(store: &InMemoryDocumentStore, stage: Stage) -> RunMarker {
        let data = store.get(STAGE_RUNS, stage.as_str()).await.unwrap().unwrap();
        from_document(&StoredDocument {
            id: stage.as_str().to_string(),
            data,
        })
        .unwrap()
    }

    #[test]
    fn test_second_acquire_is_busy() {
        let guard = RunGuard::new();
        let _held = guard.acquire(Stage::Exchange).unwrap();

        assert!(matches!(
            guard.acquire(Stage::Exchange),
            Err(PipelineError::StageBusy(_))
        ));
        // other stages are independent
        assert!(guard.acquire(Stage::TransactionSync).is_ok());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let guard = RunGuard::new();
        drop(guard.acquire(Stage::TokenLifecycle).unwrap());
        assert!(guard.acquire(Stage::TokenLifecycle).is_ok());
    }

    #[test]
    fn test_read_only_stage_has_no_lock() {
        let guard = RunGuard::new();
        assert!(guard.acquire(Stage::BudgetAggregation).is_err());
    }

    #[tokio::test]
    async fn test_sequence_increments_and_status_recorded() {
        let store = InMemoryDocumentStore::new();
        let guard = RunGuard::new();

        let first = guard
            .acquire(Stage::Exchange)
            .unwrap()
            .start_run(&store)
            .await
            .unwrap();
        assert_eq!(first.sequence(), 1);
        first.finish(&store, &Ok::<(), PipelineError>(())).await;
        assert_eq!(marker(&store, Stage::Exchange).await.status, RunStatus::Succeeded);

        let second = guard
            .acquire(Stage::Exchange)
            .unwrap()
            .start_run(&store)
            .await
            .unwrap();
        assert_eq!(second.sequence(), 2);
        second
            .finish(&store, &Err::<(), _>(PipelineError::NotFound("x".into())))
            .await;

        let recorded = marker(&store, Stage::Exchange).await;
        assert_eq!(recorded.status, RunStatus::Failed);
        assert!(recorded.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_superseded_run_cannot_commit() {
        let store = InMemoryDocumentStore::new();
        let stale = RunGuard::new();
        let fresh = RunGuard::new();

        // Two guards stand in for two processes sharing one store
        let old_run = stale
            .acquire(Stage::TransactionSync)
            .unwrap()
            .start_run(&store)
            .await
            .unwrap();
        let new_run = fresh
            .acquire(Stage::TransactionSync)
            .unwrap()
            .start_run(&store)
            .await
            .unwrap();

        let mut batch = WriteBatch::new();
        batch.set("transactions", "t1", serde_json::Map::new());
        let result = store.commit(old_run.fence(batch.clone())).await;
        assert!(matches!(result, Err(PipelineError::RunSuperseded(_))));
        assert_eq!(store.count("transactions").await, 0);

        store.commit(new_run.fence(batch)).await.unwrap();
        assert_eq!(store.count("transactions").await, 1);
    }
}
