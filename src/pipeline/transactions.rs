//! Transaction sync stage
//!
//! Clears `transactions` in one atomic batch, then fetches each access token's transactions
//! for the requested range and commits them in one batch per token, keyed by
//! `transaction_id`. A fetch failure for one token keeps the tokens committed before it.
//! The date range is forwarded to the provider untouched.

use super::{Pipeline, RunTicket};
use crate::error::PipelineError;
use crate::models::{AccessToken, DateRange, Stage, StageOutcome, Transaction};
use crate::store::{
    clear_batch, from_document, to_document, StoredDocument, WriteBatch, ACCESS_TOKENS,
    TRANSACTIONS,
};
use crate::Result;
use tracing::{debug, info, warn};

/// Upsert batch for one token's transactions; a repeated id overwrites the earlier record
pub fn transaction_batch(transactions: &[Transaction]) -> Result<WriteBatch> {
    let mut batch = WriteBatch::new();
    for txn in transactions {
        batch.set(TRANSACTIONS, txn.transaction_id.clone(), to_document(txn)?);
    }
    Ok(batch)
}

impl Pipeline {
    /// Replace all stored transactions with a fresh fetch over `range`
    pub async fn sync_transactions(&self, range: &DateRange) -> Result<StageOutcome> {
        let store = self.store.as_ref();
        let lock = self.guard.acquire(Stage::TransactionSync)?;

        let access_tokens = store.get_all(ACCESS_TOKENS).await?;
        if access_tokens.is_empty() {
            warn!("Transaction sync: no access tokens stored");
            return Err(PipelineError::NotFound("access tokens".to_string()));
        }

        let ticket = lock.start_run(store).await?;
        info!(
            run_id = %ticket.run_id(),
            access_tokens = access_tokens.len(),
            start_date = %range.start_date,
            end_date = %range.end_date,
            "Transaction sync: starting"
        );

        let result = self.fetch_all(&ticket, &access_tokens, range).await;
        if let Err(e) = &result {
            warn!(run_id = %ticket.run_id(), error = %e, "Transaction sync failed");
        }
        ticket.finish(store, &result).await;
        result
    }

    async fn fetch_all(
        &self,
        ticket: &RunTicket,
        access_tokens: &[StoredDocument],
        range: &DateRange,
    ) -> Result<StageOutcome> {
        let store = self.store.as_ref();

        let existing = store.get_all(TRANSACTIONS).await?;
        store
            .commit(ticket.fence(clear_batch(TRANSACTIONS, &existing)))
            .await?;
        debug!(cleared = existing.len(), "Previous transactions removed");

        let mut written = 0;

        for doc in access_tokens {
            let token: AccessToken = from_document(doc)?;
            let transactions = self
                .api
                .list_transactions(&token.access_token, range)
                .await?;

            let batch = transaction_batch(&transactions)?;
            if batch.is_empty() {
                debug!(document_id = %doc.id, "No transactions for access token");
                continue;
            }

            written += batch.len();
            store.commit(ticket.fence(batch)).await?;
            debug!(
                document_id = %doc.id,
                count = transactions.len(),
                "Transactions stored"
            );
        }

        info!(run_id = %ticket.run_id(), written, "Transaction sync: complete");

        Ok(StageOutcome {
            stage: Stage::TransactionSync,
            run_id: ticket.run_id(),
            documents_written: written,
            message: format!(
                "Stored {} transactions from {} to {}",
                written, range.start_date, range.end_date
            ),
        })
    }
}
