//! Exchange stage
//!
//! Turns every stored public token into an access token. The new access tokens are
//! committed in a single batch after all exchanges succeed; the old ones are cleared first,
//! so any failure leaves `accessTokens` empty rather than half-filled.

use super::{Pipeline, RunTicket};
use crate::error::PipelineError;
use crate::models::{AccessToken, PublicToken, Stage, StageOutcome};
use crate::store::{
    clear_batch, from_document, new_document_id, to_document, StoredDocument, WriteBatch,
    ACCESS_TOKENS, PUBLIC_TOKENS,
};
use crate::Result;
use tracing::{debug, info, warn};

impl Pipeline {
    /// Replace all stored access tokens with exchanges of the stored public tokens
    pub async fn exchange_public_tokens(&self) -> Result<StageOutcome> {
        let store = self.store.as_ref();
        let lock = self.guard.acquire(Stage::Exchange)?;

        let public_tokens = store.get_all(PUBLIC_TOKENS).await?;
        if public_tokens.is_empty() {
            warn!("Exchange: no public tokens stored");
            return Err(PipelineError::NotFound("public tokens".to_string()));
        }

        let ticket = lock.start_run(store).await?;
        info!(
            run_id = %ticket.run_id(),
            public_tokens = public_tokens.len(),
            "Exchange: starting"
        );

        let result = self.exchange_all(&ticket, &public_tokens).await;
        if let Err(e) = &result {
            warn!(run_id = %ticket.run_id(), error = %e, "Exchange failed");
        }
        ticket.finish(store, &result).await;
        result
    }

    async fn exchange_all(
        &self,
        ticket: &RunTicket,
        public_tokens: &[StoredDocument],
    ) -> Result<StageOutcome> {
        let store = self.store.as_ref();

        let existing = store.get_all(ACCESS_TOKENS).await?;
        store
            .commit(ticket.fence(clear_batch(ACCESS_TOKENS, &existing)))
            .await?;
        debug!(cleared = existing.len(), "Previous access tokens removed");

        let mut batch = WriteBatch::new();

        for doc in public_tokens {
            let public: PublicToken = from_document(doc)?;
            let access_token = self.api.exchange_public_token(&public.token).await?;

            batch.set(
                ACCESS_TOKENS,
                new_document_id(),
                to_document(&AccessToken { access_token })?,
            );
            debug!(document_id = %doc.id, "Public token exchanged");
        }

        let exchanged = batch.len();
        store.commit(ticket.fence(batch)).await?;

        info!(run_id = %ticket.run_id(), exchanged, "Exchange: complete");

        Ok(StageOutcome {
            stage: Stage::Exchange,
            run_id: ticket.run_id(),
            documents_written: exchanged,
            message: format!("Exchanged {} public tokens for access tokens", exchanged),
        })
    }
}
