//! Token lifecycle stage
//!
//! Clears `publicTokens` in one batch, then issues and persists one sandbox public token
//! per configured institution. Each token is committed as soon as it is issued, so a failure
//! partway keeps the tokens already written.

use super::{Pipeline, RunTicket};
use crate::models::{PublicToken, Stage, StageOutcome};
use crate::store::{clear_batch, new_document_id, to_document, WriteBatch, PUBLIC_TOKENS};
use crate::Result;
use tracing::{debug, info, warn};

impl Pipeline {
    /// Replace all stored public tokens with a fresh set
    pub async fn refresh_public_tokens(&self) -> Result<StageOutcome> {
        let store = self.store.as_ref();
        let ticket = self
            .guard
            .acquire(Stage::TokenLifecycle)?
            .start_run(store)
            .await?;

        info!(
            run_id = %ticket.run_id(),
            institutions = self.settings.institution_ids.len(),
            "Token lifecycle: starting"
        );

        let result = self.issue_public_tokens(&ticket).await;
        if let Err(e) = &result {
            warn!(run_id = %ticket.run_id(), error = %e, "Token lifecycle failed");
        }
        ticket.finish(store, &result).await;
        result
    }

    async fn issue_public_tokens(&self, ticket: &RunTicket) -> Result<StageOutcome> {
        let store = self.store.as_ref();

        let existing = store.get_all(PUBLIC_TOKENS).await?;
        store
            .commit(ticket.fence(clear_batch(PUBLIC_TOKENS, &existing)))
            .await?;
        debug!(cleared = existing.len(), "Previous public tokens removed");

        let mut issued = 0;

        for institution_id in &self.settings.institution_ids {
            let token = self
                .api
                .create_sandbox_public_token(institution_id, &self.settings.products)
                .await?;

            let mut batch = WriteBatch::new();
            batch.set(
                PUBLIC_TOKENS,
                new_document_id(),
                to_document(&PublicToken { token })?,
            );
            store.commit(ticket.fence(batch)).await?;

            issued += 1;
            debug!(institution_id = %institution_id, "Public token stored");
        }

        info!(run_id = %ticket.run_id(), issued, "Token lifecycle: complete");

        Ok(StageOutcome {
            stage: Stage::TokenLifecycle,
            run_id: ticket.run_id(),
            documents_written: issued,
            message: format!("Created {} public tokens", issued),
        })
    }
}
