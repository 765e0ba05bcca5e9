//! Account-link pipeline
//!
//! TOKENS → EXCHANGE → TRANSACTIONS → BUDGET
//!
//! Each stage is its own entry point and reads only what the previous stage persisted.
//! The three mutating stages replace their collection wholesale on every run.

use crate::config::PipelineSettings;
use crate::plaid::FinancialApi;
use crate::store::DocumentStore;
use std::sync::Arc;

pub mod budget;
pub mod exchange;
pub mod guard;
pub mod tokens;
pub mod transactions;

#[cfg(test)]
pub(crate) mod testing;

pub use budget::aggregate;
pub use guard::{RunGuard, RunTicket};
pub use transactions::transaction_batch;

pub struct Pipeline {
    store: Arc<dyn DocumentStore>,
    api: Arc<dyn FinancialApi>,
    settings: PipelineSettings,
    guard: RunGuard,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        api: Arc<dyn FinancialApi>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            api,
            settings,
            guard: RunGuard::new(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }
}
