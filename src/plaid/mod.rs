//! Financial aggregation API
//!
//! The pipeline only sees the [`FinancialApi`] trait.
//! [`PlaidClient`] talks to Plaid over HTTP; [`MockFinancialApi`] is a deterministic
//! sandbox stand-in used when no credentials are configured and in tests.

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::models::{DateRange, Transaction};
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub mod client;
pub use client::PlaidClient;

/// Operations the pipeline needs from the aggregation provider
#[async_trait]
pub trait FinancialApi: Send + Sync {
    /// Create a sandbox public token for one institution
    async fn create_sandbox_public_token(
        &self,
        institution_id: &str,
        products: &[String],
    ) -> Result<String>;

    /// Exchange a public token for a durable access token
    async fn exchange_public_token(&self, public_token: &str) -> Result<String>;

    /// All transactions for one linked item within the range, in provider order
    async fn list_transactions(
        &self,
        access_token: &str,
        range: &DateRange,
    ) -> Result<Vec<Transaction>>;
}

/// Real client when credentials are configured, the mock otherwise
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn FinancialApi>> {
    match &config.plaid {
        Some(credentials) => {
            info!(environment = %config.plaid_env, "Using Plaid API");
            let client = PlaidClient::new(credentials.clone(), config.plaid_env)?
                .with_page_size(config.transactions_page_size);
            Ok(Arc::new(client))
        }
        None => {
            warn!("PLAID_CLIENT_ID / PLAID_SECRET not set, using mock financial API");
            Ok(Arc::new(MockFinancialApi::new()))
        }
    }
}

const PUBLIC_PREFIX: &str = "public-sandbox-";
const ACCESS_PREFIX: &str = "access-sandbox-";

/// Mock provider for development & testing
///
/// Tokens are derived from the institution id, so
/// `ins_1` → `public-sandbox-ins_1` → `access-sandbox-ins_1`.
/// Without an explicit dataset every access token yields three seeded transactions.
#[derive(Default)]
pub struct MockFinancialApi {
    transactions: HashMap<String, Vec<Transaction>>,
    failing_institutions: HashSet<String>,
    failing_access_tokens: HashSet<String>,
    exchange_failure_after: Option<usize>,
    exchange_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl MockFinancialApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn public_token_for(institution_id: &str) -> String {
        format!("{}{}", PUBLIC_PREFIX, institution_id)
    }

    pub fn access_token_for(institution_id: &str) -> String {
        format!("{}{}", ACCESS_PREFIX, institution_id)
    }

    /// Fixed dataset for one access token, replacing the seeded one
    pub fn with_transactions(mut self, access_token: &str, transactions: Vec<Transaction>) -> Self {
        self.transactions
            .insert(access_token.to_string(), transactions);
        self
    }

    pub fn fail_institution(mut self, institution_id: &str) -> Self {
        self.failing_institutions.insert(institution_id.to_string());
        self
    }

    /// Exchange succeeds `successes` times, then every further call fails
    pub fn fail_exchange_after(mut self, successes: usize) -> Self {
        self.exchange_failure_after = Some(successes);
        self
    }

    pub fn fail_transactions_for(mut self, access_token: &str) -> Self {
        self.failing_access_tokens.insert(access_token.to_string());
        self
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn seeded_transactions(access_token: &str) -> Vec<Transaction> {
        vec![
            Transaction::new(
                format!("{}-txn-1", access_token),
                &["Food and Drink", "Restaurants"],
                42.5,
                "2024-01-12",
            ),
            Transaction::new(
                format!("{}-txn-2", access_token),
                &["Travel", "Airlines and Aviation Services"],
                310.0,
                "2024-01-20",
            ),
            Transaction::new(
                format!("{}-txn-3", access_token),
                &["Food and Drink", "Coffee Shop"],
                6.25,
                "2024-02-03",
            ),
        ]
    }
}

#[async_trait]
impl FinancialApi for MockFinancialApi {
    async fn create_sandbox_public_token(
        &self,
        institution_id: &str,
        _products: &[String],
    ) -> Result<String> {
        if self.failing_institutions.contains(institution_id) {
            return Err(PipelineError::ExternalService(format!(
                "INVALID_INSTITUTION: {}",
                institution_id
            )));
        }
        Ok(Self::public_token_for(institution_id))
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<String> {
        let call = self.exchange_calls.fetch_add(1, Ordering::SeqCst);

        if matches!(self.exchange_failure_after, Some(limit) if call >= limit) {
            return Err(PipelineError::ExternalService(format!(
                "INVALID_PUBLIC_TOKEN: {}",
                public_token
            )));
        }

        let institution_id = public_token.strip_prefix(PUBLIC_PREFIX).ok_or_else(|| {
            PipelineError::ExternalService(format!("INVALID_PUBLIC_TOKEN: {}", public_token))
        })?;

        Ok(Self::access_token_for(institution_id))
    }

    async fn list_transactions(
        &self,
        access_token: &str,
        range: &DateRange,
    ) -> Result<Vec<Transaction>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if range.start_date.is_empty() || range.end_date.is_empty() {
            return Err(PipelineError::ExternalService(
                "INVALID_FIELD: start_date and end_date are required".to_string(),
            ));
        }

        if self.failing_access_tokens.contains(access_token) {
            return Err(PipelineError::ExternalService(format!(
                "ITEM_LOGIN_REQUIRED: {}",
                access_token
            )));
        }

        Ok(self
            .transactions
            .get(access_token)
            .cloned()
            .unwrap_or_else(|| Self::seeded_transactions(access_token)))
    }
}
