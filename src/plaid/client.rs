//! Plaid HTTP client
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::FinancialApi;
use crate::config::{PlaidCredentials, PlaidEnvironment, MAX_TRANSACTIONS_PAGE_SIZE};
use crate::error::PipelineError;
use crate::models::{DateRange, Transaction};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Reusable Plaid client (connection-pooled)
pub struct PlaidClient {
    client: Client,
    base_url: String,
    credentials: PlaidCredentials,
    page_size: u32,
}

impl PlaidClient {
    pub fn new(credentials: PlaidCredentials, environment: PlaidEnvironment) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: environment.base_url().to_string(),
            credentials,
            page_size: MAX_TRANSACTIONS_PAGE_SIZE,
        })
    }

    /// Point at a different host (local stubs, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_TRANSACTIONS_PAGE_SIZE);
        self
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("Plaid request to {} failed: {}", path, e);
                PipelineError::ExternalService(format!("request to {} failed: {}", path, e))
            })?;

        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<PlaidErrorBody>(&text) {
                Ok(body) => body.to_string(),
                Err(_) => text,
            };
            error!("Plaid returned {} for {}: {}", status, path, detail);
            return Err(PipelineError::ExternalService(format!(
                "{} returned {}: {}",
                path, status, detail
            )));
        }

        response.json::<R>().await.map_err(|e| {
            PipelineError::ExternalService(format!("invalid response from {}: {}", path, e))
        })
    }
}

#[async_trait]
impl FinancialApi for PlaidClient {
    async fn create_sandbox_public_token(
        &self,
        institution_id: &str,
        products: &[String],
    ) -> Result<String> {
        let request = SandboxPublicTokenRequest {
            client_id: &self.credentials.client_id,
            secret: &self.credentials.secret,
            institution_id,
            initial_products: products,
        };

        let response: SandboxPublicTokenResponse =
            self.post("/sandbox/public_token/create", &request).await?;
        Ok(response.public_token)
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<String> {
        let request = ExchangeRequest {
            client_id: &self.credentials.client_id,
            secret: &self.credentials.secret,
            public_token,
        };

        let response: ExchangeResponse = self.post("/item/public_token/exchange", &request).await?;
        debug!(item_id = %response.item_id, "Public token exchanged");
        Ok(response.access_token)
    }

    async fn list_transactions(
        &self,
        access_token: &str,
        range: &DateRange,
    ) -> Result<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = Vec::new();

        loop {
            let request = TransactionsRequest {
                client_id: &self.credentials.client_id,
                secret: &self.credentials.secret,
                access_token,
                start_date: &range.start_date,
                end_date: &range.end_date,
                options: TransactionsOptions {
                    count: self.page_size,
                    offset: transactions.len(),
                },
            };

            let page: TransactionsResponse = self.post("/transactions/get", &request).await?;
            let received = page.transactions.len();
            transactions.extend(page.transactions);

            debug!(
                received,
                collected = transactions.len(),
                total = page.total_transactions,
                "Transactions page fetched"
            );

            if received == 0 || transactions.len() >= page.total_transactions {
                break;
            }
        }

        Ok(transactions)
    }
}

//
// ================= Wire Types =================
//

#[derive(Debug, Serialize)]
struct SandboxPublicTokenRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    institution_id: &'a str,
    initial_products: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SandboxPublicTokenResponse {
    public_token: String,
}

#[derive(Debug, Serialize)]
struct ExchangeRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    public_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    #[serde(default)]
    item_id: String,
}

#[derive(Debug, Serialize)]
struct TransactionsRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    start_date: &'a str,
    end_date: &'a str,
    options: TransactionsOptions,
}

#[derive(Debug, Serialize)]
struct TransactionsOptions {
    count: u32,
    offset: usize,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    transactions: Vec<Transaction>,
    total_transactions: usize,
}

#[derive(Debug, Deserialize)]
struct PlaidErrorBody {
    #[serde(default)]
    error_type: String,
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

impl std::fmt::Display for PlaidErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}: {}",
            self.error_type, self.error_code, self.error_message
        )
    }
}
