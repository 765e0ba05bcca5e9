//! Runtime configuration loaded from the environment

use crate::error::PipelineError;
use crate::Result;
use std::fmt;

pub const DEFAULT_INSTITUTION_IDS: [&str; 3] = ["ins_109508", "ins_109509", "ins_109510"];
pub const DEFAULT_PRODUCTS: [&str; 1] = ["transactions"];

/// Months spanned by the reference dataset
pub const DEFAULT_BUDGET_MONTHS: f64 = 2.0;

pub const DEFAULT_PORT: u16 = 8080;

/// Largest page the transactions endpoint accepts
pub const MAX_TRANSACTIONS_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaidEnvironment {
    Sandbox,
    Development,
    Production,
}

impl PlaidEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            PlaidEnvironment::Sandbox => "https://sandbox.plaid.com",
            PlaidEnvironment::Development => "https://development.plaid.com",
            PlaidEnvironment::Production => "https://production.plaid.com",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "sandbox" => Ok(PlaidEnvironment::Sandbox),
            "development" => Ok(PlaidEnvironment::Development),
            "production" => Ok(PlaidEnvironment::Production),
            other => Err(PipelineError::Config(format!(
                "unknown PLAID_ENV '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for PlaidEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaidEnvironment::Sandbox => "sandbox",
            PlaidEnvironment::Development => "development",
            PlaidEnvironment::Production => "production",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone)]
pub struct PlaidCredentials {
    pub client_id: String,
    pub secret: String,
}

// Keep the secret out of logs
impl fmt::Debug for PlaidCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaidCredentials")
            .field("client_id", &self.client_id)
            .field("secret", &"***")
            .finish()
    }
}

/// What the stages need to know, independent of transport
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub institution_ids: Vec<String>,
    pub products: Vec<String>,
    /// Default divisor for the monthly estimate
    pub budget_months: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            institution_ids: DEFAULT_INSTITUTION_IDS.iter().map(|s| s.to_string()).collect(),
            products: DEFAULT_PRODUCTS.iter().map(|s| s.to_string()).collect(),
            budget_months: DEFAULT_BUDGET_MONTHS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` when credentials are absent; binaries then run against the mock API
    pub plaid: Option<PlaidCredentials>,
    pub plaid_env: PlaidEnvironment,
    pub transactions_page_size: u32,
    pub port: u16,
    pub pipeline: PipelineSettings,
}

impl AppConfig {
    /// Read from process environment (call `dotenv` first to pick up `.env`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let plaid = match (non_empty("PLAID_CLIENT_ID"), non_empty("PLAID_SECRET")) {
            (Some(client_id), Some(secret)) => Some(PlaidCredentials { client_id, secret }),
            _ => None,
        };

        let plaid_env = match non_empty("PLAID_ENV") {
            Some(v) => PlaidEnvironment::parse(&v)?,
            None => PlaidEnvironment::Sandbox,
        };

        let port = match non_empty("PORT").or_else(|| non_empty("API_PORT")) {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .map_err(|e| PipelineError::Config(format!("invalid PORT '{}': {}", v, e)))?,
            None => DEFAULT_PORT,
        };

        let transactions_page_size = match non_empty("TRANSACTIONS_PAGE_SIZE") {
            Some(v) => {
                let size = v.trim().parse::<u32>().map_err(|e| {
                    PipelineError::Config(format!("invalid TRANSACTIONS_PAGE_SIZE '{}': {}", v, e))
                })?;
                if size == 0 || size > MAX_TRANSACTIONS_PAGE_SIZE {
                    return Err(PipelineError::Config(format!(
                        "TRANSACTIONS_PAGE_SIZE must be between 1 and {}",
                        MAX_TRANSACTIONS_PAGE_SIZE
                    )));
                }
                size
            }
            None => MAX_TRANSACTIONS_PAGE_SIZE,
        };

        let defaults = PipelineSettings::default();

        let institution_ids = non_empty("PLAID_INSTITUTION_IDS")
            .map(|v| split_list(&v))
            .unwrap_or(defaults.institution_ids);
        if institution_ids.is_empty() {
            return Err(PipelineError::Config(
                "PLAID_INSTITUTION_IDS lists no institutions".to_string(),
            ));
        }

        let products = non_empty("PLAID_PRODUCTS")
            .map(|v| split_list(&v))
            .unwrap_or(defaults.products);

        let budget_months = match non_empty("BUDGET_MONTHS") {
            Some(v) => parse_months(&v)?,
            None => defaults.budget_months,
        };

        Ok(Self {
            plaid,
            plaid_env,
            transactions_page_size,
            port,
            pipeline: PipelineSettings {
                institution_ids,
                products,
                budget_months,
            },
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_months(value: &str) -> Result<f64> {
    let months = value
        .trim()
        .parse::<f64>()
        .map_err(|e| PipelineError::Config(format!("invalid BUDGET_MONTHS '{}': {}", value, e)))?;

    if !months.is_finite() || months <= 0.0 {
        return Err(PipelineError::Config(format!(
            "BUDGET_MONTHS must be positive, got {}",
            months
        )));
    }
    Ok(months)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert!(config.plaid.is_none());
        assert_eq!(config.plaid_env, PlaidEnvironment::Sandbox);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.transactions_page_size, MAX_TRANSACTIONS_PAGE_SIZE);
        assert_eq!(config.pipeline.institution_ids.len(), 3);
        assert_eq!(config.pipeline.products, vec!["transactions".to_string()]);
        assert_eq!(config.pipeline.budget_months, 2.0);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PLAID_CLIENT_ID", "client"),
            ("PLAID_SECRET", "secret"),
            ("PLAID_ENV", "Development"),
            ("API_PORT", "9000"),
            ("PLAID_INSTITUTION_IDS", "ins_1, ins_2,,"),
            ("PLAID_PRODUCTS", "auth,transactions"),
            ("BUDGET_MONTHS", "3"),
            ("TRANSACTIONS_PAGE_SIZE", "100"),
        ])
        .unwrap();

        let creds = config.plaid.unwrap();
        assert_eq!(creds.client_id, "client");
        assert!(!format!("{:?}", creds).contains("\"secret\""));
        assert_eq!(config.plaid_env.base_url(), "https://development.plaid.com");
        assert_eq!(config.port, 9000);
        assert_eq!(config.pipeline.institution_ids, vec!["ins_1", "ins_2"]);
        assert_eq!(config.pipeline.products.len(), 2);
        assert_eq!(config.pipeline.budget_months, 3.0);
        assert_eq!(config.transactions_page_size, 100);
    }

    #[test]
    fn test_partial_credentials_fall_back_to_mock() {
        let config = config_from(&[("PLAID_CLIENT_ID", "client")]).unwrap();
        assert!(config.plaid.is_none());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            config_from(&[("BUDGET_MONTHS", "0")]),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("PLAID_ENV", "staging")]),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("PORT", "not-a-port")]),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("TRANSACTIONS_PAGE_SIZE", "501")]),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("PLAID_INSTITUTION_IDS", " , ")]),
            Err(PipelineError::Config(_))
        ));
    }
}
