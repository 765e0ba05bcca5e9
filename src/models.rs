//! Core data models for the account-link pipeline

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Bucket for transactions the provider returned without a category
pub const UNCATEGORIZED: &str = "Uncategorized";

//
// ================= Persisted Documents =================
//

/// Sandbox institution-link token, stored in `publicTokens`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicToken {
    pub token: String,
}

/// Durable credential for one linked institution, stored in `accessTokens`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub access_token: String,
}

/// Provider transaction record, stored verbatim in `transactions`
/// under its `transaction_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub transaction_id: String,
    /// Outer `None`: field absent. `Some(None)`: provider sent `null`.
    #[serde(
        default,
        deserialize_with = "present_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<Option<Vec<String>>>,
    pub amount: f64,
    pub date: String,
    /// Every other provider field, carried through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Transaction {
    pub fn new(
        transaction_id: impl Into<String>,
        category: &[&str],
        amount: f64,
        date: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            category: Some(Some(category.iter().map(|c| c.to_string()).collect())),
            amount,
            date: date.into(),
            extra: Map::new(),
        }
    }

    /// Top-level category used as the aggregation key
    pub fn primary_category(&self) -> &str {
        self.category
            .as_ref()
            .and_then(Option::as_ref)
            .and_then(|c| c.first())
            .map(String::as_str)
            .filter(|c| !c.is_empty())
            .unwrap_or(UNCATEGORIZED)
    }
}

/// Any value that is present, `null` included, deserializes to `Some`
fn present_field<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

//
// ================= Requests =================
//

/// Date range forwarded to the provider as given
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start_date: String,
    pub end_date: String,
}

impl DateRange {
    pub fn new(start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        Self {
            start_date: start_date.into(),
            end_date: end_date.into(),
        }
    }
}

//
// ================= Derived =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryTotal {
    pub category: String,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetReport {
    pub category_totals: Vec<CategoryTotal>,
    pub monthly_budgets: BTreeMap<String, f64>,
    pub transaction_count: usize,
    pub months: f64,
}

//
// ================= Stages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TokenLifecycle,
    Exchange,
    TransactionSync,
    BudgetAggregation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::TokenLifecycle => "token_lifecycle",
            Stage::Exchange => "exchange",
            Stage::TransactionSync => "transaction_sync",
            Stage::BudgetAggregation => "budget_aggregation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary of a completed mutating stage run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub run_id: Uuid,
    pub documents_written: usize,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_keeps_provider_fields() {
        let raw = serde_json::json!({
            "transaction_id": "tx-1",
            "category": ["Food and Drink", "Restaurants"],
            "amount": 12.5,
            "date": "2024-01-03",
            "merchant_name": "Tony's",
            "pending": false
        });

        let txn: Transaction = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(txn.primary_category(), "Food and Drink");
        assert_eq!(txn.extra.get("merchant_name"), Some(&Value::from("Tony's")));
        assert_eq!(serde_json::to_value(&txn).unwrap(), raw);
    }

    #[test]
    fn test_null_category_round_trips() {
        let raw = serde_json::json!({
            "transaction_id": "t",
            "category": null,
            "amount": 1.0,
            "date": "2024-01-01"
        });

        let txn: Transaction = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(txn.category, Some(None));
        assert_eq!(txn.primary_category(), UNCATEGORIZED);
        assert_eq!(serde_json::to_value(&txn).unwrap(), raw);

        // an absent field stays absent
        let absent = serde_json::json!({ "transaction_id": "u", "amount": 1.0, "date": "2024-01-01" });
        let txn: Transaction = serde_json::from_value(absent.clone()).unwrap();
        assert_eq!(txn.category, None);
        assert_eq!(serde_json::to_value(&txn).unwrap(), absent);
    }

    #[test]
    fn test_missing_category_is_uncategorized() {
        let txn: Transaction = serde_json::from_value(serde_json::json!({
            "transaction_id": "tx-2",
            "amount": 4.0,
            "date": "2024-01-04"
        }))
        .unwrap();
        assert_eq!(txn.primary_category(), UNCATEGORIZED);

        let empty = Transaction::new("tx-3", &[], 1.0, "2024-01-05");
        assert_eq!(empty.primary_category(), UNCATEGORIZED);
    }

    #[test]
    fn test_access_token_field_name() {
        let doc = serde_json::to_value(AccessToken {
            access_token: "access-sandbox-1".to_string(),
        })
        .unwrap();
        assert_eq!(doc, serde_json::json!({ "accessToken": "access-sandbox-1" }));
    }
}
