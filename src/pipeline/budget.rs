//! Budget aggregation stage
//!
//! Read-only: totals stored transactions by top-level category and divides by the number
//! of months the data covers.

use super::Pipeline;
use crate::error::PipelineError;
use crate::models::{BudgetReport, CategoryTotal, Transaction};
use crate::store::{from_document, TRANSACTIONS};
use crate::Result;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Group by `category[0]`, sum amounts, and derive the monthly estimate.
///
/// Transactions without a category land in [`crate::models::UNCATEGORIZED`], so the
/// totals always add up to the sum of all amounts.
pub fn aggregate(transactions: &[Transaction], months: f64) -> BudgetReport {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();

    for txn in transactions {
        *totals.entry(txn.primary_category().to_string()).or_insert(0.0) += txn.amount;
    }

    let monthly_budgets = totals
        .iter()
        .map(|(category, total)| (category.clone(), total / months))
        .collect();

    let category_totals = totals
        .into_iter()
        .map(|(category, total)| CategoryTotal { category, total })
        .collect();

    BudgetReport {
        category_totals,
        monthly_budgets,
        transaction_count: transactions.len(),
        months,
    }
}

fn validate_months(months: f64) -> Result<f64> {
    if !months.is_finite() || months <= 0.0 {
        return Err(PipelineError::InvalidRequest(format!(
            "months must be a positive number, got {}",
            months
        )));
    }
    Ok(months)
}

impl Pipeline {
    /// Per-category monthly estimate over the stored transactions.
    ///
    /// `months` overrides the configured divisor for this call.
    pub async fn monthly_budget(&self, months: Option<f64>) -> Result<BudgetReport> {
        let months = validate_months(months.unwrap_or(self.settings.budget_months))?;

        let docs = self.store.get_all(TRANSACTIONS).await?;
        let transactions = docs
            .iter()
            .map(from_document::<Transaction>)
            .collect::<Result<Vec<_>>>()?;

        debug!(count = transactions.len(), months, "Aggregating transactions");
        let report = aggregate(&transactions, months);

        info!(
            categories = report.category_totals.len(),
            transactions = report.transaction_count,
            "Budget aggregation: complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{pipeline, seed, FlakyStore};
    use super::*;
    use crate::models::UNCATEGORIZED;
    use crate::plaid::MockFinancialApi;
    use crate::store::InMemoryDocumentStore;
    use std::sync::Arc;

    fn reference_transactions() -> Vec<Transaction> {
        vec![
            Transaction::new("t1", &["Food"], 30.0, "2024-01-02"),
            Transaction::new("t2", &["Food"], 20.0, "2024-01-09"),
            Transaction::new("t3", &["Travel"], 100.0, "2024-02-14"),
        ]
    }

    #[test]
    fn test_reference_dataset() {
        let report = aggregate(&reference_transactions(), 2.0);

        assert_eq!(
            report.category_totals,
            vec![
                CategoryTotal { category: "Food".into(), total: 50.0 },
                CategoryTotal { category: "Travel".into(), total: 100.0 },
            ]
        );
        assert_eq!(report.monthly_budgets.get("Food"), Some(&25.0));
        assert_eq!(report.monthly_budgets.get("Travel"), Some(&50.0));
        assert_eq!(report.transaction_count, 3);
    }

    #[test]
    fn test_totals_match_amounts_with_uncategorized() {
        let mut txns = reference_transactions();
        let mut missing = Transaction::new("t4", &[], 7.5, "2024-02-20");
        missing.category = None;
        txns.push(missing);
        let mut null = Transaction::new("t6", &[], 1.0, "2024-02-22");
        null.category = Some(None);
        txns.push(null);
        txns.push(Transaction::new("t5", &[], 2.5, "2024-02-21"));

        let report = aggregate(&txns, 2.0);

        let total: f64 = report.category_totals.iter().map(|c| c.total).sum();
        let amounts: f64 = txns.iter().map(|t| t.amount).sum();
        assert_eq!(total, amounts);
        assert_eq!(report.monthly_budgets.get(UNCATEGORIZED), Some(&5.5));
    }

    #[test]
    fn test_only_first_category_counts() {
        let txns = vec![Transaction::new("t1", &["Shops", "Food"], 40.0, "2024-01-01")];
        let report = aggregate(&txns, 1.0);
        assert_eq!(report.monthly_budgets.len(), 1);
        assert_eq!(report.monthly_budgets.get("Shops"), Some(&40.0));
    }

    #[test]
    fn test_empty_dataset() {
        let report = aggregate(&[], 2.0);
        assert!(report.category_totals.is_empty());
        assert!(report.monthly_budgets.is_empty());
    }

    #[tokio::test]
    async fn test_reads_store_without_mutating() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let txns = reference_transactions();
        let items: Vec<(&str, Transaction)> = txns
            .iter()
            .map(|t| (t.transaction_id.as_str(), t.clone()))
            .collect();
        seed(store.as_ref(), TRANSACTIONS, &items).await;

        let pipeline = pipeline(store.clone(), Arc::new(MockFinancialApi::new()), &[]);

        let report = pipeline.monthly_budget(None).await.unwrap();
        assert_eq!(report.monthly_budgets.get("Food"), Some(&25.0));

        let report = pipeline.monthly_budget(Some(5.0)).await.unwrap();
        assert_eq!(report.monthly_budgets.get("Travel"), Some(&20.0));
        assert_eq!(store.count(TRANSACTIONS).await, 3);
    }

    #[tokio::test]
    async fn test_invalid_months_rejected() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let pipeline = pipeline(store, Arc::new(MockFinancialApi::new()), &[]);

        for months in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                pipeline.monthly_budget(Some(months)).await,
                Err(PipelineError::InvalidRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_read_failure_surfaces() {
        let store = Arc::new(FlakyStore::new().fail_reads_of(TRANSACTIONS));
        let pipeline = pipeline(store, Arc::new(MockFinancialApi::new()), &[]);

        assert!(matches!(
            pipeline.monthly_budget(None).await,
            Err(PipelineError::Store(_))
        ));
    }
}
