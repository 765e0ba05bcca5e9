use budget_link::{config::AppConfig, plaid, store::InMemoryDocumentStore, DateRange, Pipeline};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Days synced when no range is given
const DEFAULT_SYNC_DAYS: i64 = 60;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // pipeline [start_date end_date]
    let args: Vec<String> = std::env::args().skip(1).collect();
    let range = match args.as_slice() {
        [start, end] => DateRange::new(start.as_str(), end.as_str()),
        [] => {
            let today = Utc::now().date_naive();
            let start = today - Duration::days(DEFAULT_SYNC_DAYS);
            DateRange::new(start.format("%Y-%m-%d").to_string(), today.format("%Y-%m-%d").to_string())
        }
        _ => return Err("usage: pipeline [start_date end_date]".into()),
    };

    let config = AppConfig::from_env()?;

    let store = Arc::new(InMemoryDocumentStore::new());
    let financial_api = plaid::from_config(&config)?;
    let pipeline = Pipeline::new(store, financial_api, config.pipeline.clone());

    info!(
        start_date = %range.start_date,
        end_date = %range.end_date,
        "Running account-link pipeline"
    );

    // Run stages in order; each reads what the previous one stored
    let outcomes = vec![
        pipeline.refresh_public_tokens().await?,
        pipeline.exchange_public_tokens().await?,
        pipeline.sync_transactions(&range).await?,
    ];

    println!("\n=== PIPELINE RESULT ===");
    for outcome in &outcomes {
        println!("{:<18} {}", outcome.stage.to_string(), outcome.message);
    }

    let report = pipeline.monthly_budget(None).await?;

    println!(
        "\nMonthly budget ({} transactions over {} months):",
        report.transaction_count, report.months
    );
    for (category, amount) in &report.monthly_budgets {
        println!("  {:<32} {:>10.2}", category, amount);
    }

    Ok(())
}
