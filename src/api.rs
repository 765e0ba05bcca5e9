//! REST API server for the account-link pipeline
//!
//! One endpoint per stage. Handlers are thin adapters over [`Pipeline`].

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::PipelineError;
use crate::models::{CategoryTotal, DateRange, StageOutcome};
use crate::pipeline::Pipeline;

// =============================
// Request Models
// =============================

/// Missing dates are forwarded as empty strings; the provider decides what is valid
#[derive(Debug, Deserialize)]
pub struct SyncTransactionsRequest {
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
}

#[derive(Debug, Deserialize)]
pub struct BudgetQuery {
    pub months: Option<f64>,
}

// =============================
// Response Wrapper
// =============================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_budgets: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_totals: Option<Vec<CategoryTotal>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    fn empty(success: bool) -> Self {
        Self {
            success,
            message: None,
            monthly_budgets: None,
            category_totals: None,
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn message(message: String) -> Self {
        Self {
            message: Some(message),
            ..Self::empty(true)
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            error: Some(message),
            ..Self::empty(false)
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

// =============================
// Error Mapping
// =============================

/// Only NotFound, conflicts and bad input are distinguishable by callers;
/// everything else is a generic 500 with the cause logged.
fn failure(e: PipelineError, generic: &str) -> ApiResult {
    let (status, message) = match &e {
        PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        PipelineError::StageBusy(_) | PipelineError::RunSuperseded(_) => {
            (StatusCode::CONFLICT, e.to_string())
        }
        PipelineError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        _ => {
            error!(error = %e, "{}", generic);
            (StatusCode::INTERNAL_SERVER_ERROR, generic.to_string())
        }
    };

    (status, Json(ApiResponse::error(message)))
}

fn stage_result(result: crate::Result<StageOutcome>, generic: &str) -> ApiResult {
    match result {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::message(outcome.message))),
        Err(e) => failure(e, generic),
    }
}

// =============================
// Health Endpoint
// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

// =============================
// Stage Endpoints
// =============================

async fn create_public_tokens(State(pipeline): State<Arc<Pipeline>>) -> ApiResult {
    info!("Received public token request");
    stage_result(
        pipeline.refresh_public_tokens().await,
        "Failed to create public tokens",
    )
}

async fn exchange_public_tokens(State(pipeline): State<Arc<Pipeline>>) -> ApiResult {
    info!("Received token exchange request");
    stage_result(
        pipeline.exchange_public_tokens().await,
        "Failed to exchange public tokens",
    )
}

async fn sync_transactions(
    State(pipeline): State<Arc<Pipeline>>,
    payload: Result<Json<SyncTransactionsRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return (
                rejection.status(),
                Json(ApiResponse::error(rejection.body_text())),
            )
        }
    };

    info!(
        "Received transaction sync request: {} to {}",
        req.start_date, req.end_date
    );
    let range = DateRange::new(req.start_date, req.end_date);
    stage_result(
        pipeline.sync_transactions(&range).await,
        "Failed to fetch transactions",
    )
}

async fn monthly_budget(
    State(pipeline): State<Arc<Pipeline>>,
    Query(query): Query<BudgetQuery>,
) -> ApiResult {
    match pipeline.monthly_budget(query.months).await {
        Ok(report) => (
            StatusCode::OK,
            Json(ApiResponse {
                monthly_budgets: Some(report.monthly_budgets),
                category_totals: Some(report.category_totals),
                ..ApiResponse::empty(true)
            }),
        ),
        Err(e) => failure(e, "Failed to calculate monthly budget"),
    }
}

// =============================
// Router
// =============================

pub fn create_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/public-tokens", post(create_public_tokens))
        .route("/api/access-tokens", post(exchange_public_tokens))
        .route("/api/transactions", post(sync_transactions))
        .route("/api/budget", get(monthly_budget))
        .with_state(pipeline)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// =============================
// Server Startup
// =============================

pub async fn start_server(
    pipeline: Arc<Pipeline>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(pipeline);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
