//! REST API for the expense processor
//!
//! Thin handlers over `ExpenseProcessor`; every response uses the same
//! `ApiResponse` envelope.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::models::{ApprovedRequest, ProcessRequest};
use crate::config::{MAX_ORPHAN_AGE_DAYS, MAX_STUCK_THRESHOLD_MINUTES};
use crate::processor::ExpenseProcessor;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RecoverStuckRequest {
    pub threshold_minutes: Option<i64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOrphansRequest {
    pub age_days: Option<i64>,
    pub limit: Option<usize>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub processor: Arc<ExpenseProcessor>,
    pub stuck_threshold_minutes: i64,
    pub max_recovery_attempts: u32,
    pub orphan_age_days: i64,
    pub max_orphans_per_run: usize,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Expense Endpoints
/// =============================

async fn process_expense(
    State(state): State<ApiState>,
    Json(req): Json<ProcessRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(expense_id = %req.expense_id, retry_count = req.retry_count, "Received process request");

    match state.processor.handle_process(&req).await {
        Ok(response) => (StatusCode::OK, Json(ApiResponse::success(response))),
        Err(e) => {
            error!(expense_id = %req.expense_id, "Process request failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Processing failed: {}", e))),
            )
        }
    }
}

async fn process_approved(
    State(state): State<ApiState>,
    Json(req): Json<ApprovedRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(
        expense_id = %req.expense_id,
        bank_transaction_id = %req.bank_transaction_id,
        "Received human-approved request"
    );

    match state.processor.handle_approved(&req).await {
        Ok(response) if response.success => (StatusCode::OK, Json(ApiResponse::success(response))),
        Ok(response) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse {
                success: false,
                error: Some(response.message.clone()),
                data: serde_json::to_value(&response).ok(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            }),
        ),
        Err(e) => {
            error!(expense_id = %req.expense_id, "Approved request failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Posting failed: {}", e))),
            )
        }
    }
}

/// =============================
/// Maintenance Endpoint
/// =============================

async fn recover_stuck(
    State(state): State<ApiState>,
    body: Option<Json<RecoverStuckRequest>>,
) -> (StatusCode, Json<ApiResponse>) {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let threshold = req.threshold_minutes.unwrap_or(state.stuck_threshold_minutes);
    let max_attempts = req.max_attempts.unwrap_or(state.max_recovery_attempts);

    if !(0..=MAX_STUCK_THRESHOLD_MINUTES).contains(&threshold) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "thresholdMinutes must be between 0 and {}, got {}",
                MAX_STUCK_THRESHOLD_MINUTES, threshold
            ))),
        );
    }

    match state
        .processor
        .recover_stuck(Duration::minutes(threshold), max_attempts)
        .await
    {
        Ok(report) => {
            info!(
                recovered = report.recovered,
                flagged = report.flagged,
                total_found = report.total_found,
                "Stuck recovery finished"
            );
            (StatusCode::OK, Json(ApiResponse::success(report)))
        }
        Err(e) => {
            error!("Stuck recovery failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Recovery failed: {}", e))),
            )
        }
    }
}

async fn process_orphans(
    State(state): State<ApiState>,
    body: Option<Json<ProcessOrphansRequest>>,
) -> (StatusCode, Json<ApiResponse>) {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let age_days = req.age_days.unwrap_or(state.orphan_age_days);
    let limit = req.limit.unwrap_or(state.max_orphans_per_run);

    if !(0..=MAX_ORPHAN_AGE_DAYS).contains(&age_days) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "ageDays must be between 0 and {}, got {}",
                MAX_ORPHAN_AGE_DAYS, age_days
            ))),
        );
    }

    match state.processor.process_orphans(age_days, limit).await {
        Ok(report) => (StatusCode::OK, Json(ApiResponse::success(report))),
        Err(e) => {
            error!("Orphan triage failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Orphan triage failed: {}", e))),
            )
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/expenses/process", post(process_expense))
        .route("/api/expenses/approved", post(process_approved))
        .route("/api/maintenance/recover-stuck", post(recover_stuck))
        .route("/api/maintenance/process-orphans", post(process_orphans))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::DecisionEngine;
    use crate::audit::InMemoryIdempotencyStore;
    use crate::config::DEFAULT_MAX_ITERATIONS;
    use crate::execution::ExecutionEngine;
    use crate::llm::{ModelTurn, ScriptedModel};
    use crate::models::{Expense, ExpenseStatus};
    use crate::state::ExpenseStore;
    use crate::tools::testing::Fixture;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::NaiveDate;
    use tower::ServiceExt;

    fn state(fixture: &Fixture) -> ApiState {
        let model = Arc::new(ScriptedModel::repeating(ModelTurn::Completed {
            text: "I flagged this for review.".to_string(),
        }));
        let engine = DecisionEngine::new(
            model,
            ExecutionEngine::with_catalog().unwrap(),
            DEFAULT_MAX_ITERATIONS,
        );
        ApiState {
            processor: Arc::new(ExpenseProcessor::new(
                engine,
                fixture.services.clone(),
                Arc::new(InMemoryIdempotencyStore::new()),
            )),
            stuck_threshold_minutes: 10,
            max_recovery_attempts: 3,
            orphan_age_days: 5,
            max_orphans_per_run: 20,
        }
    }

    async fn post_json(router: Router, uri: &str, body: serde_json::Value) -> (StatusCode, ApiResponse) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_process_endpoint_uses_camel_case_payload() {
        let fixture = Fixture::new();
        let mut expense = Expense::new("e-1", NaiveDate::from_ymd_opt(2025, 4, 2).unwrap(), 12.0);
        expense.receipt_ref = Some("receipts/e-1.jpg".to_string());
        fixture.store.insert_expense(expense).await;

        let (status, body) = post_json(
            create_router(state(&fixture)),
            "/api/expenses/process",
            serde_json::json!({"expenseId": "e-1", "retryCount": 0}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        let data = body.data.unwrap();
        assert_eq!(data["expenseId"], "e-1");
        assert_eq!(data["decision"], "needs_review");
    }

    #[tokio::test]
    async fn test_recover_stuck_without_body_uses_defaults() {
        let fixture = Fixture::new();
        let mut stuck = Expense::new("e-1", NaiveDate::from_ymd_opt(2025, 4, 2).unwrap(), 12.0);
        stuck.status = ExpenseStatus::Processing;
        stuck.updated_at = chrono::Utc::now() - Duration::hours(1);
        fixture.store.insert_expense(stuck).await;

        let response = create_router(state(&fixture))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/maintenance/recover-stuck")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stored = fixture.store.get_expense("e-1").await.unwrap().unwrap();
        assert_eq!(stored.status, ExpenseStatus::Pending);
    }

    #[tokio::test]
    async fn test_rejected_approval_is_unprocessable() {
        let fixture = Fixture::new();
        let (status, body) = post_json(
            create_router(state(&fixture)),
            "/api/expenses/approved",
            serde_json::json!({"expenseId": "missing", "bankTransactionId": "t-1"}),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!body.success);
        assert!(body.error.is_some());
    }

    #[tokio::test]
    async fn test_recover_stuck_rejects_out_of_range_threshold() {
        let fixture = Fixture::new();
        let router = create_router(state(&fixture));

        for threshold in [i64::MAX, -5, MAX_STUCK_THRESHOLD_MINUTES + 1] {
            let (status, body) = post_json(
                router.clone(),
                "/api/maintenance/recover-stuck",
                serde_json::json!({"thresholdMinutes": threshold}),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body.error.unwrap().contains("thresholdMinutes"));
        }

        let (status, _) = post_json(
            router,
            "/api/maintenance/recover-stuck",
            serde_json::json!({"thresholdMinutes": MAX_STUCK_THRESHOLD_MINUTES}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_process_orphans_reports_and_validates_age() {
        let fixture = Fixture::new();
        let router = create_router(state(&fixture));

        let (status, body) = post_json(
            router.clone(),
            "/api/maintenance/process-orphans",
            serde_json::json!({"ageDays": i64::MAX}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);

        let (status, body) = post_json(router, "/api/maintenance/process-orphans", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap()["total_found"], 0);
    }
}
