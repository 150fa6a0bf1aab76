//! HTTP surface
//!
//! Thin axum layer mapping pipeline results to status codes: a denied
//! rate check or an exhausted quota becomes 429 with a `Retry-After`
//! header, while capacity or store failures (which the pipeline has
//! already compensated for) become 500.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::capacity::Owner;
use crate::clock::Clock;
use crate::error::GateError;
use crate::pipeline::AdmissionPipeline;

pub struct AppState {
    pub pipeline: Arc<AdmissionPipeline>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        ApiError { error: msg.into() }
    }
}

#[derive(Deserialize)]
pub struct ProduceRequest {
    pub owner_id: String,
    pub tier: String,
    pub category: String,
}

#[derive(Serialize)]
pub struct ProduceResponse {
    pub item_id: String,
    pub evicted: Vec<String>,
}

#[derive(Deserialize)]
pub struct TierQuery {
    #[serde(default = "default_tier")]
    pub tier: String,
}

fn default_tier() -> String {
    "free".to_string()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/produce", post(produce))
        .route("/api/admission/:identity/:route", get(check_admission))
        .route("/api/quota/:owner/:category", get(quota_status))
        .route("/api/capacity/:owner", get(capacity_status))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn produce(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProduceRequest>,
) -> Response {
    let owner = Owner::new(req.owner_id, req.tier);
    match state
        .pipeline
        .try_produce(&owner, &req.category, mock_payload)
        .await
    {
        Ok(outcome) => (
            StatusCode::CREATED,
            Json(ProduceResponse {
                item_id: outcome.item.id,
                evicted: outcome.evicted,
            }),
        )
            .into_response(),
        Err(e) => error_response(&state, e),
    }
}

async fn check_admission(
    State(state): State<Arc<AppState>>,
    Path((identity, route)): Path<(String, String)>,
) -> Response {
    let decision = state.pipeline.check_admission(&identity, &route).await;
    if decision.allowed {
        (StatusCode::OK, Json(decision)).into_response()
    } else {
        let reset_at = decision.reset_at;
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(decision)).into_response();
        set_retry_after(&state, &mut response, reset_at);
        response
    }
}

async fn quota_status(
    State(state): State<Arc<AppState>>,
    Path((owner, category)): Path<(String, String)>,
    Query(query): Query<TierQuery>,
) -> Response {
    let owner = Owner::new(owner, query.tier);
    let status = state.pipeline.quota_status(&owner, &category).await;
    (StatusCode::OK, Json(status)).into_response()
}

async fn capacity_status(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    Query(query): Query<TierQuery>,
) -> Response {
    let owner = Owner::new(owner, query.tier);
    match state.pipeline.capacity_status(&owner).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => error_response(&state, e),
    }
}

// The real generator is an external collaborator; the service stores
// whatever bytes it hands over. This stands in for it.
fn mock_payload() -> Vec<u8> {
    b"generated-image-placeholder".to_vec()
}

fn error_response(state: &AppState, err: GateError) -> Response {
    match err {
        GateError::RateLimited { reset_at } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ApiError::new("Too many requests")),
            )
                .into_response();
            set_retry_after(state, &mut response, reset_at);
            response
        }
        GateError::QuotaExceeded { limit, reset_at } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ApiError::new(format!(
                    "Daily quota of {limit} reached, resets at {reset_at}"
                ))),
            )
                .into_response();
            set_retry_after(state, &mut response, reset_at);
            response
        }
        other => {
            error!("request failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("Internal error")),
            )
                .into_response()
        }
    }
}

fn set_retry_after(state: &AppState, response: &mut Response, reset_at: DateTime<Utc>) {
    let secs = (reset_at - state.clock.now()).num_seconds().max(0);
    if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
}
