//! REST handlers for filter management and statistics.

use super::AppState;
use crate::domain::types::{
    ApiResponse, CreateFilterRequest, CreateFilterResponse,
};
use crate::subscription::SubscriptionManager;
use crate::ws::session;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

/// `GET /` — service description.
pub async fn root() -> Json<ApiResponse> {
    Json(ApiResponse::ok(
        "AT Protocol Firehose Filter Server API",
        json!({
            "endpoints": [
                "GET /api/status - Get server status",
                "POST /api/filters/create - Create new filter subscription",
                "GET /api/subscriptions - Get all subscriptions",
                "GET /api/subscriptions/{filterKey} - Get subscription details",
                "GET /api/stats - Get subscription statistics",
            ],
            "filters": {
                "repository": "Filter by repository DID (e.g., 'did:plc:abc123')",
                "pathPrefix": "Filter by operation path prefix (e.g., 'app.bsky.feed.post')",
                "keyword": "Filter by keywords in text content (comma-separated, e.g., 'hello,world,test')",
            },
            "requirements": [
                "Keyword filter is required for all subscriptions",
                "Each filter field (repository, pathPrefix, keyword) must contain at least 3 letters",
                "Keywords are comma-separated and each must have at least 3 letters",
            ],
        }),
    ))
}

/// `GET /api/status` — liveness plus active filter count.
pub async fn status(State(state): State<AppState>) -> Json<ApiResponse> {
    let stats = state.manager.stats().await;
    Json(ApiResponse::ok(
        "Server is running",
        json!({
            "status": "active",
            "active_filters": stats.active_filters,
            "uptime": stats.uptime,
        }),
    ))
}

/// `POST /api/filters/create` — validate criteria and mint a filter key.
pub async fn create_filter(State(state): State<AppState>, body: String) -> Response {
    let request: CreateFilterRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(error) => {
            return bad_request(format!("Invalid JSON in request body: {error}"));
        }
    };

    match state.manager.create_filter(request.options.clone()).await {
        Ok(filter_key) => Json(CreateFilterResponse {
            filter_key,
            options: request.options,
            created_at: Utc::now(),
        })
        .into_response(),
        Err(error) => bad_request(error.to_string()),
    }
}

/// `GET /api/subscriptions` — every subscription view.
pub async fn list_subscriptions(State(state): State<AppState>) -> Json<ApiResponse> {
    let views = state.manager.list_subscriptions().await;
    Json(ApiResponse::ok(
        "Filter subscriptions retrieved successfully",
        to_value(&views),
    ))
}

/// `GET /api/subscriptions/{filterKey}` — one subscription view or 404.
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(filter_key): Path<String>,
) -> Response {
    match state.manager.get_subscription(&filter_key).await {
        Some(view) => Json(ApiResponse::ok(
            "Filter subscription retrieved successfully",
            to_value(&view),
        ))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Filter subscription not found")),
        )
            .into_response(),
    }
}

/// `GET /api/stats` — the registry statistics snapshot.
pub async fn stats(State(state): State<AppState>) -> Json<ApiResponse> {
    let snapshot = state.manager.stats().await;
    Json(ApiResponse::ok(
        "Statistics retrieved successfully",
        to_value(&snapshot),
    ))
}

/// `GET /ws/{filterKey}` — upgrade and hand the socket to the session loop.
pub async fn subscribe_ws(
    State(state): State<AppState>,
    Path(filter_key): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let manager: Arc<SubscriptionManager> = Arc::clone(&state.manager);
    let config = state.ws_config.clone();
    ws.max_message_size(config.max_message_size)
        .on_upgrade(move |socket| session::run(socket, filter_key, manager, config))
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message))).into_response()
}

fn to_value(value: &impl serde::Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
