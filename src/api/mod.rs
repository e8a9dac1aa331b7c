//! REST adapter: filter management, statistics, and the WebSocket
//! subscribe endpoint, mounted on one axum router.

mod handlers;

use crate::domain::config::{CorsConfig, SubscriptionsConfig};
use crate::metrics::Metrics;
use crate::subscription::SubscriptionManager;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SubscriptionManager>,
    pub metrics: Arc<Metrics>,
    pub ws_config: SubscriptionsConfig,
}

/// Build the API + WebSocket router.
pub fn router(state: AppState, cors: &CorsConfig) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/api/status", get(handlers::status))
        .route("/api/filters/create", post(handlers::create_filter))
        .route("/api/subscriptions", get(handlers::list_subscriptions))
        .route("/api/subscriptions/:filter_key", get(handlers::get_subscription))
        .route("/api/stats", get(handlers::stats))
        .route("/ws/:filter_key", get(handlers::subscribe_ws))
        .layer(cors_layer(cors))
        .with_state(state)
}

/// Build the metrics router for the separate metrics listener.
pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let metrics = Arc::clone(&metrics);
            async move { metrics.render() }
        }),
    )
}

/// Create a CORS layer from broker configuration.
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
        ]);

    if config.allow_all_origins {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }
    cors
}
