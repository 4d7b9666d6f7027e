//! HTTP surface: payment routes under the configured prefix plus `/health`

pub mod health;
pub mod payments;

use crate::payments::PaymentService;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PaymentService>,
    pub environment: String,
    #[cfg(feature = "cache")]
    pub redis: Option<crate::cache::RedisPool>,
}

impl AppState {
    pub fn new(service: Arc<PaymentService>, environment: impl Into<String>) -> Self {
        Self {
            service,
            environment: environment.into(),
            #[cfg(feature = "cache")]
            redis: None,
        }
    }
}

/// Full application router with tracing and request ids.
pub fn app(state: AppState, route_prefix: &str) -> Router {
    let payment_routes = payments::router();
    let router = if route_prefix == "/" {
        Router::new().merge(payment_routes)
    } else {
        Router::new().nest(route_prefix, payment_routes)
    };

    router
        .route("/health", get(health::health_check))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
