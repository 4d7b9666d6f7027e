use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub adapters: Vec<String>,
    pub default_adapter: Option<String>,
    /// `None` when no Redis store is configured
    pub redis_healthy: Option<bool>,
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let version = env!("CARGO_PKG_VERSION").to_string();

    #[cfg(feature = "cache")]
    let redis_healthy = match &state.redis {
        Some(pool) => Some(crate::cache::health_check(pool).await.is_ok()),
        None => None,
    };
    #[cfg(not(feature = "cache"))]
    let redis_healthy = None;

    let adapters = state.service.registry().names();
    let status = if adapters.is_empty() || redis_healthy == Some(false) {
        "degraded"
    } else {
        "healthy"
    };

    let response = HealthResponse {
        status: status.to_string(),
        version,
        environment: state.environment.clone(),
        adapters,
        default_adapter: state.service.default_adapter().map(str::to_string),
        redis_healthy,
    };

    Ok(Json(response))
}
