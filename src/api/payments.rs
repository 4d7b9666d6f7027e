//! Payment routes
//!
//! JSON in and out for create/query/refund/config. The notify route is the
//! exception: providers post their own formats and expect their own ack
//! bodies, so it takes the raw body and answers with `platform_response`.

use crate::api::AppState;
use crate::payments::notify::ack_content_type;
use crate::payments::types::{NotifyData, PaymentOrderInfo, RefundRequest};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    #[serde(default)]
    pub adapter: Option<String>,
    pub order: PaymentOrderInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPaymentRequest {
    #[serde(default)]
    pub adapter: Option<String>,
    pub transaction_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RefundPaymentRequest {
    #[serde(default)]
    pub adapter: Option<String>,
    pub refund: RefundRequest,
}

#[derive(Debug, Deserialize)]
pub struct ClientConfigQuery {
    pub adapter: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_payment))
        .route("/query", post(query_payment))
        .route("/refund", post(refund_payment))
        .route("/notify/:provider", post(handle_notify))
        .route("/config", get(client_config))
}

/// HTTP status for a failed adapter call, keyed by error code.
pub fn status_for_error(code: Option<&str>) -> StatusCode {
    match code {
        Some("ADAPTER_NOT_FOUND") => StatusCode::NOT_FOUND,
        Some("NETWORK_ERROR") => StatusCode::BAD_GATEWAY,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn status_of(success: bool, code: Option<&str>) -> StatusCode {
    if success {
        StatusCode::OK
    } else {
        status_for_error(code)
    }
}

pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> impl IntoResponse {
    let response = state
        .service
        .create_payment(request.adapter.as_deref(), &request.order)
        .await;
    (
        status_of(response.success, response.error_code.as_deref()),
        Json(response),
    )
}

pub async fn query_payment(
    State(state): State<AppState>,
    Json(request): Json<QueryPaymentRequest>,
) -> impl IntoResponse {
    let response = state
        .service
        .query_payment(request.adapter.as_deref(), &request.transaction_id)
        .await;
    (
        status_of(response.success, response.error_code.as_deref()),
        Json(response),
    )
}

pub async fn refund_payment(
    State(state): State<AppState>,
    Json(request): Json<RefundPaymentRequest>,
) -> impl IntoResponse {
    let response = state
        .service
        .refund(request.adapter.as_deref(), &request.refund)
        .await;
    (
        status_of(response.success, response.error_code.as_deref()),
        Json(response),
    )
}

pub async fn client_config(
    State(state): State<AppState>,
    Query(query): Query<ClientConfigQuery>,
) -> impl IntoResponse {
    match state.service.client_config(query.adapter.as_deref()) {
        Ok(config) => (StatusCode::OK, Json(config)),
        Err(e) => {
            let code = e.code();
            (
                status_for_error(Some(&code)),
                Json(json!({ "success": false, "errorCode": code, "errorMessage": e.to_string() })),
            )
        }
    }
}

/// Provider callback; the body is handed to the adapter untouched.
pub async fn handle_notify(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !state.service.registry().contains(&provider) {
        warn!("Notification for unregistered adapter '{}'", provider);
        return StatusCode::NOT_FOUND.into_response();
    }

    let mut data = NotifyData::new(body);
    for (name, value) in headers.iter() {
        match value.to_str() {
            Ok(value) => data.insert_header(name.as_str(), value),
            Err(_) => warn!("Dropping non-UTF-8 header {} on {} notification", name, provider),
        }
    }

    let outcome = state.service.handle_notify(&provider, &data).await;
    let status = if outcome.response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    info!(
        "{} notification answered {} (duplicate={}, dispatched={})",
        provider, status, outcome.duplicate, outcome.dispatched
    );

    let ack = outcome.response.platform_response;
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, ack_content_type(&ack))
        .body(Body::from(ack))
        .unwrap_or_else(|_| status.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_of(true, None), StatusCode::OK);
        assert_eq!(
            status_for_error(Some("ADAPTER_NOT_FOUND")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_for_error(Some("NETWORK_ERROR")), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for_error(Some("SIGNATURE_INVALID")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for_error(None), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_create_request_shape() {
        let request: CreatePaymentRequest = serde_json::from_value(json!({
            "order": {
                "orderId": "ord-1",
                "amount": { "amountMinorUnits": 500, "currency": "USD" }
            }
        }))
        .unwrap();
        assert!(request.adapter.is_none());
        assert_eq!(request.order.amount.amount_minor_units, 500);
    }
}
