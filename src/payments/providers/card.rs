//! Card network adapter
//!
//! Hosted checkout sessions in the style of Stripe's API: form-encoded
//! requests authenticated with a bearer secret key, amounts in integer minor
//! units, and `Stripe-Signature` HMAC-SHA256 webhooks.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::http::{ProviderHttp, RawResponse, DEFAULT_TIMEOUT_SECS};
use crate::payments::money::{Currency, Money};
use crate::payments::notify::{within_tolerance, DEFAULT_TOLERANCE_SECS};
use crate::payments::signing::{verify_hex, HmacSha256};
use crate::payments::traits::PaymentAdapter;
use crate::payments::types::{
    NotifyData, NotifyResponse, NotifyStatus, PaymentOrderInfo, PaymentResponse, PaymentStatus,
    PaymentStatusResponse, RefundRequest, RefundResponse, RefundStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::fmt;
use tracing::{info, warn};

pub const NAME: &str = "card";

const ACK_OK: &str = r#"{"received":true}"#;
const ACK_REJECTED: &str = r#"{"received":false}"#;

/// Largest amount a single checkout session accepts, in minor units
const MAX_AMOUNT: u64 = 99_999_999;

/// Card adapter configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct CardConfig {
    /// API secret key (`sk_test_...` in sandbox, `sk_live_...` otherwise)
    pub secret_key: String,
    /// Publishable key handed to browsers
    pub publishable_key: String,
    /// Webhook endpoint signing secret
    pub webhook_secret: String,
    pub sandbox: bool,
    pub base_url: String,
    /// Hosted checkout host, used when the API omits a session URL
    pub checkout_url: String,
    pub success_url: String,
    pub cancel_url: String,
    pub timeout_secs: u64,
    pub webhook_tolerance_secs: i64,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            publishable_key: String::new(),
            webhook_secret: String::new(),
            sandbox: true,
            base_url: "https://api.stripe.com".to_string(),
            checkout_url: "https://checkout.stripe.com".to_string(),
            success_url: String::new(),
            cancel_url: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            webhook_tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }
}

impl fmt::Debug for CardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardConfig")
            .field("publishable_key", &self.publishable_key)
            .field("sandbox", &self.sandbox)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Card network adapter
pub struct CardAdapter {
    config: CardConfig,
    http: ProviderHttp,
    webhook_mac: HmacSha256,
}

impl CardAdapter {
    pub fn new(config: CardConfig) -> PaymentResult<Self> {
        let http = ProviderHttp::new(NAME, config.timeout_secs)?;
        let webhook_mac = HmacSha256::new(config.webhook_secret.as_bytes());
        Ok(Self {
            config,
            http,
            webhook_mac,
        })
    }

    pub fn from_value(value: serde_json::Value) -> PaymentResult<Self> {
        let config: CardConfig = serde_json::from_value(value)
            .map_err(|e| PaymentError::config(format!("invalid card config: {}", e)))?;
        Self::new(config)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.config.secret_key)
    }

    /// Form fields for a checkout session; amounts stay in minor units.
    pub fn checkout_form(&self, order: &PaymentOrderInfo) -> PaymentResult<Vec<(String, String)>> {
        let amount = order.amount.amount_minor_units;
        if amount == 0 || amount > MAX_AMOUNT {
            return Err(PaymentError::invalid_request(format!(
                "amount {} is outside the accepted range",
                order.amount
            )));
        }

        let success_url = order
            .return_url
            .clone()
            .unwrap_or_else(|| self.config.success_url.clone());
        let cancel_url = order
            .cancel_url
            .clone()
            .unwrap_or_else(|| self.config.cancel_url.clone());
        if success_url.is_empty() {
            return Err(PaymentError::invalid_request(
                "a return URL is required for hosted checkout",
            ));
        }

        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("client_reference_id".to_string(), order.order_id.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                order.amount.currency.as_str().to_ascii_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                order.subject(),
            ),
            ("success_url".to_string(), success_url),
            ("metadata[order_id]".to_string(), order.order_id.clone()),
            (
                "payment_intent_data[metadata][order_id]".to_string(),
                order.order_id.clone(),
            ),
        ];
        if !cancel_url.is_empty() {
            form.push(("cancel_url".to_string(), cancel_url));
        }
        if let Some(email) = &order.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }
        if let Some(description) = &order.description {
            form.push((
                "payment_intent_data[description]".to_string(),
                description.clone(),
            ));
        }
        Ok(form)
    }

    /// Redirect target that always carries the merchant order reference.
    fn redirect_url(&self, session: &Session, order_id: &str) -> PaymentResult<String> {
        let base = match &session.url {
            Some(url) => url.clone(),
            None => format!(
                "{}/pay/{}",
                self.config.checkout_url.trim_end_matches('/'),
                session.id
            ),
        };
        let mut url = url::Url::parse(&base)
            .map_err(|e| PaymentError::serialization(format!("invalid checkout URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_reference_id", order_id);
        Ok(url.to_string())
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> PaymentResult<T> {
        let raw = self.http.send(self.authed(builder)).await?;
        if !raw.status.is_success() {
            return Err(api_error(&raw));
        }
        raw.json()
    }

    async fn fetch_session(&self, session_id: &str) -> PaymentResult<Session> {
        if session_id.trim().is_empty() {
            return Err(PaymentError::invalid_request("transaction id is empty"));
        }
        let builder = self
            .http
            .client()
            .get(self.url(&format!("/v1/checkout/sessions/{}", session_id)))
            .query(&[("expand[]", "payment_intent.latest_charge")]);
        self.send(builder).await
    }

    async fn try_create(&self, order: &PaymentOrderInfo) -> PaymentResult<PaymentResponse> {
        info!(
            "Creating card payment: order={} amount={}",
            order.order_id, order.amount
        );

        let form = self.checkout_form(order)?;
        let builder = self
            .http
            .client()
            .post(self.url("/v1/checkout/sessions"))
            .header("Idempotency-Key", format!("checkout-{}", order.order_id))
            .form(&form);
        let session: Session = self.send(builder).await?;

        let redirect_url = self.redirect_url(&session, &order.order_id)?;
        info!(
            "Card checkout session created: order={} session={}",
            order.order_id, session.id
        );

        Ok(PaymentResponse {
            success: true,
            transaction_id: Some(session.id.clone()),
            redirect_url: Some(redirect_url),
            provider_data: Some(serde_json::json!({
                "sessionId": session.id,
                "unitAmount": order.amount.amount_minor_units,
            })),
            ..Default::default()
        })
    }

    async fn try_query(&self, transaction_id: &str) -> PaymentResult<PaymentStatusResponse> {
        let session = self.fetch_session(transaction_id).await?;
        let native = session.effective_status();
        let status = map_status(&native);
        info!(
            "Card payment queried: session={} native={} status={:?}",
            session.id, native, status
        );

        let amount = match (session.amount_total, session.currency.as_deref()) {
            (Some(total), Some(code)) => Some(Money::new(total, Currency::new(code)?)),
            _ => None,
        };
        let paid_at = if status == PaymentStatus::Completed {
            session.charge().and_then(|c| c.created).and_then(unix_time)
        } else {
            None
        };

        Ok(PaymentStatusResponse::new(status, session.id)
            .with_amount(amount)
            .with_paid_at(paid_at))
    }

    async fn try_refund(&self, request: &RefundRequest) -> PaymentResult<RefundResponse> {
        // Refunds are issued against the payment intent behind the session.
        let session = self.fetch_session(&request.transaction_id).await?;
        let payment_intent = session.payment_intent_id().ok_or_else(|| {
            PaymentError::invalid_request("checkout session has no payment to refund")
        })?;

        let mut form = vec![
            ("payment_intent".to_string(), payment_intent.to_string()),
            ("reason".to_string(), "requested_by_customer".to_string()),
            ("metadata[session_id]".to_string(), session.id.clone()),
        ];
        if let Some(order_id) = &session.client_reference_id {
            form.push(("metadata[order_id]".to_string(), order_id.clone()));
        }
        if let Some(reason) = &request.reason {
            form.push(("metadata[reason]".to_string(), reason.clone()));
        }
        if let Some(amount) = &request.amount {
            if let Some(code) = &session.currency {
                if !code.eq_ignore_ascii_case(amount.currency.as_str()) {
                    return Err(PaymentError::invalid_request(format!(
                        "refund currency {} does not match payment currency {}",
                        amount.currency, code
                    )));
                }
            }
            form.push(("amount".to_string(), amount.amount_minor_units.to_string()));
        }

        let builder = self
            .http
            .client()
            .post(self.url("/v1/refunds"))
            .header("Idempotency-Key", format!("refund-{}", request.idempotency_reference()))
            .form(&form);
        let refund: Refund = self.send(builder).await?;
        info!(
            "Card refund issued: session={} refund={} status={}",
            session.id, refund.id, refund.status
        );
        Ok(RefundResponse::new(refund.id, map_refund_status(&refund.status)))
    }

    fn verify_signature(&self, data: &NotifyData) -> PaymentResult<()> {
        let header = data
            .header("stripe-signature")
            .ok_or_else(|| PaymentError::signature("missing Stripe-Signature header"))?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }
        let timestamp =
            timestamp.ok_or_else(|| PaymentError::signature("signature header has no timestamp"))?;
        if signatures.is_empty() {
            return Err(PaymentError::signature("signature header has no v1 signature"));
        }
        if !within_tolerance(timestamp, Utc::now(), self.config.webhook_tolerance_secs) {
            return Err(PaymentError::signature("signature timestamp outside tolerance"));
        }

        let signed_payload = format!("{}.{}", timestamp, data.body);
        if signatures
            .iter()
            .any(|sig| verify_hex(&self.webhook_mac, signed_payload.as_bytes(), sig))
        {
            Ok(())
        } else {
            Err(PaymentError::signature("no matching v1 signature"))
        }
    }

    fn try_notify(&self, data: &NotifyData) -> PaymentResult<NotifyResponse> {
        self.verify_signature(data)?;

        let event: Event = serde_json::from_str(&data.body)?;
        let object = &event.data.object;
        let str_field = |name: &str| object.get(name).and_then(|v| v.as_str());
        let metadata_field = |name: &str| {
            object
                .get("metadata")
                .and_then(|m| m.get(name))
                .and_then(|v| v.as_str())
        };

        let session_status = match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                if str_field("payment_status") == Some("paid") {
                    Some(NotifyStatus::Completed)
                } else {
                    None
                }
            }
            "checkout.session.async_payment_failed" => Some(NotifyStatus::Failed),
            "checkout.session.expired" => Some(NotifyStatus::Cancelled),
            "refund.created" | "refund.updated" => {
                // Refunds issued outside this service carry no order metadata.
                let (Some("succeeded"), Some(order_id), Some(refund_id)) = (
                    str_field("status"),
                    metadata_field("order_id").filter(|id| !id.is_empty()),
                    str_field("id"),
                ) else {
                    return Ok(NotifyResponse::ignored(ACK_OK));
                };
                return Ok(NotifyResponse::accepted(
                    order_id,
                    metadata_field("session_id").unwrap_or_default(),
                    Some(NotifyStatus::Refunded),
                    ACK_OK,
                )
                .with_amount(object_money(object)?)
                .with_refund_id(refund_id)
                .with_provider_data(serde_json::json!({
                    "eventId": event.id,
                    "refundId": refund_id,
                })));
            }
            "payment_intent.payment_failed" => {
                return Ok(NotifyResponse::accepted(
                    metadata_field("order_id").unwrap_or_default(),
                    str_field("id").unwrap_or_default(),
                    Some(NotifyStatus::Failed),
                    ACK_OK,
                )
                .with_provider_data(serde_json::json!({ "eventId": event.id })));
            }
            other => {
                info!("Ignoring card event type {}", other);
                return Ok(NotifyResponse::ignored(ACK_OK));
            }
        };

        let order_id = str_field("client_reference_id")
            .or_else(|| metadata_field("order_id"))
            .unwrap_or_default();
        let amount = match (
            object.get("amount_total").and_then(|v| v.as_u64()),
            str_field("currency"),
        ) {
            (Some(total), Some(code)) => Some(Money::new(total, Currency::new(code)?)),
            _ => None,
        };

        let Some(status) = session_status else {
            return Ok(NotifyResponse::ignored(ACK_OK));
        };
        Ok(NotifyResponse::accepted(
            order_id,
            str_field("id").unwrap_or_default(),
            Some(status),
            ACK_OK,
        )
        .with_amount(amount)
        .with_provider_data(serde_json::json!({ "eventId": event.id })))
    }
}

#[async_trait]
impl PaymentAdapter for CardAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_payment(&self, order: &PaymentOrderInfo) -> PaymentResponse {
        self.try_create(order).await.unwrap_or_else(|e| {
            warn!("Card payment creation failed: order={} error={}", order.order_id, e);
            PaymentResponse::from_error(&e)
        })
    }

    async fn query_payment(&self, transaction_id: &str) -> PaymentStatusResponse {
        self.try_query(transaction_id).await.unwrap_or_else(|e| {
            warn!("Card payment query failed: session={} error={}", transaction_id, e);
            PaymentStatusResponse::from_error(&e)
        })
    }

    async fn handle_notify(&self, data: &NotifyData) -> NotifyResponse {
        self.try_notify(data).unwrap_or_else(|e| {
            warn!("Card notification rejected: {}", e);
            NotifyResponse::rejected(ACK_REJECTED, e.to_string())
        })
    }

    async fn refund(&self, request: &RefundRequest) -> RefundResponse {
        self.try_refund(request).await.unwrap_or_else(|e| {
            warn!(
                "Card refund failed: session={} error={}",
                request.transaction_id, e
            );
            RefundResponse::from_error(&e)
        })
    }

    fn validate_config(&self) -> bool {
        let c = &self.config;
        let key_prefix = if c.sandbox { "sk_test_" } else { "sk_live_" };
        c.secret_key.starts_with(key_prefix)
            && c.secret_key.len() > key_prefix.len()
            && c.publishable_key.starts_with("pk_")
            && !c.webhook_secret.trim().is_empty()
            && url::Url::parse(&c.base_url).is_ok()
    }

    fn client_config(&self) -> serde_json::Value {
        serde_json::json!({
            "provider": NAME,
            "publishableKey": self.config.publishable_key,
            "sandbox": self.config.sandbox,
            "checkoutUrl": self.config.checkout_url,
        })
    }

    fn notify_failure_ack(&self) -> &str {
        ACK_REJECTED
    }
}

/// Native status -> canonical status
///
/// Inputs are payment intent statuses plus the session-level `open`,
/// `expired`, and the derived `payment_failed` / `refunded`.
pub fn map_status(native: &str) -> PaymentStatus {
    match native {
        "succeeded" => PaymentStatus::Completed,
        "processing" | "requires_action" | "requires_confirmation" | "requires_capture"
        | "requires_payment_method" | "open" => PaymentStatus::Pending,
        "payment_failed" => PaymentStatus::Failed,
        "canceled" | "expired" => PaymentStatus::Cancelled,
        "refunded" => PaymentStatus::Refunded,
        _ => PaymentStatus::Pending,
    }
}

fn map_refund_status(native: &str) -> RefundStatus {
    match native {
        "succeeded" => RefundStatus::Completed,
        "failed" | "canceled" => RefundStatus::Failed,
        _ => RefundStatus::Pending,
    }
}

fn unix_time(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn object_money(object: &serde_json::Value) -> PaymentResult<Option<Money>> {
    match (
        object.get("amount").and_then(|v| v.as_u64()),
        object.get("currency").and_then(|v| v.as_str()),
    ) {
        (Some(amount), Some(code)) => Ok(Some(Money::new(amount, Currency::new(code)?))),
        _ => Ok(None),
    }
}

fn api_error(raw: &RawResponse) -> PaymentError {
    if raw.status.is_server_error() {
        return PaymentError::network(format!("{} returned HTTP {}", NAME, raw.status));
    }
    match raw.json::<ApiErrorBody>() {
        Ok(body) => PaymentError::provider(
            NAME,
            body.error
                .code
                .or(body.error.error_type)
                .unwrap_or_else(|| format!("http_{}", raw.status.as_u16())),
            body.error.message.unwrap_or_default(),
        ),
        Err(_) => PaymentError::provider(
            NAME,
            format!("http_{}", raw.status.as_u16()),
            raw.body.chars().take(512).collect::<String>(),
        ),
    }
}

// Checkout session
#[derive(Debug, Deserialize)]
struct Session {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    amount_total: Option<u64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    payment_intent: Option<Expandable<PaymentIntent>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expandable<T> {
    Id(String),
    Object(T),
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    last_payment_error: Option<serde_json::Value>,
    #[serde(default)]
    latest_charge: Option<Expandable<Charge>>,
}

#[derive(Debug, Deserialize)]
struct Charge {
    #[serde(default)]
    refunded: bool,
    #[serde(default)]
    created: Option<i64>,
}

impl Session {
    fn payment_intent_id(&self) -> Option<&str> {
        match self.payment_intent.as_ref()? {
            Expandable::Id(id) => Some(id),
            Expandable::Object(pi) => Some(&pi.id),
        }
    }

    fn charge(&self) -> Option<&Charge> {
        match self.payment_intent.as_ref()? {
            Expandable::Object(pi) => match pi.latest_charge.as_ref()? {
                Expandable::Object(charge) => Some(charge),
                Expandable::Id(_) => None,
            },
            Expandable::Id(_) => None,
        }
    }

    /// Collapse session, intent and charge state into one native status.
    fn effective_status(&self) -> String {
        if self.charge().map(|c| c.refunded).unwrap_or(false) {
            return "refunded".to_string();
        }
        if let Some(Expandable::Object(pi)) = &self.payment_intent {
            if pi.status == "requires_payment_method" && pi.last_payment_error.is_some() {
                return "payment_failed".to_string();
            }
            return pi.status.clone();
        }
        match (self.status.as_deref(), self.payment_status.as_deref()) {
            (_, Some("paid")) => "succeeded".to_string(),
            (Some("complete"), _) => "processing".to_string(),
            (Some(status), _) => status.to_string(),
            (None, _) => "unknown".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct Event {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
}
