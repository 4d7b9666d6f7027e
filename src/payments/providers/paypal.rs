//! PayPal-style adapter
//!
//! OAuth2 client-credentials tokens, Orders v2 for checkout, decimal-string
//! amounts and webhook verification through the provider's
//! verify-webhook-signature endpoint.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::http::{ProviderHttp, DEFAULT_TIMEOUT_SECS};
use crate::payments::money::{Currency, Money};
use crate::payments::traits::PaymentAdapter;
use crate::payments::types::{
    NotifyData, NotifyResponse, NotifyStatus, PaymentOrderInfo, PaymentResponse, PaymentStatus,
    PaymentStatusResponse, RefundRequest, RefundResponse, RefundStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const NAME: &str = "paypal";

const ACK_OK: &str = "OK";
const ACK_REJECTED: &str = "INVALID";

/// Tokens this close to expiry are treated as expired
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);

const SUPPORTED_CURRENCIES: &[&str] = &[
    "AUD", "BRL", "CAD", "CNY", "CZK", "DKK", "EUR", "HKD", "HUF", "ILS", "JPY", "MYR", "MXN",
    "TWD", "NZD", "NOK", "PHP", "PLN", "GBP", "SGD", "SEK", "CHF", "THB", "USD",
];

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Id of the webhook subscription, needed for signature verification
    pub webhook_id: String,
    pub sandbox: bool,
    /// Overrides the sandbox/live API host
    pub base_url: Option<String>,
    pub brand_name: Option<String>,
    pub return_url: String,
    pub cancel_url: String,
    pub timeout_secs: u64,
}

impl Default for PayPalConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            webhook_id: String::new(),
            sandbox: true,
            base_url: None,
            brand_name: None,
            return_url: String::new(),
            cancel_url: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl PayPalConfig {
    pub fn api_base(&self) -> String {
        match &self.base_url {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ if self.sandbox => "https://api-m.sandbox.paypal.com".to_string(),
            _ => "https://api-m.paypal.com".to_string(),
        }
    }
}

impl fmt::Debug for PayPalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayPalConfig")
            .field("client_id", &self.client_id)
            .field("webhook_id", &self.webhook_id)
            .field("sandbox", &self.sandbox)
            .finish_non_exhaustive()
    }
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct PayPalAdapter {
    config: PayPalConfig,
    http: ProviderHttp,
    token: RwLock<Option<CachedToken>>,
}

impl PayPalAdapter {
    pub fn new(config: PayPalConfig) -> PaymentResult<Self> {
        let http = ProviderHttp::new(NAME, config.timeout_secs)?;
        Ok(Self {
            config,
            http,
            token: RwLock::new(None),
        })
    }

    pub fn from_value(value: serde_json::Value) -> PaymentResult<Self> {
        let config: PayPalConfig = serde_json::from_value(value)
            .map_err(|e| PaymentError::config(format!("invalid paypal config: {}", e)))?;
        Self::new(config)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base(), path)
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.token.read();
        guard
            .as_ref()
            .filter(|t| t.expires_at > Instant::now() + TOKEN_EXPIRY_SKEW)
            .map(|t| t.access_token.clone())
    }

    /// Current access token, refreshed when missing or near expiry.
    ///
    /// Concurrent callers may both refresh; the provider tolerates that and
    /// the last writer wins.
    async fn access_token(&self) -> PaymentResult<String> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        debug!("Requesting new {} access token", NAME);
        let builder = self
            .http
            .client()
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")]);
        let token: TokenResponse = self.http.send_json(builder).await?;

        let expires_at = Instant::now() + Duration::from_secs(token.expires_in);
        *self.token.write() = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    /// Attach a bearer token fetched immediately before the request goes out,
    /// so a slow earlier step cannot leave us holding an expired token.
    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> PaymentResult<T> {
        let token = self.access_token().await?;
        let raw = self.http.send(builder.bearer_auth(token)).await?;
        if raw.status == reqwest::StatusCode::UNAUTHORIZED {
            // Revoked early; drop it so the next call refreshes.
            *self.token.write() = None;
        }
        if !raw.status.is_success() && !raw.status.is_server_error() {
            if let Ok(body) = raw.json::<ApiErrorBody>() {
                return Err(PaymentError::provider(
                    NAME,
                    body.details
                        .first()
                        .and_then(|d| d.issue.clone())
                        .unwrap_or(body.name),
                    body.message,
                ));
            }
        }
        raw.ensure_success(NAME)?;
        raw.json()
    }

    /// Orders v2 request body; amounts are decimal strings.
    pub fn order_body(&self, order: &PaymentOrderInfo) -> PaymentResult<serde_json::Value> {
        let currency = order.amount.currency.as_str();
        if !SUPPORTED_CURRENCIES.contains(&currency) {
            return Err(PaymentError::invalid_request(format!(
                "currency {} is not supported by {}",
                currency, NAME
            )));
        }
        if order.amount.is_zero() {
            return Err(PaymentError::invalid_request("amount must be greater than zero"));
        }

        let return_url = order
            .return_url
            .clone()
            .unwrap_or_else(|| self.config.return_url.clone());
        let cancel_url = order
            .cancel_url
            .clone()
            .unwrap_or_else(|| self.config.cancel_url.clone());
        let description: String = order.subject().chars().take(127).collect();

        let mut context = serde_json::json!({
            "user_action": "PAY_NOW",
            "return_url": return_url,
            "cancel_url": cancel_url,
        });
        if let Some(brand) = &self.config.brand_name {
            context["brand_name"] = serde_json::Value::String(brand.clone());
        }

        Ok(serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": order.order_id,
                "custom_id": order.order_id,
                "invoice_id": order.order_id,
                "description": description,
                "amount": {
                    "currency_code": currency,
                    "value": order.amount.to_decimal_string(),
                },
            }],
            "application_context": context,
        }))
    }

    async fn fetch_order(&self, order_id: &str) -> PaymentResult<Order> {
        if order_id.trim().is_empty() {
            return Err(PaymentError::invalid_request("transaction id is empty"));
        }
        let builder = self
            .http
            .client()
            .get(self.url(&format!("/v2/checkout/orders/{}", order_id)));
        self.send(builder).await
    }

    async fn capture_order(&self, provider_order_id: &str) -> PaymentResult<Order> {
        let builder = self
            .http
            .client()
            .post(self.url(&format!("/v2/checkout/orders/{}/capture", provider_order_id)))
            .header("PayPal-Request-Id", format!("capture-{}", provider_order_id))
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({}));
        self.send(builder).await
    }

    async fn try_create(&self, order: &PaymentOrderInfo) -> PaymentResult<PaymentResponse> {
        info!(
            "Creating {} order: order={} amount={}",
            NAME, order.order_id, order.amount
        );
        let body = self.order_body(order)?;
        let builder = self
            .http
            .client()
            .post(self.url("/v2/checkout/orders"))
            .header("PayPal-Request-Id", order.order_id.clone())
            .header("Prefer", "return=representation")
            .json(&body);
        let created: Order = self.send(builder).await?;

        let approve = created
            .links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.clone())
            .ok_or_else(|| PaymentError::serialization("order response has no approval link"))?;

        info!(
            "{} order created: order={} paypal_order={} status={}",
            NAME, order.order_id, created.id, created.status
        );
        Ok(PaymentResponse {
            success: true,
            transaction_id: Some(created.id.clone()),
            redirect_url: Some(approve),
            provider_data: Some(serde_json::json!({
                "paypalOrderId": created.id,
                "status": created.status,
            })),
            ..Default::default()
        })
    }

    async fn try_query(&self, transaction_id: &str) -> PaymentResult<PaymentStatusResponse> {
        let order = self.fetch_order(transaction_id).await?;
        let native = order.native_status();
        let status = map_status(native);
        info!(
            "{} order queried: id={} native={} status={:?}",
            NAME, order.id, native, status
        );

        let unit = order.purchase_units.first();
        let amount = unit.and_then(|u| u.amount.as_ref()).map(Amount::to_money).transpose()?;
        let paid_at = order
            .capture()
            .filter(|_| status == PaymentStatus::Completed)
            .and_then(|c| c.create_time.as_deref())
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(PaymentStatusResponse::new(status, order.id.clone())
            .with_amount(amount)
            .with_paid_at(paid_at))
    }

    async fn try_refund(&self, request: &RefundRequest) -> PaymentResult<RefundResponse> {
        // Refunds target the capture, not the order.
        let order = self.fetch_order(&request.transaction_id).await?;
        let capture = order
            .capture()
            .ok_or_else(|| PaymentError::invalid_request("order has no capture to refund"))?;

        let mut body = serde_json::json!({});
        if let Some(amount) = &request.amount {
            body["amount"] = serde_json::json!({
                "currency_code": amount.currency.as_str(),
                "value": amount.to_decimal_string(),
            });
        }
        if let Some(reason) = &request.reason {
            body["note_to_payer"] = serde_json::Value::String(reason.chars().take(255).collect());
        }

        let request_id = format!("refund-{}", request.idempotency_reference());
        let builder = self
            .http
            .client()
            .post(self.url(&format!("/v2/payments/captures/{}/refund", capture.id)))
            .header("PayPal-Request-Id", request_id)
            .header("Prefer", "return=representation")
            .json(&body);
        let refund: RefundResult = self.send(builder).await?;

        info!(
            "{} refund issued: order={} capture={} refund={} status={}",
            NAME, order.id, capture.id, refund.id, refund.status
        );
        Ok(RefundResponse::new(refund.id, map_refund_status(&refund.status)))
    }

    async fn verify_webhook(&self, data: &NotifyData, event: &serde_json::Value) -> PaymentResult<()> {
        let header = |name: &str| {
            data.header(name)
                .map(str::to_string)
                .ok_or_else(|| PaymentError::signature(format!("missing {} header", name)))
        };
        let transmission_id = header("paypal-transmission-id")?;
        let transmission_time = header("paypal-transmission-time")?;
        let transmission_sig = header("paypal-transmission-sig")?;
        let cert_url = header("paypal-cert-url")?;
        let auth_algo = header("paypal-auth-algo")?;

        let cert_host_ok = url::Url::parse(&cert_url)
            .ok()
            .filter(|u| u.scheme() == "https")
            .and_then(|u| u.host_str().map(|h| h == "paypal.com" || h.ends_with(".paypal.com")))
            .unwrap_or(false);
        if !cert_host_ok {
            return Err(PaymentError::signature("certificate URL is not a PayPal host"));
        }

        let builder = self
            .http
            .client()
            .post(self.url("/v1/notifications/verify-webhook-signature"))
            .json(&serde_json::json!({
                "auth_algo": auth_algo,
                "cert_url": cert_url,
                "transmission_id": transmission_id,
                "transmission_sig": transmission_sig,
                "transmission_time": transmission_time,
                "webhook_id": self.config.webhook_id,
                "webhook_event": event,
            }));
        let verification: VerifyResponse = self.send(builder).await?;
        if verification.verification_status == "SUCCESS" {
            Ok(())
        } else {
            Err(PaymentError::signature(format!(
                "verification status {}",
                verification.verification_status
            )))
        }
    }

    async fn try_notify(&self, data: &NotifyData) -> PaymentResult<NotifyResponse> {
        // The verification API needs the event as JSON, so it is parsed first
        // but not acted on until the provider confirms it.
        let event: serde_json::Value = serde_json::from_str(&data.body)?;
        self.verify_webhook(data, &event).await?;
        let event: WebhookEvent = serde_json::from_value(event)?;

        let resource = &event.resource;
        let str_field = |name: &str| resource.get(name).and_then(|v| v.as_str());
        let related_order = resource
            .pointer("/supplementary_data/related_ids/order_id")
            .and_then(|v| v.as_str());
        let resource_amount = resource
            .get("amount")
            .map(|v| serde_json::from_value::<Amount>(v.clone()))
            .transpose()?
            .map(|a| a.to_money())
            .transpose()?;

        let status = match event.event_type.as_str() {
            "PAYMENT.CAPTURE.COMPLETED" => NotifyStatus::Completed,
            "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => NotifyStatus::Failed,
            "PAYMENT.CAPTURE.REFUNDED" => NotifyStatus::Refunded,
            "CHECKOUT.ORDER.VOIDED" => {
                let order_id = resource
                    .pointer("/purchase_units/0/custom_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                return Ok(NotifyResponse::accepted(
                    order_id,
                    str_field("id").unwrap_or_default(),
                    Some(NotifyStatus::Cancelled),
                    ACK_OK,
                ));
            }
            "CHECKOUT.ORDER.APPROVED" => {
                let provider_order_id = str_field("id")
                    .ok_or_else(|| PaymentError::invalid_request("approved order without id"))?;
                let captured = self.capture_order(provider_order_id).await?;
                let native = captured.native_status();
                let order_id = captured
                    .purchase_units
                    .first()
                    .and_then(|u| u.custom_id.clone())
                    .unwrap_or_default();
                info!(
                    "{} order captured after approval: id={} native={}",
                    NAME, captured.id, native
                );
                let amount = captured
                    .capture()
                    .and_then(|c| c.amount.as_ref())
                    .map(Amount::to_money)
                    .transpose()?;
                return Ok(
                    match NotifyStatus::from_payment_status(map_status(native)) {
                        Some(status) => {
                            NotifyResponse::accepted(order_id, captured.id, Some(status), ACK_OK)
                                .with_amount(amount)
                        }
                        None => NotifyResponse::ignored(ACK_OK),
                    },
                );
            }
            other => {
                info!("Ignoring {} event type {}", NAME, other);
                return Ok(NotifyResponse::ignored(ACK_OK));
            }
        };

        let transaction_id = related_order.or_else(|| str_field("id")).unwrap_or_default();
        let mut response = NotifyResponse::accepted(
            str_field("custom_id").unwrap_or_default(),
            transaction_id,
            Some(status),
            ACK_OK,
        )
        .with_amount(resource_amount)
        .with_provider_data(serde_json::json!({
            "eventId": event.id,
            "resourceId": str_field("id"),
        }));
        // The resource of a refund event is the refund itself.
        if let (NotifyStatus::Refunded, Some(refund_id)) = (status, str_field("id")) {
            response = response.with_refund_id(refund_id);
        }
        Ok(response)
    }
}

#[async_trait]
impl PaymentAdapter for PayPalAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_payment(&self, order: &PaymentOrderInfo) -> PaymentResponse {
        self.try_create(order).await.unwrap_or_else(|e| {
            warn!("{} order creation failed: order={} error={}", NAME, order.order_id, e);
            PaymentResponse::from_error(&e)
        })
    }

    async fn query_payment(&self, transaction_id: &str) -> PaymentStatusResponse {
        self.try_query(transaction_id).await.unwrap_or_else(|e| {
            warn!("{} order query failed: id={} error={}", NAME, transaction_id, e);
            PaymentStatusResponse::from_error(&e)
        })
    }

    async fn handle_notify(&self, data: &NotifyData) -> NotifyResponse {
        self.try_notify(data).await.unwrap_or_else(|e| {
            warn!("{} notification rejected: {}", NAME, e);
            NotifyResponse::rejected(ACK_REJECTED, e.to_string())
        })
    }

    async fn refund(&self, request: &RefundRequest) -> RefundResponse {
        self.try_refund(request).await.unwrap_or_else(|e| {
            warn!("{} refund failed: id={} error={}", NAME, request.transaction_id, e);
            RefundResponse::from_error(&e)
        })
    }

    fn validate_config(&self) -> bool {
        let c = &self.config;
        !c.client_id.trim().is_empty()
            && !c.client_secret.trim().is_empty()
            && !c.webhook_id.trim().is_empty()
            && url::Url::parse(&c.api_base()).is_ok()
    }

    fn client_config(&self) -> serde_json::Value {
        serde_json::json!({
            "provider": NAME,
            "clientId": self.config.client_id,
            "sandbox": self.config.sandbox,
            "currencies": SUPPORTED_CURRENCIES,
        })
    }

    fn notify_failure_ack(&self) -> &str {
        ACK_REJECTED
    }
}

/// Native status -> canonical status. Capture statuses take precedence over
/// order statuses when the order has been captured.
pub fn map_status(native: &str) -> PaymentStatus {
    match native {
        "CREATED" | "SAVED" | "APPROVED" | "PAYER_ACTION_REQUIRED" | "PENDING" => {
            PaymentStatus::Pending
        }
        "COMPLETED" => PaymentStatus::Completed,
        "DECLINED" | "FAILED" => PaymentStatus::Failed,
        "VOIDED" => PaymentStatus::Cancelled,
        "REFUNDED" | "PARTIALLY_REFUNDED" => PaymentStatus::Refunded,
        _ => PaymentStatus::Pending,
    }
}

fn map_refund_status(native: &str) -> RefundStatus {
    match native {
        "COMPLETED" => RefundStatus::Completed,
        "CANCELLED" | "FAILED" => RefundStatus::Failed,
        _ => RefundStatus::Pending,
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Order {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

impl Order {
    fn capture(&self) -> Option<&Capture> {
        self.purchase_units
            .first()?
            .payments
            .as_ref()?
            .captures
            .first()
    }

    fn native_status(&self) -> &str {
        self.capture()
            .map(|c| c.status.as_str())
            .unwrap_or(self.status.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    amount: Option<Amount>,
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
    status: String,
    #[serde(default)]
    amount: Option<Amount>,
    #[serde(default)]
    create_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Amount {
    currency_code: String,
    value: String,
}

impl Amount {
    fn to_money(&self) -> PaymentResult<Money> {
        Money::from_decimal_str(&self.value, Currency::new(&self.currency_code)?)
    }
}

#[derive(Debug, Deserialize)]
struct RefundResult {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verification_status: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    event_type: String,
    resource: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    issue: Option<String>,
}
