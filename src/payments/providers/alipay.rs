//! Alipay-style adapter
//!
//! Every gateway call is a flat parameter set signed with the merchant's
//! private key over the sorted `k=v&k=v` canonical string. Responses and
//! asynchronous notifications are signed by the platform and checked with
//! its public key.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::http::{ProviderHttp, DEFAULT_TIMEOUT_SECS};
use crate::payments::money::{Currency, Money};
use crate::payments::notify::parse_form_body;
use crate::payments::signing::{
    canonical_string, encode_base64, verify_base64, Ed25519Signer, Ed25519Verifier, Signer,
    Verifier,
};
use crate::payments::traits::PaymentAdapter;
use crate::payments::types::{
    NotifyData, NotifyResponse, NotifyStatus, PaymentOrderInfo, PaymentResponse, PaymentStatus,
    PaymentStatusResponse, RefundRequest, RefundResponse, RefundStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub const NAME: &str = "alipay";

const ACK_SUCCESS: &str = "success";
const ACK_FAILURE: &str = "failure";

const SANDBOX_GATEWAY: &str = "https://openapi-sandbox.dl.alipaydev.com/gateway.do";
const PRODUCTION_GATEWAY: &str = "https://openapi.alipay.com/gateway.do";

/// Gateway business success code
const CODE_SUCCESS: &str = "10000";

/// The gateway only settles in CNY
const SETTLEMENT_CURRENCY: &str = "CNY";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AlipayConfig {
    pub app_id: String,
    /// Base64 32-byte merchant signing seed
    pub merchant_private_key: String,
    /// Base64 platform public key
    pub alipay_public_key: String,
    pub sandbox: bool,
    pub gateway_url: Option<String>,
    pub notify_url: String,
    pub return_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AlipayConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            merchant_private_key: String::new(),
            alipay_public_key: String::new(),
            sandbox: true,
            gateway_url: None,
            notify_url: String::new(),
            return_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl AlipayConfig {
    pub fn gateway(&self) -> &str {
        match &self.gateway_url {
            Some(url) if !url.is_empty() => url,
            _ if self.sandbox => SANDBOX_GATEWAY,
            _ => PRODUCTION_GATEWAY,
        }
    }
}

impl fmt::Debug for AlipayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlipayConfig")
            .field("app_id", &self.app_id)
            .field("sandbox", &self.sandbox)
            .field("gateway", &self.gateway())
            .field("notify_url", &self.notify_url)
            .finish_non_exhaustive()
    }
}

pub struct AlipayAdapter {
    config: AlipayConfig,
    http: ProviderHttp,
    signer: Arc<dyn Signer>,
    platform_verifier: Arc<dyn Verifier>,
}

impl AlipayAdapter {
    /// Build with Ed25519 keys taken from the config.
    pub fn new(config: AlipayConfig) -> PaymentResult<Self> {
        let signer = Ed25519Signer::from_base64(&config.merchant_private_key)?;
        let verifier = Ed25519Verifier::from_base64(&config.alipay_public_key)?;
        Self::with_keys(config, Arc::new(signer), Arc::new(verifier))
    }

    /// Build with caller-provided key material. The key fields of `config`
    /// must still name that material; they are not decoded here.
    pub fn with_keys(
        config: AlipayConfig,
        signer: Arc<dyn Signer>,
        platform_verifier: Arc<dyn Verifier>,
    ) -> PaymentResult<Self> {
        let http = ProviderHttp::new(NAME, config.timeout_secs)?;
        Ok(Self {
            config,
            http,
            signer,
            platform_verifier,
        })
    }

    pub fn from_value(value: serde_json::Value) -> PaymentResult<Self> {
        let config: AlipayConfig = serde_json::from_value(value)
            .map_err(|e| PaymentError::config(format!("invalid alipay config: {}", e)))?;
        Self::new(config)
    }

    /// Common request parameters plus the business payload, unsigned.
    fn base_params(
        &self,
        method: &str,
        biz_content: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> PaymentResult<BTreeMap<String, String>> {
        let beijing = FixedOffset::east_opt(8 * 3600)
            .ok_or_else(|| PaymentError::config("invalid gateway time zone"))?;
        let mut params = BTreeMap::new();
        params.insert("app_id".to_string(), self.config.app_id.clone());
        params.insert("method".to_string(), method.to_string());
        params.insert("format".to_string(), "JSON".to_string());
        params.insert("charset".to_string(), "utf-8".to_string());
        params.insert("sign_type".to_string(), self.signer.algorithm().to_string());
        params.insert(
            "timestamp".to_string(),
            now.with_timezone(&beijing).format(TIMESTAMP_FORMAT).to_string(),
        );
        params.insert("version".to_string(), "1.0".to_string());
        params.insert("biz_content".to_string(), biz_content.to_string());
        Ok(params)
    }

    /// Sign every parameter except `sign` itself and attach the signature.
    fn sign_params(&self, params: &mut BTreeMap<String, String>) -> PaymentResult<()> {
        let content = canonical_string(params, "&", "=", &["sign"]);
        let signature = self.signer.sign(content.as_bytes())?;
        params.insert("sign".to_string(), encode_base64(&signature));
        Ok(())
    }

    /// Browser redirect into the hosted cashier for `order`.
    pub fn page_pay_url(&self, order: &PaymentOrderInfo, now: DateTime<Utc>) -> PaymentResult<String> {
        if order.amount.currency.as_str() != SETTLEMENT_CURRENCY {
            return Err(PaymentError::invalid_request(format!(
                "{} only accepts {}, got {}",
                NAME, SETTLEMENT_CURRENCY, order.amount.currency
            )));
        }
        if order.amount.is_zero() {
            return Err(PaymentError::invalid_request("amount must be greater than zero"));
        }

        let mut biz = serde_json::json!({
            "out_trade_no": order.order_id,
            "total_amount": order.amount.to_decimal_string(),
            "subject": order.subject().chars().take(256).collect::<String>(),
            "product_code": "FAST_INSTANT_TRADE_PAY",
        });
        if let Some(description) = &order.description {
            biz["body"] = serde_json::Value::String(description.chars().take(128).collect());
        }

        let mut params = self.base_params("alipay.trade.page.pay", &biz, now)?;
        let notify_url = order.notify_url.as_deref().unwrap_or(&self.config.notify_url);
        if !notify_url.is_empty() {
            params.insert("notify_url".to_string(), notify_url.to_string());
        }
        if let Some(return_url) = order.return_url.as_ref().or(self.config.return_url.as_ref()) {
            params.insert("return_url".to_string(), return_url.clone());
        }
        self.sign_params(&mut params)?;

        let mut url = url::Url::parse(self.config.gateway())
            .map_err(|e| PaymentError::config(format!("invalid gateway url: {}", e)))?;
        url.query_pairs_mut().extend_pairs(params.iter());
        Ok(url.into())
    }

    /// Call the gateway and return the verified `<method>_response` node.
    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        biz_content: serde_json::Value,
    ) -> PaymentResult<T> {
        let mut params = self.base_params(method, &biz_content, Utc::now())?;
        self.sign_params(&mut params)?;
        let builder = self
            .http
            .client()
            .post(self.config.gateway())
            .form(&params);
        let raw = self.http.send(builder).await?;
        raw.ensure_success(NAME)?;

        let envelope: HashMap<String, Box<RawValue>> = serde_json::from_str(&raw.body)?;
        let node_key = format!("{}_response", method.replace('.', "_"));
        let node = envelope
            .get(&node_key)
            .ok_or_else(|| PaymentError::serialization(format!("missing {}", node_key)))?;

        // The signature covers the node exactly as transmitted.
        let sign: Option<String> = envelope
            .get("sign")
            .map(|s| serde_json::from_str(s.get()))
            .transpose()?;
        let status: GatewayStatus = serde_json::from_str(node.get())?;
        match sign {
            Some(sign) => {
                if !verify_base64(self.platform_verifier.as_ref(), node.get().as_bytes(), &sign) {
                    return Err(PaymentError::signature("gateway response signature mismatch"));
                }
            }
            // Error responses from the gateway front door are not signed.
            None if status.code != CODE_SUCCESS => {}
            None => return Err(PaymentError::signature("gateway response is unsigned")),
        }

        if status.code != CODE_SUCCESS {
            return Err(PaymentError::provider(
                NAME,
                status.sub_code.unwrap_or(status.code),
                status.sub_msg.unwrap_or(status.msg),
            ));
        }
        Ok(serde_json::from_str(node.get())?)
    }

    async fn fetch_trade(&self, out_trade_no: &str) -> PaymentResult<TradeQuery> {
        if out_trade_no.trim().is_empty() {
            return Err(PaymentError::invalid_request("transaction id is empty"));
        }
        self.call(
            "alipay.trade.query",
            serde_json::json!({ "out_trade_no": out_trade_no }),
        )
        .await
    }

    async fn try_create(&self, order: &PaymentOrderInfo) -> PaymentResult<PaymentResponse> {
        info!(
            "Creating {} page payment: order={} amount={}",
            NAME, order.order_id, order.amount
        );
        let redirect = self.page_pay_url(order, Utc::now())?;
        Ok(PaymentResponse {
            success: true,
            // The platform trade number only exists after payment, so the
            // merchant order id is the query handle.
            transaction_id: Some(order.order_id.clone()),
            redirect_url: Some(redirect),
            provider_data: Some(serde_json::json!({
                "totalAmount": order.amount.to_decimal_string(),
            })),
            ..Default::default()
        })
    }

    async fn try_query(&self, transaction_id: &str) -> PaymentResult<PaymentStatusResponse> {
        let trade = self.fetch_trade(transaction_id).await?;
        let status = map_trade_status(&trade.trade_status, trade.has_refund());
        info!(
            "{} trade queried: order={} native={} status={:?}",
            NAME, transaction_id, trade.trade_status, status
        );

        let amount = Money::from_decimal_str(
            &trade.total_amount,
            Currency::new(SETTLEMENT_CURRENCY)?,
        )?;
        let paid_at = trade
            .send_pay_date
            .as_deref()
            .filter(|_| status.is_paid())
            .and_then(parse_gateway_time);
        Ok(PaymentStatusResponse::new(status, transaction_id)
            .with_amount(Some(amount))
            .with_paid_at(paid_at))
    }

    async fn try_refund(&self, request: &RefundRequest) -> PaymentResult<RefundResponse> {
        let amount = match &request.amount {
            Some(amount) => {
                if amount.currency.as_str() != SETTLEMENT_CURRENCY {
                    return Err(PaymentError::invalid_request(format!(
                        "refund currency must be {}",
                        SETTLEMENT_CURRENCY
                    )));
                }
                amount.to_decimal_string()
            }
            None => self.fetch_trade(&request.transaction_id).await?.total_amount,
        };

        let out_request_no = request.idempotency_reference();
        let mut biz = serde_json::json!({
            "out_trade_no": request.transaction_id,
            "refund_amount": amount,
            "out_request_no": out_request_no,
        });
        if let Some(reason) = &request.reason {
            biz["refund_reason"] = serde_json::Value::String(reason.clone());
        }

        let result: TradeRefund = self.call("alipay.trade.refund", biz).await?;
        let status = if result.fund_change.as_deref() == Some("Y") {
            RefundStatus::Completed
        } else {
            RefundStatus::Pending
        };
        info!(
            "{} refund issued: order={} amount={} status={:?}",
            NAME, request.transaction_id, amount, status
        );
        Ok(RefundResponse::new(out_request_no, status))
    }

    fn try_notify(&self, data: &NotifyData) -> PaymentResult<NotifyResponse> {
        let params = parse_form_body(&data.body)?;
        let sign = params
            .get("sign")
            .ok_or_else(|| PaymentError::signature("notification is unsigned"))?;
        let content = canonical_string(&params, "&", "=", &["sign", "sign_type"]);
        if !verify_base64(self.platform_verifier.as_ref(), content.as_bytes(), sign) {
            return Err(PaymentError::signature("notification signature mismatch"));
        }
        if params.get("app_id").map(String::as_str) != Some(self.config.app_id.as_str()) {
            return Err(PaymentError::signature("notification is for another app"));
        }

        let field = |name: &str| params.get(name).map(String::as_str).unwrap_or_default();
        let refunded = params.get("refund_fee").map_or(false, |fee| is_positive_amount(fee));
        let status = map_trade_status(field("trade_status"), refunded);
        let Some(status) = NotifyStatus::from_payment_status(status) else {
            info!(
                "Ignoring {} notification in state {}",
                NAME,
                field("trade_status")
            );
            return Ok(NotifyResponse::ignored(ACK_SUCCESS));
        };

        let cny = Currency::new(SETTLEMENT_CURRENCY)?;
        let amount = match params.get("total_amount") {
            Some(total) => Some(Money::from_decimal_str(total, cny)?),
            None => None,
        };
        let mut response = NotifyResponse::accepted(
            field("out_trade_no"),
            field("out_trade_no"),
            Some(status),
            ACK_SUCCESS,
        )
        .with_amount(amount)
        .with_provider_data(serde_json::json!({
            "tradeNo": field("trade_no"),
            "notifyId": field("notify_id"),
            "tradeStatus": field("trade_status"),
        }));
        // Refund notifications echo the refund request number as out_biz_no.
        if let Some(refund_no) = params.get("out_biz_no").filter(|no| refunded && !no.is_empty()) {
            response = response.with_refund_id(refund_no.clone());
        }
        Ok(response)
    }
}

#[async_trait]
impl PaymentAdapter for AlipayAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_payment(&self, order: &PaymentOrderInfo) -> PaymentResponse {
        self.try_create(order).await.unwrap_or_else(|e| {
            warn!("{} payment creation failed: order={} error={}", NAME, order.order_id, e);
            PaymentResponse::from_error(&e)
        })
    }

    async fn query_payment(&self, transaction_id: &str) -> PaymentStatusResponse {
        self.try_query(transaction_id).await.unwrap_or_else(|e| {
            warn!("{} trade query failed: order={} error={}", NAME, transaction_id, e);
            PaymentStatusResponse::from_error(&e)
        })
    }

    async fn handle_notify(&self, data: &NotifyData) -> NotifyResponse {
        self.try_notify(data).unwrap_or_else(|e| {
            warn!("{} notification rejected: {}", NAME, e);
            NotifyResponse::rejected(ACK_FAILURE, e.to_string())
        })
    }

    async fn refund(&self, request: &RefundRequest) -> RefundResponse {
        self.try_refund(request).await.unwrap_or_else(|e| {
            warn!("{} refund failed: order={} error={}", NAME, request.transaction_id, e);
            RefundResponse::from_error(&e)
        })
    }

    fn validate_config(&self) -> bool {
        let c = &self.config;
        !c.app_id.trim().is_empty()
            && !c.merchant_private_key.trim().is_empty()
            && !c.alipay_public_key.trim().is_empty()
            && url::Url::parse(c.gateway()).is_ok()
            && url::Url::parse(&c.notify_url).is_ok()
    }

    fn client_config(&self) -> serde_json::Value {
        serde_json::json!({
            "provider": NAME,
            "appId": self.config.app_id,
            "sandbox": self.config.sandbox,
            "signType": self.signer.algorithm(),
            "currency": SETTLEMENT_CURRENCY,
        })
    }

    fn notify_failure_ack(&self) -> &str {
        ACK_FAILURE
    }
}

/// Native trade status -> canonical status.
pub fn map_status(native: &str) -> PaymentStatus {
    map_trade_status(native, false)
}

/// A closed trade that carries a refund amount was closed by a full refund.
fn map_trade_status(native: &str, refunded: bool) -> PaymentStatus {
    match native {
        "WAIT_BUYER_PAY" => PaymentStatus::Pending,
        "TRADE_SUCCESS" | "TRADE_FINISHED" => PaymentStatus::Completed,
        "TRADE_CLOSED" if refunded => PaymentStatus::Refunded,
        "TRADE_CLOSED" => PaymentStatus::Cancelled,
        _ => PaymentStatus::Pending,
    }
}

fn is_positive_amount(value: &str) -> bool {
    value.chars().any(|c| c.is_ascii_digit() && c != '0')
}

fn parse_gateway_time(value: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).ok()?;
    let beijing = FixedOffset::east_opt(8 * 3600)?;
    beijing
        .from_local_datetime(&naive)
        .single()
        .map(|t| t.with_timezone(&Utc))
}

#[derive(Debug, Deserialize)]
struct GatewayStatus {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    sub_code: Option<String>,
    #[serde(default)]
    sub_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TradeQuery {
    trade_status: String,
    total_amount: String,
    #[serde(default)]
    send_pay_date: Option<String>,
    #[serde(default)]
    refund_fee: Option<String>,
}

impl TradeQuery {
    fn has_refund(&self) -> bool {
        self.refund_fee.as_deref().map_or(false, is_positive_amount)
    }
}

#[derive(Debug, Deserialize)]
struct TradeRefund {
    #[serde(default)]
    fund_change: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MERCHANT_SEED: [u8; 32] = [3u8; 32];
    const PLATFORM_SEED: [u8; 32] = [9u8; 32];

    fn create_test_config() -> AlipayConfig {
        AlipayConfig {
            app_id: "2021000000000001".to_string(),
            merchant_private_key: encode_base64(&MERCHANT_SEED),
            alipay_public_key: Ed25519Signer::from_seed(PLATFORM_SEED).public_key_base64(),
            notify_url: "https://shop.example/payments/notify/alipay".to_string(),
            ..Default::default()
        }
    }

    fn create_test_adapter() -> AlipayAdapter {
        AlipayAdapter::new(create_test_config()).unwrap()
    }

    fn platform_signed_form(pairs: &[(&str, &str)]) -> String {
        let params: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let content = canonical_string(&params, "&", "=", &["sign", "sign_type"]);
        let sign = encode_base64(&Ed25519Signer::from_seed(PLATFORM_SEED).sign(content.as_bytes()).unwrap());
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.extend_pairs(params.iter());
        form.append_pair("sign", &sign);
        form.append_pair("sign_type", "ED25519");
        form.finish()
    }

    #[test]
    fn test_page_pay_url_is_signed() {
        let adapter = create_test_adapter();
        let order = PaymentOrderInfo::new("ord-1", Money::of(1234, "CNY").unwrap());
        let url = url::Url::parse(&adapter.page_pay_url(&order, Utc::now()).unwrap()).unwrap();
        assert!(url.as_str().starts_with(SANDBOX_GATEWAY));

        let params: BTreeMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let biz: serde_json::Value = serde_json::from_str(&params["biz_content"]).unwrap();
        assert_eq!(biz["total_amount"], "12.34");
        assert_eq!(biz["out_trade_no"], "ord-1");
        assert_eq!(params["sign_type"], "ED25519");

        let content = canonical_string(&params, "&", "=", &["sign"]);
        let merchant = Ed25519Signer::from_seed(MERCHANT_SEED).verifier();
        assert!(verify_base64(&merchant, content.as_bytes(), &params["sign"]));
    }

    #[test]
    fn test_validate_config() {
        assert!(create_test_adapter().validate_config());

        let mut config = create_test_config();
        config.app_id = " ".to_string();
        assert!(!AlipayAdapter::new(config).unwrap().validate_config());

        let mut config = create_test_config();
        config.notify_url = String::new();
        assert!(!AlipayAdapter::new(config).unwrap().validate_config());
    }

    #[test]
    fn test_validate_config_requires_key_material() {
        let keyed = create_test_config();
        let signer = Arc::new(Ed25519Signer::from_base64(&keyed.merchant_private_key).unwrap());
        let verifier = Arc::new(Ed25519Verifier::from_base64(&keyed.alipay_public_key).unwrap());

        let config = AlipayConfig {
            merchant_private_key: String::new(),
            ..create_test_config()
        };
        let adapter = AlipayAdapter::with_keys(config, signer.clone(), verifier.clone()).unwrap();
        assert!(!adapter.validate_config());

        let config = AlipayConfig {
            alipay_public_key: "  ".to_string(),
            ..create_test_config()
        };
        let adapter = AlipayAdapter::with_keys(config, signer, verifier).unwrap();
        assert!(!adapter.validate_config());
    }

    #[test]
    fn test_rejects_foreign_currency() {
        let adapter = create_test_adapter();
        let order = PaymentOrderInfo::new("ord-1", Money::of(1234, "USD").unwrap());
        assert!(adapter.page_pay_url(&order, Utc::now()).is_err());
    }

    #[test]
    fn test_status_table() {
        assert_eq!(map_status("WAIT_BUYER_PAY"), PaymentStatus::Pending);
        assert_eq!(map_status("TRADE_SUCCESS"), PaymentStatus::Completed);
        assert_eq!(map_status("TRADE_FINISHED"), PaymentStatus::Completed);
        assert_eq!(map_status("TRADE_CLOSED"), PaymentStatus::Cancelled);
        assert_eq!(map_trade_status("TRADE_CLOSED", true), PaymentStatus::Refunded);
        assert_eq!(map_status("SOMETHING_NEW"), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_notify_success() {
        let adapter = create_test_adapter();
        let body = platform_signed_form(&[
            ("app_id", "2021000000000001"),
            ("out_trade_no", "ord-1"),
            ("trade_no", "2024010122001"),
            ("trade_status", "TRADE_SUCCESS"),
            ("total_amount", "12.34"),
            ("notify_id", "n-1"),
        ]);
        let resp = adapter.handle_notify(&NotifyData::new(body)).await;
        assert!(resp.success, "{:?}", resp.error_message);
        assert_eq!(resp.order_id.as_deref(), Some("ord-1"));
        assert_eq!(resp.status, Some(NotifyStatus::Completed));
        assert_eq!(resp.amount, Some(Money::of(1234, "CNY").unwrap()));
        assert_eq!(resp.platform_response, "success");
    }

    #[tokio::test]
    async fn test_notify_tampered_amount_rejected() {
        let adapter = create_test_adapter();
        let body = platform_signed_form(&[
            ("app_id", "2021000000000001"),
            ("out_trade_no", "ord-1"),
            ("trade_status", "TRADE_SUCCESS"),
            ("total_amount", "12.34"),
        ])
        .replace("12.34", "0.01");
        let resp = adapter.handle_notify(&NotifyData::new(body)).await;
        assert!(!resp.success);
        assert_eq!(resp.platform_response, "failure");
    }

    #[tokio::test]
    async fn test_notify_refund_close() {
        let adapter = create_test_adapter();
        let body = platform_signed_form(&[
            ("app_id", "2021000000000001"),
            ("out_trade_no", "ord-1"),
            ("trade_status", "TRADE_CLOSED"),
            ("total_amount", "12.34"),
            ("refund_fee", "12.34"),
            ("out_biz_no", "rf-1"),
        ]);
        let resp = adapter.handle_notify(&NotifyData::new(body)).await;
        assert!(resp.success);
        assert_eq!(resp.status, Some(NotifyStatus::Refunded));
        assert_eq!(resp.refund_id.as_deref(), Some("rf-1"));
    }

    #[tokio::test]
    async fn test_notify_waiting_is_ignored() {
        let adapter = create_test_adapter();
        let body = platform_signed_form(&[
            ("app_id", "2021000000000001"),
            ("out_trade_no", "ord-1"),
            ("trade_status", "WAIT_BUYER_PAY"),
        ]);
        let resp = adapter.handle_notify(&NotifyData::new(body)).await;
        assert!(resp.success);
        assert!(resp.status.is_none());
        assert_eq!(resp.platform_response, "success");
    }

    #[test]
    fn test_parse_gateway_time() {
        let t = parse_gateway_time("2024-01-01 08:00:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_invalid_key_material_is_config_error() {
        let config = AlipayConfig {
            merchant_private_key: "not-a-key".to_string(),
            ..create_test_config()
        };
        assert!(matches!(
            AlipayAdapter::new(config),
            Err(PaymentError::Config { .. })
        ));
    }
}
