//! WeChat Pay v3-style adapter
//!
//! Requests carry an `Authorization` header signed over
//! `METHOD\nPATH\nTIMESTAMP\nNONCE\nBODY\n`; responses and notifications are
//! signed by the platform over `TIMESTAMP\nNONCE\nBODY\n`. Notification
//! payloads are AES-256-GCM encrypted with the merchant's API v3 key and are
//! only decrypted after the header signature checks out.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::http::{ProviderHttp, RawResponse, DEFAULT_TIMEOUT_SECS};
use crate::payments::money::{Currency, Money};
use crate::payments::notify::{within_tolerance, DEFAULT_TOLERANCE_SECS};
use crate::payments::signing::{
    decrypt_aes_256_gcm, decode_base64, encode_base64, nonce_str, verify_base64, Ed25519Signer,
    Ed25519Verifier, Signer, Verifier,
};
use crate::payments::traits::PaymentAdapter;
use crate::payments::types::{
    NotifyData, NotifyResponse, NotifyStatus, PaymentOrderInfo, PaymentResponse, PaymentStatus,
    PaymentStatusResponse, RefundRequest, RefundResponse, RefundStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NAME: &str = "wechat";

const ACK_SUCCESS: &str = r#"{"code":"SUCCESS","message":"OK"}"#;
const ACK_FAIL: &str = r#"{"code":"FAIL","message":"FAIL"}"#;

const SETTLEMENT_CURRENCY: &str = "CNY";
const NOTIFY_ALGORITHM: &str = "AEAD_AES_256_GCM";

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct WeChatConfig {
    pub mch_id: String,
    pub app_id: String,
    /// 32-byte symmetric key used to decrypt notification resources
    pub api_v3_key: String,
    /// Base64 32-byte merchant signing seed
    pub merchant_private_key: String,
    pub merchant_serial_no: String,
    /// Base64 platform public key
    pub platform_public_key: String,
    /// When set, responses signed under any other serial are refused
    pub platform_serial_no: Option<String>,
    pub base_url: String,
    pub notify_url: String,
    pub timeout_secs: u64,
    pub notify_tolerance_secs: i64,
}

impl Default for WeChatConfig {
    fn default() -> Self {
        Self {
            mch_id: String::new(),
            app_id: String::new(),
            api_v3_key: String::new(),
            merchant_private_key: String::new(),
            merchant_serial_no: String::new(),
            platform_public_key: String::new(),
            platform_serial_no: None,
            base_url: "https://api.mch.weixin.qq.com".to_string(),
            notify_url: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            notify_tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }
}

impl fmt::Debug for WeChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeChatConfig")
            .field("mch_id", &self.mch_id)
            .field("app_id", &self.app_id)
            .field("merchant_serial_no", &self.merchant_serial_no)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

pub struct WeChatAdapter {
    config: WeChatConfig,
    http: ProviderHttp,
    signer: Arc<dyn Signer>,
    platform_verifier: Arc<dyn Verifier>,
}

impl WeChatAdapter {
    pub fn new(config: WeChatConfig) -> PaymentResult<Self> {
        let signer = Ed25519Signer::from_base64(&config.merchant_private_key)?;
        let verifier = Ed25519Verifier::from_base64(&config.platform_public_key)?;
        Self::with_keys(config, Arc::new(signer), Arc::new(verifier))
    }

    /// Build with caller-provided key material. The key fields of `config`
    /// must still name that material; they are not decoded here.
    pub fn with_keys(
        config: WeChatConfig,
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
        let config: WeChatConfig = serde_json::from_value(value)
            .map_err(|e| PaymentError::config(format!("invalid wechat config: {}", e)))?;
        Self::new(config)
    }

    fn auth_scheme(&self) -> String {
        format!("WECHATPAY2-{}", self.signer.algorithm())
    }

    /// `Authorization` header value for one request.
    fn authorization(
        &self,
        method: &Method,
        path_and_query: &str,
        body: &str,
        timestamp: i64,
        nonce: &str,
    ) -> PaymentResult<String> {
        let message = format!(
            "{}\n{}\n{}\n{}\n{}\n",
            method.as_str(),
            path_and_query,
            timestamp,
            nonce,
            body
        );
        let signature = encode_base64(&self.signer.sign(message.as_bytes())?);
        Ok(format!(
            r#"{} mchid="{}",nonce_str="{}",signature="{}",timestamp="{}",serial_no="{}""#,
            self.auth_scheme(),
            self.config.mch_id,
            nonce,
            signature,
            timestamp,
            self.config.merchant_serial_no
        ))
    }

    /// Check a platform signature over `TIMESTAMP\nNONCE\nBODY\n`.
    fn verify_platform_signature(
        &self,
        timestamp: Option<&str>,
        nonce: Option<&str>,
        signature: Option<&str>,
        serial: Option<&str>,
        body: &str,
    ) -> PaymentResult<()> {
        let (Some(timestamp), Some(nonce), Some(signature)) = (timestamp, nonce, signature) else {
            return Err(PaymentError::signature("missing Wechatpay signature headers"));
        };
        if let (Some(expected), Some(actual)) = (&self.config.platform_serial_no, serial) {
            if expected != actual {
                return Err(PaymentError::signature(format!(
                    "unknown platform certificate serial {}",
                    actual
                )));
            }
        }
        let message = format!("{}\n{}\n{}\n", timestamp, nonce, body);
        if verify_base64(self.platform_verifier.as_ref(), message.as_bytes(), signature) {
            Ok(())
        } else {
            Err(PaymentError::signature("platform signature mismatch"))
        }
    }

    /// Signed request; 2xx responses must carry a valid platform signature.
    async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<&serde_json::Value>,
    ) -> PaymentResult<RawResponse> {
        let body_text = body.map(|b| b.to_string()).unwrap_or_default();
        let authorization = self.authorization(
            &method,
            path_and_query,
            &body_text,
            Utc::now().timestamp(),
            &nonce_str(32),
        )?;

        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path_and_query);
        let mut builder = self
            .http
            .client()
            .request(method, url)
            .header("Authorization", authorization)
            .header("Accept", "application/json");
        if body.is_some() {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body_text);
        }

        let raw = self.http.send(builder).await?;
        if !raw.status.is_success() {
            if !raw.status.is_server_error() {
                if let Ok(err) = raw.json::<ApiErrorBody>() {
                    return Err(PaymentError::provider(NAME, err.code, err.message));
                }
            }
            raw.ensure_success(NAME)?;
        }

        self.verify_platform_signature(
            raw.header("wechatpay-timestamp"),
            raw.header("wechatpay-nonce"),
            raw.header("wechatpay-signature"),
            raw.header("wechatpay-serial"),
            &raw.body,
        )?;
        debug!("{} response signature verified for {}", NAME, path_and_query);
        Ok(raw)
    }

    async fn fetch_transaction(&self, out_trade_no: &str) -> PaymentResult<Transaction> {
        if out_trade_no.trim().is_empty() {
            return Err(PaymentError::invalid_request("transaction id is empty"));
        }
        let path = format!(
            "/v3/pay/transactions/out-trade-no/{}?mchid={}",
            url::form_urlencoded::byte_serialize(out_trade_no.as_bytes()).collect::<String>(),
            self.config.mch_id
        );
        self.request(Method::GET, &path, None).await?.json()
    }

    /// Native (QR code) order body; `total` is in fen.
    pub fn native_body(&self, order: &PaymentOrderInfo) -> PaymentResult<serde_json::Value> {
        if order.amount.currency.as_str() != SETTLEMENT_CURRENCY {
            return Err(PaymentError::invalid_request(format!(
                "{} only accepts {}, got {}",
                NAME, SETTLEMENT_CURRENCY, order.amount.currency
            )));
        }
        if order.amount.is_zero() {
            return Err(PaymentError::invalid_request("amount must be greater than zero"));
        }
        let notify_url = order.notify_url.as_deref().unwrap_or(&self.config.notify_url);

        let mut body = serde_json::json!({
            "appid": self.config.app_id,
            "mchid": self.config.mch_id,
            "description": order.subject().chars().take(127).collect::<String>(),
            "out_trade_no": order.order_id,
            "notify_url": notify_url,
            "amount": {
                "total": order.amount.amount_minor_units,
                "currency": SETTLEMENT_CURRENCY,
            },
        });
        if let Some(reference) = &order.customer_reference {
            body["attach"] = serde_json::Value::String(reference.chars().take(128).collect());
        }
        Ok(body)
    }

    async fn try_create(&self, order: &PaymentOrderInfo) -> PaymentResult<PaymentResponse> {
        info!(
            "Creating {} native order: order={} amount={}",
            NAME, order.order_id, order.amount
        );
        let body = self.native_body(order)?;
        let created: NativeOrder = self
            .request(Method::POST, "/v3/pay/transactions/native", Some(&body))
            .await?
            .json()?;

        Ok(PaymentResponse {
            success: true,
            transaction_id: Some(order.order_id.clone()),
            qr_code: Some(created.code_url),
            ..Default::default()
        })
    }

    async fn try_query(&self, transaction_id: &str) -> PaymentResult<PaymentStatusResponse> {
        let tx = self.fetch_transaction(transaction_id).await?;
        let status = map_status(&tx.trade_state);
        info!(
            "{} transaction queried: order={} native={} status={:?}",
            NAME, transaction_id, tx.trade_state, status
        );
        let paid_at = tx
            .success_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));
        Ok(PaymentStatusResponse::new(status, transaction_id)
            .with_amount(tx.amount.as_ref().map(TransactionAmount::to_money).transpose()?)
            .with_paid_at(paid_at))
    }

    async fn try_refund(&self, request: &RefundRequest) -> PaymentResult<RefundResponse> {
        // The refund API needs the original total even for full refunds.
        let tx = self.fetch_transaction(&request.transaction_id).await?;
        let total = tx
            .amount
            .as_ref()
            .map(|a| a.total)
            .ok_or_else(|| PaymentError::serialization("transaction has no amount"))?;
        let refund = match &request.amount {
            Some(amount) if amount.currency.as_str() != SETTLEMENT_CURRENCY => {
                return Err(PaymentError::invalid_request(format!(
                    "refund currency must be {}",
                    SETTLEMENT_CURRENCY
                )));
            }
            Some(amount) if amount.amount_minor_units > total => {
                return Err(PaymentError::invalid_request("refund exceeds the paid amount"));
            }
            Some(amount) => amount.amount_minor_units,
            None => total,
        };

        let out_refund_no = request.idempotency_reference();
        let mut body = serde_json::json!({
            "out_trade_no": request.transaction_id,
            "out_refund_no": out_refund_no,
            "amount": {
                "refund": refund,
                "total": total,
                "currency": SETTLEMENT_CURRENCY,
            },
        });
        if let Some(reason) = &request.reason {
            body["reason"] = serde_json::Value::String(reason.chars().take(80).collect());
        }
        if !self.config.notify_url.is_empty() {
            body["notify_url"] = serde_json::Value::String(self.config.notify_url.clone());
        }

        let result: RefundResult = self
            .request(Method::POST, "/v3/refund/domestic/refunds", Some(&body))
            .await?
            .json()?;
        info!(
            "{} refund issued: order={} refund={} status={}",
            NAME, request.transaction_id, result.refund_id, result.status
        );
        Ok(RefundResponse::new(result.refund_id, map_refund_status(&result.status)))
    }

    fn try_notify(&self, data: &NotifyData, now: DateTime<Utc>) -> PaymentResult<NotifyResponse> {
        let timestamp = data.header("wechatpay-timestamp");
        self.verify_platform_signature(
            timestamp,
            data.header("wechatpay-nonce"),
            data.header("wechatpay-signature"),
            data.header("wechatpay-serial"),
            &data.body,
        )?;
        if !timestamp.map_or(false, |ts| {
            within_tolerance(ts, now, self.config.notify_tolerance_secs)
        }) {
            return Err(PaymentError::signature("notification timestamp outside tolerance"));
        }

        let envelope: NotifyEnvelope = serde_json::from_str(&data.body)?;
        let resource = &envelope.resource;
        if resource.algorithm != NOTIFY_ALGORITHM {
            return Err(PaymentError::decryption(format!(
                "unsupported resource algorithm {}",
                resource.algorithm
            )));
        }
        let plaintext = decrypt_aes_256_gcm(
            self.config.api_v3_key.as_bytes(),
            resource.nonce.as_bytes(),
            resource.associated_data.as_deref().unwrap_or_default().as_bytes(),
            &decode_base64(&resource.ciphertext)
                .map_err(|e| PaymentError::decryption(e.to_string()))?,
        )?;

        match envelope.event_type.as_str() {
            "TRANSACTION.SUCCESS" | "TRANSACTION.CLOSED" | "TRANSACTION.PAYERROR" => {
                let tx: Transaction = serde_json::from_slice(&plaintext)?;
                let Some(status) = NotifyStatus::from_payment_status(map_status(&tx.trade_state))
                else {
                    return Ok(NotifyResponse::ignored(ACK_SUCCESS));
                };
                let amount = tx.amount.as_ref().map(TransactionAmount::to_money).transpose()?;
                Ok(NotifyResponse::accepted(
                    tx.out_trade_no.clone(),
                    tx.out_trade_no,
                    Some(status),
                    ACK_SUCCESS,
                )
                .with_amount(amount)
                .with_provider_data(serde_json::json!({
                    "eventId": envelope.id,
                    "wechatTransactionId": tx.transaction_id,
                })))
            }
            "REFUND.SUCCESS" => {
                let refund: RefundNotice = serde_json::from_slice(&plaintext)?;
                let amount = Money::new(refund.amount.refund, Currency::new(SETTLEMENT_CURRENCY)?);
                Ok(NotifyResponse::accepted(
                    refund.out_trade_no.clone(),
                    refund.out_trade_no,
                    Some(NotifyStatus::Refunded),
                    ACK_SUCCESS,
                )
                .with_amount(Some(amount))
                .with_refund_id(refund.refund_id.clone())
                .with_provider_data(serde_json::json!({
                    "eventId": envelope.id,
                    "refundId": refund.refund_id,
                })))
            }
            other => {
                info!("Ignoring {} event type {}", NAME, other);
                Ok(NotifyResponse::ignored(ACK_SUCCESS))
            }
        }
    }
}

#[async_trait]
impl PaymentAdapter for WeChatAdapter {
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
            warn!("{} transaction query failed: order={} error={}", NAME, transaction_id, e);
            PaymentStatusResponse::from_error(&e)
        })
    }

    async fn handle_notify(&self, data: &NotifyData) -> NotifyResponse {
        self.try_notify(data, Utc::now()).unwrap_or_else(|e| {
            warn!("{} notification rejected: {}", NAME, e);
            NotifyResponse::rejected(ACK_FAIL, e.to_string())
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
        !c.mch_id.trim().is_empty()
            && !c.app_id.trim().is_empty()
            && !c.merchant_serial_no.trim().is_empty()
            && c.api_v3_key.len() == 32
            && !c.merchant_private_key.trim().is_empty()
            && !c.platform_public_key.trim().is_empty()
            && url::Url::parse(&c.base_url).is_ok()
            && url::Url::parse(&c.notify_url).is_ok()
    }

    fn client_config(&self) -> serde_json::Value {
        serde_json::json!({
            "provider": NAME,
            "appId": self.config.app_id,
            "mchId": self.config.mch_id,
            "currency": SETTLEMENT_CURRENCY,
            "flow": "native",
        })
    }

    fn notify_failure_ack(&self) -> &str {
        ACK_FAIL
    }
}

pub fn map_status(native: &str) -> PaymentStatus {
    match native {
        "NOTPAY" | "USERPAYING" | "ACCEPT" => PaymentStatus::Pending,
        "SUCCESS" => PaymentStatus::Completed,
        "PAYERROR" => PaymentStatus::Failed,
        "CLOSED" | "REVOKED" => PaymentStatus::Cancelled,
        "REFUND" => PaymentStatus::Refunded,
        _ => PaymentStatus::Pending,
    }
}

fn map_refund_status(native: &str) -> RefundStatus {
    match native {
        "SUCCESS" => RefundStatus::Completed,
        "ABNORMAL" | "CLOSED" => RefundStatus::Failed,
        _ => RefundStatus::Pending,
    }
}

#[derive(Debug, Deserialize)]
struct NativeOrder {
    code_url: String,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    out_trade_no: String,
    #[serde(default)]
    transaction_id: Option<String>,
    trade_state: String,
    #[serde(default)]
    success_time: Option<String>,
    #[serde(default)]
    amount: Option<TransactionAmount>,
}

#[derive(Debug, Deserialize)]
struct TransactionAmount {
    total: u64,
    #[serde(default)]
    currency: Option<String>,
}

impl TransactionAmount {
    fn to_money(&self) -> PaymentResult<Money> {
        let currency = self.currency.as_deref().unwrap_or(SETTLEMENT_CURRENCY);
        Ok(Money::new(self.total, Currency::new(currency)?))
    }
}

#[derive(Debug, Deserialize)]
struct RefundResult {
    refund_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RefundNotice {
    out_trade_no: String,
    refund_id: String,
    amount: RefundNoticeAmount,
}

#[derive(Debug, Deserialize)]
struct RefundNoticeAmount {
    refund: u64,
}

#[derive(Debug, Deserialize)]
struct NotifyEnvelope {
    id: String,
    event_type: String,
    resource: EncryptedResource,
}

#[derive(Debug, Deserialize)]
struct EncryptedResource {
    algorithm: String,
    ciphertext: String,
    nonce: String,
    #[serde(default)]
    associated_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signing::encrypt_aes_256_gcm;

    const MERCHANT_SEED: [u8; 32] = [5u8; 32];
    const PLATFORM_SEED: [u8; 32] = [11u8; 32];
    const API_V3_KEY: &str = "0123456789abcdef0123456789abcdef";

    fn create_test_config() -> WeChatConfig {
        WeChatConfig {
            mch_id: "1900000001".to_string(),
            app_id: "wx0000000000000001".to_string(),
            api_v3_key: API_V3_KEY.to_string(),
            merchant_private_key: encode_base64(&MERCHANT_SEED),
            merchant_serial_no: "MERCHANT-SERIAL".to_string(),
            platform_public_key: Ed25519Signer::from_seed(PLATFORM_SEED).public_key_base64(),
            notify_url: "https://shop.example/payments/notify/wechat".to_string(),
            ..Default::default()
        }
    }

    fn create_test_adapter() -> WeChatAdapter {
        WeChatAdapter::new(create_test_config()).unwrap()
    }

    fn signed_notify(event_type: &str, plaintext: &str, timestamp: i64) -> NotifyData {
        let nonce = "abcdefghijkl";
        let ciphertext =
            encrypt_aes_256_gcm(API_V3_KEY.as_bytes(), nonce.as_bytes(), b"transaction", plaintext.as_bytes())
                .unwrap();
        let body = serde_json::json!({
            "id": "EV-1",
            "event_type": event_type,
            "resource_type": "encrypt-resource",
            "resource": {
                "algorithm": NOTIFY_ALGORITHM,
                "ciphertext": encode_base64(&ciphertext),
                "nonce": nonce,
                "associated_data": "transaction",
            },
        })
        .to_string();
        let message = format!("{}\n{}\n{}\n", timestamp, "hdr-nonce", body);
        let signature = Ed25519Signer::from_seed(PLATFORM_SEED)
            .sign(message.as_bytes())
            .unwrap();
        NotifyData::new(body)
            .with_header("Wechatpay-Timestamp", timestamp.to_string())
            .with_header("Wechatpay-Nonce", "hdr-nonce")
            .with_header("Wechatpay-Signature", encode_base64(&signature))
            .with_header("Wechatpay-Serial", "PLATFORM-SERIAL")
    }

    #[test]
    fn test_native_body_uses_fen() {
        let adapter = create_test_adapter();
        let order = PaymentOrderInfo::new("ord-1", Money::of(1234, "CNY").unwrap());
        let body = adapter.native_body(&order).unwrap();
        assert_eq!(body["amount"]["total"], 1234);
        assert_eq!(body["amount"]["currency"], "CNY");
        assert_eq!(body["out_trade_no"], "ord-1");
        assert_eq!(body["notify_url"], "https://shop.example/payments/notify/wechat");
    }

    #[test]
    fn test_authorization_header_verifies() {
        let adapter = create_test_adapter();
        let header = adapter
            .authorization(&Method::POST, "/v3/pay/transactions/native", "{}", 1700000000, "NONCE")
            .unwrap();
        assert!(header.starts_with("WECHATPAY2-ED25519 "));
        assert!(header.contains(r#"mchid="1900000001""#));
        assert!(header.contains(r#"serial_no="MERCHANT-SERIAL""#));

        let signature = header
            .split("signature=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        let message = "POST\n/v3/pay/transactions/native\n1700000000\nNONCE\n{}\n";
        let merchant = Ed25519Signer::from_seed(MERCHANT_SEED).verifier();
        assert!(verify_base64(&merchant, message.as_bytes(), signature));
    }

    #[test]
    fn test_status_table() {
        assert_eq!(map_status("NOTPAY"), PaymentStatus::Pending);
        assert_eq!(map_status("USERPAYING"), PaymentStatus::Pending);
        assert_eq!(map_status("SUCCESS"), PaymentStatus::Completed);
        assert_eq!(map_status("PAYERROR"), PaymentStatus::Failed);
        assert_eq!(map_status("CLOSED"), PaymentStatus::Cancelled);
        assert_eq!(map_status("REVOKED"), PaymentStatus::Cancelled);
        assert_eq!(map_status("REFUND"), PaymentStatus::Refunded);
        assert_eq!(map_status("success"), PaymentStatus::Pending);
    }

    #[test]
    fn test_notify_transaction_success() {
        let adapter = create_test_adapter();
        let now = Utc::now();
        let plaintext = r#"{"out_trade_no":"ord-1","transaction_id":"4200001","trade_state":"SUCCESS","amount":{"total":1234,"currency":"CNY"}}"#;
        let data = signed_notify("TRANSACTION.SUCCESS", plaintext, now.timestamp());
        let resp = adapter.try_notify(&data, now).unwrap();
        assert!(resp.success);
        assert_eq!(resp.order_id.as_deref(), Some("ord-1"));
        assert_eq!(resp.status, Some(NotifyStatus::Completed));
        assert_eq!(resp.amount, Some(Money::of(1234, "CNY").unwrap()));
        assert_eq!(resp.platform_response, ACK_SUCCESS);
    }

    #[test]
    fn test_notify_refund_success() {
        let adapter = create_test_adapter();
        let now = Utc::now();
        let plaintext = r#"{"out_trade_no":"ord-1","refund_id":"5030001","refund_status":"SUCCESS","amount":{"total":1234,"refund":1234}}"#;
        let data = signed_notify("REFUND.SUCCESS", plaintext, now.timestamp());
        let resp = adapter.try_notify(&data, now).unwrap();
        assert_eq!(resp.status, Some(NotifyStatus::Refunded));
        assert_eq!(resp.refund_id.as_deref(), Some("5030001"));
        assert_eq!(
            resp.dedup_key(NAME).as_deref(),
            Some("notify:wechat:ord-1:ord-1:refunded:5030001")
        );
    }

    #[test]
    fn test_notify_tampered_body_rejected() {
        let adapter = create_test_adapter();
        let now = Utc::now();
        let plaintext = r#"{"out_trade_no":"ord-1","trade_state":"SUCCESS","amount":{"total":1234}}"#;
        let mut data = signed_notify("TRANSACTION.SUCCESS", plaintext, now.timestamp());
        data.body = data.body.replace("EV-1", "EV-2");
        let err = adapter.try_notify(&data, now).unwrap_err();
        assert_eq!(err.code(), "SIGNATURE_INVALID");
    }

    #[test]
    fn test_notify_stale_timestamp_rejected() {
        let adapter = create_test_adapter();
        let now = Utc::now();
        let plaintext = r#"{"out_trade_no":"ord-1","trade_state":"SUCCESS","amount":{"total":1234}}"#;
        let data = signed_notify("TRANSACTION.SUCCESS", plaintext, now.timestamp() - 301);
        assert!(adapter.try_notify(&data, now).is_err());
    }

    #[test]
    fn test_notify_wrong_api_key_fails_decryption() {
        let config = WeChatConfig {
            api_v3_key: "ffffffffffffffffffffffffffffffff".to_string(),
            ..create_test_config()
        };
        let adapter = WeChatAdapter::new(config).unwrap();
        let now = Utc::now();
        let plaintext = r#"{"out_trade_no":"ord-1","trade_state":"SUCCESS"}"#;
        let data = signed_notify("TRANSACTION.SUCCESS", plaintext, now.timestamp());
        let err = adapter.try_notify(&data, now).unwrap_err();
        assert_eq!(err.code(), "DECRYPTION_FAILED");
    }

    #[test]
    fn test_validate_config_requires_32_byte_key() {
        assert!(create_test_adapter().validate_config());
        let config = WeChatConfig {
            api_v3_key: "short".to_string(),
            ..create_test_config()
        };
        assert!(!WeChatAdapter::new(config).unwrap().validate_config());
    }

    #[test]
    fn test_validate_config_requires_key_material() {
        let keyed = create_test_config();
        let signer = Arc::new(Ed25519Signer::from_base64(&keyed.merchant_private_key).unwrap());
        let verifier = Arc::new(Ed25519Verifier::from_base64(&keyed.platform_public_key).unwrap());

        let config = WeChatConfig {
            platform_public_key: String::new(),
            ..create_test_config()
        };
        let adapter = WeChatAdapter::with_keys(config, signer.clone(), verifier.clone()).unwrap();
        assert!(!adapter.validate_config());

        let config = WeChatConfig {
            merchant_private_key: String::new(),
            ..create_test_config()
        };
        let adapter = WeChatAdapter::with_keys(config, signer, verifier).unwrap();
        assert!(!adapter.validate_config());
    }
}
