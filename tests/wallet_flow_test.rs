//! PayPal, WeChat Pay and Alipay adapters against mocked provider APIs.

use paybridge::payments::providers::{AlipayAdapter, PayPalAdapter, WeChatAdapter};
use paybridge::payments::signing::{encode_base64, Ed25519Signer, Signer};
use paybridge::payments::{
    Money, NotifyData, NotifyStatus, PaymentAdapter, PaymentOrderInfo, PaymentStatus,
    RefundRequest,
};
use wiremock::matchers::{body_string_contains, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MERCHANT_SEED: [u8; 32] = [5u8; 32];
const PLATFORM_SEED: [u8; 32] = [11u8; 32];

fn platform_sign(message: &str) -> String {
    let sig = Ed25519Signer::from_seed(PLATFORM_SEED)
        .sign(message.as_bytes())
        .unwrap();
    encode_base64(&sig)
}

// ── PayPal ───────────────────────────────────────────────────────────

fn paypal_adapter(server: &MockServer) -> PayPalAdapter {
    PayPalAdapter::from_value(serde_json::json!({
        "client_id": "client-id",
        "client_secret": "client-secret",
        "webhook_id": "WH-1",
        "base_url": server.uri(),
        "return_url": "https://shop.example/return",
        "cancel_url": "https://shop.example/cancel",
        "timeout_secs": 5,
    }))
    .unwrap()
}

async fn mount_paypal_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "A21-token",
            "token_type": "Bearer",
            "expires_in": 32400,
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn paypal_create_then_query_reuses_token() {
    let server = MockServer::start().await;
    mount_paypal_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .and(header("Authorization", "Bearer A21-token"))
        .and(header("PayPal-Request-Id", "ord-1"))
        .and(body_string_contains("\"value\":\"12.34\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "5O190127TN364715T",
            "status": "PAYER_ACTION_REQUIRED",
            "links": [
                { "href": "https://api-m.sandbox.paypal.com/v2/checkout/orders/5O190127TN364715T", "rel": "self" },
                { "href": "https://www.sandbox.paypal.com/checkoutnow?token=5O190127TN364715T", "rel": "payer-action" },
            ],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/checkout/orders/5O190127TN364715T"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "5O190127TN364715T",
            "status": "COMPLETED",
            "purchase_units": [{
                "custom_id": "ord-1",
                "amount": { "currency_code": "USD", "value": "12.34" },
                "payments": { "captures": [{
                    "id": "3C679366HH908993F",
                    "status": "COMPLETED",
                    "amount": { "currency_code": "USD", "value": "12.34" },
                    "create_time": "2024-03-01T10:00:00Z",
                }]},
            }],
        })))
        .mount(&server)
        .await;

    let adapter = paypal_adapter(&server);
    let order = PaymentOrderInfo::new("ord-1", Money::of(1234, "USD").unwrap());

    let created = adapter.create_payment(&order).await;
    assert!(created.success, "{:?}", created.error_message);
    assert_eq!(created.transaction_id.as_deref(), Some("5O190127TN364715T"));
    assert!(created.redirect_url.unwrap().contains("checkoutnow"));

    let status = adapter.query_payment("5O190127TN364715T").await;
    assert_eq!(status.status, PaymentStatus::Completed);
    assert!(status.paid);
    assert_eq!(status.amount, Some(Money::of(1234, "USD").unwrap()));
    assert!(status.paid_at.is_some());
}

fn paypal_webhook(body: &str) -> NotifyData {
    NotifyData::new(body)
        .with_header("PAYPAL-TRANSMISSION-ID", "69cd13f0-d67a-11e5-baa3-778b53f4ae55")
        .with_header("PAYPAL-TRANSMISSION-TIME", "2024-03-01T10:00:00Z")
        .with_header("PAYPAL-TRANSMISSION-SIG", "c2lnbmF0dXJl")
        .with_header("PAYPAL-CERT-URL", "https://api.sandbox.paypal.com/v1/notifications/certs/CERT-1")
        .with_header("PAYPAL-AUTH-ALGO", "SHA256withRSA")
}

fn capture_completed_event() -> String {
    serde_json::json!({
        "id": "WH-EVT-1",
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource": {
            "id": "3C679366HH908993F",
            "status": "COMPLETED",
            "custom_id": "ord-1",
            "amount": { "currency_code": "USD", "value": "12.34" },
            "supplementary_data": { "related_ids": { "order_id": "5O190127TN364715T" } },
        },
    })
    .to_string()
}

#[tokio::test]
async fn paypal_verified_capture_notification() {
    let server = MockServer::start().await;
    mount_paypal_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/notifications/verify-webhook-signature"))
        .and(body_string_contains("\"webhook_id\":\"WH-1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "verification_status": "SUCCESS",
        })))
        .mount(&server)
        .await;

    let adapter = paypal_adapter(&server);
    let resp = adapter
        .handle_notify(&paypal_webhook(&capture_completed_event()))
        .await;

    assert!(resp.success, "{:?}", resp.error_message);
    assert_eq!(resp.status, Some(NotifyStatus::Completed));
    assert_eq!(resp.order_id.as_deref(), Some("ord-1"));
    assert_eq!(resp.transaction_id.as_deref(), Some("5O190127TN364715T"));
    assert_eq!(resp.amount, Some(Money::of(1234, "USD").unwrap()));
    assert_eq!(resp.platform_response, "OK");
}

#[tokio::test]
async fn paypal_failed_verification_is_rejected() {
    let server = MockServer::start().await;
    mount_paypal_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/notifications/verify-webhook-signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "verification_status": "FAILURE",
        })))
        .mount(&server)
        .await;

    let resp = paypal_adapter(&server)
        .handle_notify(&paypal_webhook(&capture_completed_event()))
        .await;
    assert!(!resp.success);
    assert!(resp.status.is_none());
    assert_eq!(resp.platform_response, "INVALID");
}

#[tokio::test]
async fn paypal_foreign_cert_host_never_reaches_the_api() {
    let server = MockServer::start().await;
    mount_paypal_token(&server, 0).await;

    let data = paypal_webhook(&capture_completed_event())
        .with_header("PAYPAL-CERT-URL", "https://evil.example/cert.pem");
    let resp = paypal_adapter(&server).handle_notify(&data).await;
    assert!(!resp.success);
}

// ── WeChat Pay ───────────────────────────────────────────────────────

const API_V3_KEY: &str = "0123456789abcdef0123456789abcdef";

fn wechat_adapter(server: &MockServer) -> WeChatAdapter {
    WeChatAdapter::from_value(serde_json::json!({
        "mch_id": "1900000001",
        "app_id": "wx0000000000000001",
        "api_v3_key": API_V3_KEY,
        "merchant_private_key": encode_base64(&MERCHANT_SEED),
        "merchant_serial_no": "MERCHANT-SERIAL",
        "platform_public_key": Ed25519Signer::from_seed(PLATFORM_SEED).public_key_base64(),
        "base_url": server.uri(),
        "notify_url": "https://shop.example/payments/notify/wechat",
        "timeout_secs": 5,
    }))
    .unwrap()
}

fn signed_wechat_response(body: &serde_json::Value) -> ResponseTemplate {
    let text = body.to_string();
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let nonce = "platformnonce";
    let signature = platform_sign(&format!("{}\n{}\n{}\n", timestamp, nonce, text));
    ResponseTemplate::new(200)
        .insert_header("Wechatpay-Timestamp", timestamp.as_str())
        .insert_header("Wechatpay-Nonce", nonce)
        .insert_header("Wechatpay-Signature", signature.as_str())
        .insert_header("Wechatpay-Serial", "PLATFORM-SERIAL")
        .insert_header("Content-Type", "application/json")
        .set_body_string(text)
}

#[tokio::test]
async fn wechat_native_order_returns_qr_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/pay/transactions/native"))
        .and(header_exists("Authorization"))
        .and(body_string_contains("\"total\":1234"))
        .and(body_string_contains("\"out_trade_no\":\"ord-1\""))
        .respond_with(signed_wechat_response(&serde_json::json!({
            "code_url": "weixin://wxpay/bizpayurl?pr=abc123",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = wechat_adapter(&server);
    let order = PaymentOrderInfo::new("ord-1", Money::of(1234, "CNY").unwrap());
    let resp = adapter.create_payment(&order).await;

    assert!(resp.success, "{:?}", resp.error_message);
    assert_eq!(resp.transaction_id.as_deref(), Some("ord-1"));
    assert_eq!(resp.qr_code.as_deref(), Some("weixin://wxpay/bizpayurl?pr=abc123"));

    let requests = server.received_requests().await.unwrap();
    let auth = requests[0].headers.get("Authorization").unwrap().to_str().unwrap();
    assert!(auth.starts_with("WECHATPAY2-ED25519 mchid=\"1900000001\""));
}

#[tokio::test]
async fn wechat_query_maps_trade_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/pay/transactions/out-trade-no/ord-1"))
        .and(query_param("mchid", "1900000001"))
        .respond_with(signed_wechat_response(&serde_json::json!({
            "out_trade_no": "ord-1",
            "transaction_id": "4200000000000000001",
            "trade_state": "SUCCESS",
            "success_time": "2024-03-01T18:00:00+08:00",
            "amount": { "total": 1234, "currency": "CNY" },
        })))
        .mount(&server)
        .await;

    let status = wechat_adapter(&server).query_payment("ord-1").await;
    assert!(status.success, "{:?}", status.error_message);
    assert_eq!(status.status, PaymentStatus::Completed);
    assert_eq!(status.amount, Some(Money::of(1234, "CNY").unwrap()));
    assert!(status.paid_at.is_some());
}

#[tokio::test]
async fn wechat_unsigned_response_is_refused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/pay/transactions/out-trade-no/ord-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "out_trade_no": "ord-1",
            "trade_state": "SUCCESS",
        })))
        .mount(&server)
        .await;

    let status = wechat_adapter(&server).query_payment("ord-1").await;
    assert!(!status.success);
    assert!(!status.paid);
    assert_eq!(status.error_code.as_deref(), Some("SIGNATURE_INVALID"));
}

// ── Alipay ───────────────────────────────────────────────────────────

fn alipay_adapter(gateway: &str) -> AlipayAdapter {
    AlipayAdapter::from_value(serde_json::json!({
        "app_id": "2021000000000001",
        "merchant_private_key": encode_base64(&MERCHANT_SEED),
        "alipay_public_key": Ed25519Signer::from_seed(PLATFORM_SEED).public_key_base64(),
        "gateway_url": gateway,
        "notify_url": "https://shop.example/payments/notify/alipay",
        "timeout_secs": 5,
    }))
    .unwrap()
}

fn signed_gateway_body(method_node: &str, node: &str) -> String {
    format!(
        r#"{{"{}":{},"sign":"{}"}}"#,
        method_node,
        node,
        platform_sign(node)
    )
}

#[tokio::test]
async fn alipay_query_verifies_the_response_node() {
    let server = MockServer::start().await;
    let node = r#"{"code":"10000","msg":"Success","out_trade_no":"ord-1","trade_status":"TRADE_SUCCESS","total_amount":"12.34","send_pay_date":"2024-03-01 18:00:00"}"#;
    Mock::given(method("POST"))
        .and(path("/gateway.do"))
        .and(body_string_contains("method=alipay.trade.query"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(signed_gateway_body("alipay_trade_query_response", node)),
        )
        .mount(&server)
        .await;

    let adapter = alipay_adapter(&format!("{}/gateway.do", server.uri()));
    let status = adapter.query_payment("ord-1").await;

    assert!(status.success, "{:?}", status.error_message);
    assert_eq!(status.status, PaymentStatus::Completed);
    assert_eq!(status.amount, Some(Money::of(1234, "CNY").unwrap()));
    assert!(status.paid_at.is_some());
}

#[tokio::test]
async fn alipay_tampered_response_node_is_refused() {
    let server = MockServer::start().await;
    let node = r#"{"code":"10000","msg":"Success","out_trade_no":"ord-1","trade_status":"WAIT_BUYER_PAY","total_amount":"12.34"}"#;
    let body = signed_gateway_body("alipay_trade_query_response", node)
        .replace("WAIT_BUYER_PAY", "TRADE_SUCCESS");
    Mock::given(method("POST"))
        .and(path("/gateway.do"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let adapter = alipay_adapter(&format!("{}/gateway.do", server.uri()));
    let status = adapter.query_payment("ord-1").await;
    assert!(!status.success);
    assert!(!status.paid);
    assert_eq!(status.error_code.as_deref(), Some("SIGNATURE_INVALID"));
}

// ── Refund idempotency ───────────────────────────────────────────────

fn header_values(requests: &[wiremock::Request], suffix: &str, name: &str) -> Vec<String> {
    requests
        .iter()
        .filter(|req| req.url.path().ends_with(suffix))
        .filter_map(|req| req.headers.get(name))
        .filter_map(|value| value.to_str().ok().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn paypal_equal_partial_refunds_use_distinct_request_ids() {
    let server = MockServer::start().await;
    mount_paypal_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/v2/checkout/orders/5O190127TN364715T"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "5O190127TN364715T",
            "status": "COMPLETED",
            "purchase_units": [{
                "custom_id": "ord-1",
                "payments": { "captures": [{
                    "id": "3C679366HH908993F",
                    "status": "COMPLETED",
                    "amount": { "currency_code": "USD", "value": "12.34" },
                }]},
            }],
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/payments/captures/3C679366HH908993F/refund"))
        .and(body_string_contains("\"value\":\"1.00\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "1JU08902781691411",
            "status": "COMPLETED",
        })))
        .expect(2)
        .mount(&server)
        .await;

    let adapter = paypal_adapter(&server);
    let partial = RefundRequest::new("5O190127TN364715T").with_amount(Money::of(100, "USD").unwrap());
    assert!(adapter.refund(&partial).await.success);
    assert!(adapter.refund(&partial).await.success);

    let requests = server.received_requests().await.unwrap();
    let ids = header_values(&requests, "/refund", "paypal-request-id");
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn wechat_equal_partial_refunds_use_distinct_refund_numbers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/pay/transactions/out-trade-no/ord-1"))
        .respond_with(signed_wechat_response(&serde_json::json!({
            "out_trade_no": "ord-1",
            "trade_state": "SUCCESS",
            "amount": { "total": 1234, "currency": "CNY" },
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/refund/domestic/refunds"))
        .and(body_string_contains("\"refund\":100"))
        .respond_with(signed_wechat_response(&serde_json::json!({
            "refund_id": "50300000001",
            "status": "PROCESSING",
        })))
        .expect(3)
        .mount(&server)
        .await;

    let adapter = wechat_adapter(&server);
    let partial = RefundRequest::new("ord-1").with_amount(Money::of(100, "CNY").unwrap());
    assert!(adapter.refund(&partial).await.success);
    assert!(adapter.refund(&partial).await.success);
    assert!(adapter.refund(&partial.clone().with_reference("rf-ord-1-a")).await.success);

    let numbers: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|req| req.url.path() == "/v3/refund/domestic/refunds")
        .map(|req| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            body["out_refund_no"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(numbers.len(), 3);
    assert_ne!(numbers[0], numbers[1]);
    assert_eq!(numbers[2], "rf-ord-1-a");
}

#[tokio::test]
async fn alipay_equal_partial_refunds_use_distinct_request_numbers() {
    let server = MockServer::start().await;
    let node = r#"{"code":"10000","msg":"Success","out_trade_no":"ord-1","fund_change":"Y","refund_fee":"1.00"}"#;
    Mock::given(method("POST"))
        .and(path("/gateway.do"))
        .and(body_string_contains("method=alipay.trade.refund"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(signed_gateway_body("alipay_trade_refund_response", node)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let adapter = alipay_adapter(&format!("{}/gateway.do", server.uri()));
    let partial = RefundRequest::new("ord-1").with_amount(Money::of(100, "CNY").unwrap());
    let first = adapter.refund(&partial).await;
    let second = adapter.refund(&partial).await;
    assert!(first.success, "{:?}", first.error_message);
    assert!(second.success, "{:?}", second.error_message);
    assert_ne!(first.refund_id, second.refund_id);

    let numbers: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter_map(|req| {
            url::form_urlencoded::parse(&req.body)
                .find(|(key, _)| key == "biz_content")
                .map(|(_, value)| value.into_owned())
        })
        .map(|biz| {
            let biz: serde_json::Value = serde_json::from_str(&biz).unwrap();
            biz["out_request_no"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(numbers.len(), 2);
    assert_ne!(numbers[0], numbers[1]);
    assert_eq!(Some(numbers[0].clone()), first.refund_id);
}
