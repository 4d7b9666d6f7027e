//! Payment adapter types and data structures
//!
//! Common request/response objects shared by every adapter. Every response
//! object carries an explicit `success` flag; failures are values, not errors.

use crate::payments::error::PaymentError;
use crate::payments::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Caller-supplied payment intent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrderInfo {
    /// Caller-unique order identifier
    pub order_id: String,
    pub amount: Money,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub customer_reference: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    /// Overrides the adapter's configured notification URL
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl PaymentOrderInfo {
    pub fn new(order_id: impl Into<String>, amount: Money) -> Self {
        Self {
            order_id: order_id.into(),
            amount,
            description: None,
            product_name: None,
            customer_reference: None,
            customer_email: None,
            notify_url: None,
            return_url: None,
            cancel_url: None,
            metadata: None,
        }
    }

    /// Best human-readable label for the order.
    pub fn subject(&self) -> String {
        self.product_name
            .clone()
            .or_else(|| self.description.clone())
            .unwrap_or_else(|| format!("Order {}", self.order_id))
    }

    /// String value from the metadata bag, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

/// Synchronous answer to `create_payment`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Redirect-based providers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Token-based providers (client-side SDK)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    /// QR-based providers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Provider-specific response data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_data: Option<serde_json::Value>,
}

impl PaymentResponse {
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn from_error(err: &PaymentError) -> Self {
        Self::failure(err.code(), err.to_string())
    }
}

/// Canonical, provider-agnostic payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
        PaymentStatus::Refunded,
    ];

    pub fn is_paid(self) -> bool {
        self == PaymentStatus::Completed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

/// Query result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub success: bool,
    pub status: PaymentStatus,
    /// True iff `status` is `Completed`
    pub paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl PaymentStatusResponse {
    pub fn new(status: PaymentStatus, transaction_id: impl Into<String>) -> Self {
        Self {
            success: true,
            status,
            paid: status.is_paid(),
            transaction_id: Some(transaction_id.into()),
            amount: None,
            paid_at: None,
            error_message: None,
            error_code: None,
        }
    }

    pub fn with_amount(mut self, amount: Option<Money>) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_paid_at(mut self, paid_at: Option<DateTime<Utc>>) -> Self {
        self.paid_at = paid_at;
        self
    }

    /// A failed query says nothing about the payment; status stays `Pending`.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: PaymentStatus::Pending,
            paid: false,
            transaction_id: None,
            amount: None,
            paid_at: None,
            error_message: Some(message.into()),
            error_code: Some(code.into()),
        }
    }

    pub fn from_error(err: &PaymentError) -> Self {
        Self::failure(err.code(), err.to_string())
    }
}

/// Refund request against a prior transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub transaction_id: String,
    /// Partial amount; `None` refunds the full payment
    #[serde(default)]
    pub amount: Option<Money>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Caller-unique refund identifier, sent to the provider as its
    /// idempotency key. Retrying with the same reference never refunds twice.
    #[serde(default)]
    pub refund_reference: Option<String>,
}

impl RefundRequest {
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            amount: None,
            reason: None,
            refund_reference: None,
        }
    }

    pub fn with_amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.refund_reference = Some(reference.into());
        self
    }

    /// Provider idempotency key for this refund. Without a caller reference
    /// every call gets a fresh key, so equal partial refunds stay distinct.
    pub fn idempotency_reference(&self) -> String {
        match self.refund_reference.as_deref().map(str::trim) {
            Some(reference) if !reference.is_empty() => reference.to_string(),
            _ => Uuid::new_v4().simple().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_id: Option<String>,
    pub status: RefundStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl RefundResponse {
    pub fn new(refund_id: impl Into<String>, status: RefundStatus) -> Self {
        Self {
            success: status != RefundStatus::Failed,
            refund_id: Some(refund_id.into()),
            status,
            error_message: None,
            error_code: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            refund_id: None,
            status: RefundStatus::Failed,
            error_message: Some(message.into()),
            error_code: Some(code.into()),
        }
    }

    pub fn from_error(err: &PaymentError) -> Self {
        Self::failure(err.code(), err.to_string())
    }
}

/// Raw inbound notification
#[derive(Debug, Clone, Default)]
pub struct NotifyData {
    pub body: String,
    /// Header names are stored lower-cased
    headers: HashMap<String, String>,
}

impl NotifyData {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn insert_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }
}

/// Statuses a notification is allowed to report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyStatus {
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl NotifyStatus {
    /// Narrow a canonical status; `Pending` carries no state change.
    pub fn from_payment_status(status: PaymentStatus) -> Option<Self> {
        match status {
            PaymentStatus::Completed => Some(NotifyStatus::Completed),
            PaymentStatus::Failed => Some(NotifyStatus::Failed),
            PaymentStatus::Cancelled => Some(NotifyStatus::Cancelled),
            PaymentStatus::Refunded => Some(NotifyStatus::Refunded),
            PaymentStatus::Pending => None,
        }
    }
}

impl From<NotifyStatus> for PaymentStatus {
    fn from(status: NotifyStatus) -> Self {
        match status {
            NotifyStatus::Completed => PaymentStatus::Completed,
            NotifyStatus::Failed => PaymentStatus::Failed,
            NotifyStatus::Cancelled => PaymentStatus::Cancelled,
            NotifyStatus::Refunded => PaymentStatus::Refunded,
        }
    }
}

/// Normalized notification result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// `None` for authentic events that do not change payment state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<NotifyStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
    /// Provider refund identifier on `Refunded` events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_id: Option<String>,
    /// Body that must be returned verbatim to the provider
    pub platform_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_data: Option<serde_json::Value>,
}

impl NotifyResponse {
    pub fn accepted(
        order_id: impl Into<String>,
        transaction_id: impl Into<String>,
        status: Option<NotifyStatus>,
        platform_response: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            order_id: Some(order_id.into()),
            transaction_id: Some(transaction_id.into()),
            status,
            amount: None,
            refund_id: None,
            platform_response: platform_response.into(),
            error_message: None,
            provider_data: None,
        }
    }

    /// Authentic event that carries nothing to act on.
    pub fn ignored(platform_response: impl Into<String>) -> Self {
        Self {
            success: true,
            order_id: None,
            transaction_id: None,
            status: None,
            amount: None,
            refund_id: None,
            platform_response: platform_response.into(),
            error_message: None,
            provider_data: None,
        }
    }

    pub fn rejected(platform_response: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            transaction_id: None,
            status: None,
            amount: None,
            refund_id: None,
            platform_response: platform_response.into(),
            error_message: Some(reason.into()),
            provider_data: None,
        }
    }

    pub fn with_amount(mut self, amount: Option<Money>) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_provider_data(mut self, data: serde_json::Value) -> Self {
        self.provider_data = Some(data);
        self
    }

    pub fn with_refund_id(mut self, refund_id: impl Into<String>) -> Self {
        self.refund_id = Some(refund_id.into());
        self
    }

    /// A state change can only be acted on when it names an order.
    pub fn is_attributed(&self) -> bool {
        self.order_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }

    /// Key a caller uses to make notification side effects happen at most once.
    ///
    /// Refund events also carry the refund id: several partial refunds of the
    /// same transaction are separate events.
    pub fn dedup_key(&self, provider: &str) -> Option<String> {
        let status = self.status?;
        let order_id = self.order_id.as_deref().filter(|_| self.is_attributed())?;
        let mut key = format!(
            "notify:{}:{}:{}:{}",
            provider,
            order_id,
            self.transaction_id.as_deref().unwrap_or_default(),
            PaymentStatus::from(status).as_str()
        );
        if status == NotifyStatus::Refunded {
            if let Some(refund_id) = self.refund_id.as_deref() {
                key.push(':');
                key.push_str(refund_id);
            }
        }
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paid_tracks_completed() {
        for status in PaymentStatus::ALL {
            let resp = PaymentStatusResponse::new(status, "tx");
            assert_eq!(resp.paid, status == PaymentStatus::Completed);
        }
    }

    #[test]
    fn test_notify_status_subset() {
        assert_eq!(NotifyStatus::from_payment_status(PaymentStatus::Pending), None);
        for status in [
            NotifyStatus::Completed,
            NotifyStatus::Failed,
            NotifyStatus::Cancelled,
            NotifyStatus::Refunded,
        ] {
            let canonical = PaymentStatus::from(status);
            assert_eq!(NotifyStatus::from_payment_status(canonical), Some(status));
        }
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let data = NotifyData::new("{}").with_header("Stripe-Signature", "t=1,v1=ab");
        assert_eq!(data.header("stripe-signature"), Some("t=1,v1=ab"));
        assert_eq!(data.header("STRIPE-SIGNATURE"), Some("t=1,v1=ab"));
        assert_eq!(data.header("x-other"), None);
    }

    #[test]
    fn test_dedup_key() {
        let resp = NotifyResponse::accepted("ord-1", "tx-1", Some(NotifyStatus::Completed), "ok");
        assert_eq!(
            resp.dedup_key("card").as_deref(),
            Some("notify:card:ord-1:tx-1:completed")
        );
        assert_eq!(NotifyResponse::ignored("ok").dedup_key("card"), None);
    }

    #[test]
    fn test_partial_refund_events_have_distinct_keys() {
        let first = NotifyResponse::accepted("ord-1", "pi_1", Some(NotifyStatus::Refunded), "ok")
            .with_refund_id("re_1");
        let second = NotifyResponse::accepted("ord-1", "pi_1", Some(NotifyStatus::Refunded), "ok")
            .with_refund_id("re_2");
        assert_eq!(
            first.dedup_key("card").as_deref(),
            Some("notify:card:ord-1:pi_1:refunded:re_1")
        );
        assert_ne!(first.dedup_key("card"), second.dedup_key("card"));
        assert_eq!(first.dedup_key("card"), first.clone().dedup_key("card"));
    }

    #[test]
    fn test_unattributed_events_have_no_key() {
        let blank = NotifyResponse::accepted("", "re_9", Some(NotifyStatus::Refunded), "ok");
        assert!(!blank.is_attributed());
        assert_eq!(blank.dedup_key("card"), None);

        let mut missing = NotifyResponse::accepted("ord-1", "tx", Some(NotifyStatus::Completed), "ok");
        missing.order_id = None;
        assert_eq!(missing.dedup_key("card"), None);
    }

    #[test]
    fn test_refund_reference_fallback_is_unique() {
        let request = RefundRequest::new("pi_1").with_amount(Money::of(500, "USD").unwrap());
        assert_ne!(request.idempotency_reference(), request.idempotency_reference());

        let pinned = request.clone().with_reference("rf-42");
        assert_eq!(pinned.idempotency_reference(), "rf-42");
        assert_eq!(pinned.idempotency_reference(), pinned.idempotency_reference());

        let blank = RefundRequest::new("pi_1").with_reference("  ");
        assert_ne!(blank.idempotency_reference(), "  ");
    }

    #[test]
    fn test_refund_response_success_flag() {
        assert!(RefundResponse::new("re_1", RefundStatus::Pending).success);
        assert!(!RefundResponse::new("re_1", RefundStatus::Failed).success);
    }
}
