//! Payment adapter trait definitions
//!
//! Defines the common contract every payment network adapter implements.

use crate::payments::types::{
    NotifyData, NotifyResponse, PaymentOrderInfo, PaymentResponse, PaymentStatusResponse,
    RefundRequest, RefundResponse,
};
use async_trait::async_trait;

/// Trait for payment network adapters
///
/// Card processors, wallets and the blockchain path all implement this trait
/// so callers never branch on the network. None of the methods return `Err`:
/// every failure is reported through the `success` flag of the returned
/// object. Instances are shared process-wide and must tolerate concurrent use.
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    /// Registry name of this adapter (`"card"`, `"paypal"`, ...)
    fn name(&self) -> &str;

    /// Create a payment with the provider
    ///
    /// On success returns a transaction id plus the interaction artifact for
    /// this provider: a redirect URL, a client token or a scannable code.
    /// A network failure means the outcome is unknown and must be reconciled
    /// with `query_payment`, not treated as a decline.
    async fn create_payment(&self, order: &PaymentOrderInfo) -> PaymentResponse;

    /// Query the current status of a payment
    ///
    /// Native provider statuses are mapped onto `PaymentStatus`; anything
    /// unrecognised maps to `Pending`.
    async fn query_payment(&self, transaction_id: &str) -> PaymentStatusResponse;

    /// Verify and normalize an inbound provider notification
    ///
    /// Verification happens before the payload is interpreted. On failure the
    /// response has `success = false` and carries the provider's failure
    /// acknowledgement.
    async fn handle_notify(&self, data: &NotifyData) -> NotifyResponse;

    /// Refund a prior transaction, fully or partially
    async fn refund(&self, request: &RefundRequest) -> RefundResponse;

    /// Check credentials are present and well-formed. Pure, no I/O.
    fn validate_config(&self) -> bool;

    /// Settings that are safe to hand to an untrusted client
    fn client_config(&self) -> serde_json::Value;

    /// Acknowledgement body that makes the provider redeliver a notification
    fn notify_failure_ack(&self) -> &str;
}
