//! Payment orchestration
//!
//! The entry point calling code uses: resolves an adapter by name (or the
//! configured default), forwards the call and, for notifications, applies
//! de-duplication before handing the event to the caller's order logic.

use crate::payments::dedup::{InMemoryDeduplicator, NotifyDeduplicator, DEFAULT_DEDUP_TTL};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::registry::AdapterRegistry;
use crate::payments::traits::PaymentAdapter;
use crate::payments::types::{
    NotifyData, NotifyResponse, PaymentOrderInfo, PaymentResponse, PaymentStatusResponse,
    RefundRequest, RefundResponse,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Caller-side reaction to a verified, first-time payment event.
///
/// Typically updates the order store. An error makes the provider redeliver.
#[async_trait]
pub trait NotifyHandler: Send + Sync {
    async fn on_payment_event(&self, provider: &str, event: &NotifyResponse) -> anyhow::Result<()>;
}

/// Result of one notification delivery
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyOutcome {
    pub response: NotifyResponse,
    /// Seen before; nothing was dispatched
    pub duplicate: bool,
    /// Handed to the `NotifyHandler`
    pub dispatched: bool,
}

impl NotifyOutcome {
    fn settled(response: NotifyResponse) -> Self {
        Self {
            response,
            duplicate: false,
            dispatched: false,
        }
    }
}

pub struct PaymentService {
    registry: Arc<AdapterRegistry>,
    default_adapter: Option<String>,
    dedup: Arc<dyn NotifyDeduplicator>,
    dedup_ttl: Duration,
    handler: Option<Arc<dyn NotifyHandler>>,
}

impl PaymentService {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self {
            registry,
            default_adapter: None,
            dedup: Arc::new(InMemoryDeduplicator::new()),
            dedup_ttl: DEFAULT_DEDUP_TTL,
            handler: None,
        }
    }

    pub fn with_default_adapter(mut self, name: Option<String>) -> Self {
        self.default_adapter = name.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn with_deduplicator(mut self, dedup: Arc<dyn NotifyDeduplicator>) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_dedup_ttl(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = ttl;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn NotifyHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn default_adapter(&self) -> Option<&str> {
        self.default_adapter.as_deref()
    }

    /// Explicit name first, then the configured default.
    pub fn resolve(&self, name: Option<&str>) -> PaymentResult<Arc<dyn PaymentAdapter>> {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .or(self.default_adapter.as_deref())
            .ok_or(PaymentError::NoAdapterSelected)?;
        self.registry
            .get(name)
            .ok_or_else(|| PaymentError::unknown_adapter(name))
    }

    pub async fn create_payment(
        &self,
        adapter: Option<&str>,
        order: &PaymentOrderInfo,
    ) -> PaymentResponse {
        match self.resolve(adapter) {
            Ok(adapter) => adapter.create_payment(order).await,
            Err(e) => {
                warn!("Cannot create payment for order {}: {}", order.order_id, e);
                PaymentResponse::from_error(&e)
            }
        }
    }

    pub async fn query_payment(
        &self,
        adapter: Option<&str>,
        transaction_id: &str,
    ) -> PaymentStatusResponse {
        match self.resolve(adapter) {
            Ok(adapter) => adapter.query_payment(transaction_id).await,
            Err(e) => {
                warn!("Cannot query payment {}: {}", transaction_id, e);
                PaymentStatusResponse::from_error(&e)
            }
        }
    }

    pub async fn refund(&self, adapter: Option<&str>, request: &RefundRequest) -> RefundResponse {
        match self.resolve(adapter) {
            Ok(adapter) => adapter.refund(request).await,
            Err(e) => {
                warn!("Cannot refund {}: {}", request.transaction_id, e);
                RefundResponse::from_error(&e)
            }
        }
    }

    pub fn client_config(&self, adapter: Option<&str>) -> PaymentResult<serde_json::Value> {
        Ok(self.resolve(adapter)?.client_config())
    }

    /// Verify, de-duplicate and dispatch one notification for `provider`.
    pub async fn handle_notify(&self, provider: &str, data: &NotifyData) -> NotifyOutcome {
        let adapter = match self.registry.get(provider) {
            Some(adapter) => adapter,
            None => {
                warn!("Notification for unknown adapter '{}'", provider);
                let err = PaymentError::unknown_adapter(provider);
                return NotifyOutcome::settled(NotifyResponse::rejected("", err.to_string()));
            }
        };

        let response = adapter.handle_notify(data).await;
        if !response.success {
            return NotifyOutcome::settled(response);
        }
        if response.status.is_some() && !response.is_attributed() {
            warn!(
                "{} notification for transaction {:?} names no order; ignoring",
                provider, response.transaction_id
            );
            return NotifyOutcome::settled(NotifyResponse::ignored(response.platform_response));
        }
        let Some(key) = response.dedup_key(provider) else {
            return NotifyOutcome::settled(response);
        };

        match self.dedup.mark_if_new(&key, self.dedup_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Duplicate {} notification {} acknowledged", provider, key);
                return NotifyOutcome {
                    response,
                    duplicate: true,
                    dispatched: false,
                };
            }
            Err(e) => {
                error!("De-duplication store unavailable for {}: {}", key, e);
                return NotifyOutcome::settled(NotifyResponse::rejected(
                    adapter.notify_failure_ack(),
                    e.to_string(),
                ));
            }
        }

        let Some(handler) = &self.handler else {
            info!("{} notification {} accepted", provider, key);
            return NotifyOutcome::settled(response);
        };

        match handler.on_payment_event(provider, &response).await {
            Ok(()) => {
                info!("{} notification {} dispatched", provider, key);
                NotifyOutcome {
                    response,
                    duplicate: false,
                    dispatched: true,
                }
            }
            Err(e) => {
                error!("Handler failed for {} notification {}: {:#}", provider, key, e);
                if let Err(release_err) = self.dedup.release(&key).await {
                    error!("Failed to release de-duplication mark {}: {}", key, release_err);
                }
                NotifyOutcome::settled(NotifyResponse::rejected(
                    adapter.notify_failure_ack(),
                    format!("handler failed: {}", e),
                ))
            }
        }
    }
}
