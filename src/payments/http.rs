//! Outbound HTTP transport shared by the provider adapters
//!
//! No retries happen here: a creation call retried blindly can double-charge,
//! so transport failures go straight back to the caller as outcome-unknown.

use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP client bound to one provider, used for error attribution.
#[derive(Debug, Clone)]
pub struct ProviderHttp {
    provider: String,
    client: Client,
}

/// Fully-read provider response
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ProviderHttp {
    pub fn new(provider: &str, timeout_secs: u64) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("paybridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PaymentError::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            provider: provider.to_string(),
            client,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send a request and read the whole body, whatever the status code.
    pub async fn send(&self, request: RequestBuilder) -> PaymentResult<RawResponse> {
        let response = request.send().await.map_err(|e| {
            error!("{} request failed: {}", self.provider, e);
            PaymentError::from(e)
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| {
            error!("{} response body unreadable: {}", self.provider, e);
            PaymentError::network(format!("failed to read response body: {}", e))
        })?;

        debug!("{} responded with HTTP {}", self.provider, status);
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    /// Send, require a 2xx status and decode the JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> PaymentResult<T> {
        let raw = self.send(request).await?;
        raw.ensure_success(&self.provider)?;
        raw.json()
    }
}

impl RawResponse {
    pub fn json<T: DeserializeOwned>(&self) -> PaymentResult<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            PaymentError::serialization(format!("invalid response format: {}", e))
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Map a non-2xx status to an error.
    ///
    /// 5xx leaves the outcome undetermined; 4xx is a definite rejection.
    pub fn ensure_success(&self, provider: &str) -> PaymentResult<()> {
        let status = self.status;
        if status.is_success() {
            return Ok(());
        }

        let snippet: String = self.body.chars().take(512).collect();
        if status.is_server_error() {
            error!("{} server error {}: {}", provider, status, snippet);
            return Err(PaymentError::network(format!(
                "{} returned HTTP {}",
                provider, status
            )));
        }

        warn!("{} rejected request with HTTP {}: {}", provider, status, snippet);
        let code = if status == StatusCode::TOO_MANY_REQUESTS {
            "rate_limited".to_string()
        } else {
            format!("http_{}", status.as_u16())
        };
        Err(PaymentError::provider(provider, code, snippet))
    }
}
