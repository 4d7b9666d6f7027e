use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Errors raised inside the adapter layer.
///
/// These never cross the `PaymentAdapter` boundary: adapters fold them into
/// the `success = false` response objects using [`PaymentError::code`].
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Signature verification failed: {message}")]
    Signature { message: String },

    #[error("Payload decryption failed: {message}")]
    Decryption { message: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        /// The provider may or may not have acted on the request.
        outcome_unknown: bool,
    },

    #[error("{provider} rejected the request ({code}): {message}")]
    Provider {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Operation not supported by {provider}: {message}")]
    Unsupported { provider: String, message: String },

    #[error("Unknown payment adapter: {name}")]
    UnknownAdapter { name: String },

    #[error("No adapter named and no default adapter configured")]
    NoAdapterSelected,

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl PaymentError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn signature(message: impl Into<String>) -> Self {
        Self::Signature {
            message: message.into(),
        }
    }

    pub fn decryption(message: impl Into<String>) -> Self {
        Self::Decryption {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            outcome_unknown: true,
        }
    }

    pub fn provider(
        provider: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unsupported {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn unknown_adapter(name: impl Into<String>) -> Self {
        Self::UnknownAdapter { name: name.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Machine-readable code carried in failed response objects.
    pub fn code(&self) -> String {
        match self {
            Self::Config { .. } => "CONFIG_ERROR".to_string(),
            Self::InvalidRequest { .. } => "INVALID_REQUEST".to_string(),
            Self::Signature { .. } => "SIGNATURE_INVALID".to_string(),
            Self::Decryption { .. } => "DECRYPTION_FAILED".to_string(),
            Self::Network { .. } => "NETWORK_ERROR".to_string(),
            Self::Provider { code, .. } => format!("PROVIDER_{}", code.to_uppercase()),
            Self::Unsupported { .. } => "REFUND_UNSUPPORTED".to_string(),
            Self::UnknownAdapter { .. } => "ADAPTER_NOT_FOUND".to_string(),
            Self::NoAdapterSelected => "NO_ADAPTER_SELECTED".to_string(),
            Self::NotFound { .. } => "NOT_FOUND".to_string(),
            Self::Serialization { .. } => "INVALID_RESPONSE".to_string(),
        }
    }

    /// Transport failures leave the provider-side outcome undetermined; the
    /// caller has to reconcile with a status query.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(
            self,
            Self::Network {
                outcome_unknown: true,
                ..
            }
        )
    }

    /// Retrying never fixes a cryptographic mismatch or a config problem.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PaymentError::network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            PaymentError::serialization(format!("response decode error: {}", err))
        } else {
            PaymentError::network(format!("request error: {}", err))
        }
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::serialization(format!("JSON error: {}", err))
    }
}
