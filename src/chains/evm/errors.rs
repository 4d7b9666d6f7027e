use crate::payments::error::PaymentError;
use thiserror::Error;

pub type EvmResult<T> = Result<T, EvmError>;

#[derive(Debug, Error)]
pub enum EvmError {
    #[error("Invalid EVM address: {address}")]
    InvalidAddress { address: String },

    #[error("Invalid transaction hash: {hash}")]
    InvalidTxHash { hash: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded. Please try again later")]
    RateLimitError,

    #[error("JSON-RPC error {code}: {message}")]
    RpcError { code: i64, message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Timeout error: operation timed out after {seconds} seconds")]
    TimeoutError { seconds: u64 },
}

impl EvmError {
    pub fn invalid_address(address: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
        }
    }

    pub fn invalid_tx_hash(hash: impl Into<String>) -> Self {
        Self::InvalidTxHash { hash: hash.into() }
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    pub fn rpc_error(code: i64, message: impl Into<String>) -> Self {
        Self::RpcError {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn serialization_error(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    pub fn timeout_error(seconds: u64) -> Self {
        Self::TimeoutError { seconds }
    }
}

impl From<reqwest::Error> for EvmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EvmError::timeout_error(0)
        } else {
            EvmError::network_error(format!("Request error: {}", err))
        }
    }
}

impl From<serde_json::Error> for EvmError {
    fn from(err: serde_json::Error) -> Self {
        EvmError::serialization_error(format!("JSON error: {}", err))
    }
}

impl From<EvmError> for PaymentError {
    fn from(err: EvmError) -> Self {
        match err {
            EvmError::InvalidAddress { .. } | EvmError::InvalidTxHash { .. } => {
                PaymentError::invalid_request(err.to_string())
            }
            EvmError::ConfigError { message } => PaymentError::config(message),
            EvmError::SerializationError { message } => PaymentError::serialization(message),
            EvmError::RpcError { code, message } => {
                PaymentError::provider("crypto", format!("rpc_{}", code), message)
            }
            EvmError::RateLimitError => {
                PaymentError::provider("crypto", "rate_limited", err.to_string())
            }
            EvmError::NetworkError { .. } | EvmError::TimeoutError { .. } => {
                PaymentError::network(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_to_payment_error() {
        let err: PaymentError = EvmError::timeout_error(10).into();
        assert!(err.is_outcome_unknown());

        let err: PaymentError = EvmError::invalid_tx_hash("0x12").into();
        assert_eq!(err.code(), "INVALID_REQUEST");

        let err: PaymentError = EvmError::rpc_error(-32000, "header not found").into();
        assert_eq!(err.code(), "PROVIDER_RPC_-32000");
    }
}
