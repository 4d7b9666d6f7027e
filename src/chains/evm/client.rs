use crate::chains::evm::errors::{EvmError, EvmResult};
use crate::chains::evm::{is_valid_tx_hash, TRANSFER_TOPIC};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Minimal JSON-RPC client for one EVM network.
pub struct EvmClient {
    http_client: Client,
    rpc_url: String,
    request_timeout: Duration,
}

/// Mined transaction outcome
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub block_number: String,
    /// `0x1` on success, `0x0` when reverted
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

/// Decoded ERC-20 `Transfer(address,address,uint256)` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub contract: String,
    pub to: String,
    pub value: u128,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct RpcResponse<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl EvmClient {
    pub fn new(rpc_url: &str, request_timeout: Duration) -> EvmResult<Self> {
        url::Url::parse(rpc_url)
            .map_err(|e| EvmError::config_error(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;

        let http_client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("paybridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EvmError::config_error(format!("Failed to create HTTP client: {}", e)))?;

        info!("EVM client initialized with RPC URL: {}", rpc_url);

        Ok(Self {
            http_client,
            rpc_url: rpc_url.to_string(),
            request_timeout,
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> EvmResult<Option<T>> {
        debug!("JSON-RPC {} -> {}", method, self.rpc_url);

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let response = timeout(
            self.request_timeout,
            self.http_client.post(&self.rpc_url).json(&request).send(),
        )
        .await
        .map_err(|_| EvmError::timeout_error(self.request_timeout.as_secs()))??;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EvmError::RateLimitError);
        }
        let response = response
            .error_for_status()
            .map_err(|e| EvmError::network_error(format!("RPC endpoint error: {}", e)))?;

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| EvmError::serialization_error(format!("JSON parsing error: {}", e)))?;
        if let Some(err) = body.error {
            return Err(EvmError::rpc_error(err.code, err.message));
        }
        Ok(body.result)
    }

    /// Latest block height
    pub async fn block_number(&self) -> EvmResult<u64> {
        let head: Option<String> = self.call("eth_blockNumber", serde_json::json!([])).await?;
        let head = head.ok_or_else(|| EvmError::serialization_error("empty eth_blockNumber"))?;
        parse_quantity(&head).and_then(|v| {
            u64::try_from(v).map_err(|_| EvmError::serialization_error("block number overflow"))
        })
    }

    /// `None` while the transaction is unknown or not yet mined.
    pub async fn transaction_receipt(&self, tx_hash: &str) -> EvmResult<Option<TransactionReceipt>> {
        if !is_valid_tx_hash(tx_hash) {
            return Err(EvmError::invalid_tx_hash(tx_hash));
        }
        self.call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
            .await
    }

    /// Confirmations for a mined receipt, counting its own block as the first.
    pub async fn confirmations(&self, receipt: &TransactionReceipt) -> EvmResult<u64> {
        let mined_at = parse_quantity(&receipt.block_number)?;
        let head = u128::from(self.block_number().await?);
        Ok(u64::try_from(head.saturating_sub(mined_at) + 1).unwrap_or(u64::MAX))
    }
}

impl TransactionReceipt {
    /// ERC-20 transfers emitted by this transaction.
    pub fn token_transfers(&self) -> Vec<TokenTransfer> {
        self.logs
            .iter()
            .filter(|log| {
                log.topics.len() == 3 && log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC)
            })
            .filter_map(|log| {
                Some(TokenTransfer {
                    contract: log.address.to_ascii_lowercase(),
                    to: topic_address(&log.topics[2])?,
                    value: parse_quantity(&log.data).ok()?,
                })
            })
            .collect()
    }
}

/// Parse a `0x`-prefixed hex quantity or 32-byte word into a `u128`.
pub fn parse_quantity(value: &str) -> EvmResult<u128> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| EvmError::serialization_error(format!("not a hex quantity: {}", value)))?;
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(0);
    }
    if significant.len() > 32 {
        return Err(EvmError::serialization_error("quantity exceeds 128 bits"));
    }
    u128::from_str_radix(significant, 16)
        .map_err(|e| EvmError::serialization_error(format!("invalid hex quantity: {}", e)))
}

/// Last 20 bytes of an indexed address topic, lowercased.
fn topic_address(topic: &str) -> Option<String> {
    let digits = topic.strip_prefix("0x")?;
    if digits.len() != 64 {
        return None;
    }
    Some(format!("0x{}", digits[24..].to_ascii_lowercase()))
}
