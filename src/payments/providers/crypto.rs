//! Stablecoin adapter for EVM networks
//!
//! There is no provider API: a payment is a pending entry in an in-memory
//! arena that asks the payer to send an exact token amount to the merchant's
//! receiving address. A chain watcher posts HMAC-signed transfer
//! notifications, which are matched to pending entries by network, token and
//! amount. Confirmations come from the network's JSON-RPC endpoint.

use crate::chains::evm::{is_valid_address, is_valid_tx_hash, EvmClient, TransactionReceipt};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::http::DEFAULT_TIMEOUT_SECS;
use crate::payments::money::Money;
use crate::payments::signing::{verify_hex, HmacSha256};
use crate::payments::traits::PaymentAdapter;
use crate::payments::types::{
    NotifyData, NotifyResponse, NotifyStatus, PaymentOrderInfo, PaymentResponse, PaymentStatus,
    PaymentStatusResponse, RefundRequest, RefundResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const NAME: &str = "crypto";

const ACK_OK: &str = "OK";
const ACK_REJECTED: &str = "REJECTED";

/// Stablecoins are priced one-to-one against this currency
const PRICING_CURRENCY: &str = "USD";

/// How long finished or expired entries stay queryable
const RETENTION_SECS: i64 = 24 * 3600;

/// How long a settling transaction hash is remembered
const SETTLED_TX_RETENTION_SECS: i64 = 7 * 24 * 3600;

const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub contract: String,
    pub decimals: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub receiving_address: String,
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u64,
    pub tokens: Vec<TokenConfig>,
}

fn default_min_confirmations() -> u64 {
    12
}

impl NetworkConfig {
    fn token(&self, symbol: Option<&str>) -> Option<&TokenConfig> {
        match symbol {
            Some(symbol) => self
                .tokens
                .iter()
                .find(|t| t.symbol.eq_ignore_ascii_case(symbol)),
            None => self.tokens.first(),
        }
    }

    fn is_valid(&self) -> bool {
        self.chain_id > 0
            && !self.name.trim().is_empty()
            && url::Url::parse(&self.rpc_url).is_ok()
            && is_valid_address(&self.receiving_address)
            && self.min_confirmations > 0
            && !self.tokens.is_empty()
            && self
                .tokens
                .iter()
                .all(|t| is_valid_address(&t.contract) && (2..=36).contains(&t.decimals))
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub networks: Vec<NetworkConfig>,
    /// Shared secret for watcher notifications
    pub webhook_secret: String,
    /// How long a quoted amount stays reserved
    pub payment_ttl_secs: i64,
    pub timeout_secs: u64,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            networks: Vec::new(),
            webhook_secret: String::new(),
            payment_ttl_secs: 3600,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("networks", &self.networks)
            .field("payment_ttl_secs", &self.payment_ttl_secs)
            .finish_non_exhaustive()
    }
}

/// One quoted payment awaiting an on-chain transfer.
#[derive(Debug, Clone)]
pub struct PendingPayment {
    pub payment_id: String,
    pub order_id: String,
    pub network: String,
    pub token: String,
    pub amount: Money,
    pub base_units: u128,
    pub expires_at: DateTime<Utc>,
    /// Set once a confirmed transfer has been matched
    pub settled_tx: Option<String>,
}

impl PendingPayment {
    fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.settled_tx.is_none() && now < self.expires_at
    }
}

#[derive(Debug, Clone)]
struct SettledTx {
    payment_id: String,
    settled_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Ledger {
    payments: HashMap<String, PendingPayment>,
    /// Keyed by lower-cased transaction hash
    settled_txs: HashMap<String, SettledTx>,
}

/// Quoted payments keyed by payment id.
///
/// No two retained entries on the same network and token share an amount,
/// whether open, settled or expired, so a transfer's value identifies the
/// one payment it can settle. A transaction settles at most one payment.
#[derive(Debug, Default)]
pub struct PendingPayments {
    ledger: Mutex<Ledger>,
}

impl PendingPayments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a unique amount, bumping by one base unit on collision.
    pub fn reserve(
        &self,
        order_id: &str,
        network: &str,
        token: &str,
        amount: Money,
        base_units: u128,
        expires_at: DateTime<Utc>,
    ) -> PendingPayment {
        let mut ledger = self.ledger.lock();
        let mut units = base_units;
        while ledger
            .payments
            .values()
            .any(|p| p.network == network && p.token == token && p.base_units == units)
        {
            units += 1;
        }

        let payment = PendingPayment {
            payment_id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            network: network.to_string(),
            token: token.to_string(),
            amount,
            base_units: units,
            expires_at,
            settled_tx: None,
        };
        ledger
            .payments
            .insert(payment.payment_id.clone(), payment.clone());
        payment
    }

    pub fn get(&self, payment_id: &str) -> Option<PendingPayment> {
        self.ledger.lock().payments.get(payment_id).cloned()
    }

    /// Open entry expecting exactly `base_units` of `token` on `network`.
    pub fn find_open(
        &self,
        network: &str,
        token: &str,
        base_units: u128,
        now: DateTime<Utc>,
    ) -> Option<PendingPayment> {
        self.ledger
            .lock()
            .payments
            .values()
            .find(|p| {
                p.is_open(now) && p.network == network && p.token == token && p.base_units == base_units
            })
            .cloned()
    }

    /// Payment a transaction already settled, if any.
    pub fn settled_by(&self, tx_hash: &str) -> Option<String> {
        self.ledger
            .lock()
            .settled_txs
            .get(&tx_hash.to_ascii_lowercase())
            .map(|tx| tx.payment_id.clone())
    }

    /// Record the settling transaction.
    ///
    /// False if the payment is already settled or the transaction already
    /// settled another payment.
    pub fn settle(&self, payment_id: &str, tx_hash: &str, now: DateTime<Utc>) -> bool {
        let tx_key = tx_hash.to_ascii_lowercase();
        let mut ledger = self.ledger.lock();
        if ledger.settled_txs.contains_key(&tx_key) {
            return false;
        }
        match ledger.payments.get_mut(payment_id) {
            Some(entry) if entry.settled_tx.is_none() => {
                entry.settled_tx = Some(tx_key.clone());
            }
            _ => return false,
        }
        ledger.settled_txs.insert(
            tx_key,
            SettledTx {
                payment_id: payment_id.to_string(),
                settled_at: now,
            },
        );
        true
    }

    /// Drop entries past their retention window; returns how many payments went.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let retention = ChronoDuration::seconds(RETENTION_SECS);
        let tx_retention = ChronoDuration::seconds(SETTLED_TX_RETENTION_SECS);
        let mut ledger = self.ledger.lock();
        let before = ledger.payments.len();
        ledger.payments.retain(|_, p| now < p.expires_at + retention);
        ledger
            .settled_txs
            .retain(|_, tx| now < tx.settled_at + tx_retention);
        before - ledger.payments.len()
    }

    pub fn len(&self) -> usize {
        self.ledger.lock().payments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.lock().payments.is_empty()
    }
}

pub struct CryptoAdapter {
    config: CryptoConfig,
    clients: HashMap<String, EvmClient>,
    webhook_mac: HmacSha256,
    pending: PendingPayments,
}

impl CryptoAdapter {
    pub fn new(config: CryptoConfig) -> PaymentResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut clients = HashMap::new();
        for network in &config.networks {
            clients.insert(network.name.clone(), EvmClient::new(&network.rpc_url, timeout)?);
        }
        let webhook_mac = HmacSha256::new(config.webhook_secret.as_bytes());
        Ok(Self {
            config,
            clients,
            webhook_mac,
            pending: PendingPayments::new(),
        })
    }

    pub fn from_value(value: serde_json::Value) -> PaymentResult<Self> {
        let config: CryptoConfig = serde_json::from_value(value)
            .map_err(|e| PaymentError::config(format!("invalid crypto config: {}", e)))?;
        Self::new(config)
    }

    pub fn pending(&self) -> &PendingPayments {
        &self.pending
    }

    fn network(&self, name: Option<&str>) -> PaymentResult<&NetworkConfig> {
        let found = match name {
            Some(name) => self
                .config
                .networks
                .iter()
                .find(|n| n.name.eq_ignore_ascii_case(name)),
            None => self.config.networks.first(),
        };
        found.ok_or_else(|| {
            PaymentError::invalid_request(format!(
                "unknown network '{}'",
                name.unwrap_or_default()
            ))
        })
    }

    fn client(&self, network: &NetworkConfig) -> PaymentResult<&EvmClient> {
        self.clients
            .get(&network.name)
            .ok_or_else(|| PaymentError::config(format!("no RPC client for {}", network.name)))
    }

    /// Quote and reserve a transfer for `order`.
    pub fn quote(&self, order: &PaymentOrderInfo, now: DateTime<Utc>) -> PaymentResult<PaymentResponse> {
        if order.amount.currency.as_str() != PRICING_CURRENCY {
            return Err(PaymentError::invalid_request(format!(
                "{} payments are priced in {}, got {}",
                NAME, PRICING_CURRENCY, order.amount.currency
            )));
        }
        if order.amount.is_zero() {
            return Err(PaymentError::invalid_request("amount must be greater than zero"));
        }
        let network = self.network(order.metadata_str("network"))?;
        let token = network.token(order.metadata_str("token")).ok_or_else(|| {
            PaymentError::invalid_request(format!(
                "token '{}' is not accepted on {}",
                order.metadata_str("token").unwrap_or_default(),
                network.name
            ))
        })?;

        let evicted = self.pending.evict_expired(now);
        if evicted > 0 {
            debug!("Evicted {} expired {} payments", evicted, NAME);
        }

        let base_units = order.amount.to_base_units(token.decimals)?;
        let expires_at = now + ChronoDuration::seconds(self.config.payment_ttl_secs);
        let payment = self.pending.reserve(
            &order.order_id,
            &network.name,
            &token.symbol,
            order.amount.clone(),
            base_units,
            expires_at,
        );
        if payment.base_units != base_units {
            info!(
                "{} amount for order {} bumped to {} base units to stay unique",
                NAME, order.order_id, payment.base_units
            );
        }

        let uri = payment_uri(network, token, payment.base_units);
        info!(
            "{} payment quoted: order={} payment={} network={} token={} units={}",
            NAME, order.order_id, payment.payment_id, network.name, token.symbol, payment.base_units
        );
        Ok(PaymentResponse {
            success: true,
            transaction_id: Some(payment.payment_id.clone()),
            qr_code: Some(uri),
            provider_data: Some(serde_json::json!({
                "network": network.name,
                "chainId": network.chain_id,
                "token": token.symbol,
                "tokenContract": token.contract,
                "receivingAddress": network.receiving_address,
                "amount": order.amount.to_decimal_string(),
                "amountBaseUnits": payment.base_units.to_string(),
                "expiresAt": payment.expires_at.to_rfc3339(),
            })),
            ..Default::default()
        })
    }

    /// Confirmation-aware status of an on-chain transaction.
    async fn receipt_status(
        &self,
        network: &NetworkConfig,
        tx_hash: &str,
    ) -> PaymentResult<Option<(PaymentStatus, TransactionReceipt)>> {
        let client = self.client(network)?;
        let Some(receipt) = client.transaction_receipt(tx_hash).await? else {
            return Ok(None);
        };
        let status = match receipt.status.as_deref() {
            Some("0x1") => {
                let confirmations = client.confirmations(&receipt).await?;
                debug!(
                    "{} tx {} on {} has {} confirmations",
                    NAME, tx_hash, network.name, confirmations
                );
                if confirmations >= network.min_confirmations {
                    PaymentStatus::Completed
                } else {
                    PaymentStatus::Pending
                }
            }
            Some(native) => map_status(native),
            None => PaymentStatus::Pending,
        };
        Ok(Some((status, receipt)))
    }

    async fn query_tx_hash(&self, tx_hash: &str) -> PaymentResult<PaymentStatusResponse> {
        for network in &self.config.networks {
            if let Some((status, receipt)) = self.receipt_status(network, tx_hash).await? {
                let receiving = network.receiving_address.to_ascii_lowercase();
                let amount = receipt
                    .token_transfers()
                    .into_iter()
                    .filter(|t| t.to == receiving)
                    .find_map(|t| {
                        let token = network
                            .tokens
                            .iter()
                            .find(|c| c.contract.eq_ignore_ascii_case(&t.contract))?;
                        from_base_units(t.value, token.decimals).ok()
                    });
                return Ok(PaymentStatusResponse::new(status, tx_hash).with_amount(amount));
            }
        }
        Ok(PaymentStatusResponse::new(PaymentStatus::Pending, tx_hash))
    }

    async fn try_query(&self, transaction_id: &str) -> PaymentResult<PaymentStatusResponse> {
        if is_valid_tx_hash(transaction_id) {
            return self.query_tx_hash(transaction_id).await;
        }

        let now = Utc::now();
        let payment = self
            .pending
            .get(transaction_id)
            .ok_or_else(|| PaymentError::not_found(format!("unknown payment {}", transaction_id)))?;

        if let Some(tx_hash) = &payment.settled_tx {
            let network = self.network(Some(&payment.network))?;
            let status = match self.receipt_status(network, tx_hash).await? {
                Some((status, _)) => status,
                None => PaymentStatus::Pending,
            };
            return Ok(PaymentStatusResponse::new(status, transaction_id)
                .with_amount(Some(payment.amount)));
        }

        let status = if now >= payment.expires_at {
            PaymentStatus::Cancelled
        } else {
            PaymentStatus::Pending
        };
        Ok(PaymentStatusResponse::new(status, transaction_id).with_amount(Some(payment.amount)))
    }

    async fn try_notify(&self, data: &NotifyData) -> PaymentResult<NotifyResponse> {
        let signature = data
            .header(SIGNATURE_HEADER)
            .ok_or_else(|| PaymentError::signature("missing X-Signature header"))?;
        if !verify_hex(&self.webhook_mac, data.body.as_bytes(), signature) {
            return Err(PaymentError::signature("notification signature mismatch"));
        }

        let event: TransferEvent = serde_json::from_str(&data.body)?;
        let network = self.network(Some(&event.network))?;
        if !event.to.eq_ignore_ascii_case(&network.receiving_address) {
            info!("Ignoring {} transfer to foreign address {}", NAME, event.to);
            return Ok(NotifyResponse::ignored(ACK_OK));
        }
        let token = network
            .tokens
            .iter()
            .find(|t| {
                t.contract.eq_ignore_ascii_case(&event.token_contract)
                    || t.symbol.eq_ignore_ascii_case(&event.token_contract)
            })
            .ok_or_else(|| PaymentError::invalid_request("transfer of an unaccepted token"))?;
        let value: u128 = event
            .value
            .parse()
            .map_err(|_| PaymentError::invalid_request("transfer value is not an integer"))?;
        if !is_valid_tx_hash(&event.tx_hash) {
            return Err(PaymentError::invalid_request("malformed transaction hash"));
        }
        let tx_hash = event.tx_hash.to_ascii_lowercase();

        if let Some(payment_id) = self.pending.settled_by(&tx_hash) {
            info!(
                "{} transfer {} already settled payment {}",
                NAME, tx_hash, payment_id
            );
            return Ok(NotifyResponse::ignored(ACK_OK));
        }

        let now = Utc::now();
        let Some(payment) = self.pending.find_open(&network.name, &token.symbol, value, now) else {
            warn!(
                "{} transfer {} of {} {} matches no open payment",
                NAME, tx_hash, value, token.symbol
            );
            return Ok(NotifyResponse::ignored(ACK_OK));
        };

        // The chain is the source of truth; the watcher only says where to look.
        let client = self.client(network)?;
        let Some(receipt) = client.transaction_receipt(&tx_hash).await? else {
            return Err(PaymentError::invalid_request(format!(
                "transfer {} is not mined yet",
                tx_hash
            )));
        };
        if receipt.status.as_deref() != Some("0x1") {
            info!(
                "{} transfer {} did not succeed on chain (status {:?})",
                NAME, tx_hash, receipt.status
            );
            return Ok(NotifyResponse::ignored(ACK_OK));
        }
        let receiving = network.receiving_address.to_ascii_lowercase();
        let contract = token.contract.to_ascii_lowercase();
        let on_chain = receipt
            .token_transfers()
            .into_iter()
            .any(|t| t.contract == contract && t.to == receiving && t.value == value);
        if !on_chain {
            warn!(
                "{} transfer {} has no matching {} transfer of {} in its receipt",
                NAME, tx_hash, token.symbol, value
            );
            return Ok(NotifyResponse::ignored(ACK_OK));
        }

        let confirmations = client.confirmations(&receipt).await?;
        if let Some(reported) = event.confirmations {
            debug!(
                "{} transfer {}: watcher reported {} confirmations, chain has {}",
                NAME, tx_hash, reported, confirmations
            );
        }
        if confirmations < network.min_confirmations {
            // The watcher retries; the entry stays open for it.
            return Err(PaymentError::invalid_request(format!(
                "transfer has {} of {} confirmations",
                confirmations, network.min_confirmations
            )));
        }

        if !self.pending.settle(&payment.payment_id, &tx_hash, now) {
            return Ok(NotifyResponse::ignored(ACK_OK));
        }
        info!(
            "{} payment settled: order={} payment={} tx={}",
            NAME, payment.order_id, payment.payment_id, tx_hash
        );
        Ok(NotifyResponse::accepted(
            payment.order_id,
            payment.payment_id,
            Some(NotifyStatus::Completed),
            ACK_OK,
        )
        .with_amount(Some(payment.amount))
        .with_provider_data(serde_json::json!({
            "network": network.name,
            "txHash": tx_hash,
            "confirmations": confirmations,
        })))
    }
}

#[async_trait]
impl PaymentAdapter for CryptoAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_payment(&self, order: &PaymentOrderInfo) -> PaymentResponse {
        self.quote(order, Utc::now()).unwrap_or_else(|e| {
            warn!("{} quote failed: order={} error={}", NAME, order.order_id, e);
            PaymentResponse::from_error(&e)
        })
    }

    async fn query_payment(&self, transaction_id: &str) -> PaymentStatusResponse {
        self.try_query(transaction_id).await.unwrap_or_else(|e| {
            warn!("{} query failed: id={} error={}", NAME, transaction_id, e);
            PaymentStatusResponse::from_error(&e)
        })
    }

    async fn handle_notify(&self, data: &NotifyData) -> NotifyResponse {
        self.try_notify(data).await.unwrap_or_else(|e| {
            warn!("{} notification rejected: {}", NAME, e);
            NotifyResponse::rejected(ACK_REJECTED, e.to_string())
        })
    }

    async fn refund(&self, request: &RefundRequest) -> RefundResponse {
        let err = PaymentError::unsupported(NAME, "on-chain transfers cannot be refunded");
        warn!("{} refund refused: id={}", NAME, request.transaction_id);
        RefundResponse::from_error(&err)
    }

    fn validate_config(&self) -> bool {
        !self.config.networks.is_empty()
            && !self.config.webhook_secret.trim().is_empty()
            && self.config.payment_ttl_secs > 0
            && self.config.networks.iter().all(NetworkConfig::is_valid)
    }

    fn client_config(&self) -> serde_json::Value {
        let networks: Vec<_> = self
            .config
            .networks
            .iter()
            .map(|n| {
                serde_json::json!({
                    "name": n.name,
                    "chainId": n.chain_id,
                    "receivingAddress": n.receiving_address,
                    "minConfirmations": n.min_confirmations,
                    "tokens": n.tokens.iter().map(|t| serde_json::json!({
                        "symbol": t.symbol,
                        "contract": t.contract,
                        "decimals": t.decimals,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        serde_json::json!({
            "provider": NAME,
            "currency": PRICING_CURRENCY,
            "networks": networks,
        })
    }

    fn notify_failure_ack(&self) -> &str {
        ACK_REJECTED
    }
}

/// Receipt status word -> canonical status, before confirmations are counted.
pub fn map_status(native: &str) -> PaymentStatus {
    match native {
        "0x1" => PaymentStatus::Completed,
        "0x0" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

/// EIP-681 ERC-20 transfer request.
fn payment_uri(network: &NetworkConfig, token: &TokenConfig, base_units: u128) -> String {
    format!(
        "ethereum:{}@{}/transfer?address={}&uint256={}",
        token.contract, network.chain_id, network.receiving_address, base_units
    )
}

/// Token base units back to USD cents; sub-cent remainders are rejected.
fn from_base_units(value: u128, decimals: u32) -> PaymentResult<Money> {
    let currency = crate::payments::money::Currency::new(PRICING_CURRENCY)?;
    let exponent = currency.exponent();
    let scale = 10u128.pow(decimals.saturating_sub(exponent));
    if value % scale != 0 {
        return Err(PaymentError::invalid_request("transfer has sub-cent precision"));
    }
    let cents = u64::try_from(value / scale)
        .map_err(|_| PaymentError::invalid_request("transfer value overflows"))?;
    Ok(Money::new(cents, currency))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferEvent {
    network: String,
    tx_hash: String,
    /// Contract address or token symbol
    #[serde(alias = "token")]
    token_contract: String,
    to: String,
    /// Integer base units as a decimal string
    value: String,
    /// Watcher's own count, logged only
    #[serde(default)]
    confirmations: Option<u64>,
}
