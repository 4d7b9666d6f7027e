//! EVM chain access for stablecoin settlement

pub mod client;
pub mod errors;

pub use client::{EvmClient, TokenTransfer, TransactionReceipt};
pub use errors::{EvmError, EvmResult};

use regex::Regex;
use std::sync::OnceLock;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid address pattern"))
}

fn tx_hash_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("valid tx hash pattern"))
}

pub fn is_valid_address(address: &str) -> bool {
    address_pattern().is_match(address)
}

pub fn is_valid_tx_hash(hash: &str) -> bool {
    tx_hash_pattern().is_match(hash)
}
