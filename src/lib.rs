//! paybridge: one payment contract in front of card, PayPal, Alipay, WeChat
//! Pay and on-chain stablecoin settlement.

pub mod chains;
pub mod config;
pub mod payments;

#[cfg(feature = "cache")]
pub mod cache;

#[cfg(feature = "server")]
pub mod api;
