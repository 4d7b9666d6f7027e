//! Payment adapter layer
//!
//! One contract in front of card processors, wallet networks and on-chain
//! stablecoin settlement, so calling code never branches on the provider.

pub mod dedup;
pub mod error;
pub mod http;
pub mod money;
pub mod notify;
pub mod providers;
pub mod registry;
pub mod service;
pub mod signing;
pub mod traits;
pub mod types;

pub use error::{PaymentError, PaymentResult};
pub use money::{Currency, Money};
pub use registry::AdapterRegistry;
pub use service::{NotifyHandler, NotifyOutcome, PaymentService};
pub use traits::PaymentAdapter;
pub use types::{
    NotifyData, NotifyResponse, NotifyStatus, PaymentOrderInfo, PaymentResponse, PaymentStatus,
    PaymentStatusResponse, RefundRequest, RefundResponse, RefundStatus,
};
