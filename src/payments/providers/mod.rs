//! Payment adapter implementations
//!
//! One module per provider family; each implements `PaymentAdapter`.

pub mod alipay;
pub mod card;
pub mod crypto;
pub mod paypal;
pub mod wechat;

pub use alipay::AlipayAdapter;
pub use card::CardAdapter;
pub use crypto::CryptoAdapter;
pub use paypal::PayPalAdapter;
pub use wechat::WeChatAdapter;
