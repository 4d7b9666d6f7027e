//! Minor-unit money model
//!
//! Amounts are carried as integer minor units everywhere in shared code.
//! Adapters convert to a provider's decimal-string format with
//! [`Money::to_decimal_string`] at the last moment, and back with
//! [`Money::from_decimal_str`] when parsing provider payloads.

use crate::payments::error::{PaymentError, PaymentResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// ISO-4217-like currency code (three ASCII letters, upper case).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> PaymentResult<Self> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::invalid_request(format!(
                "invalid currency code '{}'",
                code
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of decimal places between the major and minor unit.
    pub fn exponent(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" | "XAF" | "XOF" => 0,
            "BHD" | "KWD" | "OMR" | "JOD" | "TND" | "LYD" | "IQD" => 3,
            _ => 2,
        }
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Currency::new(&code).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    pub amount_minor_units: u64,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount_minor_units: u64, currency: Currency) -> Self {
        Self {
            amount_minor_units,
            currency,
        }
    }

    /// Convenience constructor that validates the currency code.
    pub fn of(amount_minor_units: u64, currency: &str) -> PaymentResult<Self> {
        Ok(Self::new(amount_minor_units, Currency::new(currency)?))
    }

    pub fn is_zero(&self) -> bool {
        self.amount_minor_units == 0
    }

    /// Major-unit decimal string, e.g. `1234 USD` -> `"12.34"`, `500 JPY` -> `"500"`.
    pub fn to_decimal_string(&self) -> String {
        let exponent = self.currency.exponent();
        if exponent == 0 {
            return self.amount_minor_units.to_string();
        }
        let scale = 10u64.pow(exponent);
        format!(
            "{}.{:0width$}",
            self.amount_minor_units / scale,
            self.amount_minor_units % scale,
            width = exponent as usize
        )
    }

    /// Parse a provider decimal string without going through floating point.
    ///
    /// Rejects more fractional digits than the currency supports, signs and
    /// anything that is not plain ASCII digits around a single dot.
    pub fn from_decimal_str(value: &str, currency: Currency) -> PaymentResult<Self> {
        let value = value.trim();
        let exponent = currency.exponent() as usize;
        let (whole, fraction, has_point) = match value.split_once('.') {
            Some((w, f)) => (w, f, true),
            None => (value, "", false),
        };

        let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        let dangling_point = has_point && fraction.is_empty();
        if whole.is_empty() || dangling_point || !digits_only(whole) || !digits_only(fraction) {
            return Err(PaymentError::invalid_request(format!(
                "invalid decimal amount '{}'",
                value
            )));
        }
        if fraction.len() > exponent {
            return Err(PaymentError::invalid_request(format!(
                "amount '{}' has more than {} decimal places for {}",
                value, exponent, currency
            )));
        }

        let scale = 10u64.pow(exponent as u32);
        let whole: u64 = whole
            .parse()
            .map_err(|_| PaymentError::invalid_request(format!("amount '{}' overflows", value)))?;
        let fraction: u64 = if fraction.is_empty() {
            0
        } else {
            format!("{:0<width$}", fraction, width = exponent)
                .parse()
                .map_err(|_| {
                    PaymentError::invalid_request(format!("invalid decimal amount '{}'", value))
                })?
        };

        let minor = whole
            .checked_mul(scale)
            .and_then(|w| w.checked_add(fraction))
            .ok_or_else(|| PaymentError::invalid_request(format!("amount '{}' overflows", value)))?;

        Ok(Self::new(minor, currency))
    }

    /// Rescale to an on-chain token's base units (`decimals` digits after the point).
    pub fn to_base_units(&self, decimals: u32) -> PaymentResult<u128> {
        let exponent = self.currency.exponent();
        if decimals < exponent {
            return Err(PaymentError::invalid_request(format!(
                "token precision {} is below {} precision {}",
                decimals, self.currency, exponent
            )));
        }
        (self.amount_minor_units as u128)
            .checked_mul(10u128.pow(decimals - exponent))
            .ok_or_else(|| PaymentError::invalid_request("amount overflows token units"))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency)
    }
}
