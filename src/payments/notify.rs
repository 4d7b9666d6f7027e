//! Shared pieces of the notification ingestion path
//!
//! Each adapter runs the same sequence: extract signature inputs, verify,
//! decode (decrypting first when the provider encrypts), normalize. Only the
//! mechanical helpers live here; verification itself stays in each adapter.

use crate::payments::error::{PaymentError, PaymentResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Default replay window for timestamped signatures
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Decode an `application/x-www-form-urlencoded` body into sorted pairs.
///
/// Duplicate keys are rejected: a signed form must be unambiguous.
pub fn parse_form_body(body: &str) -> PaymentResult<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(body.trim().as_bytes()) {
        if params.insert(key.to_string(), value.to_string()).is_some() {
            return Err(PaymentError::invalid_request(format!(
                "duplicate form field '{}'",
                key
            )));
        }
    }
    Ok(params)
}

/// Check a Unix-seconds timestamp lies within `tolerance_secs` of `now`.
///
/// Timestamps whose distance from `now` does not fit in an `i64` are out of
/// tolerance. A negative tolerance accepts nothing.
pub fn within_tolerance(timestamp: &str, now: DateTime<Utc>, tolerance_secs: i64) -> bool {
    let Ok(tolerance) = u64::try_from(tolerance_secs) else {
        return false;
    };
    match timestamp.trim().parse::<i64>() {
        Ok(ts) => now
            .timestamp()
            .checked_sub(ts)
            .is_some_and(|skew| skew.unsigned_abs() <= tolerance),
        Err(_) => false,
    }
}

/// Content type matching the shape of an acknowledgement body.
pub fn ack_content_type(ack: &str) -> &'static str {
    let trimmed = ack.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        "application/json"
    } else if trimmed.starts_with('<') {
        "application/xml"
    } else {
        "text/plain; charset=utf-8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_form_body() {
        let params = parse_form_body("b=2&a=hello+world&c=%E4%B8%AD").unwrap();
        let keys: Vec<_> = params.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(params["a"], "hello world");
        assert_eq!(params["c"], "中");
        assert!(parse_form_body("a=1&a=2").is_err());
    }

    #[test]
    fn test_within_tolerance() {
        let now = Utc::now();
        let ts = now.timestamp().to_string();
        assert!(within_tolerance(&ts, now, 300));
        let old = (now.timestamp() - 301).to_string();
        assert!(!within_tolerance(&old, now, 300));
        assert!(!within_tolerance("yesterday", now, 300));
    }

    #[test]
    fn test_within_tolerance_extreme_timestamps() {
        let now = Utc::now();
        assert!(!within_tolerance(&i64::MIN.to_string(), now, 300));
        assert!(!within_tolerance(&i64::MAX.to_string(), now, 300));
        assert!(!within_tolerance(&i64::MIN.to_string(), now, i64::MAX));
        assert!(!within_tolerance("99999999999999999999", now, 300));

        let ahead = (now.timestamp() + 300).to_string();
        assert!(within_tolerance(&ahead, now, 300));
        assert!(!within_tolerance(&ahead, now, -1));
    }

    #[test]
    fn test_ack_content_type() {
        assert_eq!(ack_content_type("{\"received\":true}"), "application/json");
        assert_eq!(ack_content_type("<xml></xml>"), "application/xml");
        assert_eq!(ack_content_type("success"), "text/plain; charset=utf-8");
    }
}
