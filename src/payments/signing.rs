//! Request signing and response verification primitives
//!
//! Adapters decide *what* gets signed (the canonical string, header layout,
//! encodings); the [`Signer`] and [`Verifier`] implementations here decide
//! *how*. Two families ship with the crate:
//!
//! - [`HmacSha256`]: shared-secret MAC, used for both signing and verifying.
//! - [`Ed25519Signer`] / [`Ed25519Verifier`]: asymmetric merchant/platform keys.
//!
//! Any other algorithm (for example RSA-SHA256) plugs in by implementing the
//! two traits; adapter code does not change.

use crate::payments::error::{PaymentError, PaymentResult};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;

type HmacSha256Mac = Hmac<Sha256>;

/// Produces a signature over a canonical message.
pub trait Signer: Send + Sync {
    /// Algorithm label as providers spell it in a `sign_type`-style field
    fn algorithm(&self) -> &'static str;

    fn sign(&self, message: &[u8]) -> PaymentResult<Vec<u8>>;
}

/// Checks a signature over a canonical message.
pub trait Verifier: Send + Sync {
    fn algorithm(&self) -> &'static str;

    /// Must compare in constant time where the scheme allows it.
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

/// Build the canonical signing string.
///
/// Keys are sorted (the `BTreeMap` guarantees it), keys listed in `exclude`
/// and empty values are skipped, and pairs are joined as
/// `key{kv_sep}value` with `pair_sep` between pairs.
pub fn canonical_string(
    params: &BTreeMap<String, String>,
    pair_sep: &str,
    kv_sep: &str,
    exclude: &[&str],
) -> String {
    params
        .iter()
        .filter(|(k, v)| !v.is_empty() && !exclude.contains(&k.as_str()))
        .map(|(k, v)| format!("{}{}{}", k, kv_sep, v))
        .collect::<Vec<_>>()
        .join(pair_sep)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_base64(value: &str) -> PaymentResult<Vec<u8>> {
    BASE64
        .decode(value.trim())
        .map_err(|e| PaymentError::signature(format!("invalid base64: {}", e)))
}

/// Verify a hex-encoded signature; malformed hex is simply a mismatch.
pub fn verify_hex(verifier: &dyn Verifier, message: &[u8], signature_hex: &str) -> bool {
    match hex::decode(signature_hex.trim()) {
        Ok(sig) => verifier.verify(message, &sig),
        Err(_) => false,
    }
}

/// Verify a base64-encoded signature; malformed base64 is simply a mismatch.
pub fn verify_base64(verifier: &dyn Verifier, message: &[u8], signature_b64: &str) -> bool {
    match BASE64.decode(signature_b64.trim()) {
        Ok(sig) => verifier.verify(message, &sig),
        Err(_) => false,
    }
}

/// Shared-secret HMAC-SHA256.
#[derive(Clone)]
pub struct HmacSha256 {
    key: Vec<u8>,
}

impl HmacSha256 {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> PaymentResult<HmacSha256Mac> {
        <HmacSha256Mac as Mac>::new_from_slice(&self.key)
            .map_err(|e| PaymentError::config(format!("invalid HMAC key: {}", e)))
    }

    /// Lower-case hex MAC, the encoding most webhook senders use.
    pub fn sign_hex(&self, message: &[u8]) -> PaymentResult<String> {
        Ok(hex::encode(self.sign(message)?))
    }
}

impl fmt::Debug for HmacSha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HmacSha256(<redacted>)")
    }
}

impl Signer for HmacSha256 {
    fn algorithm(&self) -> &'static str {
        "HMAC-SHA256"
    }

    fn sign(&self, message: &[u8]) -> PaymentResult<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(message);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl Verifier for HmacSha256 {
    fn algorithm(&self) -> &'static str {
        "HMAC-SHA256"
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self.mac() {
            Ok(mut mac) => {
                mac.update(message);
                mac.verify_slice(signature).is_ok()
            }
            Err(_) => false,
        }
    }
}

fn key_bytes_32(encoded: &str, what: &str) -> PaymentResult<[u8; 32]> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| PaymentError::config(format!("{} is not valid base64: {}", what, e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        PaymentError::config(format!("{} must be 32 bytes, got {}", what, b.len()))
    })
}

/// Merchant-side asymmetric signer.
///
/// Never implements `Serialize` or prints key material.
pub struct Ed25519Signer {
    signing_key: ed25519_dalek::SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&seed),
        }
    }

    /// Parse a base64-encoded 32-byte seed.
    pub fn from_base64(seed_b64: &str) -> PaymentResult<Self> {
        Ok(Self::from_seed(key_bytes_32(seed_b64, "signing key")?))
    }

    pub fn verifier(&self) -> Ed25519Verifier {
        Ed25519Verifier {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.signing_key.verifying_key().as_bytes())
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Signer(pub={})", self.public_key_base64())
    }
}

impl Signer for Ed25519Signer {
    fn algorithm(&self) -> &'static str {
        "ED25519"
    }

    fn sign(&self, message: &[u8]) -> PaymentResult<Vec<u8>> {
        use ed25519_dalek::Signer as _;
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }
}

/// Platform-side public key used to check provider signatures.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl Ed25519Verifier {
    pub fn from_base64(public_key_b64: &str) -> PaymentResult<Self> {
        let bytes = key_bytes_32(public_key_b64, "public key")?;
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|e| PaymentError::config(format!("invalid public key: {}", e)))?;
        Ok(Self { verifying_key })
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.verifying_key.as_bytes())
    }
}

impl Verifier for Ed25519Verifier {
    fn algorithm(&self) -> &'static str {
        "ED25519"
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match ed25519_dalek::Signature::from_slice(signature) {
            Ok(sig) => self.verifying_key.verify_strict(message, &sig).is_ok(),
            Err(_) => false,
        }
    }
}

/// Decrypt an AES-256-GCM payload (ciphertext includes the 16-byte tag).
pub fn decrypt_aes_256_gcm(
    key: &[u8],
    nonce: &[u8],
    associated_data: &[u8],
    ciphertext: &[u8],
) -> PaymentResult<Vec<u8>> {
    if nonce.len() != 12 {
        return Err(PaymentError::decryption(format!(
            "nonce must be 12 bytes, got {}",
            nonce.len()
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| PaymentError::decryption(format!("invalid AES-256 key: {}", e)))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: associated_data,
            },
        )
        .map_err(|_| PaymentError::decryption("authentication tag mismatch"))
}

/// Counterpart of [`decrypt_aes_256_gcm`]; providers encrypt, we only need
/// this to build fixtures and sandbox payloads.
pub fn encrypt_aes_256_gcm(
    key: &[u8],
    nonce: &[u8],
    associated_data: &[u8],
    plaintext: &[u8],
) -> PaymentResult<Vec<u8>> {
    if nonce.len() != 12 {
        return Err(PaymentError::decryption(format!(
            "nonce must be 12 bytes, got {}",
            nonce.len()
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| PaymentError::decryption(format!("invalid AES-256 key: {}", e)))?;
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| PaymentError::decryption("encryption failed"))
}

/// Random alphanumeric string for request nonces.
pub fn nonce_str(len: usize) -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_canonical_string_sorted_and_filtered() {
        let p = params(&[
            ("total_amount", "12.34"),
            ("app_id", "2021"),
            ("sign", "abc"),
            ("empty", ""),
            ("biz", "x=y"),
        ]);
        assert_eq!(
            canonical_string(&p, "&", "=", &["sign"]),
            "app_id=2021&biz=x=y&total_amount=12.34"
        );
    }

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let mac = HmacSha256::new("Jefe");
        assert_eq!(
            mac.sign_hex(b"what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hmac_rejects_tampered_signature() {
        let mac = HmacSha256::new("whsec_test");
        let mut sig = mac.sign(b"payload").unwrap();
        assert!(mac.verify(b"payload", &sig));
        sig[0] ^= 0x01;
        assert!(!mac.verify(b"payload", &sig));
        assert!(!verify_hex(&mac, b"payload", "not-hex"));
    }

    #[test]
    fn test_ed25519_round_trip_and_tamper() {
        let signer = Ed25519Signer::from_seed([7u8; 32]);
        let verifier = Ed25519Verifier::from_base64(&signer.public_key_base64()).unwrap();
        let sig = signer.sign(b"app_id=1&total_amount=12.34").unwrap();
        assert!(verifier.verify(b"app_id=1&total_amount=12.34", &sig));
        assert!(!verifier.verify(b"app_id=1&total_amount=12.35", &sig));
        let b64 = encode_base64(&sig);
        assert!(verify_base64(&verifier, b"app_id=1&total_amount=12.34", &b64));
        assert!(!verify_base64(&verifier, b"app_id=1&total_amount=12.34", "@@@"));
    }

    #[test]
    fn test_ed25519_key_length_checked() {
        assert!(Ed25519Signer::from_base64(&encode_base64(&[1u8; 16])).is_err());
        assert!(Ed25519Verifier::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_aes_gcm_round_trip() {
        let key = [3u8; 32];
        let nonce = b"0123456789ab";
        let ct = encrypt_aes_256_gcm(&key, nonce, b"transaction", b"{\"a\":1}").unwrap();
        let pt = decrypt_aes_256_gcm(&key, nonce, b"transaction", &ct).unwrap();
        assert_eq!(pt, b"{\"a\":1}");
        assert!(decrypt_aes_256_gcm(&key, nonce, b"other", &ct).is_err());
        assert!(decrypt_aes_256_gcm(&key, b"short", b"transaction", &ct).is_err());
    }

    #[test]
    fn test_nonce_str_length() {
        let n = nonce_str(32);
        assert_eq!(n.len(), 32);
        assert!(n.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
