//! Request signing
//!
//! HMAC-SHA256 over the exact body bytes, hex encoded. The same key is shared
//! by the agent and the collector.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// HTTP header carrying the signature
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// Signature verification errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signing is not configured")]
    Disabled,

    #[error("signature is not valid hex")]
    Malformed,

    #[error("signature does not match body")]
    Mismatch,
}

/// Signs and verifies payloads with a shared secret
#[derive(Clone, Default)]
pub struct SignManager {
    key: Option<Vec<u8>>,
}

impl std::fmt::Debug for SignManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignManager")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl SignManager {
    /// An empty key disables signing
    pub fn new(key: &str) -> Self {
        let key = if key.is_empty() {
            None
        } else {
            Some(key.as_bytes().to_vec())
        };
        Self { key }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    fn digest(key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(key).ok()?;
        mac.update(data);
        Some(mac.finalize().into_bytes().to_vec())
    }

    /// Hex signature of `data`, or `None` when signing is disabled
    pub fn sign(&self, data: &[u8]) -> Option<String> {
        self.key
            .as_deref()
            .and_then(|key| Self::digest(key, data))
            .map(hex::encode)
    }

    /// Check `signature` against `data`. Returns the recomputed signature so
    /// the caller can echo it back.
    ///
    /// Always fails when signing is disabled.
    pub fn verify(&self, data: &[u8], signature: &str) -> Result<String, SignatureError> {
        let key = self.key.as_deref().ok_or(SignatureError::Disabled)?;
        let provided = hex::decode(signature.trim()).map_err(|_| SignatureError::Malformed)?;
        let expected = Self::digest(key, data).ok_or(SignatureError::Disabled)?;

        if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            Ok(hex::encode(expected))
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}
