//! Chunked RSA payload encryption
//!
//! RSA PKCS#1 v1.5 can only seal `key_size - 11` bytes at a time, so the
//! payload is split into chunks of that size and each chunk is encrypted on
//! its own. Every ciphertext chunk is exactly `key_size` bytes, which is how
//! the receiver finds the boundaries again.

use rand::thread_rng;
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// PKCS#1 v1.5 padding overhead per chunk
pub const PKCS1_PADDING: usize = 11;

/// Default modulus size for generated keys
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Encryption errors
#[derive(Debug, Error)]
pub enum CryptError {
    #[error("failed to read key file {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse key: {0}")]
    KeyFormat(String),

    #[error("ciphertext length {len} is not a multiple of the key size {size}")]
    ChunkLength { len: usize, size: usize },

    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),
}

fn read_pem(path: &Path) -> Result<String, CryptError> {
    fs::read_to_string(path).map_err(|source| CryptError::KeyFile {
        path: path.display().to_string(),
        source,
    })
}

/// Encrypts outbound payloads with the collector's public key
#[derive(Debug, Clone, Default)]
pub struct EncryptManager {
    key: Option<RsaPublicKey>,
}

impl EncryptManager {
    pub fn new(key: Option<RsaPublicKey>) -> Self {
        Self { key }
    }

    /// Load a PKCS#1 PEM public key. `None` disables encryption.
    pub fn from_pem_file(path: Option<&Path>) -> Result<Self, CryptError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let pem = read_pem(path)?;
        let key = RsaPublicKey::from_pkcs1_pem(&pem)
            .map_err(|e| CryptError::KeyFormat(e.to_string()))?;
        debug!(path = %path.display(), bits = key.size() * 8, "Loaded public key");
        Ok(Self::new(Some(key)))
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypt `data` chunk by chunk. Passes the data through unchanged when
    /// no key is configured.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptError> {
        let Some(key) = &self.key else {
            return Ok(data.to_vec());
        };

        let size = key.size();
        let chunk_size = size - PKCS1_PADDING;
        let mut rng = thread_rng();
        let mut out = Vec::with_capacity(data.len().div_ceil(chunk_size) * size);

        for chunk in data.chunks(chunk_size) {
            out.extend(key.encrypt(&mut rng, Pkcs1v15Encrypt, chunk)?);
        }

        Ok(out)
    }
}

/// Decrypts inbound payloads with the collector's private key
#[derive(Debug, Clone, Default)]
pub struct DecryptManager {
    key: Option<RsaPrivateKey>,
}

impl DecryptManager {
    pub fn new(key: Option<RsaPrivateKey>) -> Self {
        Self { key }
    }

    /// Load a PKCS#1 PEM private key. `None` disables decryption.
    pub fn from_pem_file(path: Option<&Path>) -> Result<Self, CryptError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let pem = read_pem(path)?;
        let key = RsaPrivateKey::from_pkcs1_pem(&pem)
            .map_err(|e| CryptError::KeyFormat(e.to_string()))?;
        debug!(path = %path.display(), bits = key.size() * 8, "Loaded private key");
        Ok(Self::new(Some(key)))
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Reverse [`EncryptManager::encrypt`]. Passes the data through unchanged
    /// when no key is configured.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptError> {
        let Some(key) = &self.key else {
            return Ok(data.to_vec());
        };

        let size = key.size();
        if data.len() % size != 0 {
            return Err(CryptError::ChunkLength {
                len: data.len(),
                size,
            });
        }

        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks(size) {
            out.extend(key.decrypt(Pkcs1v15Encrypt, chunk)?);
        }

        Ok(out)
    }
}

/// PEM encoded key pair
pub struct KeyPairPem {
    pub private: String,
    pub public: String,
}

/// Generate a fresh RSA key pair in PKCS#1 PEM form
pub fn generate_key_pair(bits: usize) -> Result<KeyPairPem, CryptError> {
    let mut rng = thread_rng();
    let private = RsaPrivateKey::new(&mut rng, bits)?;
    let public = RsaPublicKey::from(&private);

    let private_pem = private
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CryptError::KeyFormat(e.to_string()))?;
    let public_pem = public
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CryptError::KeyFormat(e.to_string()))?;

    Ok(KeyPairPem {
        private: private_pem.to_string(),
        public: public_pem,
    })
}
