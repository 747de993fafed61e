//! Payload authentication and confidentiality

pub mod crypt;
pub mod sign;

pub use crypt::{generate_key_pair, CryptError, DecryptManager, EncryptManager, KeyPairPem};
pub use sign::{SignManager, SignatureError, SIGNATURE_HEADER};
