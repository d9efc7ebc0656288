//! Cipher services and the per-object crypt engine

mod aes;
mod engine;
mod rc4;

pub use engine::{derive_object_key, CryptMethod, CryptoEngine};
pub(crate) use self::aes::{cbc_decrypt_no_padding, cbc_encrypt_no_padding, AESProvider};
pub(crate) use self::rc4::{rc4_crypt, RC4Provider};

use crate::error::PDFResult;

/// Symmetric cipher applied to one string or stream payload
pub(crate) trait CryptoProvider: Send + Sync {
    fn decrypt(&self, data: &[u8], key: &[u8]) -> PDFResult<Vec<u8>>;
    fn encrypt(&self, data: &[u8], key: &[u8]) -> PDFResult<Vec<u8>>;
}
