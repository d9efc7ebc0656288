//! Per-object encryption engine

use md5::{Digest, Md5};
use zeroize::Zeroizing;

use crate::error::PDFResult;
use crate::pdf::ObjectId;
use super::{AESProvider, CryptoProvider, RC4Provider};

/// Cipher configuration of a crypt filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptMethod {
    /// Identity: content is stored in the clear
    None,
    RC4,
    AESV2,
    AESV3,
}

impl CryptMethod {
    /// Parse a `/CFM` name
    pub fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"None" => Some(CryptMethod::None),
            b"V2" => Some(CryptMethod::RC4),
            b"AESV2" => Some(CryptMethod::AESV2),
            b"AESV3" => Some(CryptMethod::AESV3),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CryptMethod::None => "None",
            CryptMethod::RC4 => "V2",
            CryptMethod::AESV2 => "AESV2",
            CryptMethod::AESV3 => "AESV3",
        }
    }

    fn provider(&self) -> Option<&'static dyn CryptoProvider> {
        match self {
            CryptMethod::None => None,
            CryptMethod::RC4 => Some(&RC4Provider),
            CryptMethod::AESV2 | CryptMethod::AESV3 => Some(&AESProvider),
        }
    }
}

/// Derive the key for one object from the file key
///
/// MD5 over the file key, three low-order bytes of the object number, two
/// low-order bytes of the generation and, for AESV2, the `sAlT` marker;
/// truncated to `min(16, n + 5)` bytes. AESV3 uses the file key unchanged.
pub fn derive_object_key(file_key: &[u8], id: ObjectId, method: CryptMethod) -> Zeroizing<Vec<u8>> {
    if method == CryptMethod::AESV3 {
        return Zeroizing::new(file_key.to_vec());
    }

    let mut hasher = Md5::new();
    hasher.update(file_key);
    hasher.update(&id.number.to_le_bytes()[..3]);
    hasher.update(id.generation.to_le_bytes());
    if method == CryptMethod::AESV2 {
        hasher.update(b"sAlT");
    }
    let hash = hasher.finalize();

    let key_len = (file_key.len() + 5).min(16);
    Zeroizing::new(hash[..key_len].to_vec())
}

/// Core engine for per-object string and stream encryption
pub struct CryptoEngine {
    file_key: Zeroizing<Vec<u8>>,
    string_method: CryptMethod,
    stream_method: CryptMethod,
}

impl CryptoEngine {
    /// Create new engine for an unlocked file key
    pub fn new(file_key: &[u8], string_method: CryptMethod, stream_method: CryptMethod) -> Self {
        Self {
            file_key: Zeroizing::new(file_key.to_vec()),
            string_method,
            stream_method,
        }
    }

    pub fn string_method(&self) -> CryptMethod {
        self.string_method
    }

    pub fn stream_method(&self) -> CryptMethod {
        self.stream_method
    }

    /// Key for `id` under `method`
    pub fn object_key(&self, id: ObjectId, method: CryptMethod) -> Zeroizing<Vec<u8>> {
        derive_object_key(&self.file_key, id, method)
    }

    fn decrypt_with(&self, method: CryptMethod, id: ObjectId, data: &[u8]) -> PDFResult<Vec<u8>> {
        match method.provider() {
            None => Ok(data.to_vec()),
            Some(provider) => provider
                .decrypt(data, &self.object_key(id, method))
                .map_err(|e| e.with_object(id)),
        }
    }

    fn encrypt_with(&self, method: CryptMethod, id: ObjectId, data: &[u8]) -> PDFResult<Vec<u8>> {
        match method.provider() {
            None => Ok(data.to_vec()),
            Some(provider) => provider.encrypt(data, &self.object_key(id, method)),
        }
    }

    /// Decrypt a string belonging to object `id`
    pub fn decrypt_string(&self, id: ObjectId, data: &[u8]) -> PDFResult<Vec<u8>> {
        self.decrypt_with(self.string_method, id, data)
    }

    /// Decrypt the payload of stream object `id`
    pub fn decrypt_stream(&self, id: ObjectId, data: &[u8]) -> PDFResult<Vec<u8>> {
        self.decrypt_with(self.stream_method, id, data)
    }

    /// Encrypt a string belonging to object `id`
    pub fn encrypt_string(&self, id: ObjectId, data: &[u8]) -> PDFResult<Vec<u8>> {
        self.encrypt_with(self.string_method, id, data)
    }

    /// Encrypt the payload of stream object `id`
    pub fn encrypt_stream(&self, id: ObjectId, data: &[u8]) -> PDFResult<Vec<u8>> {
        self.encrypt_with(self.stream_method, id, data)
    }
}

impl std::fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("string_method", &self.string_method)
            .field("stream_method", &self.stream_method)
            .finish_non_exhaustive()
    }
}
