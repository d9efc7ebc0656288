//! AES encryption provider implementation

use ::aes::cipher::block_padding::NoPadding;
use ::aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ::aes::{Aes128, Aes256};
use cbc::{Decryptor, Encryptor};
use log::warn;
use rand::{thread_rng, RngCore};

use crate::error::{PDFError, PDFResult};
use super::CryptoProvider;

type Aes128CbcEnc = Encryptor<Aes128>;
type Aes128CbcDec = Decryptor<Aes128>;
type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

const BLOCK_SIZE: usize = 16;

/// CBC-decrypt whole blocks in place, no padding handling
pub(crate) fn cbc_decrypt_no_padding(key: &[u8], iv: &[u8], data: &mut [u8]) -> PDFResult<()> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(PDFError::corrupt(None, "AES ciphertext is not block aligned"));
    }
    let result = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| invalid_key(key.len()))?
            .decrypt_padded_mut::<NoPadding>(data)
            .map(|_| ()),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| invalid_key(key.len()))?
            .decrypt_padded_mut::<NoPadding>(data)
            .map(|_| ()),
        other => return Err(invalid_key(other)),
    };
    result.map_err(|_| PDFError::corrupt(None, "AES decryption failed"))
}

/// CBC-encrypt whole blocks in place, no padding handling
pub(crate) fn cbc_encrypt_no_padding(key: &[u8], iv: &[u8], data: &mut [u8]) -> PDFResult<()> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(PDFError::corrupt(None, "AES plaintext is not block aligned"));
    }
    let len = data.len();
    let result = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|_| invalid_key(key.len()))?
            .encrypt_padded_mut::<NoPadding>(data, len)
            .map(|_| ()),
        32 => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| invalid_key(key.len()))?
            .encrypt_padded_mut::<NoPadding>(data, len)
            .map(|_| ()),
        other => return Err(invalid_key(other)),
    };
    result.map_err(|_| PDFError::corrupt(None, "AES encryption failed"))
}

fn invalid_key(len: usize) -> PDFError {
    PDFError::unsupported(format!("AES key of {} bytes", len))
}

/// AES-CBC provider for the AESV2 and AESV3 crypt methods
///
/// Payloads carry a 16-byte IV prefix and PKCS#7 padding.
#[derive(Debug, Default)]
pub(crate) struct AESProvider;

impl AESProvider {
    /// Encrypt with a caller-chosen IV
    pub fn encrypt_with_iv(&self, data: &[u8], key: &[u8], iv: &[u8; BLOCK_SIZE]) -> PDFResult<Vec<u8>> {
        let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
        let mut output = Vec::with_capacity(BLOCK_SIZE + data.len() + pad);
        output.extend_from_slice(iv);
        output.extend_from_slice(data);
        output.extend(std::iter::repeat(pad as u8).take(pad));

        let (iv, body) = output.split_at_mut(BLOCK_SIZE);
        cbc_encrypt_no_padding(key, iv, body)?;
        Ok(output)
    }
}

impl CryptoProvider for AESProvider {
    fn decrypt(&self, data: &[u8], key: &[u8]) -> PDFResult<Vec<u8>> {
        if data.len() < BLOCK_SIZE {
            return Err(PDFError::corrupt(
                None,
                format!("AES payload of {} bytes is shorter than its IV", data.len()),
            ));
        }
        let (iv, body) = data.split_at(BLOCK_SIZE);
        if body.len() % BLOCK_SIZE != 0 {
            return Err(PDFError::corrupt(
                None,
                format!("AES ciphertext of {} bytes is not block aligned", body.len()),
            ));
        }

        let mut plain = body.to_vec();
        cbc_decrypt_no_padding(key, iv, &mut plain)?;

        // Best effort: implausible padding keeps every decrypted byte
        match plain.last().copied() {
            None => {}
            Some(pad) if (1..=BLOCK_SIZE as u8).contains(&pad) && pad as usize <= plain.len() => {
                plain.truncate(plain.len() - pad as usize);
            }
            Some(pad) => warn!("AES padding byte {} out of range, keeping unpadded data", pad),
        }
        Ok(plain)
    }

    fn encrypt(&self, data: &[u8], key: &[u8]) -> PDFResult<Vec<u8>> {
        let mut iv = [0u8; BLOCK_SIZE];
        thread_rng().fill_bytes(&mut iv);
        self.encrypt_with_iv(data, key, &iv)
    }
}
