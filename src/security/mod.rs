//! Password handling for the Standard security handler
//!
//! Key derivation and password checks are `impl StandardSecurityHandler`
//! blocks split across this module; object decryption at load time lives in
//! `object_encryption`.

mod authentication;
mod key_derivation;
mod object_encryption;

pub(crate) use object_encryption::{decrypt_object_strings, stream_is_exempt};

use md5::{Digest, Md5};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::crypto::cbc_encrypt_no_padding;
use crate::error::PDFResult;

/// Password padding string
pub(crate) const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41,
    0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80,
    0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Longest password the AES-256 revisions look at
const MAX_UTF8_PASSWORD: usize = 127;

/// Truncate or pad a password to exactly 32 bytes
pub(crate) fn pad_password(password: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut padded = Zeroizing::new([0u8; 32]);
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PADDING[..32 - len]);
    padded
}

/// MD5 of `data`, re-hashed `rounds` times over its first `n` bytes
pub(crate) fn md5_rounds(data: &[u8], rounds: usize, n: usize) -> Zeroizing<Vec<u8>> {
    let mut hash = Zeroizing::new(Md5::digest(data).to_vec());
    for _ in 0..rounds {
        *hash = Md5::digest(&hash[..n.min(16)]).to_vec();
    }
    hash
}

/// Password hash of the AES-256 revisions
///
/// R5 is a single SHA-256. R6 is the hardened hash of ISO 32000-2: at least
/// 64 rounds of AES-128-CBC expansion, each followed by SHA-256/384/512
/// picked by the expanded block.
pub(crate) fn hash_password_r5_6(
    revision: u32,
    password: &[u8],
    salt: &[u8],
    user_data: &[u8],
) -> PDFResult<Zeroizing<[u8; 32]>> {
    let password = &password[..password.len().min(MAX_UTF8_PASSWORD)];

    let mut hasher = Sha256::new();
    hasher.update(password);
    hasher.update(salt);
    hasher.update(user_data);
    let mut k = Zeroizing::new(hasher.finalize().to_vec());

    if revision >= 6 {
        let mut round = 0usize;
        loop {
            let mut block = Zeroizing::new(Vec::with_capacity(64 * (password.len() + k.len() + user_data.len())));
            for _ in 0..64 {
                block.extend_from_slice(password);
                block.extend_from_slice(&k);
                block.extend_from_slice(user_data);
            }
            cbc_encrypt_no_padding(&k[..16], &k[16..32], &mut block)?;

            let selector: u32 = block[..16].iter().map(|&b| b as u32).sum::<u32>() % 3;
            *k = match selector {
                0 => Sha256::digest(&block[..]).to_vec(),
                1 => Sha384::digest(&block[..]).to_vec(),
                _ => Sha512::digest(&block[..]).to_vec(),
            };

            round += 1;
            let last = block.last().copied().unwrap_or(0) as usize;
            if round >= 64 && last + 32 <= round {
                break;
            }
        }
    }

    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&k[..32]);
    Ok(out)
}

/// Compare without short-circuiting on the first difference
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
