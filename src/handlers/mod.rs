//! Security handlers for PDF decryption

mod standard;

pub use standard::StandardSecurityHandler;

use log::debug;

use crate::crypto::CryptMethod;
use crate::error::{PDFError, PDFResult};
use crate::pdf::{Dictionary, Object};

/// Build the security handler named by an `/Encrypt` dictionary
///
/// Only the password-based `Standard` handler is supported.
pub fn security_handler_from_dict(
    encrypt: &Dictionary,
    file_id: &[u8],
) -> PDFResult<StandardSecurityHandler> {
    match encrypt.get_name("Filter") {
        Some(b"Standard") => StandardSecurityHandler::from_dict(encrypt, file_id),
        Some(other) => Err(PDFError::unsupported(format!(
            "security handler /{}",
            String::from_utf8_lossy(other)
        ))),
        None => Err(PDFError::unsupported("encryption dictionary without /Filter")),
    }
}

/// A named entry of the `/CF` dictionary
#[derive(Debug, Clone, PartialEq)]
pub struct CryptFilter {
    pub method: CryptMethod,
    /// Key length in bytes, when the entry declares one
    pub length: Option<usize>,
}

/// Resolve the crypt filter called `name` (from `/StmF` or `/StrF`)
pub fn resolve_crypt_filter(encrypt: &Dictionary, name: &[u8]) -> PDFResult<CryptFilter> {
    if name == b"Identity" {
        return Ok(CryptFilter {
            method: CryptMethod::None,
            length: None,
        });
    }

    let entry = encrypt
        .get("CF")
        .and_then(|cf| cf.as_dict().ok())
        .and_then(|cf| cf.get(name))
        .and_then(|entry| entry.as_dict().ok())
        .ok_or_else(|| {
            PDFError::unsupported(format!(
                "crypt filter /{} not found in /CF",
                String::from_utf8_lossy(name)
            ))
        })?;

    let method = match entry.get_name("CFM") {
        None => CryptMethod::None,
        Some(cfm) => CryptMethod::from_name(cfm).ok_or_else(|| {
            PDFError::unsupported(format!("crypt filter method /{}", String::from_utf8_lossy(cfm)))
        })?,
    };

    let length = match entry.get("Length") {
        Some(Object::Integer(len)) => Some(key_length_bytes(*len)?),
        _ => None,
    };

    debug!(
        "Crypt filter /{} uses {:?}",
        String::from_utf8_lossy(name),
        method
    );
    Ok(CryptFilter { method, length })
}

/// Normalise a `/Length` value to bytes
///
/// Values below 40 are taken as a byte count; larger ones are bits and
/// must be a multiple of 8.
pub fn key_length_bytes(length: i64) -> PDFResult<usize> {
    match length {
        1..=39 => Ok(length as usize),
        40..=256 if length % 8 == 0 => Ok(length as usize / 8),
        _ => Err(PDFError::unsupported(format!("key length {}", length))),
    }
}
