//! RC4 encryption provider implementation

use ::rc4::consts::{U10, U11, U12, U13, U14, U15, U16, U5, U6, U7, U8, U9};
use ::rc4::{KeyInit, Rc4, StreamCipher};

use crate::error::{PDFError, PDFResult};
use super::CryptoProvider;

/// RC4 with a key length picked at runtime
///
/// The cipher type is parameterised by key size, so each length PDF can
/// produce (5 to 16 bytes) gets its own arm.
macro_rules! rc4_dispatch {
    ($key:expr, $data:expr, $($len:literal => $size:ty),+ $(,)?) => {
        match $key.len() {
            $(
                $len => {
                    let mut cipher = Rc4::<$size>::new_from_slice($key)
                        .map_err(|_| PDFError::unsupported(format!("RC4 key of {} bytes", $len)))?;
                    cipher.apply_keystream($data);
                }
            )+
            other => return Err(PDFError::unsupported(format!("RC4 key of {} bytes", other))),
        }
    };
}

/// Apply the RC4 keystream for `key` to `data`
pub(crate) fn rc4_crypt(key: &[u8], data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut output = data.to_vec();
    rc4_dispatch!(key, &mut output,
        5 => U5, 6 => U6, 7 => U7, 8 => U8, 9 => U9, 10 => U10,
        11 => U11, 12 => U12, 13 => U13, 14 => U14, 15 => U15, 16 => U16,
    );
    Ok(output)
}

/// RC4 encryption provider
#[derive(Debug, Default)]
pub(crate) struct RC4Provider;

impl CryptoProvider for RC4Provider {
    fn decrypt(&self, data: &[u8], key: &[u8]) -> PDFResult<Vec<u8>> {
        rc4_crypt(key, data)
    }

    // RC4 is symmetric
    fn encrypt(&self, data: &[u8], key: &[u8]) -> PDFResult<Vec<u8>> {
        rc4_crypt(key, data)
    }
}
