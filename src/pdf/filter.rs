//! PDF stream filter chain
//!
//! Decoding covers the general-purpose filters: FlateDecode, LZWDecode,
//! RunLengthDecode, ASCIIHexDecode, ASCII85Decode and the Crypt stage, plus
//! PNG and TIFF predictors. Image codecs are recognised by name but decoding
//! through them yields `UnsupportedFilter`.

use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{trace, warn};
use weezl::{decode::Decoder as LzwDecoder, BitOrder};

use crate::error::{PDFError, PDFResult};
use super::Dictionary;

/// Filter plus its optional `/DecodeParms` entry, in declared order
pub type FilterChain = Vec<(Filter, Option<Dictionary>)>;

/// Hex digits per line written by `encode_ascii_hex`
const HEX_LINE_WIDTH: usize = 64;

/// PDF stream filters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    ASCII85,
    ASCIIHex,
    Flate,
    LZW,
    RunLength,
    Crypt,
    CCITTFax,
    DCT,
    JBIG2,
    JPX,
    Unknown(Vec<u8>),
}

/// Predictor parameters from `/DecodeParms`
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorParams {
    pub predictor: i64,
    pub columns: usize,
    pub colors: usize,
    pub bits_per_component: usize,
}

impl PredictorParams {
    fn from_params(params: &Dictionary) -> Option<Self> {
        let predictor = params.get_integer("Predictor").unwrap_or(1);
        if predictor <= 1 {
            return None;
        }
        Some(Self {
            predictor,
            columns: params.get_integer("Columns").unwrap_or(1).max(1) as usize,
            colors: params.get_integer("Colors").unwrap_or(1).max(1) as usize,
            bits_per_component: params.get_integer("BitsPerComponent").unwrap_or(8).max(1) as usize,
        })
    }

    fn bits_per_pixel(&self) -> PDFResult<usize> {
        self.colors
            .checked_mul(self.bits_per_component)
            .ok_or_else(|| self.oversized())
    }

    fn bytes_per_pixel(&self) -> PDFResult<usize> {
        let bits = self.bits_per_pixel()?;
        Ok((bits / 8 + usize::from(bits % 8 != 0)).max(1))
    }

    /// Row width in bytes, bounded by the `available` decoded bytes
    fn bytes_per_row(&self, available: usize) -> PDFResult<usize> {
        let bits = self
            .columns
            .checked_mul(self.bits_per_pixel()?)
            .ok_or_else(|| self.oversized())?;
        let row_len = bits / 8 + usize::from(bits % 8 != 0);
        if row_len > available {
            return Err(PDFError::corrupt(
                None,
                format!("Predictor row of {} bytes exceeds {} decoded bytes", row_len, available),
            ));
        }
        Ok(row_len)
    }

    fn oversized(&self) -> PDFError {
        PDFError::corrupt(
            None,
            format!(
                "Predictor row size overflows: {} columns, {} colors, {} bits",
                self.columns, self.colors, self.bits_per_component
            ),
        )
    }
}

impl Filter {
    /// Create filter from name, accepting the inline-image abbreviations
    pub fn from_name(name: &[u8]) -> Self {
        match name {
            b"ASCII85Decode" | b"A85" => Filter::ASCII85,
            b"ASCIIHexDecode" | b"AHx" => Filter::ASCIIHex,
            b"FlateDecode" | b"Fl" => Filter::Flate,
            b"LZWDecode" | b"LZW" => Filter::LZW,
            b"RunLengthDecode" | b"RL" => Filter::RunLength,
            b"Crypt" => Filter::Crypt,
            b"CCITTFaxDecode" | b"CCF" => Filter::CCITTFax,
            b"DCTDecode" | b"DCT" => Filter::DCT,
            b"JBIG2Decode" => Filter::JBIG2,
            b"JPXDecode" => Filter::JPX,
            other => Filter::Unknown(other.to_vec()),
        }
    }

    /// Name written into `/Filter`
    pub fn name(&self) -> &[u8] {
        match self {
            Filter::ASCII85 => b"ASCII85Decode",
            Filter::ASCIIHex => b"ASCIIHexDecode",
            Filter::Flate => b"FlateDecode",
            Filter::LZW => b"LZWDecode",
            Filter::RunLength => b"RunLengthDecode",
            Filter::Crypt => b"Crypt",
            Filter::CCITTFax => b"CCITTFaxDecode",
            Filter::DCT => b"DCTDecode",
            Filter::JBIG2 => b"JBIG2Decode",
            Filter::JPX => b"JPXDecode",
            Filter::Unknown(name) => name,
        }
    }

    /// Whether this is an image codec handled outside this crate
    pub fn is_image_codec(&self) -> bool {
        matches!(self, Filter::CCITTFax | Filter::DCT | Filter::JBIG2 | Filter::JPX)
    }

    /// Decode data using this filter
    pub fn decode(&self, data: &[u8], params: Option<&Dictionary>) -> PDFResult<Vec<u8>> {
        let result = match self {
            Filter::ASCII85 => decode_ascii85(data)?,
            Filter::ASCIIHex => decode_ascii_hex(data)?,
            Filter::Flate => decode_flate(data)?,
            Filter::LZW => {
                let early_change = params.and_then(|p| p.get_integer("EarlyChange")).unwrap_or(1);
                decode_lzw(data, early_change != 0)?
            }
            Filter::RunLength => decode_run_length(data)?,
            // Decryption already happened when the bytes were read
            Filter::Crypt => return Ok(data.to_vec()),
            other => {
                return Err(PDFError::UnsupportedFilter(
                    String::from_utf8_lossy(other.name()).into_owned(),
                ))
            }
        };

        // Predictors only apply to Flate and LZW
        match (self, params.and_then(PredictorParams::from_params)) {
            (Filter::Flate | Filter::LZW, Some(predictor)) => apply_predictor(&result, &predictor),
            _ => Ok(result),
        }
    }
}

/// Run data through a whole filter chain in declared order
pub fn decode_chain(chain: &FilterChain, data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut current = data.to_vec();
    for (filter, params) in chain {
        trace!("Applying {:?} to {} bytes", filter, current.len());
        current = filter.decode(&current, params.as_ref())?;
    }
    Ok(current)
}

/// Whether every stage of the chain can be decoded here
pub fn chain_is_decodable(chain: &FilterChain) -> bool {
    chain
        .iter()
        .all(|(filter, _)| !filter.is_image_codec() && !matches!(filter, Filter::Unknown(_)))
}

// ASCII85 Implementation
fn decode_ascii85(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut count = 0;

    let body = data.strip_prefix(b"<~").unwrap_or(data);
    for &byte in body {
        match byte {
            b'z' if count == 0 => output.extend_from_slice(&[0, 0, 0, 0]),
            b'~' => break,
            b'!'..=b'u' => {
                group[count] = byte - b'!';
                count += 1;
                if count == 5 {
                    output.extend_from_slice(&ascii85_group_value(&group)?.to_be_bytes());
                    count = 0;
                }
            }
            b if super::object::is_whitespace(b) => continue,
            _ => {
                return Err(PDFError::corrupt(
                    None,
                    format!("Invalid ASCII85 character: 0x{:02x}", byte),
                ))
            }
        }
    }

    if count == 1 {
        return Err(PDFError::corrupt(None, "Truncated ASCII85 group"));
    }
    if count > 1 {
        // Pad the final partial group with 'u' and keep count-1 bytes
        group[count..].fill(84);
        let bytes = ascii85_group_value(&group)?.to_be_bytes();
        output.extend_from_slice(&bytes[..count - 1]);
    }

    Ok(output)
}

fn ascii85_group_value(group: &[u8; 5]) -> PDFResult<u32> {
    group
        .iter()
        .try_fold(0u32, |acc, &digit| acc.checked_mul(85)?.checked_add(digit as u32))
        .ok_or_else(|| PDFError::corrupt(None, "ASCII85 group overflow"))
}

// ASCIIHex Implementation
fn decode_ascii_hex(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() / 2);
    let mut high: Option<u8> = None;

    for &byte in data {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'A'..=b'F' => byte - b'A' + 10,
            b'a'..=b'f' => byte - b'a' + 10,
            b'>' => break,
            b if super::object::is_whitespace(b) => continue,
            _ => {
                return Err(PDFError::corrupt(
                    None,
                    format!("Invalid hex character: 0x{:02x}", byte),
                ))
            }
        };

        match high.take() {
            Some(h) => output.push(h << 4 | digit),
            None => high = Some(digit),
        }
    }

    // Odd digit count: the missing final digit is zero
    if let Some(h) = high {
        output.push(h << 4);
    }

    Ok(output)
}

/// Hex-encode data as an ASCIIHexDecode body, broken into short lines
pub fn encode_ascii_hex(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() * 2 + data.len() / 32 + 1);

    for (i, &byte) in data.iter().enumerate() {
        if i > 0 && (i * 2) % HEX_LINE_WIDTH == 0 {
            output.push(b'\n');
        }
        // Writing into a Vec cannot fail
        let _ = write!(&mut output, "{:02X}", byte);
    }

    output.push(b'>');
    output
}

// RunLength Implementation
fn decode_run_length(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 2);
    let mut i = 0;

    while i < data.len() {
        let length = data[i];
        i += 1;

        match length {
            128 => break,
            0..=127 => {
                let count = length as usize + 1;
                let end = (i + count).min(data.len());
                if end - i < count {
                    warn!("RunLength literal run truncated");
                }
                output.extend_from_slice(&data[i..end]);
                i = end;
            }
            _ => {
                let Some(&byte) = data.get(i) else {
                    warn!("RunLength repeat run truncated");
                    break;
                };
                output.extend(std::iter::repeat(byte).take(257 - length as usize));
                i += 1;
            }
        }
    }

    Ok(output)
}

// LZW Implementation
fn decode_lzw(data: &[u8], early_change: bool) -> PDFResult<Vec<u8>> {
    let mut decoder = if early_change {
        LzwDecoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        LzwDecoder::new(BitOrder::Msb, 8)
    };

    let mut output = Vec::new();
    let result = decoder.into_vec(&mut output).decode(data);
    if let Err(e) = result.status {
        if output.is_empty() {
            return Err(PDFError::corrupt(None, format!("LZW decode failed: {}", e)));
        }
        warn!("LZW stream damaged after {} bytes: {}", output.len(), e);
    }
    Ok(output)
}

// Flate Implementation
fn decode_flate(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 2);
    let zlib_result = ZlibDecoder::new(data).read_to_end(&mut output);

    match zlib_result {
        Ok(_) => Ok(output),
        Err(e) if !output.is_empty() => {
            warn!("Flate stream truncated after {} bytes: {}", output.len(), e);
            Ok(output)
        }
        Err(e) => {
            // Some producers omit the zlib header
            let mut raw = Vec::new();
            match DeflateDecoder::new(data).read_to_end(&mut raw) {
                Ok(_) if !raw.is_empty() => Ok(raw),
                _ => Err(PDFError::corrupt(None, format!("Flate decode failed: {}", e))),
            }
        }
    }
}

/// Compress data with zlib framing
pub fn encode_flate(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

// Predictor Implementation
fn apply_predictor(data: &[u8], params: &PredictorParams) -> PDFResult<Vec<u8>> {
    match params.predictor {
        2 => apply_tiff_predictor(data, params),
        10..=15 => apply_png_predictor(data, params),
        other => Err(PDFError::UnsupportedFilter(format!("Predictor {}", other))),
    }
}

fn apply_tiff_predictor(data: &[u8], params: &PredictorParams) -> PDFResult<Vec<u8>> {
    if params.bits_per_component != 8 {
        return Err(PDFError::UnsupportedFilter(format!(
            "TIFF predictor with {} bits per component",
            params.bits_per_component
        )));
    }

    if data.is_empty() {
        return Ok(Vec::new());
    }
    let bpp = params.bytes_per_pixel()?;
    let row_len = params.bytes_per_row(data.len())?.max(1);
    let mut output = data.to_vec();

    for row in output.chunks_mut(row_len) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }

    Ok(output)
}

fn apply_png_predictor(data: &[u8], params: &PredictorParams) -> PDFResult<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let bpp = params.bytes_per_pixel()?;
    // Each encoded row carries one filter-type byte
    let row_len = params.bytes_per_row(data.len() - 1)?;
    let mut output = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_len];
    let mut row = vec![0u8; row_len];

    for chunk in data.chunks(row_len + 1) {
        let filter_type = chunk[0];
        let encoded = &chunk[1..];
        if encoded.len() < row_len {
            warn!("PNG predictor row truncated to {} of {} bytes", encoded.len(), row_len);
        }

        for i in 0..encoded.len() {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = prev_row[i];
            let up_left = if i >= bpp { prev_row[i - bpp] } else { 0 };

            row[i] = match filter_type {
                0 => encoded[i],
                1 => encoded[i].wrapping_add(left),
                2 => encoded[i].wrapping_add(up),
                3 => encoded[i].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => encoded[i].wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(PDFError::corrupt(
                        None,
                        format!("Invalid PNG filter type {}", other),
                    ))
                }
            };
        }

        output.extend_from_slice(&row[..encoded.len()]);
        std::mem::swap(&mut prev_row, &mut row);
    }

    Ok(output)
}

fn paeth(left: u8, up: u8, up_left: u8) -> u8 {
    let p = left as i16 + up as i16 - up_left as i16;
    let pa = (p - left as i16).abs();
    let pb = (p - up as i16).abs();
    let pc = (p - up_left as i16).abs();

    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        up
    } else {
        up_left
    }
}
