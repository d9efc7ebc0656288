//! Stream treatments applied while emitting

use std::collections::HashSet;

use bitflags::bitflags;
use log::warn;

use crate::pdf::{
    chain_is_decodable, decode_chain, encode_ascii_hex, filter_chain, Dictionary, Document, Filter, Object,
    ObjectId, Stream,
};

bitflags! {
    /// Which streams are written decoded
    ///
    /// Any non-empty set expands ordinary streams. Images and embedded font
    /// programs keep their compact encoding unless their own flag is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExpandFlags: u8 {
        /// Content, metadata and other non-image, non-font streams
        const STREAMS = 1 << 0;
        const IMAGES = 1 << 1;
        const FONTS = 1 << 2;
        const ALL = Self::STREAMS.bits() | Self::IMAGES.bits() | Self::FONTS.bits();
    }
}

/// How a stream's payload is reproduced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTreatment {
    /// Stored bytes with the declared filters
    Copy,
    /// Decoded bytes with the filters removed
    Expand,
    /// Copied or expanded bytes, then hex-encoded behind an added
    /// `ASCIIHexDecode` stage
    AsciiShield { expanded: bool },
}

impl StreamTreatment {
    /// The shielded form of a `Copy` or `Expand` treatment
    pub fn shielded(self) -> Self {
        match self {
            StreamTreatment::Copy => StreamTreatment::AsciiShield { expanded: false },
            StreamTreatment::Expand => StreamTreatment::AsciiShield { expanded: true },
            shielded => shielded,
        }
    }

    /// Whether the written bytes are decoded
    pub fn expands(self) -> bool {
        matches!(
            self,
            StreamTreatment::Expand | StreamTreatment::AsciiShield { expanded: true }
        )
    }

    /// Treatment for a stream under `flags`
    pub fn choose(flags: ExpandFlags, is_image: bool, is_font: bool) -> Self {
        let blocked = (is_image && !flags.contains(ExpandFlags::IMAGES))
            || (is_font && !flags.contains(ExpandFlags::FONTS));
        if flags.is_empty() || blocked {
            StreamTreatment::Copy
        } else {
            StreamTreatment::Expand
        }
    }
}

/// A stream ready to be written
#[derive(Debug)]
pub(crate) struct PreparedStream {
    pub treatment: StreamTreatment,
    pub dict: Dictionary,
    pub data: Vec<u8>,
    pub warnings: Vec<String>,
}

/// Numbers of streams named by `/FontFile`, `/FontFile2` or `/FontFile3`
pub(crate) fn font_program_numbers<'a>(objects: impl IntoIterator<Item = &'a Object>) -> HashSet<u32> {
    let mut numbers = HashSet::new();
    for object in objects {
        let Ok(dict) = object.as_dict() else { continue };
        for key in ["FontFile", "FontFile2", "FontFile3"] {
            if let Some(id) = dict.get_reference(key) {
                numbers.insert(id.number);
            }
        }
    }
    numbers
}

/// Produce the dictionary and bytes written for stream `id`
///
/// Output is always plaintext, so `/Crypt` stages are dropped. Bytes that
/// cannot be decrypted or decoded fall back to a copy with a warning.
pub(crate) fn prepare_stream(
    doc: &Document,
    id: ObjectId,
    stream: &Stream,
    flags: ExpandFlags,
    is_font: bool,
    ascii_safe: bool,
) -> PreparedStream {
    let mut warnings = Vec::new();
    let mut dict = stream.dict.clone();
    strip_crypt_filters(&mut dict);

    let mut data = match doc.raw_stream(id, stream) {
        Ok(data) => data,
        Err(e) => {
            let message = format!("writing stored bytes of {}: {}", id, e);
            warn!("Stream {}", message);
            warnings.push(message);
            doc.stored_stream(stream).unwrap_or_default()
        }
    };

    let mut treatment = StreamTreatment::choose(flags, stream.is_image(), is_font || stream.looks_like_font());
    // Bytes that failed to decrypt are never decoded
    if treatment.expands() && warnings.is_empty() {
        data = expand(id, &mut dict, data, &mut warnings);
        if !filter_chain(&dict).is_empty() {
            treatment = StreamTreatment::Copy;
        }
    } else {
        treatment = StreamTreatment::Copy;
    }

    if ascii_safe && !is_ascii_safe(&data) {
        data = encode_ascii_hex(&data);
        prepend_ascii_hex(&mut dict);
        treatment = treatment.shielded();
    }

    dict.set("Length", data.len());
    PreparedStream {
        treatment,
        dict,
        data,
        warnings,
    }
}

/// Decode `data` through the dictionary's filters and drop them
fn expand(id: ObjectId, dict: &mut Dictionary, data: Vec<u8>, warnings: &mut Vec<String>) -> Vec<u8> {
    let chain = filter_chain(dict);
    if chain.is_empty() {
        return data;
    }
    if !chain_is_decodable(&chain) {
        warn!("Copying {}: filter chain includes an external codec", id);
        return data;
    }

    match decode_chain(&chain, &data) {
        Ok(decoded) => {
            for key in ["Filter", "DecodeParms", "DL"] {
                dict.remove(key);
            }
            decoded
        }
        Err(e) => {
            let message = format!("copying {} undecoded: {}", id, e);
            warn!("Stream {}", message);
            warnings.push(message);
            data
        }
    }
}

/// Printable ASCII or PDF whitespace only
pub(crate) fn is_ascii_safe(data: &[u8]) -> bool {
    data.iter()
        .all(|&b| (0x20..=0x7E).contains(&b) || matches!(b, b'\t' | b'\n' | b'\r' | b'\x0c'))
}

/// Put `/ASCIIHexDecode` in front of the filter chain
fn prepend_ascii_hex(dict: &mut Dictionary) {
    let hex = Object::name(Filter::ASCIIHex.name());
    let filters = match dict.remove("Filter") {
        None | Some(Object::Null) => hex,
        Some(Object::Array(mut items)) => {
            items.insert(0, hex);
            Object::Array(items)
        }
        Some(other) => Object::Array(vec![hex, other]),
    };
    dict.set("Filter", filters);

    match dict.remove("DecodeParms") {
        None | Some(Object::Null) => {}
        Some(Object::Array(mut items)) => {
            items.insert(0, Object::Null);
            dict.set("DecodeParms", Object::Array(items));
        }
        Some(other) => dict.set("DecodeParms", Object::Array(vec![Object::Null, other])),
    }
}

/// Remove `/Crypt` stages together with their parameters
fn strip_crypt_filters(dict: &mut Dictionary) {
    match dict.get("Filter") {
        Some(Object::Name(name)) if Filter::from_name(name) == Filter::Crypt => {
            dict.remove("Filter");
            dict.remove("DecodeParms");
        }
        Some(Object::Array(items)) => {
            let keep: Vec<bool> = items
                .iter()
                .map(|f| !matches!(f, Object::Name(n) if Filter::from_name(n) == Filter::Crypt))
                .collect();
            if keep.iter().all(|&k| k) {
                return;
            }

            let filters: Vec<Object> = items.iter().zip(&keep).filter(|(_, k)| **k).map(|(f, _)| f.clone()).collect();
            let params = match dict.get("DecodeParms") {
                Some(Object::Array(params)) => Some(
                    params.iter().zip(&keep).filter(|(_, k)| **k).map(|(p, _)| p.clone()).collect::<Vec<_>>(),
                ),
                _ => None,
            };

            if filters.is_empty() {
                dict.remove("Filter");
                dict.remove("DecodeParms");
            } else {
                dict.set("Filter", Object::Array(filters));
                match params {
                    Some(params) if params.iter().any(|p| !p.is_null()) => dict.set("DecodeParms", Object::Array(params)),
                    Some(_) => {
                        dict.remove("DecodeParms");
                    }
                    None => {}
                }
            }
        }
        _ => {}
    }
}
