//! PDF cross-reference index
//!
//! Sections are kept oldest first; lookups scan newest to oldest so that the
//! last incremental update wins.

use std::collections::{BTreeMap, HashSet};

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace, warn};

use crate::error::{PDFError, PDFResult};
use super::filter::decode_chain;
use super::parser::{rfind_bytes, scan_stream_length, ParsedObject, PDFParser};
use super::{Dictionary, Object, Stream};

/// Storage location of one object number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// Unused slot, linked into the free list
    Free { next_free: u32, generation: u16 },
    /// Object stored at a byte offset of the file
    InUse { offset: usize, generation: u16 },
    /// Object stored inside an object stream
    Compressed { container: u32, index: u32 },
}

impl XrefEntry {
    pub fn is_free(&self) -> bool {
        matches!(self, XrefEntry::Free { .. })
    }

    /// Generation of the object stored in this slot
    pub fn generation(&self) -> u16 {
        match self {
            XrefEntry::Free { generation, .. } | XrefEntry::InUse { generation, .. } => *generation,
            XrefEntry::Compressed { .. } => 0,
        }
    }
}

/// One cross-reference section with its trailer
#[derive(Debug, Clone, Default)]
pub struct XrefSection {
    pub entries: BTreeMap<u32, XrefEntry>,
    pub trailer: Dictionary,
}

impl XrefSection {
    pub fn new(trailer: Dictionary) -> Self {
        Self {
            entries: BTreeMap::new(),
            trailer,
        }
    }
}

/// Cross-reference state of a document, oldest section first
#[derive(Debug, Clone, Default)]
pub struct XrefTable {
    sections: Vec<XrefSection>,
}

impl XrefTable {
    /// Create new xref table
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
        }
    }

    /// Append a section newer than every existing one
    pub fn push(&mut self, section: XrefSection) {
        self.sections.push(section);
    }

    pub fn sections(&self) -> &[XrefSection] {
        &self.sections
    }

    /// Entry for `number`, newest section first
    pub fn get(&self, number: u32) -> Option<XrefEntry> {
        self.sections
            .iter()
            .rev()
            .find_map(|section| section.entries.get(&number).copied())
    }

    /// Every object number named by any section, ascending
    pub fn numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self
            .sections
            .iter()
            .flat_map(|s| s.entries.keys().copied())
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }

    /// One past the highest object number in use or declared by `/Size`
    pub fn size(&self) -> u32 {
        let declared = self
            .sections
            .iter()
            .filter_map(|s| s.trailer.get_integer("Size"))
            .max()
            .unwrap_or(0)
            .clamp(0, u32::MAX as i64) as u32;
        let highest = self
            .sections
            .iter()
            .filter_map(|s| s.entries.keys().next_back().copied())
            .max()
            .map_or(0, |n| n.saturating_add(1));
        declared.max(highest)
    }

    /// Newest trailer with keys missing there filled from older sections
    pub fn merged_trailer(&self) -> Dictionary {
        let mut trailer = Dictionary::new();
        for section in self.sections.iter().rev() {
            for (key, value) in section.trailer.iter() {
                if !trailer.has(key) {
                    trailer.set(key, value.clone());
                }
            }
        }
        for key in ["Prev", "XRefStm"] {
            trailer.remove(key);
        }
        trailer
    }
}

/// Locate the offset named by the last `startxref`
pub fn find_startxref(data: &[u8]) -> PDFResult<usize> {
    let pos = rfind_bytes(data, b"startxref")
        .ok_or_else(|| PDFError::malformed(data.len(), "No startxref found"))?;
    let mut parser = PDFParser::new(data, pos + b"startxref".len());
    let offset = parser.read_unsigned()?;
    usize::try_from(offset)
        .ok()
        .filter(|&o| o < data.len())
        .ok_or_else(|| PDFError::malformed(pos, format!("startxref offset {} out of range", offset)))
}

/// Load every section reachable from `startxref` through `/Prev` and `/XRefStm`
pub fn load_xref_table(data: &[u8]) -> PDFResult<XrefTable> {
    let start = find_startxref(data)?;
    let mut visited = HashSet::new();
    // Newest first while walking the chain
    let mut chain: Vec<XrefSection> = Vec::new();
    let mut next = Some(start);

    while let Some(offset) = next.take() {
        if !visited.insert(offset) {
            warn!("Xref chain loops back to offset {}", offset);
            break;
        }

        let section = read_section(data, offset)?;
        debug!(
            "Loaded xref section at {} with {} entries",
            offset,
            section.entries.len()
        );

        next = prev_offset(&section.trailer, "Prev", data.len());
        let hybrid = prev_offset(&section.trailer, "XRefStm", data.len());
        chain.push(section);

        // Hybrid files: the stream section sits between this section and /Prev
        if let Some(stm_offset) = hybrid {
            if visited.insert(stm_offset) {
                match read_section(data, stm_offset) {
                    Ok(stream_section) => chain.push(stream_section),
                    Err(e) => warn!("Ignoring unreadable XRefStm at {}: {}", stm_offset, e),
                }
            }
        }
    }

    let mut table = XrefTable::new();
    for section in chain.into_iter().rev() {
        table.push(section);
    }
    Ok(table)
}

fn prev_offset(trailer: &Dictionary, key: &str, len: usize) -> Option<usize> {
    let value = trailer.get_integer(key)?;
    match usize::try_from(value) {
        Ok(offset) if offset < len => Some(offset),
        _ => {
            warn!("Ignoring out of range /{} offset {}", key, value);
            None
        }
    }
}

/// Read the classic table or xref stream at `offset`
pub fn read_section(data: &[u8], offset: usize) -> PDFResult<XrefSection> {
    let mut parser = PDFParser::new(data, offset);
    if parser.try_keyword(b"xref") {
        read_classic_section(&mut parser)
    } else {
        parser.set_position(offset);
        read_stream_section(data, &mut parser)
    }
}

fn read_classic_section(parser: &mut PDFParser<'_>) -> PDFResult<XrefSection> {
    let mut entries = BTreeMap::new();

    loop {
        if parser.try_keyword(b"trailer") {
            break;
        }
        let first = parser.read_unsigned()?;
        let count = parser.read_unsigned()?;
        trace!("Xref subsection {} +{}", first, count);

        for i in 0..count {
            let field = parser.read_unsigned()?;
            let generation = parser.read_unsigned()?;
            let number = u32::try_from(first + i)
                .map_err(|_| parser_error(parser, "Object number out of range"))?;
            let generation = u16::try_from(generation).unwrap_or(u16::MAX);

            let entry = if parser.try_keyword(b"n") {
                XrefEntry::InUse {
                    offset: field as usize,
                    generation,
                }
            } else if parser.try_keyword(b"f") {
                XrefEntry::Free {
                    next_free: u32::try_from(field).unwrap_or(0),
                    generation,
                }
            } else {
                return Err(parser_error(parser, "Expected 'n' or 'f' in xref entry"));
            };

            // Within one section the first definition wins
            entries.entry(number).or_insert(entry);
        }
    }

    let trailer = match parser.parse_object()? {
        Object::Dictionary(dict) => dict,
        other => {
            return Err(parser_error(
                parser,
                format!("Trailer is a {}, not a dictionary", other.type_name()),
            ))
        }
    };

    Ok(XrefSection { entries, trailer })
}

fn read_stream_section(data: &[u8], parser: &mut PDFParser<'_>) -> PDFResult<XrefSection> {
    let start = parser.position();
    let (id, parsed) = parser.parse_indirect_object()?;
    let ParsedObject::StreamStart { dict, data_offset } = parsed else {
        return Err(PDFError::malformed(start, "Expected xref table or xref stream"));
    };
    if !dict.has_type("XRef") {
        warn!("Xref stream {} lacks /Type /XRef", id);
    }

    // The length of an xref stream must be direct; scan when it is not
    let length = match dict.get_integer("Length") {
        Some(len) if len >= 0 && data_offset + len as usize <= data.len() => len as usize,
        _ => scan_stream_length(data, data_offset)
            .ok_or_else(|| PDFError::malformed(data_offset, "Xref stream without endstream"))?,
    };

    let stream = Stream::lazy(dict, data_offset, length);
    let decoded = decode_chain(&stream.filters(), &data[data_offset..data_offset + length])
        .map_err(|e| PDFError::malformed(data_offset, format!("Undecodable xref stream: {}", e)))?;

    let entries = parse_xref_stream_entries(&stream.dict, &decoded, data_offset)?;
    Ok(XrefSection {
        entries,
        trailer: stream.dict,
    })
}

fn parser_error(parser: &PDFParser<'_>, message: impl Into<String>) -> PDFError {
    PDFError::malformed(parser.position(), message)
}

/// Decode the binary rows of an xref stream
pub fn parse_xref_stream_entries(
    dict: &Dictionary,
    decoded: &[u8],
    offset: usize,
) -> PDFResult<BTreeMap<u32, XrefEntry>> {
    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|w| w.as_array().ok())
        .map(|w| w.iter().filter_map(|v| v.as_i64().ok()).map(|v| v.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(PDFError::malformed(offset, "Invalid /W in xref stream"));
    }

    let size = dict.get_integer("Size").unwrap_or(0).max(0);
    let index: Vec<i64> = match dict.get("Index").and_then(|i| i.as_array().ok()) {
        Some(items) => items.iter().filter_map(|v| v.as_i64().ok()).collect(),
        None => vec![0, size],
    };
    if index.len() % 2 != 0 {
        return Err(PDFError::malformed(offset, "Odd-length /Index in xref stream"));
    }

    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(PDFError::malformed(offset, "Zero-width xref stream rows"));
    }

    let read_field = |row: &[u8], start: usize, width: usize, default: u64| -> u64 {
        if width == 0 {
            default
        } else {
            BigEndian::read_uint(&row[start..start + width], width)
        }
    };

    let mut entries = BTreeMap::new();
    let mut rows = decoded.chunks_exact(row_len);

    for pair in index.chunks(2) {
        let (first, count) = (pair[0].max(0) as u64, pair[1].max(0) as u64);
        for i in 0..count {
            let Some(row) = rows.next() else {
                warn!("Xref stream ends before its /Index is exhausted");
                return Ok(entries);
            };
            let Ok(number) = u32::try_from(first + i) else {
                continue;
            };

            let kind = read_field(row, 0, widths[0], 1);
            let f2 = read_field(row, widths[0], widths[1], 0);
            let f3 = read_field(row, widths[0] + widths[1], widths[2], 0);

            let entry = match kind {
                0 => XrefEntry::Free {
                    next_free: f2 as u32,
                    generation: f3 as u16,
                },
                1 => XrefEntry::InUse {
                    offset: f2 as usize,
                    generation: f3 as u16,
                },
                2 => XrefEntry::Compressed {
                    container: f2 as u32,
                    index: f3 as u32,
                },
                // Unknown types are references to the null object
                _ => continue,
            };
            entries.entry(number).or_insert(entry);
        }
    }

    Ok(entries)
}
