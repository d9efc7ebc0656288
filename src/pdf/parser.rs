//! Byte-level PDF syntax parser

use log::trace;

use crate::error::{PDFError, PDFResult};
use super::object::{is_delimiter, is_whitespace};
use super::{Dictionary, Object, ObjectId};

/// Nesting limit for arrays and dictionaries
const MAX_DEPTH: usize = 256;

/// Result of parsing an indirect object header and body
#[derive(Debug)]
pub enum ParsedObject {
    /// A complete value
    Value(Object),
    /// A stream dictionary; payload starts at `data_offset`
    StreamStart { dict: Dictionary, data_offset: usize },
}

/// PDF syntax parser over an in-memory buffer
#[derive(Debug, Clone)]
pub struct PDFParser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PDFParser<'a> {
    /// Create new parser positioned at `pos`
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn error(&self, message: impl Into<String>) -> PDFError {
        PDFError::malformed(self.pos, message)
    }

    /// Skip whitespace and comments
    pub fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if is_whitespace(b) {
                self.pos += 1;
            } else if b == b'%' {
                while let Some(c) = self.peek() {
                    if c == b'\r' || c == b'\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// Read a run of regular characters
    fn read_token(&mut self) -> &'a [u8] {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_whitespace(b) || is_delimiter(b) {
                break;
            }
            self.pos += 1;
        }
        &self.data[start..self.pos]
    }

    /// Consume `keyword` if it is the next token
    pub fn try_keyword(&mut self, keyword: &[u8]) -> bool {
        self.skip_whitespace();
        let save = self.pos;
        if self.read_token() == keyword {
            true
        } else {
            self.pos = save;
            false
        }
    }

    pub fn expect_keyword(&mut self, keyword: &str) -> PDFResult<()> {
        if self.try_keyword(keyword.as_bytes()) {
            Ok(())
        } else {
            Err(self.error(format!("Expected '{}'", keyword)))
        }
    }

    /// Read an unsigned integer token
    pub fn read_unsigned(&mut self) -> PDFResult<u64> {
        self.skip_whitespace();
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("Expected integer"));
        }
        std::str::from_utf8(&self.data[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PDFError::malformed(start, "Integer out of range"))
    }

    /// Parse a direct object, recognising `N G R` references
    pub fn parse_object(&mut self) -> PDFResult<Object> {
        self.parse_value(0)
    }

    fn parse_value(&mut self, depth: usize) -> PDFResult<Object> {
        if depth > MAX_DEPTH {
            return Err(self.error("Objects nested too deeply"));
        }
        self.skip_whitespace();

        match self.peek() {
            None => Err(self.error("Unexpected end of data")),
            Some(b'/') => {
                self.pos += 1;
                Ok(Object::Name(self.parse_name()))
            }
            Some(b'(') => {
                self.pos += 1;
                Ok(Object::String(self.parse_literal_string()?))
            }
            Some(b'<') if self.data.get(self.pos + 1) == Some(&b'<') => {
                self.pos += 2;
                Ok(Object::Dictionary(self.parse_dictionary(depth)?))
            }
            Some(b'<') => {
                self.pos += 1;
                Ok(Object::String(self.parse_hex_string()?))
            }
            Some(b'[') => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    self.skip_whitespace();
                    match self.peek() {
                        Some(b']') => {
                            self.pos += 1;
                            break;
                        }
                        None => return Err(self.error("Unterminated array")),
                        _ => items.push(self.parse_value(depth + 1)?),
                    }
                }
                Ok(Object::Array(items))
            }
            Some(b'+' | b'-' | b'.' | b'0'..=b'9') => self.parse_number_or_reference(),
            Some(_) => {
                let start = self.pos;
                match self.read_token() {
                    b"true" => Ok(Object::Boolean(true)),
                    b"false" => Ok(Object::Boolean(false)),
                    b"null" => Ok(Object::Null),
                    b"" => {
                        self.pos += 1;
                        Err(PDFError::malformed(start, "Unexpected delimiter"))
                    }
                    other => Err(PDFError::malformed(
                        start,
                        format!("Unexpected token '{}'", String::from_utf8_lossy(other)),
                    )),
                }
            }
        }
    }

    fn parse_dictionary(&mut self, depth: usize) -> PDFResult<Dictionary> {
        let mut dict = Dictionary::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'>') if self.data.get(self.pos + 1) == Some(&b'>') => {
                    self.pos += 2;
                    return Ok(dict);
                }
                Some(b'/') => {
                    self.pos += 1;
                    let key = self.parse_name();
                    let value = self.parse_value(depth + 1)?;
                    // A null value is equivalent to an absent key
                    if !value.is_null() {
                        dict.set(key, value);
                    }
                }
                None => return Err(self.error("Unterminated dictionary")),
                Some(_) => return Err(self.error("Expected name as dictionary key")),
            }
        }
    }

    fn parse_number_or_reference(&mut self) -> PDFResult<Object> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+' | b'-')) {
            self.pos += 1;
        }
        let mut is_real = false;
        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'9' => self.pos += 1,
                b'.' if !is_real => {
                    is_real = true;
                    self.pos += 1;
                }
                _ => break,
            }
        }

        let text = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| PDFError::malformed(start, "Invalid number"))?;

        if is_real {
            let value = match text {
                "." | "-." | "+." => 0.0,
                _ => text
                    .parse::<f64>()
                    .map_err(|_| PDFError::malformed(start, format!("Invalid real '{}'", text)))?,
            };
            return Ok(Object::Real(value));
        }

        let value: i64 = match text {
            "+" | "-" => return Err(PDFError::malformed(start, "Sign without digits")),
            _ => text
                .parse()
                .map_err(|_| PDFError::malformed(start, format!("Invalid integer '{}'", text)))?,
        };

        // Look ahead for "G R"
        if value >= 0 {
            let save = self.pos;
            if let Some(id) = self.try_reference_tail(value) {
                return Ok(Object::Reference(id));
            }
            self.pos = save;
        }

        Ok(Object::Integer(value))
    }

    fn try_reference_tail(&mut self, number: i64) -> Option<ObjectId> {
        self.skip_whitespace();
        let gen_start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if gen_start == self.pos {
            return None;
        }
        let generation: u16 = std::str::from_utf8(&self.data[gen_start..self.pos]).ok()?.parse().ok()?;
        self.skip_whitespace();
        if self.read_token() != b"R" {
            return None;
        }
        Some(ObjectId::new(u32::try_from(number).ok()?, generation))
    }

    /// Parse a name body (after '/'), decoding `#xx` escapes
    fn parse_name(&mut self) -> Vec<u8> {
        let raw = self.read_token();
        let mut name = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'#' && i + 2 < raw.len() {
                if let (Some(h), Some(l)) = (hex_value(raw[i + 1]), hex_value(raw[i + 2])) {
                    name.push(h << 4 | l);
                    i += 3;
                    continue;
                }
            }
            name.push(raw[i]);
            i += 1;
        }
        name
    }

    /// Parse a literal string body (after the opening parenthesis)
    fn parse_literal_string(&mut self) -> PDFResult<Vec<u8>> {
        let start = self.pos;
        let mut output = Vec::new();
        let mut nesting = 1;

        loop {
            let Some(b) = self.peek() else {
                return Err(PDFError::malformed(start, "Unterminated string"));
            };
            self.pos += 1;

            match b {
                b'(' => {
                    nesting += 1;
                    output.push(b);
                }
                b')' => {
                    nesting -= 1;
                    if nesting == 0 {
                        return Ok(output);
                    }
                    output.push(b);
                }
                b'\\' => self.parse_escape(&mut output),
                b'\r' => {
                    // Bare end-of-line markers read as a single LF
                    if self.peek() == Some(b'\n') {
                        self.pos += 1;
                    }
                    output.push(b'\n');
                }
                _ => output.push(b),
            }
        }
    }

    fn parse_escape(&mut self, output: &mut Vec<u8>) {
        let Some(b) = self.peek() else { return };
        self.pos += 1;

        match b {
            b'n' => output.push(b'\n'),
            b'r' => output.push(b'\r'),
            b't' => output.push(b'\t'),
            b'b' => output.push(0x08),
            b'f' => output.push(0x0c),
            b'0'..=b'7' => {
                let mut value = (b - b'0') as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + (d - b'0') as u32;
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                output.push(value as u8);
            }
            // Line continuation
            b'\r' => {
                if self.peek() == Some(b'\n') {
                    self.pos += 1;
                }
            }
            b'\n' => {}
            // \( \) \\ and unknown escapes map to the character itself
            other => output.push(other),
        }
    }

    /// Parse a hex string body (after '<')
    fn parse_hex_string(&mut self) -> PDFResult<Vec<u8>> {
        let start = self.pos;
        let mut output = Vec::new();
        let mut high: Option<u8> = None;

        loop {
            let Some(b) = self.peek() else {
                return Err(PDFError::malformed(start, "Unterminated hex string"));
            };
            self.pos += 1;

            if b == b'>' {
                break;
            }
            if is_whitespace(b) {
                continue;
            }
            let digit = hex_value(b)
                .ok_or_else(|| PDFError::malformed(self.pos - 1, "Invalid hex digit in string"))?;
            match high.take() {
                Some(h) => output.push(h << 4 | digit),
                None => high = Some(digit),
            }
        }

        if let Some(h) = high {
            output.push(h << 4);
        }
        Ok(output)
    }

    /// Parse `N G obj <value> [stream] ... endobj`
    ///
    /// Stream payloads are not read here: the caller needs the store to
    /// resolve an indirect `/Length`.
    pub fn parse_indirect_object(&mut self) -> PDFResult<(ObjectId, ParsedObject)> {
        let number = self.read_unsigned()?;
        let generation = self.read_unsigned()?;
        self.expect_keyword("obj")?;

        let id = ObjectId::new(
            u32::try_from(number).map_err(|_| self.error("Object number out of range"))?,
            u16::try_from(generation).map_err(|_| self.error("Generation out of range"))?,
        );
        trace!("Parsing object {} at offset {}", id, self.pos);

        let value = self.parse_object()?;

        if let Object::Dictionary(dict) = value {
            let save = self.pos;
            if self.try_keyword(b"stream") {
                // The keyword is followed by CRLF or LF; tolerate a lone CR
                match self.peek() {
                    Some(b'\r') if self.data.get(self.pos + 1) == Some(&b'\n') => self.pos += 2,
                    Some(b'\r' | b'\n') => self.pos += 1,
                    _ => {}
                }
                return Ok((
                    id,
                    ParsedObject::StreamStart {
                        dict,
                        data_offset: self.pos,
                    },
                ));
            }
            self.pos = save;
            return Ok((id, ParsedObject::Value(Object::Dictionary(dict))));
        }

        Ok((id, ParsedObject::Value(value)))
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

/// Find `needle` in `haystack` starting at `from`
pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Find the last occurrence of `needle` in `haystack`
pub(crate) fn rfind_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Whether `endstream` follows `pos`, allowing leading whitespace
pub(crate) fn endstream_at(data: &[u8], pos: usize) -> bool {
    let mut p = pos;
    while p < data.len() && is_whitespace(data[p]) {
        p += 1;
    }
    data[p.min(data.len())..].starts_with(b"endstream")
}

/// Length of a stream payload found by scanning for `endstream`
///
/// The end-of-line marker preceding the keyword is not part of the data.
pub(crate) fn scan_stream_length(data: &[u8], data_offset: usize) -> Option<usize> {
    let end = find_bytes(data, b"endstream", data_offset)?;
    let mut length = end - data_offset;
    if length > 0 && data[data_offset + length - 1] == b'\n' {
        length -= 1;
    }
    if length > 0 && data[data_offset + length - 1] == b'\r' {
        length -= 1;
    }
    Some(length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn parse(input: &str) -> PDFResult<Object> {
        PDFParser::new(input.as_bytes(), 0).parse_object()
    }

    #[test]
    fn test_numbers_and_references() -> PDFResult<()> {
        assert_eq!(parse("42")?, Object::Integer(42));
        assert_eq!(parse("-17")?, Object::Integer(-17));
        assert_eq!(parse("+3")?, Object::Integer(3));
        assert_eq!(parse("3.25")?, Object::Real(3.25));
        assert_eq!(parse("-.5")?, Object::Real(-0.5));
        assert_eq!(parse("4.")?, Object::Real(4.0));
        assert_eq!(parse("12 0 R")?, Object::reference(12, 0));
        assert_eq!(
            parse("[1 2 3 0 R 4]")?,
            Object::Array(vec![
                Object::Integer(1),
                Object::Integer(2),
                Object::reference(3, 0),
                Object::Integer(4),
            ])
        );
        Ok(())
    }

    #[test]
    fn test_names() -> PDFResult<()> {
        assert_eq!(parse("/Type")?, Object::name("Type"));
        assert_eq!(parse("/A#20B")?, Object::name("A B"));
        assert_eq!(parse("/")?, Object::name(""));
        Ok(())
    }

    #[test]
    fn test_literal_strings() -> PDFResult<()> {
        assert_eq!(parse("(a (nested) string)")?, Object::string("a (nested) string"));
        assert_eq!(parse(r"(esc\n\t\(\)\\)")?, Object::string("esc\n\t()\\"));
        assert_eq!(parse(r"(\101\60\0053)")?, Object::string(b"A0\x053"));
        assert_eq!(parse("(line\\\ncontinued)")?, Object::string("linecontinued"));
        assert_eq!(parse("(cr\r\nlf)")?, Object::string("cr\nlf"));
        assert!(parse("(unterminated").is_err());
        Ok(())
    }

    #[test]
    fn test_hex_strings() -> PDFResult<()> {
        assert_eq!(parse("<48 65 6C6c6F>")?, Object::string("Hello"));
        assert_eq!(parse("<901FA>")?, Object::string([0x90, 0x1f, 0xa0]));
        assert!(parse("<zz>").is_err());
        Ok(())
    }

    #[test]
    fn test_dictionaries() -> PDFResult<()> {
        let obj = parse("<< /Type /Page /Kids [4 0 R] /Sub << /N null /X true >> % comment\n>>")?;
        let expected = dictionary! {
            "Type" => Object::name("Page"),
            "Kids" => Object::Array(vec![Object::reference(4, 0)]),
            "Sub" => Object::Dictionary(dictionary! { "X" => true }),
        };
        assert_eq!(obj, Object::Dictionary(expected));
        Ok(())
    }

    #[test]
    fn test_errors_carry_offsets() {
        let err = parse("  [1 2 )").unwrap_err();
        assert!(matches!(err, PDFError::MalformedSyntax { offset: 7, .. }));
        assert!(parse("<< /A >>").is_err());
        assert!(parse("bogus").is_err());
    }

    #[test]
    fn test_indirect_object() -> PDFResult<()> {
        let data = b"7 0 obj\n<< /A 1 >>\nendobj\n";
        let (id, parsed) = PDFParser::new(data, 0).parse_indirect_object()?;
        assert_eq!(id, ObjectId::new(7, 0));
        assert!(matches!(parsed, ParsedObject::Value(Object::Dictionary(_))));
        Ok(())
    }

    #[test]
    fn test_indirect_stream_header() -> PDFResult<()> {
        let data = b"3 1 obj\n<< /Length 5 >>\nstream\r\nhello\nendstream\nendobj\n";
        let (id, parsed) = PDFParser::new(data, 0).parse_indirect_object()?;
        assert_eq!(id, ObjectId::new(3, 1));
        match parsed {
            ParsedObject::StreamStart { dict, data_offset } => {
                assert_eq!(dict.get_integer("Length"), Some(5));
                assert_eq!(&data[data_offset..data_offset + 5], b"hello");
                assert!(endstream_at(data, data_offset + 5));
                assert_eq!(scan_stream_length(data, data_offset), Some(5));
            }
            other => panic!("expected stream, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_byte_search() {
        let data = b"abc startxref 10 startxref 20";
        assert_eq!(find_bytes(data, b"startxref", 0), Some(4));
        assert_eq!(rfind_bytes(data, b"startxref"), Some(17));
        assert_eq!(find_bytes(data, b"missing", 0), None);
    }
}
