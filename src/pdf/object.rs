//! PDF object types and serialization

use std::fmt;
use std::io::{self, Write};

use crate::error::{PDFError, PDFResult};
use super::{Dictionary, Stream};

/// Identity of an indirect object: (object number, generation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub number: u32,
    pub generation: u16,
}

impl ObjectId {
    pub fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

impl From<(u32, u16)> for ObjectId {
    fn from((number, generation): (u32, u16)) -> Self {
        Self::new(number, generation)
    }
}

/// PDF object types
///
/// Equality is structural. References compare by id only, so comparing two
/// objects never walks into the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real value
    Real(f64),
    /// Name object (without the leading slash, `#xx` escapes decoded)
    Name(Vec<u8>),
    /// String value (literal or hexadecimal)
    String(Vec<u8>),
    /// Array object
    Array(Vec<Object>),
    /// Dictionary object
    Dictionary(Dictionary),
    /// Stream object
    Stream(Stream),
    /// Indirect reference
    Reference(ObjectId),
}

impl Object {
    pub fn name(name: impl AsRef<[u8]>) -> Self {
        Object::Name(name.as_ref().to_vec())
    }

    pub fn string(bytes: impl AsRef<[u8]>) -> Self {
        Object::String(bytes.as_ref().to_vec())
    }

    pub fn reference(number: u32, generation: u16) -> Self {
        Object::Reference(ObjectId::new(number, generation))
    }

    /// Type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "null",
            Object::Boolean(_) => "boolean",
            Object::Integer(_) => "integer",
            Object::Real(_) => "real",
            Object::Name(_) => "name",
            Object::String(_) => "string",
            Object::Array(_) => "array",
            Object::Dictionary(_) => "dictionary",
            Object::Stream(_) => "stream",
            Object::Reference(_) => "reference",
        }
    }

    fn type_error(&self, expected: &'static str) -> PDFError {
        PDFError::InvalidObjectType {
            expected,
            found: self.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn as_bool(&self) -> PDFResult<bool> {
        match self {
            Object::Boolean(b) => Ok(*b),
            other => Err(other.type_error("boolean")),
        }
    }

    pub fn as_i64(&self) -> PDFResult<i64> {
        match self {
            Object::Integer(i) => Ok(*i),
            Object::Real(r) if r.fract() == 0.0 => Ok(*r as i64),
            other => Err(other.type_error("integer")),
        }
    }

    pub fn as_f64(&self) -> PDFResult<f64> {
        match self {
            Object::Integer(i) => Ok(*i as f64),
            Object::Real(r) => Ok(*r),
            other => Err(other.type_error("number")),
        }
    }

    pub fn as_name(&self) -> PDFResult<&[u8]> {
        match self {
            Object::Name(n) => Ok(n),
            other => Err(other.type_error("name")),
        }
    }

    /// Name as UTF-8 text, lossy for exotic bytes
    pub fn as_name_str(&self) -> PDFResult<&str> {
        let name = self.as_name()?;
        std::str::from_utf8(name).map_err(|_| PDFError::InvalidObjectType {
            expected: "ASCII name",
            found: "binary name",
        })
    }

    pub fn as_str(&self) -> PDFResult<&[u8]> {
        match self {
            Object::String(s) => Ok(s),
            other => Err(other.type_error("string")),
        }
    }

    pub fn as_array(&self) -> PDFResult<&Vec<Object>> {
        match self {
            Object::Array(a) => Ok(a),
            other => Err(other.type_error("array")),
        }
    }

    /// Dictionary of a dictionary or of a stream
    pub fn as_dict(&self) -> PDFResult<&Dictionary> {
        match self {
            Object::Dictionary(d) => Ok(d),
            Object::Stream(s) => Ok(&s.dict),
            other => Err(other.type_error("dictionary")),
        }
    }

    pub fn as_dict_mut(&mut self) -> PDFResult<&mut Dictionary> {
        match self {
            Object::Dictionary(d) => Ok(d),
            Object::Stream(s) => Ok(&mut s.dict),
            other => Err(other.type_error("dictionary")),
        }
    }

    pub fn as_stream(&self) -> PDFResult<&Stream> {
        match self {
            Object::Stream(s) => Ok(s),
            other => Err(other.type_error("stream")),
        }
    }

    pub fn as_reference(&self) -> PDFResult<ObjectId> {
        match self {
            Object::Reference(id) => Ok(*id),
            other => Err(other.type_error("reference")),
        }
    }

    /// Visit every nested object, this one included, depth first
    pub fn walk_mut<F: FnMut(&mut Object)>(&mut self, f: &mut F) {
        f(self);
        match self {
            Object::Array(items) => {
                for item in items.iter_mut() {
                    item.walk_mut(f);
                }
            }
            Object::Dictionary(dict) => {
                for (_, value) in dict.iter_mut() {
                    value.walk_mut(f);
                }
            }
            Object::Stream(stream) => {
                for (_, value) in stream.dict.iter_mut() {
                    value.walk_mut(f);
                }
            }
            _ => {}
        }
    }

    /// Collect the ids of all references held directly or nested in this object
    pub fn references(&self) -> Vec<ObjectId> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut Vec<ObjectId>) {
        match self {
            Object::Reference(id) => refs.push(*id),
            Object::Array(items) => items.iter().for_each(|item| item.collect_references(refs)),
            Object::Dictionary(dict) => dict.values().for_each(|v| v.collect_references(refs)),
            Object::Stream(stream) => stream.dict.values().for_each(|v| v.collect_references(refs)),
            _ => {}
        }
    }

    /// Serialize the value (stream dictionaries only, never stream bodies)
    pub fn write_to<W: Write>(&self, output: &mut W) -> io::Result<()> {
        match self {
            Object::Null => output.write_all(b"null"),
            Object::Boolean(b) => write!(output, "{}", b),
            Object::Integer(i) => write!(output, "{}", i),
            Object::Real(r) => write_real(output, *r),
            Object::Name(n) => write_name(output, n),
            Object::String(s) => write_string(output, s),
            Object::Array(items) => {
                output.write_all(b"[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 && needs_separator(&items[i - 1], item) {
                        output.write_all(b" ")?;
                    }
                    item.write_to(output)?;
                }
                output.write_all(b"]")
            }
            Object::Dictionary(d) => d.write_to(output),
            Object::Stream(s) => s.dict.write_to(output),
            Object::Reference(id) => write!(output, "{} {} R", id.number, id.generation),
        }
    }

    /// Serialized form as bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut out);
        out
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Object::Boolean(b)
    }
}

impl From<i64> for Object {
    fn from(i: i64) -> Self {
        Object::Integer(i)
    }
}

impl From<i32> for Object {
    fn from(i: i32) -> Self {
        Object::Integer(i as i64)
    }
}

impl From<usize> for Object {
    fn from(i: usize) -> Self {
        Object::Integer(i as i64)
    }
}

impl From<f64> for Object {
    fn from(r: f64) -> Self {
        Object::Real(r)
    }
}

impl From<ObjectId> for Object {
    fn from(id: ObjectId) -> Self {
        Object::Reference(id)
    }
}

impl From<Dictionary> for Object {
    fn from(d: Dictionary) -> Self {
        Object::Dictionary(d)
    }
}

impl From<Vec<Object>> for Object {
    fn from(items: Vec<Object>) -> Self {
        Object::Array(items)
    }
}

/// Whether a space is needed between two adjacent array items
fn needs_separator(prev: &Object, next: &Object) -> bool {
    let self_delimited = |o: &Object| {
        matches!(
            o,
            Object::String(_) | Object::Array(_) | Object::Dictionary(_) | Object::Stream(_)
        )
    };
    !(self_delimited(prev) || self_delimited(next) || matches!(next, Object::Name(_)))
}

/// Reals always carry a decimal point so they never re-parse as integers
fn write_real<W: Write>(output: &mut W, r: f64) -> io::Result<()> {
    if !r.is_finite() {
        return output.write_all(b"0");
    }
    if r.fract() == 0.0 {
        write!(output, "{:.1}", r)
    } else {
        write!(output, "{}", r)
    }
}

pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\0' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

pub(crate) fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

pub(crate) fn write_name<W: Write>(output: &mut W, name: &[u8]) -> io::Result<()> {
    output.write_all(b"/")?;
    for &b in name {
        if b == b'#' || !(b'!'..=b'~').contains(&b) || is_delimiter(b) {
            write!(output, "#{:02X}", b)?;
        } else {
            output.write_all(&[b])?;
        }
    }
    Ok(())
}

/// Literal form for mostly-printable strings, hex form otherwise
fn write_string<W: Write>(output: &mut W, s: &[u8]) -> io::Result<()> {
    let binary = s
        .iter()
        .filter(|&&b| !(b.is_ascii_graphic() || b == b' ' || b == b'\n' || b == b'\r' || b == b'\t'))
        .count();

    if binary > s.len() / 4 {
        output.write_all(b"<")?;
        for &b in s {
            write!(output, "{:02X}", b)?;
        }
        return output.write_all(b">");
    }

    output.write_all(b"(")?;
    for &b in s {
        match b {
            b'(' | b')' | b'\\' => output.write_all(&[b'\\', b])?,
            b'\n' => output.write_all(b"\\n")?,
            b'\r' => output.write_all(b"\\r")?,
            b'\t' => output.write_all(b"\\t")?,
            b' '..=b'~' => output.write_all(&[b])?,
            _ => write!(output, "\\{:03o}", b)?,
        }
    }
    output.write_all(b")")
}
