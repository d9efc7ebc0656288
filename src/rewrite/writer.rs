//! Serialization of the rewritten file
//!
//! Objects are written in the order given, each offset recorded for the
//! classic cross-reference table that closes the file.

use std::collections::BTreeMap;
use std::io::{self, Write};

use log::trace;

use crate::error::PDFResult;
use crate::pdf::{Dictionary, Object, ObjectId};

/// Generation of the head of the free list
const FREE_HEAD_GENERATION: u16 = 65535;

/// Writer that counts the bytes passed through it
pub(crate) struct CountingWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn position(&self) -> u64 {
        self.written
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writes header, indirect objects, xref table and trailer
pub(crate) struct PdfWriter<W: Write> {
    out: CountingWriter<W>,
    offsets: BTreeMap<u32, (u64, u16)>,
}

impl<W: Write> PdfWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            out: CountingWriter::new(inner),
            offsets: BTreeMap::new(),
        }
    }

    /// `%PDF-x.y` followed by a comment of high-bit bytes
    pub fn write_header(&mut self, version: &str) -> PDFResult<()> {
        write!(self.out, "%PDF-{}\n", version)?;
        self.out.write_all(b"%\xE2\xE3\xCF\xD3\n")?;
        Ok(())
    }

    pub fn write_object(&mut self, id: ObjectId, value: &Object) -> PDFResult<()> {
        self.begin(id)?;
        value.write_to(&mut self.out)?;
        self.out.write_all(b"\nendobj\n\n")?;
        Ok(())
    }

    /// `dict` must already carry a `/Length` equal to `data.len()`
    pub fn write_stream(&mut self, id: ObjectId, dict: &Dictionary, data: &[u8]) -> PDFResult<()> {
        self.begin(id)?;
        dict.write_to(&mut self.out)?;
        self.out.write_all(b"\nstream\n")?;
        self.out.write_all(data)?;
        self.out.write_all(b"\nendstream\nendobj\n\n")?;
        Ok(())
    }

    fn begin(&mut self, id: ObjectId) -> PDFResult<()> {
        let offset = self.out.position();
        trace!("Writing {} at {}", id, offset);
        self.offsets.insert(id.number, (offset, id.generation));
        write!(self.out, "{} {} obj\n", id.number, id.generation)?;
        Ok(())
    }

    /// Write a single-subsection xref covering `0..size`
    ///
    /// Numbers never written are free, linked in ascending order from
    /// object 0 and given the generation `free_generation` returns.
    /// Returns the offset of the `xref` keyword.
    pub fn write_xref(&mut self, size: u32, free_generation: impl Fn(u32) -> u16) -> PDFResult<u64> {
        let start = self.out.position();
        let free: Vec<u32> = (1..size).filter(|n| !self.offsets.contains_key(n)).collect();

        write!(self.out, "xref\n0 {}\n", size)?;
        let head = free.first().copied().unwrap_or(0);
        write!(self.out, "{:010} {:05} f \n", head, FREE_HEAD_GENERATION)?;

        let mut free_iter = free.iter().peekable();
        for number in 1..size {
            match self.offsets.get(&number) {
                Some(&(offset, generation)) => write!(self.out, "{:010} {:05} n \n", offset, generation)?,
                None => {
                    free_iter.next();
                    let next = free_iter.peek().map_or(0, |&&n| n);
                    write!(self.out, "{:010} {:05} f \n", next, free_generation(number))?;
                }
            }
        }
        Ok(start)
    }

    pub fn write_trailer(&mut self, trailer: &Dictionary, xref_offset: u64) -> PDFResult<()> {
        self.out.write_all(b"trailer\n")?;
        trailer.write_to(&mut self.out)?;
        write!(self.out, "\nstartxref\n{}\n%%EOF\n", xref_offset)?;
        self.out.flush()?;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.out.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test]
    fn test_object_record_layout() -> PDFResult<()> {
        let mut buffer = Vec::new();
        let mut writer = PdfWriter::new(&mut buffer);
        writer.write_object(ObjectId::new(3, 1), &Object::Integer(42))?;
        writer.write_stream(ObjectId::new(4, 0), &dictionary! { "Length" => 2 }, b"hi")?;
        let written = writer.bytes_written();
        assert_eq!(written, buffer.len() as u64);
        assert_eq!(
            String::from_utf8_lossy(&buffer),
            "3 1 obj\n42\nendobj\n\n4 0 obj\n<</Length 2>>\nstream\nhi\nendstream\nendobj\n\n"
        );
        Ok(())
    }

    #[test]
    fn test_xref_free_list() -> PDFResult<()> {
        let mut buffer = Vec::new();
        let mut writer = PdfWriter::new(&mut buffer);
        writer.write_header("1.4")?;
        let first = writer.bytes_written();
        writer.write_object(ObjectId::new(1, 0), &Object::Null)?;
        let third = writer.bytes_written();
        writer.write_object(ObjectId::new(3, 0), &Object::Boolean(true))?;

        let xref = writer.write_xref(5, |n| if n == 2 { 1 } else { 0 })?;
        writer.write_trailer(&dictionary! { "Size" => 5 }, xref)?;

        let table = String::from_utf8_lossy(&buffer[xref as usize..]).into_owned();
        let expected = format!(
            "xref\n0 5\n0000000002 65535 f \n{:010} 00000 n \n0000000004 00001 f \n{:010} 00000 n \n0000000000 00000 f \ntrailer\n<</Size 5>>\nstartxref\n{}\n%%EOF\n",
            first, third, xref
        );
        assert_eq!(table, expected);
        for line in table.lines().skip(2).take(5) {
            assert_eq!(line.len() + 1, 20);
        }
        Ok(())
    }

    #[test]
    fn test_header_has_binary_comment() -> PDFResult<()> {
        let mut buffer = Vec::new();
        PdfWriter::new(&mut buffer).write_header("1.7")?;
        assert!(buffer.starts_with(b"%PDF-1.7\n%"));
        assert!(buffer[10..14].iter().all(|&b| b >= 0x80));
        Ok(())
    }
}
