//! In-memory PDF fixtures shared by the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

use pdf_store::{
    dictionary, encode_flate, Dictionary, EncryptionAlgorithm, Object, ObjectId, PDFPermissions,
    StandardSecurityHandler,
};

pub const FILE_ID: &[u8] = b"fixture-file-id!";

pub const CONTENT: &[u8] = b"BT /F1 12 Tf 72 720 Td (Hello) Tj ET";

enum Body {
    Value(Object),
    Stream(Dictionary, Vec<u8>),
}

/// Builds a complete file from numbered objects
pub struct PdfBuilder {
    version: &'static str,
    objects: BTreeMap<u32, (u16, Body)>,
    object_stream: Option<(u32, Vec<u32>)>,
    trailer: Dictionary,
    encryption: Option<StandardSecurityHandler>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self {
            version: "1.4",
            objects: BTreeMap::new(),
            object_stream: None,
            trailer: Dictionary::new(),
            encryption: None,
        }
    }

    pub fn version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    pub fn object(mut self, number: u32, value: Object) -> Self {
        self.objects.insert(number, (0, Body::Value(value)));
        self
    }

    pub fn object_with_generation(mut self, number: u32, generation: u16, value: Object) -> Self {
        self.objects.insert(number, (generation, Body::Value(value)));
        self
    }

    /// A stream whose `/Length` is filled in unless the dictionary has one
    pub fn stream(mut self, number: u32, dict: Dictionary, data: &[u8]) -> Self {
        self.objects.insert(number, (0, Body::Stream(dict, data.to_vec())));
        self
    }

    /// Store `members` in object stream `container` behind an xref stream
    pub fn object_stream(mut self, container: u32, members: &[u32]) -> Self {
        self.object_stream = Some((container, members.to_vec()));
        self
    }

    pub fn trailer(mut self, key: &str, value: Object) -> Self {
        self.trailer.set(key, value);
        self
    }

    pub fn encrypt(mut self, algorithm: EncryptionAlgorithm, user: &str, owner: &str) -> Self {
        let handler = StandardSecurityHandler::create(
            algorithm,
            PDFPermissions::new(PDFPermissions::ALL),
            user.as_bytes(),
            owner.as_bytes(),
            FILE_ID,
        )
        .expect("create security handler");
        self.encryption = Some(handler);
        self
    }

    fn highest_number(&self) -> u32 {
        let container = self.object_stream.as_ref().map_or(0, |(n, _)| *n);
        self.objects.keys().copied().max().unwrap_or(0).max(container)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = format!("%PDF-{}\n", self.version).into_bytes();
        out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

        let engine = self
            .encryption
            .as_ref()
            .map(|handler| handler.engine().expect("created handler is unlocked"));
        let members: Vec<u32> = self.object_stream.as_ref().map(|(_, m)| m.clone()).unwrap_or_default();

        let mut offsets: BTreeMap<u32, (usize, u16)> = BTreeMap::new();
        for (&number, (generation, body)) in &self.objects {
            if members.contains(&number) {
                continue;
            }
            let id = ObjectId::new(number, *generation);
            offsets.insert(number, (out.len(), *generation));
            match body {
                Body::Value(value) => {
                    let mut value = value.clone();
                    if let Some(engine) = &engine {
                        encrypt_strings(&mut value, id, engine);
                    }
                    write_value(&mut out, id, &value);
                }
                Body::Stream(dict, data) => {
                    let mut dict = Object::Dictionary(dict.clone());
                    let mut data = data.clone();
                    if let Some(engine) = &engine {
                        encrypt_strings(&mut dict, id, engine);
                        data = engine.encrypt_stream(id, &data).expect("encrypt stream");
                    }
                    write_stream(&mut out, id, dict.as_dict().expect("dictionary"), &data);
                }
            }
        }

        let mut compressed: BTreeMap<u32, (u32, u32)> = BTreeMap::new();
        if let Some((container, numbers)) = &self.object_stream {
            let mut header = Vec::new();
            let mut bodies = Vec::new();
            for (index, number) in numbers.iter().enumerate() {
                let Some((_, Body::Value(value))) = self.objects.get(number) else {
                    panic!("object stream member {} must be a plain value", number);
                };
                header.extend_from_slice(format!("{} {} ", number, bodies.len()).as_bytes());
                bodies.extend_from_slice(&value.to_bytes());
                bodies.push(b' ');
                compressed.insert(*number, (*container, index as u32));
            }
            let mut payload = header.clone();
            payload.extend_from_slice(&bodies);
            let mut data = encode_flate(&payload).expect("flate");
            let id = ObjectId::new(*container, 0);
            if let Some(engine) = &engine {
                data = engine.encrypt_stream(id, &data).expect("encrypt object stream");
            }
            let dict = dictionary! {
                "Type" => Object::name("ObjStm"),
                "N" => numbers.len(),
                "First" => header.len(),
                "Filter" => Object::name("FlateDecode"),
            };
            offsets.insert(*container, (out.len(), 0));
            write_stream(&mut out, id, &dict, &data);
        }

        let mut trailer = self.trailer.clone();
        trailer.set(
            "ID",
            Object::Array(vec![Object::string(FILE_ID), Object::string(FILE_ID)]),
        );
        let mut next = self.highest_number() + 1;
        if let Some(handler) = &self.encryption {
            let id = ObjectId::new(next, 0);
            offsets.insert(next, (out.len(), 0));
            write_value(&mut out, id, &Object::Dictionary(handler.to_dict()));
            trailer.set("Encrypt", id);
            next += 1;
        }

        if self.object_stream.is_some() {
            write_xref_stream(&mut out, next, trailer, &offsets, &compressed);
        } else {
            trailer.set("Size", next as i64);
            let start = out.len();
            out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", next).as_bytes());
            for number in 1..next {
                let line = match offsets.get(&number) {
                    Some((offset, generation)) => format!("{:010} {:05} n \n", offset, generation),
                    None => "0000000000 00001 f \n".to_string(),
                };
                out.extend_from_slice(line.as_bytes());
            }
            out.extend_from_slice(b"trailer\n");
            out.extend_from_slice(&Object::Dictionary(trailer).to_bytes());
            out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", start).as_bytes());
        }
        out
    }
}

fn encrypt_strings(value: &mut Object, id: ObjectId, engine: &pdf_store::CryptoEngine) {
    value.walk_mut(&mut |item| {
        if let Object::String(bytes) = item {
            *bytes = engine.encrypt_string(id, bytes).expect("encrypt string");
        }
    });
}

fn write_value(out: &mut Vec<u8>, id: ObjectId, value: &Object) {
    out.extend_from_slice(format!("{} {} obj\n", id.number, id.generation).as_bytes());
    out.extend_from_slice(&value.to_bytes());
    out.extend_from_slice(b"\nendobj\n");
}

fn write_stream(out: &mut Vec<u8>, id: ObjectId, dict: &Dictionary, data: &[u8]) {
    let mut dict = dict.clone();
    if !dict.has("Length") {
        dict.set("Length", data.len());
    }
    out.extend_from_slice(format!("{} {} obj\n", id.number, id.generation).as_bytes());
    out.extend_from_slice(&Object::Dictionary(dict).to_bytes());
    out.extend_from_slice(b"\nstream\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\nendstream\nendobj\n");
}

/// Cross-reference stream numbered `number`, with `/W [1 4 2]`
fn write_xref_stream(
    out: &mut Vec<u8>,
    number: u32,
    mut trailer: Dictionary,
    offsets: &BTreeMap<u32, (usize, u16)>,
    compressed: &BTreeMap<u32, (u32, u32)>,
) {
    let start = out.len();
    let size = number + 1;
    let mut rows = Vec::new();
    for n in 0..size {
        let (kind, field2, field3): (u8, u32, u16) = if n == number {
            (1, start as u32, 0)
        } else if let Some((offset, generation)) = offsets.get(&n) {
            (1, *offset as u32, *generation)
        } else if let Some((container, index)) = compressed.get(&n) {
            (2, *container, *index as u16)
        } else if n == 0 {
            (0, 0, 0xFFFF)
        } else {
            (0, 0, 1)
        };
        rows.push(kind);
        rows.extend_from_slice(&field2.to_be_bytes());
        rows.extend_from_slice(&field3.to_be_bytes());
    }
    let data = encode_flate(&rows).expect("flate");
    trailer.set("Type", Object::name("XRef"));
    trailer.set("Size", size as i64);
    trailer.set("W", Object::Array(vec![1.into(), 4.into(), 2.into()]));
    trailer.set("Filter", Object::name("FlateDecode"));
    write_stream(out, ObjectId::new(number, 0), &trailer, &data);
    out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", start).as_bytes());
}

/// Offset named by the last `startxref`
pub fn last_startxref(data: &[u8]) -> usize {
    let text = String::from_utf8_lossy(data);
    let at = text.rfind("startxref").expect("startxref");
    text[at + "startxref".len()..]
        .split_whitespace()
        .next()
        .and_then(|n| n.parse().ok())
        .expect("startxref offset")
}

/// Append an incremental update replacing or adding `objects`
pub fn append_update(mut data: Vec<u8>, objects: &[(u32, Object)], size: u32) -> Vec<u8> {
    let prev = last_startxref(&data);
    let mut offsets = Vec::new();
    for (number, value) in objects {
        offsets.push((*number, data.len()));
        write_value(&mut data, ObjectId::new(*number, 0), value);
    }
    let start = data.len();
    data.extend_from_slice(b"xref\n");
    for (number, offset) in offsets {
        data.extend_from_slice(format!("{} 1\n{:010} 00000 n \n", number, offset).as_bytes());
    }
    let trailer = dictionary! { "Size" => size as i64, "Prev" => prev };
    data.extend_from_slice(b"trailer\n");
    data.extend_from_slice(&Object::Dictionary(trailer).to_bytes());
    data.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", start).as_bytes());
    data
}

/// One page with a flate content stream, a font, an info dictionary, two
/// identical graphics states and two unreachable objects
///
/// | num | object                                  |
/// |-----|-----------------------------------------|
/// | 1   | catalog                                 |
/// | 2   | page tree root                          |
/// | 3   | page                                    |
/// | 4   | content stream, `/Length 5 0 R`         |
/// | 5   | length of 4                             |
/// | 6   | font                                    |
/// | 7   | info                                    |
/// | 8,9 | identical ExtGState                     |
/// | 10  | orphan dictionary                       |
/// | 11  | orphan stream                           |
pub fn sample_builder() -> PdfBuilder {
    let content = encode_flate(CONTENT).expect("flate");
    PdfBuilder::new()
        .object(1, Object::Dictionary(dictionary! {
            "Type" => Object::name("Catalog"),
            "Pages" => Object::reference(2, 0),
        }))
        .object(2, Object::Dictionary(dictionary! {
            "Type" => Object::name("Pages"),
            "Kids" => Object::Array(vec![Object::reference(3, 0)]),
            "Count" => 1,
            "MediaBox" => Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
        }))
        .object(3, Object::Dictionary(dictionary! {
            "Type" => Object::name("Page"),
            "Parent" => Object::reference(2, 0),
            "Resources" => Object::Dictionary(dictionary! {
                "Font" => Object::Dictionary(dictionary! { "F1" => Object::reference(6, 0) }),
                "ExtGState" => Object::Dictionary(dictionary! {
                    "GS1" => Object::reference(8, 0),
                    "GS2" => Object::reference(9, 0),
                }),
            }),
            "Contents" => Object::reference(4, 0),
        }))
        .stream(
            4,
            dictionary! {
                "Length" => Object::reference(5, 0),
                "Filter" => Object::name("FlateDecode"),
            },
            &content,
        )
        .object(5, Object::Integer(content.len() as i64))
        .object(6, Object::Dictionary(dictionary! {
            "Type" => Object::name("Font"),
            "Subtype" => Object::name("Type1"),
            "BaseFont" => Object::name("Helvetica"),
        }))
        .object(7, Object::Dictionary(dictionary! {
            "Title" => Object::string("Sample"),
            "Producer" => Object::string("fixture"),
        }))
        .object(8, Object::Dictionary(dictionary! {
            "Type" => Object::name("ExtGState"),
            "CA" => 0.5,
        }))
        .object(9, Object::Dictionary(dictionary! {
            "Type" => Object::name("ExtGState"),
            "CA" => 0.5,
        }))
        .object(10, Object::Dictionary(dictionary! { "Orphan" => true }))
        .stream(11, dictionary! {}, b"unreachable")
        .trailer("Root", Object::reference(1, 0))
        .trailer("Info", Object::reference(7, 0))
}

pub fn sample_pdf() -> Vec<u8> {
    sample_builder().build()
}

/// Sample content with direct lengths, safe to encrypt
pub fn encrypted_pdf(algorithm: EncryptionAlgorithm, user: &str, owner: &str) -> Vec<u8> {
    let content = encode_flate(CONTENT).expect("flate");
    sample_builder()
        .stream(4, dictionary! { "Filter" => Object::name("FlateDecode") }, &content)
        .encrypt(algorithm, user, owner)
        .build()
}
