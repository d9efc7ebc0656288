//! The document object store
//!
//! A `Document` owns the file bytes, the cross-reference index and a cache
//! of loaded objects keyed by object number. References are plain ids and
//! are only followed through an explicit `resolve`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::crypto::CryptoEngine;
use crate::error::{PDFError, PDFResult, ResultExt};
use crate::handlers::{security_handler_from_dict, StandardSecurityHandler};
use crate::security::{decrypt_object_strings, stream_is_exempt};
use super::filter::decode_chain;
use super::parser::{endstream_at, find_bytes, scan_stream_length, ParsedObject, PDFParser};
use super::xref::{load_xref_table, XrefEntry, XrefTable};
use super::{Dictionary, Object, ObjectId, Stream, StreamContent};

/// Where the header may start
const HEADER_SEARCH_LIMIT: usize = 1024;

/// A parsed PDF document
pub struct Document {
    data: Vec<u8>,
    version: String,
    xref: XrefTable,
    trailer: Dictionary,
    cache: HashMap<u32, Arc<Object>>,
    /// Numbers whose load is in progress
    loading: HashSet<u32>,
    security: Option<StandardSecurityHandler>,
    engine: Option<CryptoEngine>,
    /// The encryption dictionary, when indirect; never decrypted
    encrypt_number: Option<u32>,
}

impl Document {
    /// Open and index the file at `path`
    pub fn open(path: impl AsRef<Path>) -> PDFResult<Self> {
        let path = path.as_ref();
        debug!("Opening {}", path.display());
        let data = fs::read(path).map_err(|e| PDFError::from(e).in_operation("open"))?;
        Self::from_bytes(data)
    }

    /// Index a document held in memory
    ///
    /// Encrypted documents are tried with the empty password; when that
    /// fails the document stays locked until `authenticate` succeeds.
    pub fn from_bytes(data: Vec<u8>) -> PDFResult<Self> {
        let version = read_header_version(&data).in_operation("open")?;
        let xref = load_xref_table(&data).in_operation("open")?;
        let trailer = xref.merged_trailer();
        if !trailer.has("Root") {
            return Err(PDFError::malformed(data.len(), "Trailer has no /Root").in_operation("open"));
        }
        debug!(
            "PDF {} with {} xref sections, size {}",
            version,
            xref.sections().len(),
            xref.size()
        );

        let mut doc = Self {
            data,
            version,
            xref,
            trailer,
            cache: HashMap::new(),
            loading: HashSet::new(),
            security: None,
            engine: None,
            encrypt_number: None,
        };
        doc.setup_encryption().in_operation("open")?;
        Ok(doc)
    }

    fn setup_encryption(&mut self) -> PDFResult<()> {
        let encrypt = match self.trailer.get("Encrypt") {
            None | Some(Object::Null) => return Ok(()),
            Some(Object::Reference(id)) => {
                let id = *id;
                self.encrypt_number = Some(id.number);
                self.resolve(id)?
            }
            Some(other) => Arc::new(other.clone()),
        };
        let encrypt = encrypt.as_dict()?;

        let file_id = match self.trailer.get("ID") {
            Some(Object::Array(ids)) => ids.first().and_then(|id| id.as_str().ok()).unwrap_or_default(),
            _ => {
                warn!("Encrypted document without /ID, using an empty file id");
                &[][..]
            }
        };

        let mut handler = security_handler_from_dict(encrypt, file_id)?;
        if handler.authenticate(b"") {
            info!("Opened encrypted document with the empty password");
            self.engine = handler.engine();
        } else {
            debug!("Document needs a password");
        }
        self.security = Some(handler);
        self.retain_encrypt_only();
        Ok(())
    }

    /// Drop cached objects loaded under a different key state
    fn retain_encrypt_only(&mut self) {
        let keep = self.encrypt_number;
        self.cache.retain(|number, _| Some(*number) == keep);
    }

    /// Try `password` as user then owner password
    ///
    /// Unencrypted documents accept anything. On success later loads are
    /// decrypted with the derived key.
    pub fn authenticate(&mut self, password: &[u8]) -> bool {
        let Some(handler) = self.security.as_mut() else {
            return true;
        };
        if !handler.authenticate(password) {
            debug!("Password rejected");
            return false;
        }
        self.engine = handler.engine();
        self.retain_encrypt_only();
        true
    }

    /// Header version, e.g. `1.7`
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Newest trailer merged with the keys of older sections
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    pub fn xref(&self) -> &XrefTable {
        &self.xref
    }

    pub fn is_encrypted(&self) -> bool {
        self.security.is_some()
    }

    /// Encrypted and no accepted password yet
    pub fn is_locked(&self) -> bool {
        self.security.is_some() && self.engine.is_none()
    }

    pub fn security_handler(&self) -> Option<&StandardSecurityHandler> {
        self.security.as_ref()
    }

    /// Number of the indirect encryption dictionary
    pub fn encrypt_number(&self) -> Option<u32> {
        self.encrypt_number
    }

    /// Current xref entry for `number`, newest section first
    pub fn get_entry(&self, number: u32) -> Option<XrefEntry> {
        self.xref.get(number)
    }

    /// One past the highest known object number
    pub fn size(&self) -> u32 {
        let cached = self.cache.keys().max().map_or(0, |n| n + 1);
        self.xref.size().max(cached)
    }

    /// Every number holding an object, ascending
    pub fn object_numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self
            .xref
            .numbers()
            .into_iter()
            .filter(|&n| n != 0 && self.xref.get(n).map_or(false, |e| !e.is_free()))
            .collect();
        numbers.extend(self.cache.keys().copied().filter(|&n| self.xref.get(n).is_none()));
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }

    /// Load the object `id` names
    pub fn resolve(&mut self, id: ObjectId) -> PDFResult<Arc<Object>> {
        if let Some(object) = self.cache.get(&id.number) {
            return Ok(Arc::clone(object));
        }
        if id.number == 0 || id.number >= self.xref.size() {
            return Err(PDFError::broken(id, "object number out of range"));
        }
        if let Some(entry) = self.xref.get(id.number) {
            if !entry.is_free() && entry.generation() != id.generation {
                trace!("Generation mismatch for {}: xref has {}", id, entry.generation());
            }
        }
        self.load_object(id.number)
    }

    /// Follow references from `object` until a direct value, at most `limit` hops
    pub fn dereference(&mut self, object: &Object, limit: usize) -> PDFResult<Arc<Object>> {
        let Object::Reference(mut id) = *object else {
            return Ok(Arc::new(object.clone()));
        };
        for _ in 0..limit {
            let target = self.resolve(id)?;
            match *target {
                Object::Reference(next) => id = next,
                _ => return Ok(target),
            }
        }
        Err(PDFError::broken(id, format!("reference chain longer than {}", limit)))
    }

    /// Load object `number` into the cache
    pub fn load_object(&mut self, number: u32) -> PDFResult<Arc<Object>> {
        if let Some(object) = self.cache.get(&number) {
            return Ok(Arc::clone(object));
        }

        let entry = self
            .xref
            .get(number)
            .ok_or_else(|| PDFError::broken(ObjectId::new(number, 0), "not in the xref index"))?;
        let id = ObjectId::new(number, entry.generation());

        if !self.loading.insert(number) {
            return Err(PDFError::broken(id, "object refers to itself while loading"));
        }
        let result = match entry {
            XrefEntry::Free { .. } => Err(PDFError::broken(id, "free entry")),
            XrefEntry::InUse { offset, .. } => self.load_from_offset(id, offset),
            XrefEntry::Compressed { container, index } => self.load_compressed(id, container, index),
        };
        self.loading.remove(&number);

        let object = result?;
        self.cache.insert(number, Arc::clone(&object));
        Ok(object)
    }

    fn load_from_offset(&mut self, id: ObjectId, offset: usize) -> PDFResult<Arc<Object>> {
        if offset >= self.data.len() {
            return Err(PDFError::broken(id, format!("offset {} beyond end of file", offset)));
        }

        let (found, parsed) = PDFParser::new(&self.data, offset)
            .parse_indirect_object()
            .map_err(|e| PDFError::broken(id, e.to_string()))?;
        if found.number != id.number {
            return Err(PDFError::broken(id, format!("offset {} holds object {}", offset, found)));
        }

        let mut object = match parsed {
            ParsedObject::Value(value) => value,
            ParsedObject::StreamStart { dict, data_offset } => {
                let length = self.stream_length(id, &dict, data_offset)?;
                Object::Stream(Stream::lazy(dict, data_offset, length))
            }
        };

        if Some(id.number) != self.encrypt_number {
            if let Some(engine) = &self.engine {
                decrypt_object_strings(&mut object, found, engine);
            }
        }
        trace!("Loaded {} ({})", found, object.type_name());
        Ok(Arc::new(object))
    }

    /// Payload length from `/Length`, checked against the `endstream` keyword
    fn stream_length(&mut self, id: ObjectId, dict: &Dictionary, data_offset: usize) -> PDFResult<usize> {
        let declared = match dict.get("Length") {
            Some(Object::Integer(len)) => Some(*len),
            Some(Object::Reference(length_id)) => match self.resolve(*length_id) {
                Ok(value) => value.as_i64().ok(),
                Err(e) => {
                    warn!("Cannot resolve /Length of {}: {}", id, e);
                    None
                }
            },
            _ => None,
        };

        if let Some(len) = declared.and_then(|len| usize::try_from(len).ok()) {
            let end = data_offset.saturating_add(len);
            if end <= self.data.len() && endstream_at(&self.data, end) {
                return Ok(len);
            }
        }

        let scanned = scan_stream_length(&self.data, data_offset)
            .ok_or_else(|| PDFError::broken(id, "stream without endstream"))?;
        warn!(
            "Stream {} declares length {:?}, using {} found by scanning",
            id, declared, scanned
        );
        Ok(scanned)
    }

    fn load_compressed(&mut self, id: ObjectId, container: u32, index: u32) -> PDFResult<Arc<Object>> {
        match self.xref.get(container) {
            Some(XrefEntry::InUse { .. }) => {}
            Some(XrefEntry::Compressed { .. }) => {
                return Err(PDFError::broken(id, format!("container {} is itself compressed", container)))
            }
            _ => return Err(PDFError::broken(id, format!("container {} is not in use", container))),
        }

        let container_object = self.load_object(container)?;
        let stream = container_object
            .as_stream()
            .map_err(|e| PDFError::broken(id, format!("container {}: {}", container, e)))?;
        if !stream.dict.has_type("ObjStm") {
            warn!("Object stream {} lacks /Type /ObjStm", container);
        }

        let container_id = ObjectId::new(container, self.generation_of(container));
        let decoded = self
            .decoded_stream(container_id, stream)
            .map_err(|e| PDFError::broken(id, format!("container {}: {}", container, e)))?;
        let members = parse_object_stream(&stream.dict, &decoded)
            .map_err(|e| PDFError::broken(id, format!("container {}: {}", container, e)))?;
        debug!("Object stream {} holds {} objects", container, members.len());

        // Cache every member that the index still places in this container
        let mut wanted = None;
        for (position, (number, object)) in members.into_iter().enumerate() {
            let current = matches!(
                self.xref.get(number),
                Some(XrefEntry::Compressed { container: c, .. }) if c == container
            );
            if number == id.number && (wanted.is_none() || position as u32 == index) {
                wanted = Some(Arc::new(object.clone()));
            }
            if current && number != id.number && !self.cache.contains_key(&number) {
                self.cache.insert(number, Arc::new(object));
            }
        }

        wanted.ok_or_else(|| PDFError::broken(id, format!("not found in object stream {}", container)))
    }

    fn generation_of(&self, number: u32) -> u16 {
        self.xref.get(number).map_or(0, |entry| entry.generation())
    }

    /// Replace the value stored for `number`
    pub fn update_object(&mut self, number: u32, object: Object) {
        self.cache.insert(number, Arc::new(object));
    }

    /// Store `object` under a fresh number
    pub fn add_object(&mut self, object: Object) -> ObjectId {
        let id = ObjectId::new(self.size().max(1), 0);
        self.cache.insert(id.number, Arc::new(object));
        id
    }

    /// Load every object that lives inside an object stream
    pub fn preload_compressed(&mut self) -> usize {
        let compressed: Vec<u32> = self
            .xref
            .numbers()
            .into_iter()
            .filter(|&n| matches!(self.xref.get(n), Some(XrefEntry::Compressed { .. })))
            .filter(|n| !self.cache.contains_key(n))
            .collect();

        let mut loaded = 0;
        for number in compressed {
            match self.load_object(number) {
                Ok(_) => loaded += 1,
                Err(e) => warn!("Cannot preload compressed object {}: {}", number, e),
            }
        }
        debug!("Preloaded {} compressed objects", loaded);
        loaded
    }

    /// On-disk bytes of stream `number`, decrypted when applicable
    pub fn raw_bytes(&mut self, number: u32) -> PDFResult<Vec<u8>> {
        let object = self.load_object(number)?;
        let stream = object.as_stream()?;
        self.raw_stream(ObjectId::new(number, self.generation_of(number)), stream)
    }

    /// Stream bytes after the whole filter chain
    pub fn decoded_bytes(&mut self, number: u32) -> PDFResult<Vec<u8>> {
        let object = self.load_object(number)?;
        let stream = object.as_stream()?;
        self.decoded_stream(ObjectId::new(number, self.generation_of(number)), stream)
    }

    /// Payload of `stream`, owned by object `id`, still filter-encoded
    pub fn raw_stream(&self, id: ObjectId, stream: &Stream) -> PDFResult<Vec<u8>> {
        let (offset, length) = match &stream.content {
            StreamContent::Owned(data) => return Ok(data.clone()),
            StreamContent::Lazy { offset, length } => (*offset, *length),
        };
        let bytes = self
            .data
            .get(offset..offset.saturating_add(length))
            .ok_or_else(|| PDFError::corrupt(Some(id), "stream data beyond end of file"))?;

        let Some(handler) = &self.security else {
            return Ok(bytes.to_vec());
        };
        if Some(id.number) == self.encrypt_number || stream_is_exempt(stream, handler) {
            return Ok(bytes.to_vec());
        }
        match &self.engine {
            Some(engine) => engine.decrypt_stream(id, bytes),
            None => Err(PDFError::AuthenticationFailed),
        }
    }

    /// Payload of `stream` exactly as stored, without decryption
    pub fn stored_stream(&self, stream: &Stream) -> Option<Vec<u8>> {
        match &stream.content {
            StreamContent::Owned(data) => Some(data.clone()),
            StreamContent::Lazy { offset, length } => self
                .data
                .get(*offset..offset.saturating_add(*length))
                .map(<[u8]>::to_vec),
        }
    }

    /// Payload of `stream` run through its filter chain
    pub fn decoded_stream(&self, id: ObjectId, stream: &Stream) -> PDFResult<Vec<u8>> {
        let raw = self.raw_stream(id, stream)?;
        decode_chain(&stream.filters(), &raw).map_err(|e| e.with_object(id))
    }

    /// The document catalog
    pub fn catalog(&mut self) -> PDFResult<Arc<Object>> {
        let root = self.trailer.get("Root").cloned().unwrap_or(Object::Null);
        let catalog = self.dereference(&root, 8)?;
        catalog.as_dict()?;
        Ok(catalog)
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("version", &self.version)
            .field("size", &self.xref.size())
            .field("cached_objects", &self.cache.len())
            .field("encrypted", &self.is_encrypted())
            .field("locked", &self.is_locked())
            .finish()
    }
}

fn read_header_version(data: &[u8]) -> PDFResult<String> {
    let window = &data[..data.len().min(HEADER_SEARCH_LIMIT)];
    let start = find_bytes(window, b"%PDF-", 0)
        .ok_or_else(|| PDFError::malformed(0, "No %PDF- header"))?
        + b"%PDF-".len();
    let version: String = data[start..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|&b| b as char)
        .collect();
    if version.is_empty() {
        return Err(PDFError::malformed(start, "Header without a version"));
    }
    Ok(version)
}

/// Split a decoded object stream into `(number, object)` pairs
fn parse_object_stream(dict: &Dictionary, decoded: &[u8]) -> PDFResult<Vec<(u32, Object)>> {
    let count = dict
        .get_integer("N")
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| PDFError::malformed(0, "Object stream without /N"))?;
    let first = dict
        .get_integer("First")
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| PDFError::malformed(0, "Object stream without /First"))?;

    let mut parser = PDFParser::new(decoded, 0);
    let mut header = Vec::with_capacity(count.min(decoded.len() / 2));
    for _ in 0..count {
        let number = parser.read_unsigned()?;
        let offset = parser.read_unsigned()?;
        let number = u32::try_from(number)
            .map_err(|_| PDFError::malformed(parser.position(), "Object number out of range"))?;
        header.push((number, offset as usize));
    }

    let mut members = Vec::with_capacity(header.len());
    for (number, offset) in header {
        parser.set_position(first.saturating_add(offset));
        match parser.parse_object() {
            Ok(object) => members.push((number, object)),
            Err(e) => warn!("Skipping object {} in object stream: {}", number, e),
        }
    }
    Ok(members)
}
