//! Garbage-collecting rewrite of a document
//!
//! A rewrite runs preload, optional page retention, sweep, dedup and
//! compaction, then emits every surviving object as plaintext followed by
//! a classic cross-reference table. Encryption is never carried over.

mod gc;
mod renumber;
mod retain;
mod streams;
mod writer;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::error::{PDFError, PDFResult, ResultExt};
use crate::pdf::{Dictionary, Document, Object, ObjectId};

pub use gc::sweep;
pub use renumber::{compact, dedup, RenumberMap};
pub use retain::retain_pages;
pub use streams::{ExpandFlags, StreamTreatment};

use streams::{font_program_numbers, prepare_stream};
use writer::PdfWriter;

/// Trailer keys carried into the output
const TRAILER_KEYS: [&str; 3] = ["Root", "Info", "ID"];

/// Settings for one rewrite
#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    /// 0 keeps every object, 1 sweeps, 2 also compacts, 3 also merges duplicates
    pub garbage_level: u8,
    pub expand: ExpandFlags,
    /// Hex-encode streams holding bytes outside printable ASCII
    pub ascii_safe: bool,
    pub password: Option<String>,
    /// Pages to keep, e.g. `1-3,5,N`
    pub page_subset: Option<String>,
    /// Let level 3 merge streams with identical dictionaries and bytes
    pub dedup_streams: bool,
}

impl RewriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Levels above 3 are treated as 3
    pub fn garbage_level(mut self, level: u8) -> Self {
        self.garbage_level = level.min(3);
        self
    }

    pub fn expand(mut self, flags: ExpandFlags) -> Self {
        self.expand = flags;
        self
    }

    pub fn ascii_safe(mut self, enabled: bool) -> Self {
        self.ascii_safe = enabled;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn page_subset(mut self, selection: impl Into<String>) -> Self {
        self.page_subset = Some(selection.into());
        self
    }

    pub fn dedup_streams(mut self, enabled: bool) -> Self {
        self.dedup_streams = enabled;
        self
    }
}

/// A recovered problem with one object
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteWarning {
    /// Object id in the input document
    pub id: ObjectId,
    pub message: String,
}

impl fmt::Display for RewriteWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.message)
    }
}

/// Outcome of a rewrite
#[derive(Debug, Clone, Default)]
pub struct RewriteReport {
    pub objects_written: usize,
    /// Input objects neither written nor merged
    pub objects_dropped: usize,
    /// Input objects folded into an identical object
    pub objects_merged: usize,
    /// Whether any object number changed
    pub renumbered: bool,
    pub bytes_written: u64,
    pub warnings: Vec<RewriteWarning>,
}

impl RewriteReport {
    /// Warning count per input object number
    pub fn warnings_by_object(&self) -> BTreeMap<u32, usize> {
        let mut counts = BTreeMap::new();
        for warning in &self.warnings {
            *counts.entry(warning.id.number).or_insert(0) += 1;
        }
        counts
    }

    fn warn(&mut self, id: ObjectId, message: impl Into<String>) {
        self.warnings.push(RewriteWarning {
            id,
            message: message.into(),
        });
    }
}

/// Try `password` against an encrypted document
///
/// Unencrypted documents accept any password.
pub fn authenticate(doc: &mut Document, password: &str) -> bool {
    doc.authenticate(password.as_bytes())
}

/// Rewrite the document at `input` into a new file at `output`
pub fn rewrite_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: &RewriteOptions,
) -> PDFResult<RewriteReport> {
    let mut doc = Document::open(input)?;
    let file = File::create(output.as_ref()).map_err(|e| PDFError::from(e).in_operation("rewrite"))?;
    let mut writer = BufWriter::new(file);
    let report = rewrite(&mut doc, options, &mut writer)?;
    writer.flush().map_err(|e| PDFError::from(e).in_operation("rewrite"))?;
    Ok(report)
}

/// Write a plaintext copy of `doc` to `output`
///
/// Fails with `AuthenticationFailed` when the document is encrypted and
/// neither the empty password nor `options.password` opens it.
pub fn rewrite<W: Write>(doc: &mut Document, options: &RewriteOptions, output: W) -> PDFResult<RewriteReport> {
    if let Some(password) = &options.password {
        if !authenticate(doc, password) {
            return Err(PDFError::AuthenticationFailed.in_operation("rewrite"));
        }
    }
    if doc.is_locked() {
        return Err(PDFError::AuthenticationFailed.in_operation("rewrite"));
    }

    doc.preload_compressed();
    if let Some(selection) = &options.page_subset {
        retain_pages(doc, selection).in_operation("rewrite")?;
    }

    let level = options.garbage_level.min(3);
    let trailer = output_trailer(doc.trailer());
    let mut used: BTreeSet<u32> = if level == 0 {
        doc.object_numbers().into_iter().collect()
    } else {
        sweep(doc, &trailer)
    };
    used.retain(|&number| !is_structural(doc, number));

    let map = if level < 2 {
        RenumberMap::identity(&used)
    } else if doc.is_encrypted() {
        info!("Keeping object numbers of encrypted document");
        RenumberMap::identity(&used)
    } else if level == 3 {
        compact(&used, &dedup(doc, &used, options.dedup_streams))
    } else {
        compact(&used, &RenumberMap::identity(&used))
    };

    let mut report = RewriteReport {
        objects_dropped: doc.object_numbers().len().saturating_sub(used.len()),
        objects_merged: map.merged(),
        renumbered: !map.is_identity(),
        ..RewriteReport::default()
    };
    emit(doc, options, &map, output, &trailer, &mut report).in_operation("rewrite")?;

    info!(
        "Rewrote {} objects ({} dropped, {} merged, {} warnings) in {} bytes",
        report.objects_written,
        report.objects_dropped,
        report.objects_merged,
        report.warnings.len(),
        report.bytes_written
    );
    Ok(report)
}

/// Root, Info and ID of the input trailer
fn output_trailer(input: &Dictionary) -> Dictionary {
    let mut trailer = Dictionary::new();
    for key in TRAILER_KEYS {
        if let Some(value) = input.get(key) {
            trailer.set(key, value.clone());
        }
    }
    trailer
}

/// Object streams, xref streams and the encryption dictionary are not copied
fn is_structural(doc: &mut Document, number: u32) -> bool {
    if doc.encrypt_number() == Some(number) {
        return true;
    }
    match doc.load_object(number) {
        Ok(object) => match &*object {
            Object::Stream(stream) => stream.dict.has_type("ObjStm") || stream.dict.has_type("XRef"),
            _ => false,
        },
        Err(_) => false,
    }
}

fn emit<W: Write>(
    doc: &mut Document,
    options: &RewriteOptions,
    map: &RenumberMap,
    output: W,
    trailer: &Dictionary,
    report: &mut RewriteReport,
) -> PDFResult<()> {
    let keep_generations = map.is_identity();
    let generations: BTreeMap<u32, u16> = map
        .written()
        .map(|(new, old)| {
            let generation = if keep_generations { original_generation(doc, old) } else { 0 };
            (new, generation)
        })
        .collect();

    let loaded: Vec<Arc<Object>> = map.written().filter_map(|(_, old)| doc.load_object(old).ok()).collect();
    let fonts: HashSet<u32> = font_program_numbers(loaded.iter().map(|object| object.as_ref()));
    drop(loaded);

    let mut out = PdfWriter::new(output);
    out.write_header(doc.version())?;

    for (new, old) in map.written() {
        let input_id = ObjectId::new(old, original_generation(doc, old));
        let output_id = ObjectId::new(new, generations.get(&new).copied().unwrap_or(0));

        let object = match doc.load_object(old) {
            Ok(object) => object,
            Err(e) => {
                warn!("Writing null for {}: {}", input_id, e);
                report.warn(input_id, format!("written as null: {}", e));
                out.write_object(output_id, &Object::Null)?;
                report.objects_written += 1;
                continue;
            }
        };

        match &*object {
            Object::Stream(stream) => {
                let prepared = prepare_stream(
                    doc,
                    input_id,
                    stream,
                    options.expand,
                    fonts.contains(&old),
                    options.ascii_safe,
                );
                trace!("Writing stream {} as {:?}", input_id, prepared.treatment);
                for message in prepared.warnings {
                    report.warn(input_id, message);
                }
                let mut dict = prepared.dict;
                remap_dictionary(&mut dict, map, &generations);
                out.write_stream(output_id, &dict, &prepared.data)?;
            }
            value => {
                let mut value = value.clone();
                remap_references(&mut value, map, &generations);
                out.write_object(output_id, &value)?;
            }
        }
        report.objects_written += 1;
    }

    let mut trailer = trailer.clone();
    remap_dictionary(&mut trailer, map, &generations);
    if !matches!(trailer.get("Root"), Some(Object::Reference(_) | Object::Dictionary(_))) {
        return Err(match doc.trailer().get_reference("Root") {
            Some(id) => PDFError::broken(id, "catalog is not written"),
            None => PDFError::malformed(0, "Trailer /Root is not a catalog"),
        });
    }
    if matches!(trailer.get("Info"), Some(Object::Null)) {
        debug!("Dropping /Info that is not written");
        trailer.remove("Info");
    }
    let size = map.size();
    trailer.set("Size", size as i64);

    let xref = out.write_xref(size, |number| {
        if keep_generations {
            original_generation(doc, number)
        } else {
            0
        }
    })?;
    out.write_trailer(&trailer, xref)?;
    report.bytes_written = out.bytes_written();
    Ok(())
}

fn original_generation(doc: &Document, number: u32) -> u16 {
    doc.get_entry(number).map_or(0, |entry| entry.generation())
}

/// Point references at output numbers; references to unwritten objects become null
fn remap_references(object: &mut Object, map: &RenumberMap, generations: &BTreeMap<u32, u16>) {
    object.walk_mut(&mut |value| {
        if let Object::Reference(id) = *value {
            *value = match map.get(id.number) {
                0 => Object::Null,
                new => Object::reference(new, generations.get(&new).copied().unwrap_or(0)),
            };
        }
    });
}

fn remap_dictionary(dict: &mut Dictionary, map: &RenumberMap, generations: &BTreeMap<u32, u16>) {
    for (_, value) in dict.iter_mut() {
        remap_references(value, map, generations);
    }
}
