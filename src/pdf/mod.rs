//! PDF object model, syntax and document store

mod dict;
mod document;
mod filter;
mod object;
mod pages;
mod parser;
mod stream;
mod xref;

pub use dict::Dictionary;
pub use document::Document;
pub use filter::{chain_is_decodable, decode_chain, encode_ascii_hex, encode_flate, Filter, FilterChain};
pub use object::{Object, ObjectId};
pub use pages::{parse_page_ranges, INHERITABLE_ATTRIBUTES};
pub use parser::{ParsedObject, PDFParser};
pub use stream::{filter_chain, Stream, StreamContent};
pub use xref::{XrefEntry, XrefSection, XrefTable};
