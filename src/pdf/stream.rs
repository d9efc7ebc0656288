//! PDF stream object implementation

use log::warn;

use super::{Dictionary, Object};
use super::filter::{Filter, FilterChain};

/// Where a stream's bytes live
#[derive(Debug, Clone, PartialEq)]
pub enum StreamContent {
    /// Encoded (and possibly encrypted) bytes still in the document buffer
    Lazy { offset: usize, length: usize },
    /// Bytes held in memory
    Owned(Vec<u8>),
}

/// PDF stream object
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    /// Stream dictionary
    pub dict: Dictionary,
    /// Payload location
    pub content: StreamContent,
}

impl Stream {
    /// Stream whose bytes live in the source document
    pub fn lazy(dict: Dictionary, offset: usize, length: usize) -> Self {
        Self {
            dict,
            content: StreamContent::Lazy { offset, length },
        }
    }

    /// Stream holding its own bytes; `/Length` is set to match
    pub fn new(mut dict: Dictionary, data: Vec<u8>) -> Self {
        dict.set("Length", data.len());
        Self {
            dict,
            content: StreamContent::Owned(data),
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.content, StreamContent::Lazy { .. })
    }

    /// Filter chain declared by the stream dictionary
    pub fn filters(&self) -> FilterChain {
        filter_chain(&self.dict)
    }

    /// Whether the dictionary describes an image XObject
    pub fn is_image(&self) -> bool {
        self.dict.is_name("Subtype", "Image")
            || self.filters().iter().any(|(filter, _)| filter.is_image_codec())
    }

    /// Whether the dictionary looks like an embedded font program
    pub fn looks_like_font(&self) -> bool {
        self.dict.has("Length1")
            || self.dict.has("Length2")
            || self.dict.has("Length3")
            || matches!(
                self.dict.get_name("Subtype"),
                Some(b"Type1C") | Some(b"CIDFontType0C") | Some(b"OpenType")
            )
    }

    /// Whether a `/Crypt` filter with the Identity method is declared
    pub fn has_identity_crypt(&self) -> bool {
        self.filters().iter().any(|(filter, params)| {
            *filter == Filter::Crypt
                && params
                    .as_ref()
                    .and_then(|p| p.get_name("Name"))
                    .map_or(true, |name| name == b"Identity")
        })
    }
}

/// Filter chain declared by `/Filter` and `/DecodeParms`
///
/// Unknown filter names are kept as `Filter::Unknown` so that decoding
/// fails rather than silently skipping a stage.
pub fn filter_chain(dict: &Dictionary) -> FilterChain {
    let names: Vec<&[u8]> = match dict.get("Filter") {
        None | Some(Object::Null) => Vec::new(),
        Some(Object::Name(name)) => vec![name.as_slice()],
        Some(Object::Array(items)) => items.iter().filter_map(|i| i.as_name().ok()).collect(),
        Some(other) => {
            warn!("Invalid filter specification of type {}", other.type_name());
            Vec::new()
        }
    };

    let params: Vec<Option<&Dictionary>> = match dict.get("DecodeParms") {
        Some(Object::Dictionary(d)) => vec![Some(d)],
        Some(Object::Array(items)) => items
            .iter()
            .map(|i| match i {
                Object::Dictionary(d) => Some(d),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| (Filter::from_name(name), params.get(i).copied().flatten().cloned()))
        .collect()
}
