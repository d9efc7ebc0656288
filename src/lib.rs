//! PDF document object store for Rust
//!
//! Indexes a PDF across its incremental updates, decrypts documents
//! protected by the Standard security handler (revisions 2 to 6 with RC4,
//! AES-128 and AES-256) and rewrites them as plaintext with optional
//! garbage collection, duplicate merging, compaction and stream expansion.
//!
//! ```no_run
//! use pdf_store::{rewrite_file, ExpandFlags, RewriteOptions};
//!
//! let options = RewriteOptions::new()
//!     .garbage_level(3)
//!     .expand(ExpandFlags::STREAMS)
//!     .password("secret");
//! let report = rewrite_file("in.pdf", "out.pdf", &options)?;
//! println!("{} objects written", report.objects_written);
//! # Ok::<(), pdf_store::PDFError>(())
//! ```

use std::fmt;

mod crypto;
mod error;
mod handlers;
mod pdf;
mod rewrite;
mod security;

pub use crypto::{derive_object_key, CryptMethod, CryptoEngine};
pub use error::{PDFError, PDFResult};
pub use handlers::{security_handler_from_dict, StandardSecurityHandler};
pub use pdf::{
    decode_chain, encode_ascii_hex, encode_flate, parse_page_ranges, Dictionary, Document, Filter, Object,
    ObjectId, PDFParser, Stream, StreamContent, XrefEntry, XrefSection, XrefTable,
};
pub use rewrite::{
    authenticate, compact, dedup, retain_pages, rewrite, rewrite_file, sweep, ExpandFlags, RenumberMap,
    RewriteOptions, RewriteReport, RewriteWarning, StreamTreatment,
};

/// Encryption schemes of the Standard security handler
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    /// RC4 encryption with 40-bit key (V1, R2)
    RC4_40,
    /// RC4 encryption with 128-bit key (V2, R3)
    RC4_128,
    /// AES encryption with 128-bit key (V4, R4, AESV2)
    AES_128,
    /// AES encryption with 256-bit key (V5, R6, AESV3)
    AES_256,
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionAlgorithm::RC4_40 => write!(f, "RC4-40"),
            EncryptionAlgorithm::RC4_128 => write!(f, "RC4-128"),
            EncryptionAlgorithm::AES_128 => write!(f, "AES-128"),
            EncryptionAlgorithm::AES_256 => write!(f, "AES-256"),
        }
    }
}

/// User access permissions, the `/P` entry of the encryption dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PDFPermissions(u32);

impl PDFPermissions {
    /// No permissions
    pub const NONE: u32 = 0;
    /// Print the document
    pub const PRINT: u32 = 1 << 2;
    /// Modify the document
    pub const MODIFY: u32 = 1 << 3;
    /// Copy text and graphics
    pub const COPY: u32 = 1 << 4;
    /// Add or modify annotations
    pub const ANNOTATE: u32 = 1 << 5;
    /// Fill form fields
    pub const FILL_FORMS: u32 = 1 << 8;
    /// Extract text and graphics for accessibility
    pub const EXTRACT: u32 = 1 << 9;
    /// Assemble the document
    pub const ASSEMBLE: u32 = 1 << 10;
    /// Print in high quality
    pub const PRINT_HIGH: u32 = 1 << 11;
    /// All permissions
    pub const ALL: u32 = 0xF_FFFF;

    /// Bits of `/P` that carry a permission
    const DEFINED: u32 = 0xF3C;
    /// Bits of `/P` that must be set
    const RESERVED: u32 = 0xFFFF_F0C0;

    /// Create new permissions from raw bits
    pub fn new(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    /// Permissions stored in a signed `/P` value
    pub fn from_p_value(p: i32) -> Self {
        Self::new(p as u32)
    }

    /// Signed `/P` value with the reserved bits set
    pub fn to_p_value(&self) -> i32 {
        ((self.0 & Self::DEFINED) | Self::RESERVED) as i32
    }

    /// Get raw permission bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check if specific permission is granted
    pub fn has_permission(&self, permission: u32) -> bool {
        (self.0 & permission) == permission
    }
}

impl Default for PDFPermissions {
    fn default() -> Self {
        Self::new(Self::ALL)
    }
}
