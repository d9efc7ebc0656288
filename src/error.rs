//! Error types for the PDF object store

use std::io;
use thiserror::Error;

use crate::pdf::ObjectId;

/// Main error type for object store, decryption and rewrite operations
#[derive(Error, Debug)]
pub enum PDFError {
    /// Bytes that the tokenizer/parser cannot make sense of
    #[error("Malformed PDF syntax at offset {offset}: {message}")]
    MalformedSyntax {
        offset: usize,
        message: String,
    },

    /// An indirect reference does not resolve
    #[error("Broken reference {id}: {reason}")]
    BrokenReference {
        id: ObjectId,
        reason: String,
    },

    /// Unknown security handler, version, revision or key length
    #[error("Unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    /// No supplied password satisfies the owner or user check
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Implausible padding, misaligned ciphertext or decompression failure
    #[error("Corrupt stream{}: {message}", .id.map(|id| format!(" in object {}", id)).unwrap_or_default())]
    CorruptStream {
        id: Option<ObjectId>,
        message: String,
    },

    /// Stream filter this crate does not decode (image codecs)
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Invalid object type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        expected: &'static str,
        found: &'static str,
    },

    /// Cannot open/read/write the underlying file
    #[error("IO error: {0}")]
    IOFailure(#[from] io::Error),

    /// Fatal error annotated with the operation that raised it
    #[error("{operation} failed: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: Box<PDFError>,
    },
}

/// Result type for object store operations
pub type PDFResult<T> = Result<T, PDFError>;

impl PDFError {
    /// Create a new malformed syntax error
    pub fn malformed(offset: usize, msg: impl Into<String>) -> Self {
        Self::MalformedSyntax {
            offset,
            message: msg.into(),
        }
    }

    /// Create a new broken reference error
    pub fn broken(id: ObjectId, reason: impl Into<String>) -> Self {
        Self::BrokenReference {
            id,
            reason: reason.into(),
        }
    }

    /// Create a new unsupported encryption error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedEncryption(msg.into())
    }

    /// Create a new corrupt stream error
    pub fn corrupt(id: Option<ObjectId>, msg: impl Into<String>) -> Self {
        Self::CorruptStream {
            id,
            message: msg.into(),
        }
    }

    /// Attach the owning object to a stream error that lacks one
    pub fn with_object(self, id: ObjectId) -> Self {
        match self {
            Self::CorruptStream { id: None, message } => Self::CorruptStream {
                id: Some(id),
                message,
            },
            other => other,
        }
    }

    /// Wrap the error with the name of the failing operation
    pub fn in_operation(self, operation: &'static str) -> Self {
        Self::Operation {
            operation,
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping operation annotations
    pub fn root_cause(&self) -> &PDFError {
        match self {
            Self::Operation { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check if error is authentication related
    pub fn is_auth_error(&self) -> bool {
        matches!(self.root_cause(), Self::AuthenticationFailed)
    }

    /// Check if error is related to encryption setup
    pub fn is_crypto_error(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::UnsupportedEncryption(_) | Self::AuthenticationFailed
        )
    }

    /// Check if error is related to PDF structure
    pub fn is_structure_error(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::MalformedSyntax { .. } | Self::BrokenReference { .. } | Self::InvalidObjectType { .. }
        )
    }

    /// Check if error is confined to a single stream's content
    pub fn is_stream_error(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::CorruptStream { .. } | Self::UnsupportedFilter(_)
        )
    }
}

pub(crate) trait ResultExt<T> {
    fn in_operation(self, operation: &'static str) -> PDFResult<T>;
}

impl<T> ResultExt<T> for PDFResult<T> {
    fn in_operation(self, operation: &'static str) -> PDFResult<T> {
        self.map_err(|e| e.in_operation(operation))
    }
}
