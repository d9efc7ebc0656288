//! Decryption applied to objects as they are loaded

use log::warn;

use crate::crypto::CryptoEngine;
use crate::handlers::StandardSecurityHandler;
use crate::pdf::{Object, ObjectId, Stream};

/// Decrypt every string held by `object` in place
///
/// Strings nested in arrays, dictionaries and stream dictionaries all use
/// the key of the enclosing indirect object. A string that fails to decrypt
/// is left as stored.
pub(crate) fn decrypt_object_strings(object: &mut Object, id: ObjectId, engine: &CryptoEngine) {
    let mut failures = 0usize;
    object.walk_mut(&mut |value| {
        if let Object::String(bytes) = value {
            match engine.decrypt_string(id, bytes) {
                Ok(plain) => *bytes = plain,
                Err(err) => {
                    failures += 1;
                    if failures == 1 {
                        warn!("Leaving string in object {} encrypted: {}", id, err);
                    }
                }
            }
        }
    });
    if failures > 1 {
        warn!("{} strings in object {} could not be decrypted", failures, id);
    }
}

/// Whether a stream's payload is stored in the clear despite encryption
///
/// Cross-reference streams never are encrypted. Streams naming the Identity
/// crypt filter opt out, and so do metadata streams when the document says
/// `/EncryptMetadata false`.
pub(crate) fn stream_is_exempt(stream: &Stream, handler: &StandardSecurityHandler) -> bool {
    stream.dict.has_type("XRef")
        || stream.has_identity_crypt()
        || (!handler.encrypt_metadata() && stream.dict.has_type("Metadata"))
}
