//! Standard Security Handler (ISO 32000 password encryption)

use std::fmt;

use log::debug;
use rand::{thread_rng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{CryptMethod, CryptoEngine};
use crate::error::{PDFError, PDFResult};
use crate::pdf::{Dictionary, Object};
use crate::{EncryptionAlgorithm, PDFPermissions};
use super::{key_length_bytes, resolve_crypt_filter};

/// Standard security handler for password-based encryption
///
/// Holds the encryption state of one document. The file key exists only
/// after a successful `authenticate` and is never written anywhere.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StandardSecurityHandler {
    pub(crate) version: u32,
    pub(crate) revision: u32,
    /// Key length in bytes
    pub(crate) key_length: usize,
    #[zeroize(skip)]
    pub(crate) string_method: CryptMethod,
    #[zeroize(skip)]
    pub(crate) stream_method: CryptMethod,
    pub(crate) permissions: i32,
    pub(crate) o_value: Vec<u8>,
    pub(crate) u_value: Vec<u8>,
    pub(crate) oe_value: Vec<u8>,
    pub(crate) ue_value: Vec<u8>,
    pub(crate) perms_value: Vec<u8>,
    pub(crate) encrypt_metadata: bool,
    pub(crate) file_id: Vec<u8>,
    pub(crate) encryption_key: Option<Zeroizing<Vec<u8>>>,
}

impl StandardSecurityHandler {
    /// Read the encryption state from an `/Encrypt` dictionary
    pub fn from_dict(dict: &Dictionary, file_id: &[u8]) -> PDFResult<Self> {
        let version = dict.get_integer("V").unwrap_or(0);
        let revision = dict
            .get_integer("R")
            .ok_or_else(|| PDFError::unsupported("missing /R"))?;
        if !(2..=6).contains(&revision) {
            return Err(PDFError::unsupported(format!("revision {}", revision)));
        }

        let declared_length = match dict.get_integer("Length") {
            Some(len) => Some(key_length_bytes(len)?),
            None => None,
        };

        let (string_method, stream_method, key_length) = match version {
            1 => (CryptMethod::RC4, CryptMethod::RC4, 5),
            2 => {
                let len = declared_length.unwrap_or(5);
                (CryptMethod::RC4, CryptMethod::RC4, len)
            }
            4 | 5 => {
                let stm = resolve_crypt_filter(dict, dict.get_name("StmF").unwrap_or(b"Identity"))?;
                let str_ = resolve_crypt_filter(dict, dict.get_name("StrF").unwrap_or(b"Identity"))?;
                let uses = |m: CryptMethod| stm.method == m || str_.method == m;

                let len = if uses(CryptMethod::AESV3) || version == 5 {
                    32
                } else if uses(CryptMethod::AESV2) {
                    16
                } else {
                    stm.length.or(str_.length).or(declared_length).unwrap_or(16)
                };
                (str_.method, stm.method, len)
            }
            other => return Err(PDFError::unsupported(format!("algorithm version {}", other))),
        };

        validate_key_setup(revision, key_length, string_method, stream_method)?;

        let o_value = required_string(dict, "O")?;
        let u_value = required_string(dict, "U")?;
        let min_len = if revision >= 5 { 48 } else { 32 };
        if o_value.len() < min_len || u_value.len() < min_len {
            return Err(PDFError::unsupported(format!(
                "/O or /U shorter than {} bytes for revision {}",
                min_len, revision
            )));
        }

        let (oe_value, ue_value) = if revision >= 5 {
            let oe = required_string(dict, "OE")?;
            let ue = required_string(dict, "UE")?;
            if oe.len() < 32 || ue.len() < 32 {
                return Err(PDFError::unsupported("/OE or /UE shorter than 32 bytes"));
            }
            (oe, ue)
        } else {
            (Vec::new(), Vec::new())
        };

        // Producers write P either signed or as an unsigned 32-bit value
        let permissions = dict
            .get_integer("P")
            .ok_or_else(|| PDFError::unsupported("missing /P"))? as u32 as i32;

        let handler = Self {
            version: version as u32,
            revision: revision as u32,
            key_length,
            string_method,
            stream_method,
            permissions,
            o_value,
            u_value,
            oe_value,
            ue_value,
            perms_value: dict.get_string("Perms").map(<[u8]>::to_vec).unwrap_or_default(),
            encrypt_metadata: dict.get_bool("EncryptMetadata").unwrap_or(true),
            file_id: file_id.to_vec(),
            encryption_key: None,
        };
        debug!(
            "Standard handler V{} R{} with {}-bit key, strings {:?}, streams {:?}",
            handler.version,
            handler.revision,
            handler.key_length * 8,
            handler.string_method,
            handler.stream_method
        );
        Ok(handler)
    }

    /// Set up new encryption with the given passwords
    ///
    /// The returned handler is already unlocked.
    pub fn create(
        algorithm: EncryptionAlgorithm,
        permissions: PDFPermissions,
        user_password: &[u8],
        owner_password: &[u8],
        file_id: &[u8],
    ) -> PDFResult<Self> {
        let (version, revision, key_length, method) = match algorithm {
            EncryptionAlgorithm::RC4_40 => (1, 2, 5, CryptMethod::RC4),
            EncryptionAlgorithm::RC4_128 => (2, 3, 16, CryptMethod::RC4),
            EncryptionAlgorithm::AES_128 => (4, 4, 16, CryptMethod::AESV2),
            EncryptionAlgorithm::AES_256 => (5, 6, 32, CryptMethod::AESV3),
        };

        let mut handler = Self {
            version,
            revision,
            key_length,
            string_method: method,
            stream_method: method,
            permissions: permissions.to_p_value(),
            o_value: Vec::new(),
            u_value: Vec::new(),
            oe_value: Vec::new(),
            ue_value: Vec::new(),
            perms_value: Vec::new(),
            encrypt_metadata: true,
            file_id: file_id.to_vec(),
            encryption_key: None,
        };

        if revision >= 5 {
            let mut file_key = Zeroizing::new(vec![0u8; 32]);
            thread_rng().fill_bytes(&mut file_key);
            handler.generate_values_r5_6(user_password, owner_password, &file_key)?;
            handler.encryption_key = Some(file_key);
        } else {
            handler.o_value = handler.compute_o_value(owner_password, user_password)?;
            let file_key = handler.compute_encryption_key(user_password);
            handler.u_value = handler.compute_u_value(&file_key)?;
            handler.encryption_key = Some(file_key);
        }

        Ok(handler)
    }

    /// Encryption dictionary describing this handler
    pub fn to_dict(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::name("Standard"));
        dict.set("V", self.version as i64);
        dict.set("R", self.revision as i64);
        dict.set("Length", (self.key_length * 8) as i64);
        dict.set("O", Object::string(&self.o_value));
        dict.set("U", Object::string(&self.u_value));
        dict.set("P", self.permissions as i64);

        if self.version >= 4 {
            let mut std_cf = Dictionary::new();
            std_cf.set("CFM", Object::name(self.stream_method.name()));
            std_cf.set("AuthEvent", Object::name("DocOpen"));
            std_cf.set("Length", self.key_length as i64);
            let mut cf = Dictionary::new();
            cf.set("StdCF", std_cf);
            dict.set("CF", cf);
            dict.set("StmF", Object::name("StdCF"));
            dict.set("StrF", Object::name("StdCF"));
        }
        if self.revision >= 5 {
            dict.set("OE", Object::string(&self.oe_value));
            dict.set("UE", Object::string(&self.ue_value));
            dict.set("Perms", Object::string(&self.perms_value));
        }
        if !self.encrypt_metadata {
            dict.set("EncryptMetadata", false);
        }
        dict
    }

    /// Try `password` as user password, then as owner password
    ///
    /// On success the file key is stored and `true` returned. A wrong
    /// password leaves the handler as it was.
    pub fn authenticate(&mut self, password: &[u8]) -> bool {
        let key = self
            .authenticate_user_password(password)
            .or_else(|| self.authenticate_owner_password(password));

        match key {
            Some(key) => {
                self.encryption_key = Some(key);
                true
            }
            None => false,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.encryption_key.is_some()
    }

    /// Derived file key, present after successful authentication
    pub fn file_key(&self) -> Option<&[u8]> {
        self.encryption_key.as_ref().map(|k| k.as_slice())
    }

    /// Per-object crypt engine, once unlocked
    pub fn engine(&self) -> Option<CryptoEngine> {
        self.file_key()
            .map(|key| CryptoEngine::new(key, self.string_method, self.stream_method))
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Key length in bits
    pub fn key_length_bits(&self) -> usize {
        self.key_length * 8
    }

    pub fn string_method(&self) -> CryptMethod {
        self.string_method
    }

    pub fn stream_method(&self) -> CryptMethod {
        self.stream_method
    }

    /// Raw `/P` value
    pub fn p_value(&self) -> i32 {
        self.permissions
    }

    pub fn permissions(&self) -> PDFPermissions {
        PDFPermissions::from_p_value(self.permissions)
    }

    pub fn encrypt_metadata(&self) -> bool {
        self.encrypt_metadata
    }

    pub fn file_id(&self) -> &[u8] {
        &self.file_id
    }
}

fn required_string(dict: &Dictionary, key: &str) -> PDFResult<Vec<u8>> {
    dict.get_string(key)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| PDFError::unsupported(format!("missing /{}", key)))
}

/// RC4 and AESV2 take 40 to 128 bits, AESV3 exactly 256
/// Revisions 5 and 6 pair only with AESV3 and 256-bit keys; earlier
/// revisions derive at most 128 bits through MD5.
fn validate_key_setup(
    revision: i64,
    bytes: usize,
    string_method: CryptMethod,
    stream_method: CryptMethod,
) -> PDFResult<()> {
    let methods = [string_method, stream_method];
    if revision >= 5 {
        if let Some(method) = methods
            .iter()
            .find(|m| !matches!(m, CryptMethod::None | CryptMethod::AESV3))
        {
            return Err(PDFError::unsupported(format!("{:?} with revision {}", method, revision)));
        }
        if bytes != 32 {
            return Err(PDFError::unsupported(format!("{}-bit key with revision {}", bytes * 8, revision)));
        }
    } else {
        if methods.contains(&CryptMethod::AESV3) {
            return Err(PDFError::unsupported(format!("AESV3 with revision {}", revision)));
        }
        if !(5..=16).contains(&bytes) {
            return Err(PDFError::unsupported(format!("{}-bit key", bytes * 8)));
        }
    }
    Ok(())
}

impl fmt::Debug for StandardSecurityHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardSecurityHandler")
            .field("version", &self.version)
            .field("revision", &self.revision)
            .field("key_length", &self.key_length)
            .field("string_method", &self.string_method)
            .field("stream_method", &self.stream_method)
            .field("permissions", &self.permissions)
            .field("encrypt_metadata", &self.encrypt_metadata)
            .field("unlocked", &self.is_unlocked())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const FILE_ID: &[u8] = b"0123456789abcdef";

    #[rstest]
    #[case(EncryptionAlgorithm::RC4_40, 1, 2, CryptMethod::RC4)]
    #[case(EncryptionAlgorithm::RC4_128, 2, 3, CryptMethod::RC4)]
    #[case(EncryptionAlgorithm::AES_128, 4, 4, CryptMethod::AESV2)]
    #[case(EncryptionAlgorithm::AES_256, 5, 6, CryptMethod::AESV3)]
    fn test_create_and_reopen(
        #[case] algorithm: EncryptionAlgorithm,
        #[case] version: u32,
        #[case] revision: u32,
        #[case] method: CryptMethod,
    ) -> PDFResult<()> {
        let created = StandardSecurityHandler::create(
            algorithm,
            PDFPermissions::new(PDFPermissions::PRINT),
            b"user",
            b"owner",
            FILE_ID,
        )?;
        assert!(created.is_unlocked());

        let mut reopened = StandardSecurityHandler::from_dict(&created.to_dict(), FILE_ID)?;
        assert_eq!(reopened.version(), version);
        assert_eq!(reopened.revision(), revision);
        assert_eq!(reopened.stream_method(), method);
        assert!(!reopened.is_unlocked());

        assert!(!reopened.authenticate(b"nobody"));
        assert!(!reopened.is_unlocked());

        assert!(reopened.authenticate(b"user"));
        assert_eq!(reopened.file_key(), created.file_key());

        let mut by_owner = StandardSecurityHandler::from_dict(&created.to_dict(), FILE_ID)?;
        assert!(by_owner.authenticate(b"owner"));
        assert_eq!(by_owner.file_key(), created.file_key());
        assert!(by_owner.permissions().has_permission(PDFPermissions::PRINT));
        Ok(())
    }

    #[test_log::test]
    fn test_unsigned_p_value() -> PDFResult<()> {
        let created = StandardSecurityHandler::create(
            EncryptionAlgorithm::RC4_128,
            PDFPermissions::new(PDFPermissions::ALL),
            b"",
            b"owner",
            FILE_ID,
        )?;
        let mut dict = created.to_dict();
        dict.set("P", 4294967292i64);
        let mut reopened = StandardSecurityHandler::from_dict(&dict, FILE_ID)?;
        assert_eq!(reopened.p_value(), -4);
        assert!(reopened.authenticate(b""));
        Ok(())
    }

    #[rstest]
    #[case::bad_filter_version(dictionary! { "V" => 3, "R" => 3 })]
    #[case::bad_revision(dictionary! { "V" => 2, "R" => 7 })]
    #[case::bad_key_length(dictionary! { "V" => 2, "R" => 3, "Length" => 44 })]
    #[case::too_long_rc4(dictionary! { "V" => 2, "R" => 3, "Length" => 256 })]
    #[case::missing_o(dictionary! { "V" => 1, "R" => 2, "P" => -4 })]
    #[case::aesv3_with_r4(aes_dict(4, 4, "AESV3"))]
    #[case::aesv3_with_r3(aes_dict(4, 3, "AESV3"))]
    #[case::aesv2_with_r6(aes_dict(4, 6, "AESV2"))]
    #[case::v5_with_r4(aes_dict(5, 4, "AESV3"))]
    #[case::rc4_with_r5(dictionary! { "V" => 2, "R" => 5, "Length" => 128 })]
    fn test_unsupported_dictionaries(#[case] mut dict: Dictionary) {
        dict.set("Filter", Object::name("Standard"));
        let err = StandardSecurityHandler::from_dict(&dict, FILE_ID).unwrap_err();
        assert!(matches!(err, PDFError::UnsupportedEncryption(_)), "{:?}", err);
    }

    fn aes_dict(version: i64, revision: i64, method: &str) -> Dictionary {
        dictionary! {
            "V" => version,
            "R" => revision,
            "CF" => dictionary! {
                "StdCF" => dictionary! { "CFM" => Object::name(method) },
            },
            "StmF" => Object::name("StdCF"),
            "StrF" => Object::name("StdCF"),
        }
    }

    #[test_log::test]
    fn test_aesv3_filter_on_classic_revision_is_rejected() -> PDFResult<()> {
        let created = StandardSecurityHandler::create(
            EncryptionAlgorithm::AES_128,
            PDFPermissions::new(PDFPermissions::ALL),
            b"",
            b"owner",
            FILE_ID,
        )?;
        let mut dict = created.to_dict();
        dict.set(
            "CF",
            dictionary! { "StdCF" => dictionary! { "CFM" => Object::name("AESV3") } },
        );
        let err = StandardSecurityHandler::from_dict(&dict, FILE_ID).unwrap_err();
        assert!(matches!(err, PDFError::UnsupportedEncryption(_)), "{:?}", err);
        Ok(())
    }

    #[test_log::test]
    fn test_identity_crypt_filters() -> PDFResult<()> {
        let created = StandardSecurityHandler::create(
            EncryptionAlgorithm::AES_128,
            PDFPermissions::new(PDFPermissions::ALL),
            b"",
            b"",
            FILE_ID,
        )?;
        let mut dict = created.to_dict();
        dict.set("StrF", Object::name("Identity"));
        let handler = StandardSecurityHandler::from_dict(&dict, FILE_ID)?;
        assert_eq!(handler.string_method(), CryptMethod::None);
        assert_eq!(handler.stream_method(), CryptMethod::AESV2);
        Ok(())
    }

    #[test_log::test]
    fn test_debug_hides_key() -> PDFResult<()> {
        let created = StandardSecurityHandler::create(
            EncryptionAlgorithm::RC4_40,
            PDFPermissions::new(PDFPermissions::ALL),
            b"user",
            b"owner",
            FILE_ID,
        )?;
        let text = format!("{:?}", created);
        assert!(text.contains("unlocked: true"));
        assert!(!text.contains("encryption_key"));
        Ok(())
    }
}
