use md5::{Digest, Md5};
use rand::{thread_rng, RngCore};
use zeroize::Zeroizing;

use super::{hash_password_r5_6, md5_rounds, pad_password, PADDING};
use crate::crypto::{cbc_encrypt_no_padding, rc4_crypt};
use crate::error::PDFResult;
use crate::handlers::StandardSecurityHandler;

impl StandardSecurityHandler {
    /// Algorithm 2: file key from a user password (revisions 2 to 4)
    pub(crate) fn compute_encryption_key(&self, password: &[u8]) -> Zeroizing<Vec<u8>> {
        // MD5 yields 16 bytes
        let n = self.key_length.min(16);
        let mut hasher = Md5::new();
        hasher.update(&pad_password(password)[..]);
        hasher.update(&self.o_value[..self.o_value.len().min(32)]);
        hasher.update(self.permissions.to_le_bytes());
        hasher.update(&self.file_id);
        if self.revision >= 4 && !self.encrypt_metadata {
            hasher.update([0xFF; 4]);
        }
        let mut key = Zeroizing::new(hasher.finalize().to_vec());

        if self.revision >= 3 {
            for _ in 0..50 {
                *key = Md5::digest(&key[..n]).to_vec();
            }
        }
        key.truncate(n);
        key
    }

    /// Algorithms 4 and 5: expected `/U` for a file key
    pub(crate) fn compute_u_value(&self, file_key: &[u8]) -> PDFResult<Vec<u8>> {
        if self.revision == 2 {
            return rc4_crypt(file_key, &PADDING);
        }

        let mut hasher = Md5::new();
        hasher.update(PADDING);
        hasher.update(&self.file_id);
        let mut hash = hasher.finalize().to_vec();
        hash = rc4_crypt(file_key, &hash)?;
        hash = rc4_rounds(file_key, &hash, 1..=19)?;

        // Second half is arbitrary
        hash.extend_from_slice(&PADDING[..16]);
        Ok(hash)
    }

    /// RC4 key protecting `/O`, from the owner password
    pub(crate) fn owner_key(&self, owner_password: &[u8]) -> Zeroizing<Vec<u8>> {
        let rounds = if self.revision >= 3 { 50 } else { 0 };
        let mut key = md5_rounds(&pad_password(owner_password)[..], rounds, 16);
        key.truncate(self.key_length);
        key
    }

    /// Algorithm 3: `/O` from the owner and user passwords
    ///
    /// An empty owner password falls back to the user password.
    pub(crate) fn compute_o_value(&self, owner_password: &[u8], user_password: &[u8]) -> PDFResult<Vec<u8>> {
        let owner = if owner_password.is_empty() { user_password } else { owner_password };
        let key = self.owner_key(owner);

        let mut o_value = rc4_crypt(&key, &pad_password(user_password)[..])?;
        if self.revision >= 3 {
            o_value = rc4_rounds(&key, &o_value, 1..=19)?;
        }
        Ok(o_value)
    }

    /// Algorithms 8 to 10: U, UE, O, OE and Perms for a fresh AES-256 file key
    pub(crate) fn generate_values_r5_6(
        &mut self,
        user_password: &[u8],
        owner_password: &[u8],
        file_key: &[u8],
    ) -> PDFResult<()> {
        let owner_password = if owner_password.is_empty() { user_password } else { owner_password };
        let mut rng = thread_rng();

        let mut salts = [0u8; 16];
        rng.fill_bytes(&mut salts);
        let (validation_salt, key_salt) = salts.split_at(8);

        let mut u_value = hash_password_r5_6(self.revision, user_password, validation_salt, &[])?.to_vec();
        u_value.extend_from_slice(&salts);
        let intermediate = hash_password_r5_6(self.revision, user_password, key_salt, &[])?;
        let mut ue_value = file_key.to_vec();
        cbc_encrypt_no_padding(&intermediate[..], &[0u8; 16], &mut ue_value)?;

        rng.fill_bytes(&mut salts);
        let (validation_salt, key_salt) = salts.split_at(8);
        let mut o_value = hash_password_r5_6(self.revision, owner_password, validation_salt, &u_value)?.to_vec();
        o_value.extend_from_slice(&salts);
        let intermediate = hash_password_r5_6(self.revision, owner_password, key_salt, &u_value)?;
        let mut oe_value = file_key.to_vec();
        cbc_encrypt_no_padding(&intermediate[..], &[0u8; 16], &mut oe_value)?;

        let mut perms = [0u8; 16];
        perms[..4].copy_from_slice(&self.permissions.to_le_bytes());
        perms[4..8].fill(0xFF);
        perms[8] = if self.encrypt_metadata { b'T' } else { b'F' };
        perms[9..12].copy_from_slice(b"adb");
        rng.fill_bytes(&mut perms[12..]);
        cbc_encrypt_no_padding(file_key, &[0u8; 16], &mut perms)?;

        self.u_value = u_value;
        self.ue_value = ue_value;
        self.o_value = o_value;
        self.oe_value = oe_value;
        self.perms_value = perms.to_vec();
        Ok(())
    }
}

/// Re-encrypt `data` once per `i` with the key XORed by `i`
pub(crate) fn rc4_rounds<I>(key: &[u8], data: &[u8], rounds: I) -> PDFResult<Vec<u8>>
where
    I: IntoIterator<Item = u8>,
{
    let mut output = data.to_vec();
    let mut round_key = Zeroizing::new(vec![0u8; key.len()]);
    for i in rounds {
        for (dst, src) in round_key.iter_mut().zip(key) {
            *dst = src ^ i;
        }
        output = rc4_crypt(&round_key, &output)?;
    }
    Ok(output)
}
