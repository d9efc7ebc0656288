use log::{debug, warn};
use zeroize::Zeroizing;

use super::key_derivation::rc4_rounds;
use super::{constant_time_eq, hash_password_r5_6};
use crate::crypto::{cbc_decrypt_no_padding, rc4_crypt};
use crate::handlers::StandardSecurityHandler;

impl StandardSecurityHandler {
    /// Algorithm 6: check a user password, returning the file key
    pub(crate) fn authenticate_user_password(&self, password: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        match self.revision {
            2..=4 => self.verify_user_password_rev2_3_4(password),
            _ => self.verify_user_password_rev5_6(password),
        }
    }

    /// Algorithm 7: check an owner password, returning the file key
    pub(crate) fn authenticate_owner_password(&self, password: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        match self.revision {
            2..=4 => self.verify_owner_password_rev2_3_4(password),
            _ => self.verify_owner_password_rev5_6(password),
        }
    }

    fn verify_user_password_rev2_3_4(&self, password: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        let file_key = self.compute_encryption_key(password);
        let computed = match self.compute_u_value(&file_key) {
            Ok(u) => u,
            Err(err) => {
                warn!("Cannot compute /U: {}", err);
                return None;
            }
        };

        // R3 and later only fix the first 16 bytes
        let len = if self.revision == 2 { 32 } else { 16 };
        if self.u_value.len() >= len && constant_time_eq(&computed[..len], &self.u_value[..len]) {
            debug!("User password accepted (R{})", self.revision);
            Some(file_key)
        } else {
            None
        }
    }

    fn verify_owner_password_rev2_3_4(&self, password: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        let key = self.owner_key(password);
        let o_value = &self.o_value[..32];

        let user_password = if self.revision == 2 {
            rc4_crypt(&key, o_value)
        } else {
            rc4_rounds(&key, o_value, (0..=19).rev())
        };

        match user_password {
            Ok(user_password) => {
                let user_password = Zeroizing::new(user_password);
                let file_key = self.verify_user_password_rev2_3_4(&user_password);
                if file_key.is_some() {
                    debug!("Owner password accepted (R{})", self.revision);
                }
                file_key
            }
            Err(err) => {
                warn!("Cannot decrypt /O: {}", err);
                None
            }
        }
    }

    fn verify_user_password_rev5_6(&self, password: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        let u = &self.u_value;
        let hash = hash_password_r5_6(self.revision, password, &u[32..40], &[]).ok()?;
        if !constant_time_eq(&hash[..], &u[..32]) {
            return None;
        }

        let intermediate = hash_password_r5_6(self.revision, password, &u[40..48], &[]).ok()?;
        let file_key = self.unwrap_file_key(&intermediate[..], &self.ue_value)?;
        debug!("User password accepted (R{})", self.revision);
        Some(file_key)
    }

    fn verify_owner_password_rev5_6(&self, password: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        let o = &self.o_value;
        let user_data = &self.u_value[..48];
        let hash = hash_password_r5_6(self.revision, password, &o[32..40], user_data).ok()?;
        if !constant_time_eq(&hash[..], &o[..32]) {
            return None;
        }

        let intermediate = hash_password_r5_6(self.revision, password, &o[40..48], user_data).ok()?;
        let file_key = self.unwrap_file_key(&intermediate[..], &self.oe_value)?;
        debug!("Owner password accepted (R{})", self.revision);
        Some(file_key)
    }

    /// Decrypt `/UE` or `/OE` and check the result against `/Perms`
    fn unwrap_file_key(&self, intermediate: &[u8], wrapped: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        let mut file_key = Zeroizing::new(wrapped[..32].to_vec());
        if let Err(err) = cbc_decrypt_no_padding(intermediate, &[0u8; 16], &mut file_key) {
            warn!("Cannot decrypt file key: {}", err);
            return None;
        }
        self.check_perms(&file_key);
        Some(file_key)
    }

    /// Algorithm 13: `/Perms` must echo `/P`; a mismatch is only reported
    fn check_perms(&self, file_key: &[u8]) {
        if self.perms_value.len() < 16 {
            return;
        }
        let mut block = Zeroizing::new(self.perms_value[..16].to_vec());
        if cbc_decrypt_no_padding(file_key, &[0u8; 16], &mut block).is_err() {
            return;
        }
        if &block[9..12] != b"adb" {
            warn!("/Perms does not decrypt to a valid block");
        } else if block[..4] != self.permissions.to_le_bytes() {
            warn!("/Perms disagrees with /P {}", self.permissions);
        }
    }
}
