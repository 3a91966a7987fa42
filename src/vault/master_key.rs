//! Masterkey file codec: `masterkey.cryptomator`.
//!
//! The two 256-bit vault keys (`encKey`, `macKey`) are wrapped with RFC 3394
//! AES Key Wrap under a scrypt-derived key-encryption-key, and persisted as
//! JSON.

use rand::RngCore;
use ring::hmac;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::crypto::CryptoError;
use crate::crypto::key_wrap;
use crate::crypto::keys::MasterKey;

/// Format version this masterkey codec emits and accepts.
pub const MASTERKEY_VERSION: u32 = 999;
/// scrypt cost parameter `N`, fixed by this vault format.
pub const SCRYPT_N: u32 = 32768;
/// scrypt block size `r`, fixed by this vault format.
pub const SCRYPT_R: u32 = 8;
/// scrypt parallelization `p`, fixed by this vault format.
pub const SCRYPT_P: u32 = 1;
/// scrypt derived key length.
pub const SCRYPT_DK_LEN: usize = 32;
/// Length of the random scrypt salt.
pub const SCRYPT_SALT_SIZE: usize = 32;

/// Errors from masterkey marshal/unmarshal.
#[derive(Error, Debug)]
pub enum MasterKeyCreationError {
    #[error("cryptographic operation failed: {0}")]
    Crypto(#[from] CryptoError),
}

/// Errors unlocking a masterkey file with a passphrase.
#[derive(Error, Debug)]
pub enum ChangePasswordError {
    #[error("masterkey file is malformed: {0}")]
    Malformed(String),
    #[error("unsupported masterkey version: expected {expected}, got {actual}")]
    UnsupportedVersion { expected: u32, actual: u32 },
    #[error("cryptographic operation failed: {0}")]
    Crypto(#[from] CryptoError),
}

/// The persisted, wrapped form of a vault's master key.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MasterKeyFile {
    pub version: u32,
    #[serde_as(as = "Base64")]
    pub scrypt_salt: Vec<u8>,
    pub scrypt_cost_param: u32,
    pub scrypt_block_size: u32,
    #[serde_as(as = "Base64")]
    pub primary_master_key: Vec<u8>,
    #[serde_as(as = "Base64")]
    pub hmac_master_key: Vec<u8>,
    #[serde_as(as = "Base64")]
    pub version_mac: Vec<u8>,
}

fn scrypt_params(cost_param: u32, block_size: u32, p: u32) -> Result<scrypt::Params, ChangePasswordError> {
    if !cost_param.is_power_of_two() || cost_param < 2 {
        return Err(ChangePasswordError::Malformed(format!(
            "invalid scrypt cost parameter N={cost_param}"
        )));
    }
    let log_n = cost_param.trailing_zeros();
    scrypt::Params::new(u8::try_from(log_n).unwrap(), block_size, p, SCRYPT_DK_LEN)
        .map_err(|e| ChangePasswordError::Malformed(format!("invalid scrypt parameters: {e}")))
}

fn derive_kek(passphrase: &str, salt: &[u8], params: &scrypt::Params) -> Result<[u8; 32], CryptoError> {
    let mut kek = [0u8; 32];
    scrypt::scrypt(passphrase.as_bytes(), salt, params, &mut kek)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(kek)
}

/// Compute `HMAC-SHA256(macKey, BE_u32(version))`, the "versionMac" field.
///
/// Exposed standalone so callers can check it explicitly, per this format's
/// choice not to mandate verification on unmarshal (see `DESIGN.md`).
#[must_use]
pub fn compute_version_mac(mac_key: &[u8; 32], version: u32) -> [u8; 32] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, mac_key);
    let tag = hmac::sign(&key, &version.to_be_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(tag.as_ref());
    out
}

impl MasterKeyFile {
    /// Marshal `master_key` under `passphrase`, producing the JSON-ready
    /// masterkey file.
    #[instrument(level = "debug", skip(master_key, passphrase))]
    pub fn marshal(master_key: &MasterKey, passphrase: &str) -> Result<Self, MasterKeyCreationError> {
        let mut salt = [0u8; SCRYPT_SALT_SIZE];
        rand::rng().fill_bytes(&mut salt);

        let params = scrypt::Params::new(
            SCRYPT_N.trailing_zeros() as u8,
            SCRYPT_R,
            SCRYPT_P,
            SCRYPT_DK_LEN,
        )
        .expect("fixed scrypt parameters are always valid");
        let kek = derive_kek(passphrase, &salt, &params)?;

        let primary_master_key = master_key
            .with_aes_key(|k| key_wrap::wrap(&kek, k))
            .map_err(CryptoError::from)?;
        let hmac_master_key = master_key
            .with_mac_key(|k| key_wrap::wrap(&kek, k))
            .map_err(CryptoError::from)?;
        let version_mac = master_key
            .with_mac_key(|k| compute_version_mac(k, MASTERKEY_VERSION))
            .map_err(CryptoError::from)?
            .to_vec();

        debug!("masterkey file marshalled");
        Ok(Self {
            version: MASTERKEY_VERSION,
            scrypt_salt: salt.to_vec(),
            scrypt_cost_param: SCRYPT_N,
            scrypt_block_size: SCRYPT_R,
            primary_master_key,
            hmac_master_key,
            version_mac,
        })
    }

    /// Unlock this masterkey file with `passphrase`, recovering the vault's
    /// [`MasterKey`]. Does not check `versionMac` (see
    /// [`MasterKeyFile::expected_version_mac`]).
    #[instrument(level = "debug", skip(self, passphrase))]
    pub fn unlock(&self, passphrase: &str) -> Result<MasterKey, ChangePasswordError> {
        if self.version != MASTERKEY_VERSION {
            return Err(ChangePasswordError::UnsupportedVersion {
                expected: MASTERKEY_VERSION,
                actual: self.version,
            });
        }

        let params = scrypt_params(self.scrypt_cost_param, self.scrypt_block_size, SCRYPT_P)?;
        let kek = derive_kek(passphrase, &self.scrypt_salt, &params)
            .map_err(ChangePasswordError::Crypto)?;

        let enc_key_bytes = key_wrap::unwrap(&kek, &self.primary_master_key).map_err(|e| {
            warn!("masterkey unwrap failed (wrong passphrase or corrupted vault)");
            ChangePasswordError::Crypto(CryptoError::from(e))
        })?;
        let mac_key_bytes = key_wrap::unwrap(&kek, &self.hmac_master_key)
            .map_err(|e| ChangePasswordError::Crypto(CryptoError::from(e)))?;

        let enc_key: [u8; 32] = enc_key_bytes
            .try_into()
            .map_err(|v: Vec<u8>| ChangePasswordError::Malformed(format!("encKey has wrong length: {}", v.len())))?;
        let mac_key: [u8; 32] = mac_key_bytes
            .try_into()
            .map_err(|v: Vec<u8>| ChangePasswordError::Malformed(format!("macKey has wrong length: {}", v.len())))?;

        debug!("masterkey unlocked");
        Ok(MasterKey::new(enc_key, mac_key))
    }

    /// Compute the `versionMac` that would be expected for `mac_key`, for
    /// callers that want to verify it explicitly.
    #[must_use]
    pub fn expected_version_mac(&self, mac_key: &[u8; 32]) -> [u8; 32] {
        compute_version_mac(mac_key, self.version)
    }

    /// Check the persisted `versionMac` against `mac_key` in constant time.
    #[must_use]
    pub fn verify_version_mac(&self, mac_key: &[u8; 32]) -> bool {
        let expected = self.expected_version_mac(mac_key);
        bool::from(expected.ct_eq(self.version_mac.as_slice()))
    }
}

/// Generate a fresh master key and marshal it under `passphrase`.
pub fn create_masterkey_file(passphrase: &str) -> Result<(MasterKeyFile, MasterKey), MasterKeyCreationError> {
    let master_key = MasterKey::random().map_err(CryptoError::from)?;
    let file = MasterKeyFile::marshal(&master_key, passphrase)?;
    Ok((file, master_key))
}

/// Re-wrap an already-unlocked master key under a new passphrase, without
/// touching any ciphertext elsewhere in the vault.
pub fn change_password(
    master_key: &MasterKey,
    new_passphrase: &str,
) -> Result<MasterKeyFile, MasterKeyCreationError> {
    MasterKeyFile::marshal(master_key, new_passphrase)
}
