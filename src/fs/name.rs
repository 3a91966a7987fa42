//! Filename encryption/decryption and directory-ID path hashing.
//!
//! Filenames and directory IDs are encrypted deterministically with AES-SIV
//! so that directory listings and directory-shard paths are reproducible
//! from the plaintext path alone.

use aes_siv::KeyInit;
use aes_siv::siv::Aes256Siv;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use data_encoding::BASE32;
use ring::digest;
use thiserror::Error;
use tracing::{instrument, trace};

use crate::crypto::CryptoError;
use crate::crypto::keys::MasterKey;

/// Suffix of every encrypted directory entry name.
pub const ENCRYPTED_SUFFIX: &str = ".c9r";
/// Suffix of a shortened encrypted directory entry name.
pub const SHORTENED_SUFFIX: &str = ".c9s";
/// Names longer than this (in characters) are shortened.
pub const SHORTENING_THRESHOLD: usize = 220;

/// Errors from filename/directory-ID encryption and decryption.
#[derive(Error, Debug)]
pub enum NameError {
    /// The encrypted name did not carry the required `.c9r` suffix.
    #[error("encrypted name is missing the required '.c9r' suffix: {0:?}")]
    BadSuffix(String),
    /// Base64url decoding of the ciphertext failed.
    #[error("encrypted name is not valid base64url: {0}")]
    Malformed(#[from] base64::DecodeError),
    /// AES-SIV authentication failed, or the decrypted plaintext was not
    /// valid UTF-8.
    #[error("name decryption failed: possible tampering or wrong key")]
    AuthFailed,
    /// AES-SIV encryption failed with a valid key and well-formed input,
    /// which should be impossible; indicates a programming error.
    #[error("internal error performing AES-SIV: {0}")]
    Internal(String),
    /// Cryptographic key access failed.
    #[error("cryptographic operation failed: {0}")]
    Crypto(#[from] CryptoError),
}

fn siv_encrypt(key: &[u8; 64], plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>, NameError> {
    Aes256Siv::new(key.into())
        .encrypt([ad], plaintext)
        .map_err(|e| NameError::Internal(e.to_string()))
}

fn siv_decrypt(key: &[u8; 64], ciphertext: &[u8], ad: &[u8]) -> Result<Vec<u8>, NameError> {
    Aes256Siv::new(key.into())
        .decrypt([ad], ciphertext)
        .map_err(|_| NameError::AuthFailed)
}

/// Encrypt `name` under `dir_id`'s associated data, returning
/// `base64url(ct) + ".c9r"`. Deterministic: identical `(name, dir_id)` under
/// the same key always yields identical output.
#[instrument(level = "trace", skip(master_key), fields(dir_id = %dir_id))]
pub fn encrypt_filename(name: &str, dir_id: &str, master_key: &MasterKey) -> Result<String, NameError> {
    let key = master_key.siv_key()?;
    let ciphertext = siv_encrypt(&key, name.as_bytes(), dir_id.as_bytes())?;
    Ok(format!("{}{}", URL_SAFE.encode(ciphertext), ENCRYPTED_SUFFIX))
}

/// Decrypt an encrypted name (with its `.c9r` suffix) back to plaintext.
#[instrument(level = "trace", skip(master_key), fields(dir_id = %dir_id))]
pub fn decrypt_filename(encrypted_name: &str, dir_id: &str, master_key: &MasterKey) -> Result<String, NameError> {
    let Some(encoded) = encrypted_name.strip_suffix(ENCRYPTED_SUFFIX) else {
        return Err(NameError::BadSuffix(encrypted_name.to_string()));
    };
    let ciphertext = URL_SAFE.decode(encoded)?;
    let key = master_key.siv_key()?;
    let plaintext = siv_decrypt(&key, &ciphertext, dir_id.as_bytes())?;
    String::from_utf8(plaintext).map_err(|_| NameError::AuthFailed)
}

/// Collapse an overlong encrypted name to its shortened on-disk stand-in:
/// `base64url(SHA1(encName)) + ".c9s"`. Callers shorten iff
/// `encName.len() > SHORTENING_THRESHOLD`.
#[must_use]
pub fn shorten(encrypted_name: &str) -> String {
    let hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, encrypted_name.as_bytes());
    format!("{}{}", URL_SAFE.encode(hash.as_ref()), SHORTENED_SUFFIX)
}

/// Map a directory ID to its two-level shard path under the data root:
/// `"{prefix2}/{rest30}"`.
#[instrument(level = "trace", skip(master_key))]
pub fn hash_dir_id(dir_id: &str, master_key: &MasterKey) -> Result<String, NameError> {
    let key = master_key.siv_key()?;
    let ciphertext = siv_encrypt(&key, dir_id.as_bytes(), &[])?;
    let sha1 = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &ciphertext);
    let encoded = BASE32.encode(sha1.as_ref());
    debug_assert_eq!(encoded.len(), 32, "SHA1-then-base32 always yields 32 characters");

    let (prefix, rest) = encoded.split_at(2);
    trace!(shard_prefix = prefix, "directory shard path computed");
    Ok(format!("{prefix}/{rest}"))
}
