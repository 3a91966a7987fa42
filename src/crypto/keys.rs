//! The vault's master key material: a 256-bit content/header/name encryption
//! key and a 256-bit HMAC key, held for the lifetime of a vault handle.

use std::sync::Mutex;

use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

/// Failure accessing key material guarded behind a lock.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAccessError {
    /// A thread panicked while holding the key lock, poisoning it.
    #[error("master key lock was poisoned by a panicking thread")]
    Poisoned,
}

/// The two independent 256-bit keys that make up a Cryptomator master key:
/// `enc_key` for AES content/header/name encryption, `mac_key` for
/// HMAC-SHA256 authentication and AES-SIV.
///
/// Key bytes are held in `Zeroizing` buffers behind a `Mutex` so the type is
/// trivially `Send + Sync` without `unsafe` code, and are wiped on drop.
pub struct MasterKey {
    enc_key: Mutex<Zeroizing<[u8; 32]>>,
    mac_key: Mutex<Zeroizing<[u8; 32]>>,
}

impl MasterKey {
    /// Build a master key from already-known key bytes (e.g. after unwrap).
    #[must_use]
    pub fn new(enc_key: [u8; 32], mac_key: [u8; 32]) -> Self {
        Self {
            enc_key: Mutex::new(Zeroizing::new(enc_key)),
            mac_key: Mutex::new(Zeroizing::new(mac_key)),
        }
    }

    /// Draw a fresh master key from the system RNG.
    ///
    /// # Errors
    /// Never fails in this implementation; fallible for parity with
    /// backends that draw key material from a guarded/locked allocator.
    pub fn random() -> Result<Self, KeyAccessError> {
        let mut enc_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        rand::rng().fill_bytes(&mut enc_key);
        rand::rng().fill_bytes(&mut mac_key);
        Ok(Self::new(enc_key, mac_key))
    }

    /// Access the AES encryption key under a closure; the key never leaves
    /// this call.
    pub fn with_aes_key<T>(&self, f: impl FnOnce(&[u8; 32]) -> T) -> Result<T, KeyAccessError> {
        let guard = self.enc_key.lock().map_err(|_| KeyAccessError::Poisoned)?;
        Ok(f(&guard))
    }

    /// Access the MAC key under a closure; the key never leaves this call.
    pub fn with_mac_key<T>(&self, f: impl FnOnce(&[u8; 32]) -> T) -> Result<T, KeyAccessError> {
        let guard = self.mac_key.lock().map_err(|_| KeyAccessError::Poisoned)?;
        Ok(f(&guard))
    }

    /// The 64-byte key used for AES-SIV (filename and directory-ID
    /// encryption): `macKey ‖ encKey`.
    pub fn siv_key(&self) -> Result<Zeroizing<[u8; 64]>, KeyAccessError> {
        let mut key = Zeroizing::new([0u8; 64]);
        self.with_mac_key(|mac_key| key[..32].copy_from_slice(mac_key))?;
        self.with_aes_key(|aes_key| key[32..].copy_from_slice(aes_key))?;
        Ok(key)
    }

    /// The 64-byte key used to sign/verify the vault config token:
    /// `encKey ‖ macKey`. Note the reversed concatenation order relative to
    /// [`MasterKey::siv_key`] — this is a property of the wire format, not a
    /// choice made here.
    pub fn jwt_signing_key(&self) -> Result<Zeroizing<[u8; 64]>, KeyAccessError> {
        let mut key = Zeroizing::new([0u8; 64]);
        self.with_aes_key(|aes_key| key[..32].copy_from_slice(aes_key))?;
        self.with_mac_key(|mac_key| key[32..].copy_from_slice(mac_key))?;
        Ok(key)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").field("enc_key", &"[REDACTED]").field("mac_key", &"[REDACTED]").finish()
    }
}

impl Clone for MasterKey {
    fn clone(&self) -> Self {
        let enc_key = self.with_aes_key(|k| *k).expect("key lock poisoned");
        let mac_key = self.with_mac_key(|k| *k).expect("key lock poisoned");
        Self::new(enc_key, mac_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_keys_are_independent() {
        let key = MasterKey::random().unwrap();
        let enc = key.with_aes_key(|k| *k).unwrap();
        let mac = key.with_mac_key(|k| *k).unwrap();
        assert_ne!(enc, mac);
    }

    #[test]
    fn siv_and_jwt_keys_use_opposite_concatenation_order() {
        let key = MasterKey::new([1u8; 32], [2u8; 32]);
        let siv = key.siv_key().unwrap();
        let jwt = key.jwt_signing_key().unwrap();
        assert_eq!(&siv[..32], &[2u8; 32]);
        assert_eq!(&siv[32..], &[1u8; 32]);
        assert_eq!(&jwt[..32], &[1u8; 32]);
        assert_eq!(&jwt[32..], &[2u8; 32]);
    }

    #[test]
    fn is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MasterKey>();
    }
}
