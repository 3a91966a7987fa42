//! RFC 3394 AES Key Wrap.
//!
//! Used to wrap the two 256-bit master keys under the scrypt-derived KEK when
//! persisting `masterkey.cryptomator`, and to unwrap them on unlock. A failed
//! integrity check here is indistinguishable from a wrong passphrase.

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use thiserror::Error;

const IV: u64 = 0xA6A6_A6A6_A6A6_A6A6;

/// Errors from [`unwrap`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwrapError {
    /// Ciphertext length is not a multiple of 8 bytes.
    #[error("wrapped key length is not a multiple of 8 bytes")]
    InvalidCiphertextLength,
    /// Ciphertext is shorter than the minimum two 64-bit blocks.
    #[error("wrapped key is shorter than the minimum two blocks")]
    CiphertextTooShort,
    /// The recovered integrity check value does not match the RFC 3394 IV.
    #[error("key unwrap integrity check failed")]
    InvalidIntegrityCheck,
}

/// Wraps `plaintext` (a multiple of 8 bytes, at least 16) under `kek`.
///
/// Returns `plaintext.len() + 8` bytes.
pub fn wrap(kek: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    debug_assert!(plaintext.len() >= 16 && plaintext.len() % 8 == 0);

    let cipher = Aes256::new(GenericArray::from_slice(kek));
    let n = plaintext.len() / 8;
    let mut r: Vec<[u8; 8]> = plaintext.chunks_exact(8).map(|c| c.try_into().unwrap()).collect();
    let mut a = IV;

    for j in 0..6u64 {
        for i in 1..=n {
            let mut block = [0u8; 16];
            block[..8].copy_from_slice(&a.to_be_bytes());
            block[8..].copy_from_slice(&r[i - 1]);
            let mut ga = GenericArray::clone_from_slice(&block);
            cipher.encrypt_block(&mut ga);

            let t = (n as u64) * j + i as u64;
            let msb = u64::from_be_bytes(ga[..8].try_into().unwrap());
            a = msb ^ t;
            r[i - 1].copy_from_slice(&ga[8..]);
        }
    }

    let mut out = Vec::with_capacity(plaintext.len() + 8);
    out.extend_from_slice(&a.to_be_bytes());
    for block in &r {
        out.extend_from_slice(block);
    }
    out
}

/// Unwraps `ciphertext` under `kek`, returning the original plaintext.
pub fn unwrap(kek: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>, UnwrapError> {
    if ciphertext.len() % 8 != 0 {
        return Err(UnwrapError::InvalidCiphertextLength);
    }
    if ciphertext.len() < 24 {
        return Err(UnwrapError::CiphertextTooShort);
    }

    let cipher = Aes256::new(GenericArray::from_slice(kek));
    let n = ciphertext.len() / 8 - 1;
    let mut a = u64::from_be_bytes(ciphertext[..8].try_into().unwrap());
    let mut r: Vec<[u8; 8]> = ciphertext[8..].chunks_exact(8).map(|c| c.try_into().unwrap()).collect();

    for j in (0..6u64).rev() {
        for i in (1..=n).rev() {
            let t = (n as u64) * j + i as u64;
            let mut block = [0u8; 16];
            block[..8].copy_from_slice(&(a ^ t).to_be_bytes());
            block[8..].copy_from_slice(&r[i - 1]);
            let mut ga = GenericArray::clone_from_slice(&block);
            cipher.decrypt_block(&mut ga);

            a = u64::from_be_bytes(ga[..8].try_into().unwrap());
            r[i - 1].copy_from_slice(&ga[8..]);
        }
    }

    if a != IV {
        return Err(UnwrapError::InvalidIntegrityCheck);
    }

    let mut out = Vec::with_capacity(n * 8);
    for block in &r {
        out.extend_from_slice(block);
    }
    Ok(out)
}
