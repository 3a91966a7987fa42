//! Password validation for vault unlocking.
//!
//! This module provides a two-phase unlock mechanism:
//! 1. Validate the password (CPU-intensive scrypt, but can timeout on file I/O)
//! 2. Construct vault operations with the validated password (no further checks)
//!
//! This separation allows a caller to show immediate feedback on password
//! errors without waiting for any later step, and avoids blocking on a stale
//! or unresponsive backing store during validation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::crypto::keys::MasterKey;

use super::config::{VaultConfig, VaultConfigError};
use super::master_key::MasterKeyFile;

/// Default timeout for filesystem operations during password validation.
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during password validation.
#[derive(Error, Debug)]
pub enum PasswordValidationError {
    /// The password was incorrect.
    #[error("incorrect password")]
    IncorrectPassword,

    /// Filesystem operation timed out (path may be on a stale mount).
    #[error("filesystem operation timed out - path may be on a stale mount")]
    Timeout,

    /// `vault.cryptomator` not found.
    #[error("vault configuration not found: {0}")]
    ConfigNotFound(PathBuf),

    /// `masterkey.cryptomator` not found.
    #[error("master key file not found: {0}")]
    MasterKeyNotFound(PathBuf),

    /// The vault config token's parameters don't match this format, or its
    /// `kid` header is missing/unexpected.
    #[error("invalid vault format: {0}")]
    InvalidFormat(String),

    /// Filesystem I/O error.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error reading the masterkey file.
    #[error("failed to parse masterkey file: {0}")]
    Parse(#[from] serde_json::Error),

    /// Vault config token error.
    #[error("vault configuration error: {0}")]
    Config(#[from] VaultConfigError),

    /// Cryptographic error.
    #[error("cryptographic error: {0}")]
    Crypto(#[from] CryptoError),
}

/// A validated password with the unlocked master key and verified vault
/// config, ready for use constructing vault operations.
///
/// Intentionally not `Clone`: this is proof the password was checked once,
/// not a value meant to be duplicated and re-checked.
#[derive(Debug)]
pub struct ValidatedPassword {
    pub(crate) vault_path: PathBuf,
    pub(crate) master_key: Arc<MasterKey>,
    pub(crate) config: VaultConfig,
}

impl ValidatedPassword {
    #[must_use]
    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }

    #[must_use]
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub(crate) fn master_key(&self) -> Arc<MasterKey> {
        Arc::clone(&self.master_key)
    }
}

/// Validates passwords for vault unlocking, separating the password check
/// from any later mount/operations setup.
#[derive(Debug, Clone)]
pub struct PasswordValidator {
    vault_path: PathBuf,
}

impl PasswordValidator {
    #[must_use]
    pub fn new(vault_path: impl AsRef<Path>) -> Self {
        Self {
            vault_path: vault_path.as_ref().to_path_buf(),
        }
    }

    /// Validate with the default timeout.
    pub fn validate_default(&self, password: &str) -> Result<ValidatedPassword, PasswordValidationError> {
        self.validate(password, DEFAULT_VALIDATION_TIMEOUT)
    }

    /// Validate a password with a custom I/O timeout.
    ///
    /// Reads `vault.cryptomator` and `masterkey.cryptomator` with timeout
    /// protection, derives the KEK via scrypt (CPU-bound, not subject to the
    /// timeout), unwraps the master key, and verifies the vault config
    /// token's signature and parameters.
    #[tracing::instrument(level = "info", skip(self, password))]
    pub fn validate(&self, password: &str, timeout: Duration) -> Result<ValidatedPassword, PasswordValidationError> {
        let vault_config_path = self.vault_path.join("vault.cryptomator");
        let raw_config = read_with_timeout(&vault_config_path, timeout).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PasswordValidationError::ConfigNotFound(vault_config_path.clone()),
            std::io::ErrorKind::TimedOut => PasswordValidationError::Timeout,
            _ => PasswordValidationError::Io(e),
        })?;

        let unverified = VaultConfig::unmarshal_unverified(&raw_config)?;

        let masterkey_path = self.vault_path.join("masterkey.cryptomator");
        let masterkey_json = read_with_timeout(&masterkey_path, timeout).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PasswordValidationError::MasterKeyNotFound(masterkey_path.clone()),
            std::io::ErrorKind::TimedOut => PasswordValidationError::Timeout,
            _ => PasswordValidationError::Io(e),
        })?;

        let masterkey_file: MasterKeyFile = serde_json::from_str(&masterkey_json)?;

        tracing::debug!("deriving scrypt KEK to validate password");
        let master_key = masterkey_file.unlock(password).map_err(|e| match e {
            super::master_key::ChangePasswordError::Crypto(CryptoError::KeyUnwrapIntegrityFailed) => {
                PasswordValidationError::IncorrectPassword
            }
            super::master_key::ChangePasswordError::Crypto(other) => PasswordValidationError::Crypto(other),
            other => PasswordValidationError::InvalidFormat(other.to_string()),
        })?;

        unverified.verify(&master_key)?;

        Ok(ValidatedPassword {
            vault_path: self.vault_path.clone(),
            master_key: Arc::new(master_key),
            config: unverified,
        })
    }
}

/// Read a file with timeout protection by performing the read on a spawned
/// thread and waiting on a channel, so a hung backing store (e.g. a stale
/// network mount) surfaces as `Timeout` rather than blocking forever.
fn read_with_timeout(path: &Path, timeout: Duration) -> std::io::Result<String> {
    let path = path.to_path_buf();
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || {
        let result = std::fs::read_to_string(&path);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "filesystem operation timed out"))
        }
        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
            Err(std::io::Error::other("filesystem read thread terminated unexpectedly"))
        }
    }
}
