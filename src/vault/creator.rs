//! Vault creation functionality
//!
//! This module provides the `VaultCreator` builder for creating new
//! Cryptomator vaults from scratch on local disk, thin sugar over
//! [`VaultOperations::create`] for the common "new vault in a fresh
//! directory" case.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fs::adapter::{FsAdapter, OsAdapter};

use super::operations::{VaultOperationError, VaultOperations};

/// Builder for creating new Cryptomator vaults on local disk.
///
/// # Example
///
/// ```no_run
/// use cryptovault_core::vault::{VaultCreator, VaultPath};
/// use std::path::Path;
///
/// let vault_ops = VaultCreator::new(Path::new("/path/to/new/vault"), "my-secure-passphrase")
///     .create()
///     .expect("Failed to create vault");
///
/// vault_ops
///     .write_file(&VaultPath::parse("hello.txt").unwrap(), b"Hello, World!")
///     .unwrap();
/// ```
pub struct VaultCreator {
    vault_path: PathBuf,
    passphrase: String,
}

impl VaultCreator {
    /// Create a new `VaultCreator`.
    ///
    /// # Arguments
    /// * `vault_path` - Directory the new vault will be created in (created
    ///   if missing).
    /// * `passphrase` - Password to encrypt the master keys under.
    #[must_use]
    pub fn new(vault_path: &Path, passphrase: &str) -> Self {
        Self {
            vault_path: vault_path.to_path_buf(),
            passphrase: passphrase.to_string(),
        }
    }

    /// Create the vault and return a `VaultOperations` handle.
    ///
    /// This will:
    /// 1. Create the vault directory if it doesn't exist.
    /// 2. Generate a new random master key and persist
    ///    `masterkey.cryptomator`.
    /// 3. Write the `vault.cryptomator` config token.
    /// 4. Create the root directory's data shard.
    ///
    /// # Errors
    /// * `VaultOperationError::AlreadyExists` if `vault.cryptomator` already
    ///   exists in `vault_path`.
    /// * `VaultOperationError::Io` for filesystem errors.
    pub fn create(self) -> Result<VaultOperations, VaultOperationError> {
        std::fs::create_dir_all(&self.vault_path)?;
        let adapter: Arc<dyn FsAdapter> = Arc::new(OsAdapter::new(&self.vault_path));
        VaultOperations::create(adapter, &self.passphrase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::path::VaultPath;
    use tempfile::TempDir;

    #[test]
    fn test_vault_creation() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("test_vault");

        let vault_ops = VaultCreator::new(&vault_path, "test-password").create().expect("Failed to create vault");

        assert!(vault_path.join("vault.cryptomator").exists());
        assert!(vault_path.join("masterkey.cryptomator").exists());
        assert!(vault_path.join("d").exists());

        vault_ops.write_file(&VaultPath::parse("test.txt").unwrap(), b"Hello, World!").expect("Failed to write file");

        let decrypted =
            vault_ops.read_file(&VaultPath::parse("test.txt").unwrap()).expect("Failed to read file back");
        assert_eq!(decrypted, b"Hello, World!");
    }

    #[test]
    fn test_vault_already_exists() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("existing_vault");

        VaultCreator::new(&vault_path, "password").create().expect("Failed to create vault");

        let result = VaultCreator::new(&vault_path, "password").create();
        assert!(matches!(result, Err(VaultOperationError::AlreadyExists(_))));
    }

    #[test]
    fn test_vault_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("nested").join("vault");
        assert!(!vault_path.exists());

        VaultCreator::new(&vault_path, "password").create().expect("Failed to create vault");
        assert!(vault_path.join("vault.cryptomator").exists());
    }
}
