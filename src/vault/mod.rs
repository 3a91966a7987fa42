//! Vault-level abstractions and operations

pub mod cache;
pub mod config;
pub mod creator;
pub mod locks;
pub mod master_key;
pub mod operations;
pub mod password;
pub mod path;

// Re-export commonly used types
pub use cache::{CacheStats, VaultCache};
pub use config::{VaultConfig, VaultConfigError, VaultConfigurationClaims};
pub use creator::VaultCreator;
pub use locks::{PathLockGuard, PathLockMap};
pub use master_key::{
    ChangePasswordError, MasterKeyCreationError, MasterKeyFile, change_password, create_masterkey_file,
};
pub use operations::{VaultOperationError, VaultOperations};
pub use password::{DEFAULT_VALIDATION_TIMEOUT, PasswordValidationError, PasswordValidator, ValidatedPassword};
pub use path::{DirId, EntryType, VaultPath, VaultPathError};
