//! Error types for the cryptolib crate
//!
//! This module re-exports the error types defined alongside the code that
//! produces them, so callers have one place to look regardless of which
//! layer raised the error.

pub use crate::fs::adapter::AdapterError;
pub use crate::fs::context::FileContext;
pub use crate::fs::file_ctrmac::CtrMacError;
pub use crate::fs::name::NameError;
pub use crate::fs::streaming::StreamError;
pub use crate::vault::config::VaultConfigError;
pub use crate::vault::master_key::ChangePasswordError;
pub use crate::vault::operations::VaultOperationError;
pub use crate::vault::password::PasswordValidationError;
pub use crate::vault::path::VaultPathError;
