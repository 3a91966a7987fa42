//! Filesystem abstractions for Cryptomator vaults

pub mod adapter;
pub mod context;
pub mod file_ctrmac;
pub mod name;
pub mod streaming;

// Re-export commonly used types
pub use adapter::{AdapterError, FsAdapter, MemoryAdapter, OsAdapter, Stat};
pub use context::FileContext;
pub use file_ctrmac::{CtrMacError, CtrMacFileHeader, HEADER_SIZE, MAC_SIZE, NONCE_SIZE};
pub use name::{
    ENCRYPTED_SUFFIX, NameError, SHORTENED_SUFFIX, SHORTENING_THRESHOLD, decrypt_filename, encrypt_filename,
    hash_dir_id, shorten,
};
pub use streaming::{
    CHUNK_ENCRYPTED_SIZE, CHUNK_OVERHEAD, CHUNK_PLAINTEXT_SIZE, StreamError, VaultFileReader, VaultFileWriter,
    create_encrypted_writer, open_encrypted_reader,
};
