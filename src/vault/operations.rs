//! The vault engine: composes the masterkey, config, filename, directory-hash,
//! header and stream codecs into `Mkdir`/`Rmdir`/`Open`/`Create` over plaintext
//! paths, backed by an [`FsAdapter`] and guarded by a path→DirID cache plus a
//! path→mutex map for at-most-one concurrent directory creation per path.

use std::io::{Read, Write};
use std::sync::Arc;

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::crypto::keys::{KeyAccessError, MasterKey};
use crate::fs::adapter::{AdapterError, FsAdapter};
use crate::fs::file_ctrmac::CtrMacError;
use crate::fs::name::{self, NameError};
use crate::fs::streaming::{self, StreamError, VaultFileReader, VaultFileWriter};

use super::cache::VaultCache;
use super::config::{VaultConfig, VaultConfigError};
use super::locks::PathLockMap;
use super::master_key::{self, ChangePasswordError, MasterKeyCreationError};
use super::password::ValidatedPassword;
use super::path::{DirId, EntryType, VaultPath, VaultPathError};

/// Errors from the vault engine, matching the error taxonomy of this format:
/// structural/authentication/resolution failures are distinct kinds, never
/// conflated.
#[derive(Error, Debug)]
pub enum VaultOperationError {
    #[error("malformed vault data: {0}")]
    Malformed(String),
    #[error("authentication failed: possible tampering or wrong passphrase")]
    AuthFailed,
    #[error("unsupported vault version or parameter: {0}")]
    UnsupportedParameter(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("stream writer already closed")]
    AlreadyClosed,
    #[error("trailing data found after the final chunk")]
    TrailingData,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl From<AdapterError> for VaultOperationError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::NotFound(p) => Self::NotFound(p),
            AdapterError::AlreadyExists(p) => Self::AlreadyExists(p),
            AdapterError::NotEmpty(p) => Self::NotEmpty(p),
            AdapterError::Io(e) => Self::Io(e),
        }
    }
}

impl From<NameError> for VaultOperationError {
    fn from(e: NameError) -> Self {
        match e {
            NameError::BadSuffix(s) => Self::Malformed(format!("name missing '.c9r' suffix: {s}")),
            NameError::Malformed(e) => Self::Malformed(e.to_string()),
            NameError::AuthFailed => Self::AuthFailed,
            NameError::Internal(s) => Self::Internal(s),
            NameError::Crypto(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<StreamError> for VaultOperationError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::AlreadyClosed => Self::AlreadyClosed,
            StreamError::TrailingData => Self::TrailingData,
            StreamError::AuthFailed { .. } => Self::AuthFailed,
            StreamError::InvalidChunk { reason, .. } => Self::Malformed(reason),
            StreamError::Header(e) => e.into(),
            StreamError::Io(e) => Self::Io(e),
        }
    }
}

impl From<CtrMacError> for VaultOperationError {
    fn from(e: CtrMacError) -> Self {
        match e {
            CtrMacError::HmacVerification { .. } => Self::AuthFailed,
            CtrMacError::InvalidHeader { reason, .. } | CtrMacError::InvalidChunk { reason, .. } => {
                Self::Malformed(reason)
            }
            CtrMacError::KeyAccess(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<VaultConfigError> for VaultOperationError {
    fn from(e: VaultConfigError) -> Self {
        match e {
            VaultConfigError::Malformed(e) => Self::Malformed(e.to_string()),
            VaultConfigError::BadSignature => Self::AuthFailed,
            VaultConfigError::UnsupportedParameter(claims) => Self::UnsupportedParameter(format!("{claims:?}")),
            VaultConfigError::MissingKeyId => Self::Malformed("missing or unexpected 'kid' header".into()),
            VaultConfigError::Crypto(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<ChangePasswordError> for VaultOperationError {
    fn from(e: ChangePasswordError) -> Self {
        match e {
            ChangePasswordError::Malformed(s) => Self::Malformed(s),
            ChangePasswordError::UnsupportedVersion { expected, actual } => {
                Self::UnsupportedParameter(format!("masterkey version: expected {expected}, got {actual}"))
            }
            ChangePasswordError::Crypto(CryptoError::KeyUnwrapIntegrityFailed) => Self::AuthFailed,
            ChangePasswordError::Crypto(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<MasterKeyCreationError> for VaultOperationError {
    fn from(e: MasterKeyCreationError) -> Self {
        match e {
            MasterKeyCreationError::Crypto(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<VaultPathError> for VaultOperationError {
    fn from(e: VaultPathError) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<KeyAccessError> for VaultOperationError {
    fn from(e: KeyAccessError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// A live, unlocked vault: the master key, verified config, and the mutable
/// resolution state (cache, path locks) layered over a backing [`FsAdapter`].
pub struct VaultOperations {
    adapter: Arc<dyn FsAdapter>,
    master_key: Arc<MasterKey>,
    config: VaultConfig,
    cache: VaultCache,
    locks: PathLockMap,
}

impl VaultOperations {
    /// Create a brand new vault: generate and persist the master key and
    /// config token, then make the root physical directory.
    pub fn create(adapter: Arc<dyn FsAdapter>, passphrase: &str) -> Result<Self, VaultOperationError> {
        if adapter.stat("vault.cryptomator").is_ok() {
            return Err(VaultOperationError::AlreadyExists("vault.cryptomator".into()));
        }

        let (masterkey_file, master_key) = master_key::create_masterkey_file(passphrase)?;
        let masterkey_json =
            serde_json::to_string(&masterkey_file).map_err(|e| VaultOperationError::Internal(e.to_string()))?;
        adapter.create("masterkey.cryptomator")?.write_all(masterkey_json.as_bytes())?;

        let config = VaultConfig::new(&master_key)?;
        adapter.create("vault.cryptomator")?.write_all(config.marshal().as_bytes())?;
        config.verify(&master_key)?;

        let vault = Self {
            adapter,
            master_key: Arc::new(master_key),
            config,
            cache: VaultCache::new(),
            locks: PathLockMap::new(),
        };

        let root_shard = vault.shard_path(&DirId::root())?;
        vault.adapter.mkdir_all(&format!("d/{root_shard}"))?;
        Ok(vault)
    }

    /// Open an existing vault: read and verify both persisted files.
    pub fn open(adapter: Arc<dyn FsAdapter>, passphrase: &str) -> Result<Self, VaultOperationError> {
        let raw_config = read_to_string(adapter.as_ref(), "vault.cryptomator")?;
        let unverified = VaultConfig::unmarshal_unverified(&raw_config)?;

        let masterkey_json = read_to_string(adapter.as_ref(), "masterkey.cryptomator")?;
        let masterkey_file: master_key::MasterKeyFile =
            serde_json::from_str(&masterkey_json).map_err(|e| VaultOperationError::Malformed(e.to_string()))?;

        let master_key = masterkey_file.unlock(passphrase)?;
        unverified.verify(&master_key)?;

        Ok(Self {
            adapter,
            master_key: Arc::new(master_key),
            config: unverified,
            cache: VaultCache::new(),
            locks: PathLockMap::new(),
        })
    }

    /// Construct operations directly from an already-validated password,
    /// skipping the redundant re-verification `open` would perform.
    #[must_use]
    pub fn from_validated(validated: ValidatedPassword, adapter: Arc<dyn FsAdapter>) -> Self {
        Self {
            adapter,
            master_key: validated.master_key(),
            config: validated.config,
            cache: VaultCache::new(),
            locks: PathLockMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    fn shard_path(&self, dir_id: &DirId) -> Result<String, VaultOperationError> {
        Ok(name::hash_dir_id(dir_id.as_str(), &self.master_key)?)
    }

    fn entry_dir_name(encrypted_name: &str) -> String {
        if encrypted_name.len() > name::SHORTENING_THRESHOLD {
            name::shorten(encrypted_name)
        } else {
            encrypted_name.to_string()
        }
    }

    fn write_sidecar(&self, entry_dir: &str, encrypted_name: &str) -> Result<(), VaultOperationError> {
        self.adapter.create(&format!("{entry_dir}/name.c9s"))?.write_all(encrypted_name.as_bytes())?;
        Ok(())
    }

    /// Resolve `path` to the entry directory it would live under
    /// (`d/<parentShard>/<entryName>`), the entry name itself, and the full
    /// encrypted name (which may differ from the entry name when shortened).
    fn resolve_entry_dir(&self, path: &VaultPath) -> Result<(String, String, String), VaultOperationError> {
        let (parent, name_seg) = path
            .split_last()
            .ok_or_else(|| VaultOperationError::Malformed("the vault root is not a file or symlink".into()))?;
        let parent_id = self.get_dir_id(&parent)?;
        let parent_shard = self.shard_path(&parent_id)?;
        let encrypted = name::encrypt_filename(name_seg, parent_id.as_str(), &self.master_key)?;
        let entry_name = Self::entry_dir_name(&encrypted);
        Ok((format!("d/{parent_shard}/{entry_name}"), entry_name, encrypted))
    }

    /// Resolve a single path segment's child `DirId` by reading its
    /// `dir.c9r`.
    fn resolve_child(&self, parent: &DirId, segment: &str) -> Result<DirId, VaultOperationError> {
        let parent_shard = self.shard_path(parent)?;
        let encrypted = name::encrypt_filename(segment, parent.as_str(), &self.master_key)?;
        let entry_name = Self::entry_dir_name(&encrypted);
        let dir_c9r_path = format!("d/{parent_shard}/{entry_name}/dir.c9r");
        let raw = read_to_string(self.adapter.as_ref(), &dir_c9r_path)?;
        Ok(DirId::new(raw))
    }

    /// Resolve a cleaned plaintext path to its `DirId`, consulting (and
    /// populating) the cache along every ancestor prefix.
    pub fn get_dir_id(&self, path: &VaultPath) -> Result<DirId, VaultOperationError> {
        if path.is_root() {
            return Ok(DirId::root());
        }
        if let Some(id) = self.cache.get(path.as_str()) {
            return Ok(id);
        }
        self.resolve_with_retry(path, true)
    }

    fn resolve_with_retry(&self, path: &VaultPath, allow_retry: bool) -> Result<DirId, VaultOperationError> {
        let mut current = DirId::root();
        for (ancestor_path, segment) in path.ancestors() {
            if let Some(id) = self.cache.get(ancestor_path.as_str()) {
                current = id;
                continue;
            }
            match self.resolve_child(&current, segment) {
                Ok(child_id) => {
                    self.cache.insert(ancestor_path.as_str(), child_id.clone());
                    current = child_id;
                }
                Err(VaultOperationError::NotFound(_)) if allow_retry => {
                    for (anc, _) in path.ancestors() {
                        self.cache.invalidate(anc.as_str());
                    }
                    return self.resolve_with_retry(path, false);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(current)
    }

    /// Create a directory (and any cached knowledge of its ancestors),
    /// guarded by a per-path mutex so concurrent callers creating the same
    /// path agree on exactly one `DirId`.
    pub fn mkdir(&self, path: &VaultPath) -> Result<DirId, VaultOperationError> {
        if path.is_root() {
            return Ok(DirId::root());
        }
        let guard = self.locks.lock(path.as_str());
        guard.held(|| self.mkdir_locked(path))
    }

    fn mkdir_locked(&self, path: &VaultPath) -> Result<DirId, VaultOperationError> {
        if let Ok(id) = self.get_dir_id(path) {
            return Ok(id);
        }
        let (parent, name_seg) = path.split_last().expect("a non-root path always has a parent");
        self.adapter.mkdir_all("d")?;

        let parent_id = self.get_dir_id(&parent)?;
        let parent_shard = self.shard_path(&parent_id)?;
        let encrypted = name::encrypt_filename(name_seg, parent_id.as_str(), &self.master_key)?;
        let entry_name = Self::entry_dir_name(&encrypted);
        let entry_dir = format!("d/{parent_shard}/{entry_name}");

        self.adapter.mkdir_all(&entry_dir)?;
        if entry_name != encrypted {
            self.write_sidecar(&entry_dir, &encrypted)?;
        }

        let dir_id = DirId::generate();
        self.adapter.create(&format!("{entry_dir}/dir.c9r"))?.write_all(dir_id.as_str().as_bytes())?;
        self.cache.insert(path.as_str(), dir_id.clone());

        let new_shard = self.shard_path(&dir_id)?;
        self.adapter.mkdir_all(&format!("d/{new_shard}"))?;
        {
            let writer = self.adapter.create(&format!("d/{new_shard}/dirid.c9r"))?;
            let mut stream = streaming::create_encrypted_writer(writer, &self.master_key)?;
            stream.write_all(dir_id.as_str().as_bytes())?;
            stream.close()?;
        }

        Ok(dir_id)
    }

    /// Remove an empty directory, cleaning up its shard directories
    /// best-effort and invalidating the cache entry for `path`.
    pub fn rmdir(&self, path: &VaultPath) -> Result<(), VaultOperationError> {
        if path.is_root() {
            return Err(VaultOperationError::Malformed("cannot remove the vault root".into()));
        }
        let dir_id = self.get_dir_id(path)?;
        let dir_shard = self.shard_path(&dir_id)?;
        let dir_full_path = format!("d/{dir_shard}");
        let (shard_prefix, _) = dir_shard.split_once('/').expect("shard paths always contain a separator");

        let (parent, name_seg) = path.split_last().expect("a non-root path always has a parent");
        let parent_id = self.get_dir_id(&parent)?;
        let parent_shard = self.shard_path(&parent_id)?;
        let encrypted = name::encrypt_filename(name_seg, parent_id.as_str(), &self.master_key)?;
        let entry_name = Self::entry_dir_name(&encrypted);
        let entry_dir = format!("d/{parent_shard}/{entry_name}");

        best_effort(self.adapter.remove_file(&format!("{dir_full_path}/dirid.c9r")))?;
        self.adapter.remove_dir(&dir_full_path)?;
        best_effort(self.adapter.remove_dir(&format!("d/{shard_prefix}")))?;
        self.adapter.remove_file(&format!("{entry_dir}/dir.c9r"))?;
        self.adapter.remove_dir(&entry_dir)?;

        self.cache.invalidate(path.as_str());
        Ok(())
    }

    /// Open an existing file for reading its decrypted content.
    pub fn open_file(&self, path: &VaultPath) -> Result<VaultFileReader<Box<dyn Read + Send>>, VaultOperationError> {
        let (entry_dir, ..) = self.resolve_entry_dir(path)?;
        let reader = self.adapter.open(&format!("{entry_dir}/contents.c9r"))?;
        Ok(streaming::open_encrypted_reader(reader, &self.master_key)?)
    }

    /// Create a new file, failing if one already exists at `path`.
    pub fn create_file(&self, path: &VaultPath) -> Result<VaultFileWriter<Box<dyn Write + Send>>, VaultOperationError> {
        let (entry_dir, entry_name, encrypted) = self.resolve_entry_dir(path)?;
        self.adapter.mkdir_all(&entry_dir)?;
        if entry_name != encrypted {
            self.write_sidecar(&entry_dir, &encrypted)?;
        }
        let writer = self.adapter.create(&format!("{entry_dir}/contents.c9r"))?;
        Ok(streaming::create_encrypted_writer(writer, &self.master_key)?)
    }

    /// Convenience: read a whole file's decrypted content into memory.
    pub fn read_file(&self, path: &VaultPath) -> Result<Vec<u8>, VaultOperationError> {
        let mut reader = self.open_file(path)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Convenience: write a whole file's plaintext content in one call.
    pub fn write_file(&self, path: &VaultPath, data: &[u8]) -> Result<(), VaultOperationError> {
        let mut writer = self.create_file(path)?;
        writer.write_all(data)?;
        writer.close()?;
        Ok(())
    }

    /// Write a symlink whose target is `target`, using the same header+
    /// stream codec as regular file content.
    pub fn write_symlink(&self, path: &VaultPath, target: &str) -> Result<(), VaultOperationError> {
        let (entry_dir, entry_name, encrypted) = self.resolve_entry_dir(path)?;
        self.adapter.mkdir_all(&entry_dir)?;
        if entry_name != encrypted {
            self.write_sidecar(&entry_dir, &encrypted)?;
        }
        let writer = self.adapter.create(&format!("{entry_dir}/symlink.c9r"))?;
        let mut stream = streaming::create_encrypted_writer(writer, &self.master_key)?;
        stream.write_all(target.as_bytes())?;
        stream.close()?;
        Ok(())
    }

    /// Read a symlink's target.
    pub fn read_symlink(&self, path: &VaultPath) -> Result<String, VaultOperationError> {
        let (entry_dir, ..) = self.resolve_entry_dir(path)?;
        let reader = self.adapter.open(&format!("{entry_dir}/symlink.c9r"))?;
        let mut stream = streaming::open_encrypted_reader(reader, &self.master_key)?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf)?;
        String::from_utf8(buf).map_err(|e| VaultOperationError::Malformed(e.to_string()))
    }

    /// Determine whether `path` names a file, directory, or symlink.
    pub fn entry_type(&self, path: &VaultPath) -> Result<EntryType, VaultOperationError> {
        if path.is_root() {
            return Ok(EntryType::Directory);
        }
        let (entry_dir, ..) = self.resolve_entry_dir(path)?;
        if self.adapter.stat(&format!("{entry_dir}/dir.c9r")).is_ok() {
            return Ok(EntryType::Directory);
        }
        if self.adapter.stat(&format!("{entry_dir}/symlink.c9r")).is_ok() {
            return Ok(EntryType::Symlink);
        }
        self.adapter.stat(&format!("{entry_dir}/contents.c9r")).map(|_| EntryType::File).map_err(Into::into)
    }

    /// Re-wrap the master key under a new passphrase, overwriting
    /// `masterkey.cryptomator` in place. Content and names are untouched.
    pub fn change_password(&self, new_passphrase: &str) -> Result<(), VaultOperationError> {
        let file = master_key::change_password(&self.master_key, new_passphrase)?;
        let json = serde_json::to_string(&file).map_err(|e| VaultOperationError::Internal(e.to_string()))?;
        let _ = self.adapter.remove_file("masterkey.cryptomator");
        self.adapter.create("masterkey.cryptomator")?.write_all(json.as_bytes())?;
        Ok(())
    }
}

fn best_effort(result: Result<(), AdapterError>) -> Result<(), VaultOperationError> {
    match result {
        Ok(()) | Err(AdapterError::NotFound(_) | AdapterError::NotEmpty(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn read_to_string(adapter: &dyn FsAdapter, path: &str) -> Result<String, VaultOperationError> {
    let mut reader = adapter.open(path)?;
    let mut out = String::new();
    reader.read_to_string(&mut out)?;
    Ok(out)
}
