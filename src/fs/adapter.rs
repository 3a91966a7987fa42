//! The filesystem port the vault engine consumes: `{Open, Create, MkdirAll,
//! RemoveFile, RemoveDir, Stat}`, expressed as a trait so the engine stays
//! agnostic to what backs it (local disk, in-memory, or a future cloud
//! adapter).

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Errors from the FS adapter port, distinct from crypto/vault errors.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Metadata about a backing-store entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub is_dir: bool,
    pub len: u64,
}

/// The filesystem port consumed by the vault engine. Paths are
/// forward-slash-separated and relative to the vault root.
pub trait FsAdapter: Send + Sync {
    /// Open an existing file for reading.
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, AdapterError>;

    /// Create a new file for writing. Fails with `AlreadyExists` if a file
    /// already exists at `path` — this port never overwrites silently.
    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, AdapterError>;

    /// Create `path` and any missing ancestor directories. Succeeds if the
    /// directory already exists.
    fn mkdir_all(&self, path: &str) -> Result<(), AdapterError>;

    /// Remove a single file.
    fn remove_file(&self, path: &str) -> Result<(), AdapterError>;

    /// Remove a directory. Must fail with `NotEmpty` if it still has
    /// entries.
    fn remove_dir(&self, path: &str) -> Result<(), AdapterError>;

    /// Stat a path.
    fn stat(&self, path: &str) -> Result<Stat, AdapterError>;
}

/// An `FsAdapter` backed by a real directory on local disk.
pub struct OsAdapter {
    root: PathBuf,
}

impl OsAdapter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl FsAdapter for OsAdapter {
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, AdapterError> {
        let full = self.resolve(path);
        let file = std::fs::File::open(&full).map_err(|e| map_io_error(e, path))?;
        Ok(Box::new(file))
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, AdapterError> {
        let full = self.resolve(path);
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .map_err(|e| map_io_error(e, path))?;
        Ok(Box::new(file))
    }

    fn mkdir_all(&self, path: &str) -> Result<(), AdapterError> {
        std::fs::create_dir_all(self.resolve(path)).map_err(AdapterError::from)
    }

    fn remove_file(&self, path: &str) -> Result<(), AdapterError> {
        std::fs::remove_file(self.resolve(path)).map_err(|e| map_io_error(e, path))
    }

    fn remove_dir(&self, path: &str) -> Result<(), AdapterError> {
        match std::fs::remove_dir(self.resolve(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(AdapterError::NotFound(path.to_string())),
            Err(e) if e.raw_os_error() == Some(39) /* ENOTEMPTY */ => {
                Err(AdapterError::NotEmpty(path.to_string()))
            }
            Err(e) => Err(AdapterError::Io(e)),
        }
    }

    fn stat(&self, path: &str) -> Result<Stat, AdapterError> {
        let meta = std::fs::metadata(self.resolve(path)).map_err(|e| map_io_error(e, path))?;
        Ok(Stat {
            is_dir: meta.is_dir(),
            len: meta.len(),
        })
    }
}

fn map_io_error(e: io::Error, path: &str) -> AdapterError {
    match e.kind() {
        io::ErrorKind::NotFound => AdapterError::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => AdapterError::AlreadyExists(path.to_string()),
        _ => AdapterError::Io(e),
    }
}

/// An in-memory `FsAdapter`, used for tests (no real filesystem I/O).
pub struct MemoryAdapter {
    files: std::sync::Arc<Mutex<std::collections::HashMap<String, Vec<u8>>>>,
    dirs: Mutex<HashSet<String>>,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    #[must_use]
    pub fn new() -> Self {
        let dirs = HashSet::from([String::new()]);
        Self {
            files: std::sync::Arc::new(Mutex::new(std::collections::HashMap::new())),
            dirs: Mutex::new(dirs),
        }
    }

    fn parent_of(path: &str) -> String {
        match Path::new(path).parent() {
            Some(p) => p.to_string_lossy().replace('\\', "/"),
            None => String::new(),
        }
    }

    fn has_entries_under(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        let files = self.files.lock().unwrap();
        let dirs = self.dirs.lock().unwrap();
        files.keys().any(|k| k.starts_with(&prefix)) || dirs.iter().any(|d| d.starts_with(&prefix))
    }
}

impl FsAdapter for MemoryAdapter {
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, AdapterError> {
        let files = self.files.lock().unwrap();
        let data = files.get(path).ok_or_else(|| AdapterError::NotFound(path.to_string()))?;
        Ok(Box::new(io::Cursor::new(data.clone())))
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, AdapterError> {
        {
            let files = self.files.lock().unwrap();
            if files.contains_key(path) {
                return Err(AdapterError::AlreadyExists(path.to_string()));
            }
        }
        let parent = Self::parent_of(path);
        if !self.dirs.lock().unwrap().contains(&parent) {
            return Err(AdapterError::NotFound(parent));
        }
        Ok(Box::new(MemoryFileWriter {
            path: path.to_string(),
            buffer: Vec::new(),
            files: std::sync::Arc::clone(&self.files),
        }))
    }

    fn mkdir_all(&self, path: &str) -> Result<(), AdapterError> {
        let mut dirs = self.dirs.lock().unwrap();
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            prefix = if prefix.is_empty() {
                segment.to_string()
            } else {
                format!("{prefix}/{segment}")
            };
            dirs.insert(prefix.clone());
        }
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<(), AdapterError> {
        let mut files = self.files.lock().unwrap();
        files.remove(path).map(|_| ()).ok_or_else(|| AdapterError::NotFound(path.to_string()))
    }

    fn remove_dir(&self, path: &str) -> Result<(), AdapterError> {
        if !self.dirs.lock().unwrap().contains(path) {
            return Err(AdapterError::NotFound(path.to_string()));
        }
        if self.has_entries_under(path) {
            return Err(AdapterError::NotEmpty(path.to_string()));
        }
        self.dirs.lock().unwrap().remove(path);
        Ok(())
    }

    fn stat(&self, path: &str) -> Result<Stat, AdapterError> {
        if self.dirs.lock().unwrap().contains(path) {
            return Ok(Stat { is_dir: true, len: 0 });
        }
        let files = self.files.lock().unwrap();
        let data = files.get(path).ok_or_else(|| AdapterError::NotFound(path.to_string()))?;
        Ok(Stat {
            is_dir: false,
            len: data.len() as u64,
        })
    }
}

struct MemoryFileWriter {
    path: String,
    buffer: Vec<u8>,
    files: std::sync::Arc<Mutex<std::collections::HashMap<String, Vec<u8>>>>,
}

impl Write for MemoryFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MemoryFileWriter {
    fn drop(&mut self) {
        self.files.lock().unwrap().insert(std::mem::take(&mut self.path), std::mem::take(&mut self.buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_adapter_create_then_open_round_trip() {
        let adapter = MemoryAdapter::new();
        {
            let mut w = adapter.create("file.txt").unwrap();
            w.write_all(b"hello").unwrap();
        }
        let mut r = adapter.open("file.txt").unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn memory_adapter_create_fails_if_exists() {
        let adapter = MemoryAdapter::new();
        drop(adapter.create("file.txt").unwrap());
        let result = adapter.create("file.txt");
        assert!(matches!(result, Err(AdapterError::AlreadyExists(_))));
    }

    #[test]
    fn memory_adapter_mkdir_all_then_remove_empty_succeeds() {
        let adapter = MemoryAdapter::new();
        adapter.mkdir_all("a/b").unwrap();
        adapter.remove_dir("a/b").unwrap();
    }

    #[test]
    fn memory_adapter_remove_nonempty_dir_fails() {
        let adapter = MemoryAdapter::new();
        adapter.mkdir_all("a").unwrap();
        drop(adapter.create("a/file.txt").unwrap());
        assert!(matches!(adapter.remove_dir("a"), Err(AdapterError::NotEmpty(_))));
    }

    #[test]
    fn os_adapter_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = OsAdapter::new(tmp.path());
        {
            let mut w = adapter.create("file.txt").unwrap();
            w.write_all(b"hello disk").unwrap();
        }
        let mut r = adapter.open("file.txt").unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello disk");
    }

    #[test]
    fn os_adapter_create_fails_if_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = OsAdapter::new(tmp.path());
        drop(adapter.create("file.txt").unwrap());
        assert!(matches!(adapter.create("file.txt"), Err(AdapterError::AlreadyExists(_))));
    }
}
