//! Shared error-context carried alongside file and directory operations.

use std::fmt;
use std::path::PathBuf;

/// Context for file/directory operations, attached to errors for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct FileContext {
    /// The cleartext filename (if known).
    pub filename: Option<String>,
    /// The encrypted physical path on disk.
    pub encrypted_path: Option<PathBuf>,
    /// The parent directory ID.
    pub dir_id: Option<String>,
    /// The chunk number (for content errors).
    pub chunk_number: Option<usize>,
}

impl FileContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.encrypted_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_dir_id(mut self, dir_id: impl Into<String>) -> Self {
        self.dir_id = Some(dir_id.into());
        self
    }

    #[must_use]
    pub fn with_chunk(mut self, chunk_number: usize) -> Self {
        self.chunk_number = Some(chunk_number);
        self
    }
}

impl fmt::Display for FileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref filename) = self.filename {
            parts.push(format!("file '{filename}'"));
        }
        if let Some(ref dir_id) = self.dir_id {
            let display_id = if dir_id.is_empty() {
                "<root>".to_string()
            } else if dir_id.len() > 8 {
                format!("{}...", &dir_id[..8])
            } else {
                dir_id.clone()
            };
            parts.push(format!("in directory {display_id}"));
        }
        if let Some(chunk) = self.chunk_number {
            parts.push(format!("chunk {chunk}"));
        }
        if let Some(ref path) = self.encrypted_path {
            parts.push(format!("at {:?}", path.display()));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}
