//! Plaintext path handling and directory identifiers.

use std::fmt;

/// Opaque identifier of a directory: a UUIDv4 string, or the empty string
/// for the vault root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirId(String);

impl DirId {
    /// The root directory's ID: the empty string.
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// True iff this is the root directory's ID.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Wrap an already-known ID string (e.g. parsed from a `dir.c9r` file).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh non-root directory ID (a UUIDv4 string).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl AsRef<str> for DirId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The kind of directory entry a resolved path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

/// A cleaned, plaintext vault path: leading/trailing slashes and `.`
/// segments collapsed, backslashes never treated as separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VaultPath {
    cleaned: String,
    segments: Vec<String>,
}

impl VaultPath {
    /// Clean and parse a plaintext path. `.`, empty segments, and leading
    /// slashes are collapsed; `..` is rejected as malformed (this vault has
    /// no notion of parent traversal above a resolved directory).
    pub fn parse(raw: &str) -> Result<Self, VaultPathError> {
        let mut segments = Vec::new();
        for part in raw.split('/') {
            if part.is_empty() || part == "." {
                continue;
            }
            if part == ".." {
                return Err(VaultPathError::ParentTraversal(raw.to_string()));
            }
            segments.push(part.to_string());
        }
        let cleaned = segments.join("/");
        Ok(Self { cleaned, segments })
    }

    /// The root path (empty segment list).
    #[must_use]
    pub fn root() -> Self {
        Self {
            cleaned: String::new(),
            segments: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.cleaned
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Split into `(parent, final_segment_name)`. Returns `None` for the
    /// root path, which has no parent.
    #[must_use]
    pub fn split_last(&self) -> Option<(VaultPath, &str)> {
        let (last, rest) = self.segments.split_last()?;
        let parent = Self {
            cleaned: rest.join("/"),
            segments: rest.to_vec(),
        };
        Some((parent, last.as_str()))
    }

    /// Every ancestor path from the root down to (and excluding) this path,
    /// in descending order, each paired with its own trailing segment name.
    #[must_use]
    pub fn ancestors(&self) -> Vec<(VaultPath, &str)> {
        let mut out = Vec::with_capacity(self.segments.len());
        for i in 1..=self.segments.len() {
            let segs = &self.segments[..i];
            out.push((
                VaultPath {
                    cleaned: segs.join("/"),
                    segments: segs.to_vec(),
                },
                segs[i - 1].as_str(),
            ));
        }
        out
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "/{}", self.cleaned)
        }
    }
}

/// Errors parsing a plaintext vault path.
#[derive(thiserror::Error, Debug)]
pub enum VaultPathError {
    #[error("path contains a '..' segment, which this vault does not support: {0:?}")]
    ParentTraversal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_dir_id_is_empty_string() {
        assert!(DirId::root().is_root());
        assert_eq!(DirId::root().as_str(), "");
    }

    #[test]
    fn generated_dir_ids_are_unique() {
        assert_ne!(DirId::generate(), DirId::generate());
    }

    #[test]
    fn path_collapses_slashes_and_dot_segments() {
        let p = VaultPath::parse("/docs/./a.txt").unwrap();
        assert_eq!(p.as_str(), "docs/a.txt");
        assert_eq!(p.segments(), &["docs".to_string(), "a.txt".to_string()]);
    }

    #[test]
    fn empty_path_is_root() {
        let p = VaultPath::parse("").unwrap();
        assert!(p.is_root());
        let p2 = VaultPath::parse("/").unwrap();
        assert!(p2.is_root());
    }

    #[test]
    fn parent_traversal_is_rejected() {
        assert!(matches!(
            VaultPath::parse("a/../b"),
            Err(VaultPathError::ParentTraversal(_))
        ));
    }

    #[test]
    fn split_last_separates_parent_and_name() {
        let p = VaultPath::parse("a/b/c").unwrap();
        let (parent, name) = p.split_last().unwrap();
        assert_eq!(parent.as_str(), "a/b");
        assert_eq!(name, "c");
        assert!(VaultPath::root().split_last().is_none());
    }

    #[test]
    fn ancestors_lists_every_prefix_in_order() {
        let p = VaultPath::parse("a/b/c").unwrap();
        let ancestors: Vec<String> = p.ancestors().into_iter().map(|(path, _)| path.as_str().to_string()).collect();
        assert_eq!(ancestors, vec!["a".to_string(), "a/b".to_string(), "a/b/c".to_string()]);
    }
}
