//! End-to-end tests against a real on-disk vault via `OsAdapter`, exercising
//! the scenarios of the external contract that unit tests (which mostly run
//! against `MemoryAdapter`) don't: real file sizes on a real filesystem, and
//! tampering with bytes that actually hit disk.

use std::fs;
use std::path::{Path, PathBuf};

use cryptovault_core::vault::{VaultCreator, VaultOperations, VaultPath};
use tempfile::TempDir;

fn find_single(root: &Path, filename: &str) -> PathBuf {
    let mut matches: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_name() == filename)
        .map(|e| e.path().to_path_buf())
        .collect();
    assert_eq!(matches.len(), 1, "expected exactly one {filename} under {}", root.display());
    matches.remove(0)
}

/// Scenario 1 — round-trip a small file through a close-and-reopen cycle.
#[test]
fn round_trip_small_file_across_reopen() {
    let tmp = TempDir::new().unwrap();
    let vault = VaultCreator::new(tmp.path(), "pw").create().unwrap();
    vault.mkdir(&VaultPath::parse("docs").unwrap()).unwrap();
    vault.write_file(&VaultPath::parse("docs/a.txt").unwrap(), b"hello").unwrap();
    drop(vault);

    let adapter: std::sync::Arc<dyn cryptovault_core::fs::adapter::FsAdapter> =
        std::sync::Arc::new(cryptovault_core::fs::adapter::OsAdapter::new(tmp.path()));
    let reopened = VaultOperations::open(adapter, "pw").unwrap();
    let data = reopened.read_file(&VaultPath::parse("docs/a.txt").unwrap()).unwrap();
    assert_eq!(data, [0x68, 0x65, 0x6C, 0x6C, 0x6F]);
}

/// Scenario 2 — opening with the wrong passphrase fails authentication.
#[test]
fn wrong_passphrase_fails_on_reopen() {
    let tmp = TempDir::new().unwrap();
    VaultCreator::new(tmp.path(), "pw").create().unwrap();

    let adapter: std::sync::Arc<dyn cryptovault_core::fs::adapter::FsAdapter> =
        std::sync::Arc::new(cryptovault_core::fs::adapter::OsAdapter::new(tmp.path()));
    let result = VaultOperations::open(adapter, "wrong");
    assert!(matches!(result, Err(cryptovault_core::vault::VaultOperationError::AuthFailed)));
}

/// Scenarios 3 & 4 — exact on-disk ciphertext sizes at and past a chunk
/// boundary, verified against the real file the `OsAdapter` wrote.
#[test]
fn chunk_boundary_sizes_match_on_disk() {
    let tmp = TempDir::new().unwrap();
    let vault = VaultCreator::new(tmp.path(), "pw").create().unwrap();

    let exact = vec![0xAAu8; 32_768];
    vault.write_file(&VaultPath::parse("a.bin").unwrap(), &exact).unwrap();
    let a_bin = find_single(tmp.path(), "contents.c9r");
    assert_eq!(fs::metadata(&a_bin).unwrap().len(), 32_904);
    assert_eq!(vault.read_file(&VaultPath::parse("a.bin").unwrap()).unwrap(), exact);

    vault.mkdir(&VaultPath::parse("d").unwrap()).unwrap();
    let plus_one = vec![0xBBu8; 32_769];
    vault.write_file(&VaultPath::parse("d/b.bin").unwrap(), &plus_one).unwrap();

    let b_bin = walkdir::WalkDir::new(tmp.path())
        .into_iter()
        .filter_map(Result::ok)
        .find(|e| e.file_name() == "contents.c9r" && e.path() != a_bin)
        .expect("second contents.c9r")
        .path()
        .to_path_buf();
    assert_eq!(fs::metadata(&b_bin).unwrap().len(), 32_953);
    assert_eq!(vault.read_file(&VaultPath::parse("d/b.bin").unwrap()).unwrap(), plus_one);
}

/// Scenario 5 — flipping a byte inside an on-disk chunk's MAC causes
/// authentication failure on read, before any byte past that chunk is
/// returned.
#[test]
fn tampering_on_disk_chunk_mac_is_detected() {
    let tmp = TempDir::new().unwrap();
    let vault = VaultCreator::new(tmp.path(), "pw").create().unwrap();

    let data = vec![0x42u8; 100_000];
    vault.write_file(&VaultPath::parse("big.bin").unwrap(), &data).unwrap();

    let contents_path = find_single(tmp.path(), "contents.c9r");
    let mut bytes = fs::read(&contents_path).unwrap();

    // Header is 88 bytes; each chunk frame is 16 (nonce) + 32768 (payload)
    // + 32 (mac) = 32816 bytes. Flip the last byte of the second chunk's
    // MAC.
    let chunk_frame = 16 + 32_768 + 32;
    let second_chunk_mac_end = 88 + 2 * chunk_frame;
    let target = second_chunk_mac_end - 1;
    bytes[target] ^= 0xFF;
    fs::write(&contents_path, &bytes).unwrap();

    let result = vault.read_file(&VaultPath::parse("big.bin").unwrap());
    assert!(matches!(result, Err(cryptovault_core::vault::VaultOperationError::AuthFailed)));
}

/// Scenario 6 — the same plaintext name under the same directory ID
/// encrypts identically across two independently-opened handles on the
/// same on-disk masterkey file.
#[test]
fn deterministic_name_across_reopened_handles() {
    let tmp = TempDir::new().unwrap();
    let vault = VaultCreator::new(tmp.path(), "pw").create().unwrap();
    vault.write_file(&VaultPath::parse("report.pdf").unwrap(), b"x").unwrap();
    let entry_name_1 = find_single(tmp.path(), "contents.c9r").parent().unwrap().file_name().unwrap().to_owned();
    drop(vault);

    let adapter: std::sync::Arc<dyn cryptovault_core::fs::adapter::FsAdapter> =
        std::sync::Arc::new(cryptovault_core::fs::adapter::OsAdapter::new(tmp.path()));
    let reopened = VaultOperations::open(adapter, "pw").unwrap();
    assert_eq!(reopened.read_file(&VaultPath::parse("report.pdf").unwrap()).unwrap(), b"x");
    let entry_name_2 = find_single(tmp.path(), "contents.c9r").parent().unwrap().file_name().unwrap().to_owned();
    assert_eq!(entry_name_1, entry_name_2);
}

/// Rmdir purges the path→DirID cache entry: after removal the path must
/// resolve as not-found, and recreating it at the same path must succeed
/// and yield a fresh directory rather than resurrecting stale state.
#[test]
fn rmdir_purges_cache_and_path_is_reusable() {
    let tmp = TempDir::new().unwrap();
    let vault = VaultCreator::new(tmp.path(), "pw").create().unwrap();

    let first = vault.mkdir(&VaultPath::parse("a").unwrap()).unwrap();
    vault.rmdir(&VaultPath::parse("a").unwrap()).unwrap();
    assert!(matches!(
        vault.get_dir_id(&VaultPath::parse("a").unwrap()),
        Err(cryptovault_core::vault::VaultOperationError::NotFound(_))
    ));

    let second = vault.mkdir(&VaultPath::parse("a").unwrap()).unwrap();
    assert_ne!(first, second);
    vault.write_file(&VaultPath::parse("a/x.txt").unwrap(), b"fresh").unwrap();
    assert_eq!(vault.read_file(&VaultPath::parse("a/x.txt").unwrap()).unwrap(), b"fresh");
}

/// Directories and files created through nested paths survive a full
/// close-and-reopen cycle with the same layout an independent handle
/// would resolve.
#[test]
fn nested_directories_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let vault = VaultCreator::new(tmp.path(), "pw").create().unwrap();
    vault.mkdir(&VaultPath::parse("a").unwrap()).unwrap();
    vault.mkdir(&VaultPath::parse("a/b").unwrap()).unwrap();
    vault.mkdir(&VaultPath::parse("a/b/c").unwrap()).unwrap();
    vault.write_file(&VaultPath::parse("a/b/c/leaf.txt").unwrap(), b"deep").unwrap();
    drop(vault);

    let adapter: std::sync::Arc<dyn cryptovault_core::fs::adapter::FsAdapter> =
        std::sync::Arc::new(cryptovault_core::fs::adapter::OsAdapter::new(tmp.path()));
    let reopened = VaultOperations::open(adapter, "pw").unwrap();
    assert_eq!(reopened.read_file(&VaultPath::parse("a/b/c/leaf.txt").unwrap()).unwrap(), b"deep");
}
