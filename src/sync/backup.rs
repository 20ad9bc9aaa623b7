//! Backup snapshots for the sync protocol.
//!
//! Before any remote-reconciling write, the document file and every key file
//! get a `.old` sibling copy. At most one backup generation exists: taking a
//! new snapshot deletes whatever `.old` files a previous (already consumed)
//! operation left behind. Restoring renames each `.old` back over its
//! original, returning local state to exactly its pre-sync condition.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Backup suffix appended to the full file name.
const BACKUP_SUFFIX: &str = ".old";

/// Returns the `.old` sibling for a path, keeping the original extension.
fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

fn is_backup(path: &Path) -> bool {
    path.to_string_lossy().ends_with(BACKUP_SUFFIX)
}

/// Lists the key files (not backups) in the keys directory.
fn key_files(keys_dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !keys_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(keys_dir)? {
        let path = entry?.path();
        if path.is_file() && !is_backup(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

/// Lists the `.old` backups in the keys directory.
fn key_backups(keys_dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !keys_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(keys_dir)? {
        let path = entry?.path();
        if path.is_file() && is_backup(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

/// Takes a backup snapshot of the document file and every key file.
///
/// Prior `.old` files are deleted first, so exactly one generation exists.
pub fn backup_local(doc_path: &Path, keys_dir: &Path) -> io::Result<()> {
    discard_backups(doc_path, keys_dir)?;

    if doc_path.exists() {
        fs::copy(doc_path, backup_path(doc_path))?;
    }
    for key_file in key_files(keys_dir)? {
        fs::copy(&key_file, backup_path(&key_file))?;
    }

    debug!("backup snapshot taken for {:?}", doc_path);
    Ok(())
}

/// Renames every `.old` file back over its original.
///
/// A failure here means local state is unknown; the caller must treat it as
/// fatal.
pub fn restore_from_backup(doc_path: &Path, keys_dir: &Path) -> io::Result<()> {
    let doc_backup = backup_path(doc_path);
    if doc_backup.exists() {
        fs::rename(&doc_backup, doc_path)?;
    }

    // Key files written by the failed apply are stale; the backups are the
    // authoritative pre-sync set.
    for key_file in key_files(keys_dir)? {
        fs::remove_file(&key_file)?;
    }
    for backup in key_backups(keys_dir)? {
        let original = backup.to_string_lossy().trim_end_matches(BACKUP_SUFFIX).to_string();
        fs::rename(&backup, PathBuf::from(original))?;
    }

    warn!("local state restored from backup");
    Ok(())
}

/// Consumes a snapshot after a successful operation.
pub fn discard_backups(doc_path: &Path, keys_dir: &Path) -> io::Result<()> {
    let doc_backup = backup_path(doc_path);
    if doc_backup.exists() {
        fs::remove_file(&doc_backup)?;
    }
    for backup in key_backups(keys_dir)? {
        fs::remove_file(&backup)?;
    }
    Ok(())
}

/// Deletes every current key file, leaving `.old` backups in place. Used
/// before rebuilding the keys directory from a remote snapshot.
pub fn clear_key_files(keys_dir: &Path) -> io::Result<()> {
    for key_file in key_files(keys_dir)? {
        fs::remove_file(&key_file)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_backup_and_restore_roundtrip() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("credentials.json");
        let keys = dir.path().join("keys");
        fs::create_dir(&keys).unwrap();

        fs::write(&doc, "original-doc").unwrap();
        fs::write(keys.join("prod.key"), "original-key").unwrap();

        backup_local(&doc, &keys).unwrap();

        // Clobber local state, as a failed apply would.
        fs::write(&doc, "clobbered").unwrap();
        fs::write(keys.join("prod.key"), "clobbered").unwrap();
        fs::write(keys.join("new.key"), "stale-from-apply").unwrap();

        restore_from_backup(&doc, &keys).unwrap();

        assert_eq!(fs::read_to_string(&doc).unwrap(), "original-doc");
        assert_eq!(
            fs::read_to_string(keys.join("prod.key")).unwrap(),
            "original-key"
        );
        assert!(!keys.join("new.key").exists());
        assert!(!keys.join("prod.key.old").exists());
    }

    #[test]
    fn test_single_backup_generation() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("credentials.json");
        let keys = dir.path().join("keys");
        fs::create_dir(&keys).unwrap();

        fs::write(&doc, "gen1").unwrap();
        backup_local(&doc, &keys).unwrap();

        fs::write(&doc, "gen2").unwrap();
        backup_local(&doc, &keys).unwrap();

        let backup = dir.path().join("credentials.json.old");
        assert_eq!(fs::read_to_string(backup).unwrap(), "gen2");
    }

    #[test]
    fn test_discard_consumes_snapshot() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("credentials.json");
        let keys = dir.path().join("keys");
        fs::create_dir(&keys).unwrap();

        fs::write(&doc, "doc").unwrap();
        fs::write(keys.join("a.key"), "k").unwrap();
        backup_local(&doc, &keys).unwrap();

        discard_backups(&doc, &keys).unwrap();
        assert!(!dir.path().join("credentials.json.old").exists());
        assert!(!keys.join("a.key.old").exists());
    }

    #[test]
    fn test_backup_without_existing_files() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("credentials.json");
        let keys = dir.path().join("keys");

        // Neither document nor keys dir exist yet.
        backup_local(&doc, &keys).unwrap();
        restore_from_backup(&doc, &keys).unwrap();
        assert!(!doc.exists());
    }

    #[test]
    fn test_clear_key_files_spares_backups() {
        let dir = tempdir().unwrap();
        let keys = dir.path().join("keys");
        fs::create_dir(&keys).unwrap();
        fs::write(keys.join("a.key"), "k").unwrap();
        fs::write(keys.join("a.key.old"), "old").unwrap();

        clear_key_files(&keys).unwrap();
        assert!(!keys.join("a.key").exists());
        assert!(keys.join("a.key.old").exists());
    }
}
