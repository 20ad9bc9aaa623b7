//! The sync protocol: backup, pull, apply, push, rollback.
//!
//! Invoked on unlock when an API token is configured, and after local saves
//! while online. The backup-then-restore pair substitutes for a filesystem
//! transaction: it keeps local state consistent across sync failures as long
//! as nothing else writes the same files mid-operation, which the supervisor
//! guarantees by handing the store to exactly one sync at a time.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use super::backup::{backup_local, clear_key_files, discard_backups, restore_from_backup};
use super::remote::{RemoteApi, RemoteSnapshot};
use super::SyncError;
use crate::cipher::CipherEngine;
use crate::store::{CredentialDocument, CredentialStore};

/// Result of a completed synchronization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Remote and local state were reconciled.
    Synced {
        /// Server-side timestamp of the pulled snapshot, if reported.
        last_sync: Option<String>,
    },
    /// The user cancelled before local state was touched.
    Cancelled,
}

/// Reconciles the credential store with the remote service.
pub struct SyncCoordinator {
    remote: Box<dyn RemoteApi>,
}

impl SyncCoordinator {
    /// Creates a coordinator over a remote API implementation.
    #[must_use]
    pub fn new(remote: Box<dyn RemoteApi>) -> Self {
        Self { remote }
    }

    /// Performs an authenticated read of the remote snapshot.
    pub fn pull(&self, token: &str) -> Result<RemoteSnapshot, SyncError> {
        self.remote.fetch(token)
    }

    /// Rebuilds local state from a remote snapshot.
    ///
    /// Opens each sealed field, deletes the stale key files (backups stay),
    /// and overwrites the document and keys directory.
    pub fn apply_remote(
        &self,
        snapshot: RemoteSnapshot,
        store: &mut CredentialStore,
        cipher: &CipherEngine,
    ) -> Result<(), SyncError> {
        let document = open_snapshot(snapshot, cipher)?;
        clear_key_files(&store.paths().keys_dir()).map_err(SyncError::Backup)?;
        store.replace_document(document)?;
        Ok(())
    }

    /// Seals the current local document and submits it as the new remote
    /// snapshot. Local state is never mutated, whatever the outcome.
    pub fn push(&self, token: &str, store: &CredentialStore, cipher: &CipherEngine) -> Result<(), SyncError> {
        let snapshot = seal_document(store.document(), cipher)?;
        self.remote.submit(token, &snapshot)
    }

    /// Pushes the current local state, reporting a sync outcome. Used for
    /// sync-on-write, where local files are already committed and no
    /// backup/rollback is needed.
    pub fn push_current(
        &self,
        token: &str,
        store: &CredentialStore,
        cipher: &CipherEngine,
    ) -> Result<SyncOutcome, SyncError> {
        self.push(token, store, cipher)?;
        Ok(SyncOutcome::Synced { last_sync: None })
    }

    /// Runs the full protocol: backup, pull, apply, push.
    ///
    /// Failures between pull and apply roll local files back to their
    /// pre-sync bytes. A failure during that rollback is returned as the
    /// fatal [`SyncError::Restore`]. `cancel` is checked between steps;
    /// cancellation before apply leaves local state untouched.
    pub fn synchronize(
        &self,
        token: &str,
        store: &mut CredentialStore,
        cipher: &CipherEngine,
        cancel: &AtomicBool,
    ) -> Result<SyncOutcome, SyncError> {
        let doc_path = store.paths().document();
        let keys_dir = store.paths().keys_dir();

        backup_local(&doc_path, &keys_dir).map_err(SyncError::Backup)?;

        if cancel.load(Ordering::Relaxed) {
            discard_backups(&doc_path, &keys_dir).map_err(SyncError::Backup)?;
            return Ok(SyncOutcome::Cancelled);
        }

        let snapshot = match self.pull(token) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("pull failed, rolling back: {e}");
                rollback(store)?;
                return Err(e);
            }
        };
        let last_sync = snapshot.last_sync.clone();

        if cancel.load(Ordering::Relaxed) {
            discard_backups(&doc_path, &keys_dir).map_err(SyncError::Backup)?;
            return Ok(SyncOutcome::Cancelled);
        }

        if let Err(e) = self.apply_remote(snapshot, store, cipher) {
            warn!("apply failed, rolling back: {e}");
            rollback(store)?;
            return Err(e);
        }

        // Local state is committed; the snapshot is consumed whether or not
        // the push goes through.
        discard_backups(&doc_path, &keys_dir).map_err(SyncError::Backup)?;

        self.push(token, store, cipher)?;

        info!("sync complete");
        Ok(SyncOutcome::Synced { last_sync })
    }
}

/// Restores local files from the snapshot and reloads the in-memory
/// document so it matches the restored bytes.
fn rollback(store: &mut CredentialStore) -> Result<(), SyncError> {
    let doc_path = store.paths().document();
    let keys_dir = store.paths().keys_dir();

    restore_from_backup(&doc_path, &keys_dir).map_err(|e| SyncError::Restore(e.to_string()))?;
    store
        .load()
        .map_err(|e| SyncError::Restore(format!("restored document unreadable: {e}")))
}

/// Seals the sensitive fields of a document for upload.
fn seal_document(document: &CredentialDocument, cipher: &CipherEngine) -> Result<RemoteSnapshot, SyncError> {
    let mut snapshot = RemoteSnapshot {
        hosts: document.hosts.clone(),
        passwords: document.passwords.clone(),
        keys: document.keys.clone(),
        last_sync: None,
    };

    for host in &mut snapshot.hosts {
        host.login = cipher.encrypt(&host.login)?;
    }
    for password in &mut snapshot.passwords {
        password.password = cipher.encrypt(&password.password)?;
    }
    for key in &mut snapshot.keys {
        if let Some(material) = key.key_data.take() {
            key.key_data = Some(cipher.encrypt(&material)?);
        }
    }

    Ok(snapshot)
}

/// Opens the sealed fields of a pulled snapshot into a plaintext document.
///
/// Key descriptions are validated up front: they become file names under the
/// keys directory, and they travel in plaintext, so a tampered snapshot must
/// not be able to direct a key write outside the vault.
fn open_snapshot(snapshot: RemoteSnapshot, cipher: &CipherEngine) -> Result<CredentialDocument, SyncError> {
    for key in &snapshot.keys {
        key.check_description().map_err(SyncError::Parse)?;
    }

    let mut document = CredentialDocument {
        hosts: snapshot.hosts,
        passwords: snapshot.passwords,
        keys: snapshot.keys,
    };

    for host in &mut document.hosts {
        host.login = cipher.decrypt(&host.login)?;
    }
    for password in &mut document.passwords {
        password.password = cipher.decrypt(&password.password)?;
    }
    for key in &mut document.keys {
        if let Some(sealed) = key.key_data.take() {
            key.key_data = Some(cipher.decrypt(&sealed)?);
        }
    }

    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CredentialRef, Host, Key, Password};
    use pretty_assertions::assert_eq;

    fn sample_document() -> CredentialDocument {
        CredentialDocument {
            hosts: vec![Host::new(
                "prod-db".to_string(),
                "admin".to_string(),
                "10.0.0.5".to_string(),
                22,
                CredentialRef::Password(0),
            )],
            passwords: vec![Password {
                description: "db".to_string(),
                password: "s3cret".to_string(),
            }],
            keys: vec![Key {
                description: "deploy".to_string(),
                path: String::new(),
                key_data: Some("KEY-MATERIAL".to_string()),
            }],
        }
    }

    #[test]
    fn test_seal_open_symmetry() {
        let cipher = CipherEngine::derive("p");
        let document = sample_document();

        let snapshot = seal_document(&document, &cipher).unwrap();
        assert!(snapshot.hosts[0].login.starts_with("v1:"));
        assert!(snapshot.passwords[0].password.starts_with("v1:"));
        assert!(snapshot.keys[0].key_data.as_deref().unwrap().starts_with("v1:"));

        let opened = open_snapshot(snapshot, &cipher).unwrap();
        assert_eq!(opened, document);
    }

    #[test]
    fn test_open_with_wrong_passphrase_fails() {
        let document = sample_document();
        let snapshot = seal_document(&document, &CipherEngine::derive("a")).unwrap();

        let result = open_snapshot(snapshot, &CipherEngine::derive("b"));
        assert!(matches!(result, Err(SyncError::Cipher(_))));
    }

    #[test]
    fn test_snapshot_with_unsafe_key_description_rejected() {
        let cipher = CipherEngine::derive("p");
        let mut snapshot = seal_document(&sample_document(), &cipher).unwrap();
        snapshot.keys[0].description = "../../escaped".to_string();

        let result = open_snapshot(snapshot, &cipher);
        assert!(matches!(result, Err(SyncError::Parse(_))));
    }

    #[test]
    fn test_plaintext_never_sealed_twice() {
        // Non-sensitive fields stay readable on the wire.
        let cipher = CipherEngine::derive("p");
        let snapshot = seal_document(&sample_document(), &cipher).unwrap();
        assert_eq!(snapshot.hosts[0].name, "prod-db");
        assert_eq!(snapshot.hosts[0].address, "10.0.0.5");
        assert_eq!(snapshot.keys[0].description, "deploy");
    }
}
