//! Remote synchronization: backup snapshots, the pull/apply/push protocol,
//! and the background worker that runs it without stalling the interface.
//!
//! The protocol never trades local consistency for remote progress: local
//! files are snapshotted before any remote-reconciling write, and any failure
//! between pull and apply rolls the snapshot back. A failed rollback is the
//! one unrecoverable case and is surfaced as [`SyncError::Restore`].

mod backup;
mod coordinator;
mod remote;
mod worker;

use std::io;

use thiserror::Error;

use crate::cipher::CipherError;
use crate::store::StoreError;

pub use backup::{backup_local, discard_backups, restore_from_backup};
pub use coordinator::{SyncCoordinator, SyncOutcome};
pub use remote::{HttpRemote, RemoteApi, RemoteSnapshot, SyncEnvelope};
pub use worker::{spawn_sync, SyncEvent, SyncHandle, SyncJob};

/// Errors from the synchronization protocol.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Request-level failure: connection refused, timeout, bad transport.
    #[error("network error: {0}")]
    Network(String),

    /// The remote accepted the request but reported failure.
    #[error("remote rejected sync: {0}")]
    Remote(String),

    /// The remote payload did not match the expected schema.
    #[error("malformed remote payload: {0}")]
    Parse(String),

    /// Cipher failure while sealing or opening a synced field.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// Local store failure while applying a snapshot.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Backup snapshot could not be taken.
    #[error("backup failed: {0}")]
    Backup(#[source] io::Error),

    /// Fatal: the backup could not be reapplied. Local state is unknown and
    /// the process must stop.
    #[error("restore from backup failed: {0}")]
    Restore(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl SyncError {
    /// Returns true if the process cannot continue on local state.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Restore(_))
    }

    /// Returns true if this failure only means the remote is unreachable,
    /// i.e. the vault can degrade to offline mode.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
