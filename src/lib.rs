//! Davit
//!
//! A TUI manager for SSH credentials: hosts, passwords and private keys are
//! kept encrypted at rest, optionally mirrored to a remote store, and the
//! controlling terminal can be handed to an interactive remote session on
//! demand.
//!
//! # Architecture
//!
//! - **Cipher module**: passphrase-derived AEAD for secrets at rest
//! - **Store module**: the credential document, key files, and API token
//! - **Sync module**: backup/pull/apply/push protocol with rollback, run on
//!   a background worker
//! - **Supervisor module**: the control loop, terminal ownership, and the
//!   raw-terminal handoff to remote sessions

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

pub mod cipher;
pub mod config;
pub mod logging;
pub mod store;
pub mod supervisor;
pub mod sync;

// Re-export main types
pub use cipher::CipherEngine;
pub use config::{StartMode, VaultPaths};
pub use store::CredentialStore;
pub use supervisor::SessionSupervisor;
pub use sync::SyncCoordinator;
