//! Encrypted credential store: data model, document file, key files, and
//! API token.

mod document;
mod storage;

pub use document::{CredentialDocument, CredentialRef, Host, Key, Password};
pub use storage::{CredentialStore, StoreError};
