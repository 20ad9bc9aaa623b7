//! Credential store: the document file, the keys directory, and the
//! encrypted API-token file.
//!
//! The store is the single writer of everything under the config directory.
//! Document saves go through a temp file and an atomic rename; secrets hit
//! the disk with owner-only permissions.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::document::{CredentialDocument, CredentialRef, Host, Key, Password};
use crate::cipher::{CipherEngine, CipherError};
use crate::config::VaultPaths;

/// Errors from credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed document content.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Referential-integrity violation: the credential is still in use.
    #[error("credential is used by host '{host}'")]
    Integrity {
        /// Name of the referencing host.
        host: String,
    },

    /// A unique name or description is already taken.
    #[error("name already in use: {0}")]
    DuplicateName(String),

    /// A field value that cannot be stored.
    #[error("invalid entry: {0}")]
    Invalid(String),

    /// The referenced entry does not exist.
    #[error("no such entry: {0}")]
    NotFound(String),

    /// Cipher failure while handling the API token.
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Owns the in-memory [`CredentialDocument`] and its on-disk representation.
#[derive(Debug)]
pub struct CredentialStore {
    paths: VaultPaths,
    document: CredentialDocument,
}

impl CredentialStore {
    /// Creates a store over the given layout with an empty document.
    #[must_use]
    pub fn new(paths: VaultPaths) -> Self {
        Self {
            paths,
            document: CredentialDocument::new(),
        }
    }

    /// Returns the filesystem layout.
    #[must_use]
    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    /// Returns the current document.
    #[must_use]
    pub fn document(&self) -> &CredentialDocument {
        &self.document
    }

    /// Replaces the whole document (used when applying a remote snapshot)
    /// and persists it.
    pub fn replace_document(&mut self, document: CredentialDocument) -> Result<(), StoreError> {
        self.document = document;
        self.save()?;
        self.materialize_local_keys()?;
        Ok(())
    }

    /// Loads the document from disk.
    ///
    /// A missing file initializes an empty document and persists it
    /// immediately, so the file exists from then on. Malformed content is a
    /// parse error.
    pub fn load(&mut self) -> Result<(), StoreError> {
        self.paths.ensure_root()?;

        let path = self.paths.document();
        if !path.exists() {
            info!("no credential document at {:?}, creating empty one", path);
            self.document = CredentialDocument::new();
            self.save()?;
            return Ok(());
        }

        let content = fs::read_to_string(&path)?;
        self.document = serde_json::from_str(&content)?;
        self.materialize_local_keys()?;

        debug!(
            "loaded document: {} hosts, {} passwords, {} keys",
            self.document.hosts.len(),
            self.document.passwords.len(),
            self.document.keys.len()
        );
        Ok(())
    }

    /// Serializes the document to disk with owner-only permissions.
    ///
    /// Writes a temp sibling and renames it over the document, so a crash
    /// mid-write never leaves a half-written file behind.
    pub fn save(&self) -> Result<(), StoreError> {
        self.paths.ensure_root()?;

        let path = self.paths.document();
        let content = serde_json::to_string_pretty(&self.document)?;

        let temp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.flush()?;
        }
        restrict_permissions(&temp_path)?;
        fs::rename(&temp_path, &path)?;

        Ok(())
    }

    // ---- hosts ----

    /// Adds a host. The name must be unique and the credential reference
    /// must resolve.
    pub fn add_host(&mut self, host: Host) -> Result<(), StoreError> {
        check_host(&host)?;
        if self.document.find_host_by_name(&host.name).is_some() {
            return Err(StoreError::DuplicateName(host.name));
        }
        self.check_ref_resolves(host.credential_ref)?;

        self.document.hosts.push(host);
        self.save()
    }

    /// Replaces the host at `index`.
    pub fn update_host(&mut self, index: usize, host: Host) -> Result<(), StoreError> {
        check_host(&host)?;
        if index >= self.document.hosts.len() {
            return Err(StoreError::NotFound(format!("host #{index}")));
        }
        if let Some(existing) = self.document.find_host_by_name(&host.name) {
            if existing != &self.document.hosts[index] {
                return Err(StoreError::DuplicateName(host.name));
            }
        }
        self.check_ref_resolves(host.credential_ref)?;

        self.document.hosts[index] = host;
        self.save()
    }

    /// Deletes the host at `index`. Hosts have no dependents, so this is
    /// unconditional.
    pub fn delete_host(&mut self, index: usize) -> Result<(), StoreError> {
        if index >= self.document.hosts.len() {
            return Err(StoreError::NotFound(format!("host #{index}")));
        }
        let host = self.document.hosts.remove(index);
        debug!("deleted host '{}'", host.name);
        self.save()
    }

    /// Finds a host by display name.
    #[must_use]
    pub fn find_host_by_name(&self, name: &str) -> Option<&Host> {
        self.document.find_host_by_name(name)
    }

    /// Records a successful connection to the host at `index`.
    pub fn mark_host_connected(&mut self, index: usize) -> Result<(), StoreError> {
        let host = self
            .document
            .hosts
            .get_mut(index)
            .ok_or_else(|| StoreError::NotFound(format!("host #{index}")))?;
        host.mark_connected();
        self.save()
    }

    // ---- passwords ----

    /// Adds a password.
    pub fn add_password(&mut self, password: Password) -> Result<(), StoreError> {
        self.document.passwords.push(password);
        self.save()
    }

    /// Replaces the password at `index`.
    pub fn update_password(&mut self, index: usize, password: Password) -> Result<(), StoreError> {
        if index >= self.document.passwords.len() {
            return Err(StoreError::NotFound(format!("password #{index}")));
        }
        self.document.passwords[index] = password;
        self.save()
    }

    /// Deletes the password at `index`, refusing while any host references
    /// it. Later references are shifted down to follow their entries.
    pub fn delete_password(&mut self, index: usize) -> Result<(), StoreError> {
        if index >= self.document.passwords.len() {
            return Err(StoreError::NotFound(format!("password #{index}")));
        }
        if let Some(host) = self.document.password_referenced_by(index) {
            return Err(StoreError::Integrity {
                host: host.to_string(),
            });
        }

        self.document.passwords.remove(index);
        self.document.shift_password_refs_after_removal(index);
        self.save()
    }

    // ---- keys ----

    /// Adds a key. The description must be safe as a file name and unique
    /// among keys; local material is materialized under the keys directory.
    pub fn add_key(&mut self, key: Key) -> Result<(), StoreError> {
        key.check_description().map_err(StoreError::Invalid)?;
        if self.document.keys.iter().any(|k| k.description == key.description) {
            return Err(StoreError::DuplicateName(key.description));
        }

        if key.is_local() {
            self.write_key_file(&key)?;
        }
        self.document.keys.push(key);
        self.save()
    }

    /// Replaces the key at `index`.
    ///
    /// A key that changes locality (local material removed, or renamed)
    /// has its stale file deleted before the new state is written.
    pub fn update_key(&mut self, index: usize, key: Key) -> Result<(), StoreError> {
        key.check_description().map_err(StoreError::Invalid)?;
        let old = self
            .document
            .keys
            .get(index)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("key #{index}")))?;

        if key.description != old.description
            && self.document.keys.iter().any(|k| k.description == key.description)
        {
            return Err(StoreError::DuplicateName(key.description));
        }

        if old.is_local() && (!key.is_local() || key.description != old.description) {
            self.remove_key_file(&old);
        }
        if key.is_local() {
            self.write_key_file(&key)?;
        }

        self.document.keys[index] = key;
        self.save()
    }

    /// Deletes the key at `index`, refusing while any host references it.
    /// A locally materialized key file is removed as well.
    pub fn delete_key(&mut self, index: usize) -> Result<(), StoreError> {
        if index >= self.document.keys.len() {
            return Err(StoreError::NotFound(format!("key #{index}")));
        }
        if let Some(host) = self.document.key_referenced_by(index) {
            return Err(StoreError::Integrity {
                host: host.to_string(),
            });
        }

        let key = self.document.keys.remove(index);
        if key.is_local() {
            self.remove_key_file(&key);
        }
        self.document.shift_key_refs_after_removal(index);
        self.save()
    }

    /// Returns the path a host's key resolves to, for building the ssh
    /// command line.
    #[must_use]
    pub fn key_path(&self, key: &Key) -> PathBuf {
        if key.is_local() {
            self.paths.keys_dir().join(key.file_name())
        } else {
            PathBuf::from(&key.path)
        }
    }

    /// Writes every local key's material out as a file. Idempotent; used
    /// after load and after applying a remote snapshot.
    pub fn materialize_local_keys(&self) -> Result<(), StoreError> {
        for key in self.document.keys.iter().filter(|k| k.is_local()) {
            self.write_key_file(key)?;
        }
        Ok(())
    }

    fn write_key_file(&self, key: &Key) -> Result<(), StoreError> {
        let Some(material) = key.key_data.as_deref() else {
            return Ok(());
        };

        self.paths.ensure_keys_dir()?;
        let path = self.paths.keys_dir().join(key.file_name());

        // Private-key parsers are picky about trailing whitespace.
        let trimmed = material.trim_end();
        fs::write(&path, format!("{trimmed}\n"))?;
        restrict_permissions(&path)?;

        debug!("materialized key file {:?}", path);
        Ok(())
    }

    fn remove_key_file(&self, key: &Key) {
        let path = self.paths.keys_dir().join(key.file_name());
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("failed to remove stale key file {:?}: {}", path, e);
            }
        }
    }

    fn check_ref_resolves(&self, credential_ref: CredentialRef) -> Result<(), StoreError> {
        let resolves = match credential_ref {
            CredentialRef::Password(i) => i < self.document.passwords.len(),
            CredentialRef::Key(i) => i < self.document.keys.len(),
        };
        if resolves {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("{credential_ref:?}")))
        }
    }

    // ---- API token ----

    /// Loads and decrypts the API token, if one is configured.
    pub fn load_api_token(&self, cipher: &CipherEngine) -> Result<Option<String>, StoreError> {
        let path = self.paths.api_token();
        if !path.exists() {
            return Ok(None);
        }
        let blob = fs::read_to_string(&path)?;
        Ok(Some(cipher.decrypt(blob.trim())?))
    }

    /// Encrypts and persists the API token.
    pub fn save_api_token(&self, token: &str, cipher: &CipherEngine) -> Result<(), StoreError> {
        self.paths.ensure_root()?;
        let path = self.paths.api_token();
        fs::write(&path, cipher.encrypt(token)?)?;
        restrict_permissions(&path)?;
        Ok(())
    }
}

fn check_host(host: &Host) -> Result<(), StoreError> {
    if host.name.is_empty() {
        return Err(StoreError::Invalid("host name must not be empty".to_string()));
    }
    if host.address.is_empty() {
        return Err(StoreError::Invalid("host address must not be empty".to_string()));
    }
    Ok(())
}

/// Sets owner-only permissions on Unix; no-op elsewhere.
fn restrict_permissions(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(VaultPaths::with_root(dir.path()));
        (dir, store)
    }

    fn sample_password() -> Password {
        Password {
            description: "db".to_string(),
            password: "s3cret".to_string(),
        }
    }

    fn sample_local_key(description: &str) -> Key {
        Key {
            description: description.to_string(),
            path: String::new(),
            key_data: Some("-----BEGIN KEY-----\nabc\n-----END KEY-----\n\n".to_string()),
        }
    }

    #[test]
    fn test_load_missing_creates_empty_and_is_idempotent() {
        let (_dir, mut store) = test_store();
        assert!(!store.paths().document().exists());

        store.load().unwrap();
        assert!(store.paths().document().exists());
        assert!(store.document().hosts.is_empty());

        let first = fs::read_to_string(store.paths().document()).unwrap();
        store.load().unwrap();
        let second = fs::read_to_string(store.paths().document()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_malformed_is_parse_error() {
        let (_dir, mut store) = test_store();
        store.paths().ensure_root().unwrap();
        fs::write(store.paths().document(), "{not json").unwrap();

        assert!(matches!(store.load(), Err(StoreError::Parse(_))));
    }

    #[test]
    fn test_delete_referenced_password_rejected() {
        let (_dir, mut store) = test_store();
        store.load().unwrap();

        store.add_password(sample_password()).unwrap();
        store
            .add_host(Host::new(
                "prod-db".to_string(),
                "admin".to_string(),
                "10.0.0.5".to_string(),
                22,
                CredentialRef::Password(0),
            ))
            .unwrap();

        let err = store.delete_password(0).unwrap_err();
        assert!(matches!(err, StoreError::Integrity { ref host } if host == "prod-db"));

        // Dropping the host unblocks the delete.
        store.delete_host(0).unwrap();
        store.delete_password(0).unwrap();
        assert!(store.document().passwords.is_empty());
    }

    #[test]
    fn test_delete_referenced_key_rejected() {
        let (_dir, mut store) = test_store();
        store.load().unwrap();

        store.add_key(sample_local_key("prod")).unwrap();
        store
            .add_host(Host::new(
                "web".to_string(),
                "deploy".to_string(),
                "10.0.0.9".to_string(),
                22,
                CredentialRef::Key(0),
            ))
            .unwrap();

        assert!(matches!(
            store.delete_key(0),
            Err(StoreError::Integrity { .. })
        ));
    }

    #[test]
    fn test_delete_unreferenced_key_removes_file() {
        let (_dir, mut store) = test_store();
        store.load().unwrap();

        store.add_key(sample_local_key("stale")).unwrap();
        let key_file = store.paths().keys_dir().join("stale.key");
        assert!(key_file.exists());

        store.delete_key(0).unwrap();
        assert!(!key_file.exists());
    }

    #[test]
    fn test_key_material_trimmed_and_restricted() {
        let (_dir, mut store) = test_store();
        store.load().unwrap();
        store.add_key(sample_local_key("prod")).unwrap();

        let path = store.paths().keys_dir().join("prod.key");
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, "-----BEGIN KEY-----\nabc\n-----END KEY-----\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_update_key_locality_change_removes_stale_file() {
        let (_dir, mut store) = test_store();
        store.load().unwrap();
        store.add_key(sample_local_key("prod")).unwrap();
        let key_file = store.paths().keys_dir().join("prod.key");
        assert!(key_file.exists());

        store
            .update_key(
                0,
                Key {
                    description: "prod".to_string(),
                    path: "/home/user/.ssh/id_ed25519".to_string(),
                    key_data: None,
                },
            )
            .unwrap();

        assert!(!key_file.exists());
    }

    #[test]
    fn test_duplicate_key_description_rejected() {
        let (_dir, mut store) = test_store();
        store.load().unwrap();
        store.add_key(sample_local_key("prod")).unwrap();

        assert!(matches!(
            store.add_key(sample_local_key("prod")),
            Err(StoreError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_traversal_key_description_rejected() {
        let (dir, mut store) = test_store();
        store.load().unwrap();

        let err = store.add_key(sample_local_key("../../escaped")).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert!(store.document().keys.is_empty());
        assert!(!dir.path().join("../escaped.key").exists());

        // The same hole must not open through update.
        store.add_key(sample_local_key("prod")).unwrap();
        assert!(matches!(
            store.update_key(0, sample_local_key("..")),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn test_host_fields_must_not_be_empty() {
        let (_dir, mut store) = test_store();
        store.load().unwrap();
        store.add_password(sample_password()).unwrap();

        let mut host = Host::new(
            "prod-db".to_string(),
            "admin".to_string(),
            "10.0.0.5".to_string(),
            22,
            CredentialRef::Password(0),
        );
        host.name = String::new();
        assert!(matches!(
            store.add_host(host.clone()),
            Err(StoreError::Invalid(_))
        ));

        host.name = "prod-db".to_string();
        host.address = String::new();
        assert!(matches!(store.add_host(host), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn test_host_ref_must_resolve() {
        let (_dir, mut store) = test_store();
        store.load().unwrap();

        let host = Host::new(
            "orphan".to_string(),
            "root".to_string(),
            "10.0.0.1".to_string(),
            22,
            CredentialRef::Password(0),
        );
        assert!(matches!(store.add_host(host), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_api_token_roundtrip() {
        let (_dir, store) = test_store();
        let cipher = CipherEngine::derive("passphrase");

        assert!(store.load_api_token(&cipher).unwrap().is_none());

        store.save_api_token("tok-123", &cipher).unwrap();
        assert_eq!(
            store.load_api_token(&cipher).unwrap().as_deref(),
            Some("tok-123")
        );

        // Wrong passphrase cannot read the token.
        let other = CipherEngine::derive("other");
        assert!(store.load_api_token(&other).is_err());
    }

    #[test]
    fn test_password_delete_shifts_later_refs() {
        let (_dir, mut store) = test_store();
        store.load().unwrap();

        for i in 0..3 {
            store
                .add_password(Password {
                    description: format!("p{i}"),
                    password: format!("s{i}"),
                })
                .unwrap();
        }
        store
            .add_host(Host::new(
                "h".to_string(),
                "u".to_string(),
                "addr".to_string(),
                22,
                CredentialRef::Password(2),
            ))
            .unwrap();

        store.delete_password(0).unwrap();
        assert_eq!(
            store.document().hosts[0].credential_ref,
            CredentialRef::Password(1)
        );
        assert_eq!(store.document().passwords[1].description, "p2");
    }
}
