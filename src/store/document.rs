//! Credential document data model.
//!
//! The on-disk document is a single JSON object `{hosts, passwords, keys}`.
//! Hosts reference their credential through the `password_id` field: values
//! `>= 0` index into the password list, values `< 0` encode a key index as
//! `-(index + 1)`. That signed encoding is fixed by the file and sync wire
//! format; in memory it is converted at the serde boundary into the typed
//! [`CredentialRef`] so no sign arithmetic leaks into the rest of the crate.

use serde::{Deserialize, Serialize};

/// A typed reference from a host to its credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRef {
    /// Index into the password list.
    Password(usize),
    /// Index into the key list.
    Key(usize),
}

impl CredentialRef {
    /// Encodes the reference into the on-disk signed form.
    #[must_use]
    pub fn encode(self) -> i64 {
        match self {
            Self::Password(idx) => idx as i64,
            Self::Key(idx) => -((idx as i64) + 1),
        }
    }

    /// Decodes the on-disk signed form.
    #[must_use]
    pub fn decode(raw: i64) -> Self {
        if raw >= 0 {
            Self::Password(raw as usize)
        } else {
            Self::Key((-(raw + 1)) as usize)
        }
    }
}

mod credential_ref_encoding {
    use super::CredentialRef;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(r: &CredentialRef, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_i64(r.encode())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<CredentialRef, D::Error> {
        let raw = i64::deserialize(de)?;
        Ok(CredentialRef::decode(raw))
    }
}

/// A saved SSH host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Unique display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Login user name.
    pub login: String,
    /// Hostname or IP address.
    #[serde(rename = "ip")]
    pub address: String,
    /// SSH port.
    pub port: u16,
    /// Credential reference (`password_id` on disk).
    #[serde(rename = "password_id", with = "credential_ref_encoding")]
    pub credential_ref: CredentialRef,
    /// Last successful connection timestamp (unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<i64>,
    /// Number of successful connections.
    #[serde(default)]
    pub connection_count: u32,
}

impl Host {
    /// Creates a new host. Field validation happens on insertion into the
    /// store, not here.
    #[must_use]
    pub fn new(name: String, login: String, address: String, port: u16, credential_ref: CredentialRef) -> Self {
        Self {
            name,
            description: String::new(),
            login,
            address,
            port,
            credential_ref,
            last_connected: None,
            connection_count: 0,
        }
    }

    /// Records a successful connection.
    pub fn mark_connected(&mut self) {
        self.last_connected = Some(chrono::Utc::now().timestamp());
        self.connection_count = self.connection_count.saturating_add(1);
    }
}

/// A stored password credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Password {
    /// Free-form description.
    pub description: String,
    /// The secret value (plaintext in memory; encrypted before upload).
    pub password: String,
}

/// A stored private-key credential.
///
/// Either `path` points at an external key file, or `key_data` holds inline
/// material that the store materializes as `<description>.key` in the keys
/// directory. The description doubles as the file name, so it must be unique
/// among keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Description, unique among keys.
    pub description: String,
    /// Path to an external private-key file.
    #[serde(default)]
    pub path: String,
    /// Inline private-key material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_data: Option<String>,
}

impl Key {
    /// Returns true if the key material is stored locally by the vault.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.key_data.is_some()
    }

    /// Returns the file name used for locally stored material.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.key", self.description)
    }

    /// Checks that the description is usable as a file name.
    ///
    /// The description is joined into the keys directory when material is
    /// materialized, so it must be non-empty and free of path separators and
    /// parent components. Descriptions also arrive in remote snapshots, in
    /// plaintext, which makes this the boundary keeping a tampered snapshot
    /// from directing a key write outside the vault.
    pub fn check_description(&self) -> Result<(), String> {
        if self.description.is_empty() {
            return Err("key description must not be empty".to_string());
        }
        if self.description.contains(['/', '\\']) || self.description.contains("..") {
            return Err(format!(
                "key description '{}' must not contain path separators",
                self.description
            ));
        }
        Ok(())
    }
}

/// The aggregate credential document. One instance per process, owned by the
/// credential store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDocument {
    /// Saved hosts.
    #[serde(default)]
    pub hosts: Vec<Host>,
    /// Saved passwords.
    #[serde(default)]
    pub passwords: Vec<Password>,
    /// Saved keys.
    #[serde(default)]
    pub keys: Vec<Key>,
}

impl CredentialDocument {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds a host by its display name.
    #[must_use]
    pub fn find_host_by_name(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Returns the name of a host referencing the password at `index`, if any.
    #[must_use]
    pub fn password_referenced_by(&self, index: usize) -> Option<&str> {
        self.hosts
            .iter()
            .find(|h| h.credential_ref == CredentialRef::Password(index))
            .map(|h| h.name.as_str())
    }

    /// Returns the name of a host referencing the key at `index`, if any.
    #[must_use]
    pub fn key_referenced_by(&self, index: usize) -> Option<&str> {
        self.hosts
            .iter()
            .find(|h| h.credential_ref == CredentialRef::Key(index))
            .map(|h| h.name.as_str())
    }

    /// Shifts password references after a password was removed at `index`.
    ///
    /// Removing an element from the list moves every later element down one
    /// slot; references must follow or they silently point at the wrong
    /// credential.
    pub fn shift_password_refs_after_removal(&mut self, index: usize) {
        for host in &mut self.hosts {
            if let CredentialRef::Password(i) = host.credential_ref {
                if i > index {
                    host.credential_ref = CredentialRef::Password(i - 1);
                }
            }
        }
    }

    /// Shifts key references after a key was removed at `index`.
    pub fn shift_key_refs_after_removal(&mut self, index: usize) {
        for host in &mut self.hosts {
            if let CredentialRef::Key(i) = host.credential_ref {
                if i > index {
                    host.credential_ref = CredentialRef::Key(i - 1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_credential_ref_encoding() {
        assert_eq!(CredentialRef::Password(0).encode(), 0);
        assert_eq!(CredentialRef::Password(3).encode(), 3);
        assert_eq!(CredentialRef::Key(0).encode(), -1);
        assert_eq!(CredentialRef::Key(4).encode(), -5);
    }

    #[test]
    fn test_credential_ref_decoding() {
        assert_eq!(CredentialRef::decode(0), CredentialRef::Password(0));
        assert_eq!(CredentialRef::decode(7), CredentialRef::Password(7));
        assert_eq!(CredentialRef::decode(-1), CredentialRef::Key(0));
        assert_eq!(CredentialRef::decode(-5), CredentialRef::Key(4));
    }

    #[test]
    fn test_host_serialization_uses_wire_names() {
        let host = Host::new(
            "prod-db".to_string(),
            "admin".to_string(),
            "10.0.0.5".to_string(),
            22,
            CredentialRef::Key(1),
        );

        let json = serde_json::to_value(&host).unwrap();
        assert_eq!(json["ip"], "10.0.0.5");
        assert_eq!(json["password_id"], -2);
    }

    #[test]
    fn test_document_roundtrip() {
        let mut doc = CredentialDocument::new();
        doc.passwords.push(Password {
            description: "db".to_string(),
            password: "s3cret".to_string(),
        });
        doc.hosts.push(Host::new(
            "prod-db".to_string(),
            "admin".to_string(),
            "10.0.0.5".to_string(),
            2222,
            CredentialRef::Password(0),
        ));

        let json = serde_json::to_string(&doc).unwrap();
        let restored: CredentialDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn test_reference_shift_after_removal() {
        let mut doc = CredentialDocument::new();
        for i in 0..3 {
            doc.passwords.push(Password {
                description: format!("p{i}"),
                password: format!("s{i}"),
            });
        }
        doc.hosts.push(Host::new(
            "h".to_string(),
            "u".to_string(),
            "host".to_string(),
            22,
            CredentialRef::Password(2),
        ));

        doc.passwords.remove(1);
        doc.shift_password_refs_after_removal(1);

        assert_eq!(doc.hosts[0].credential_ref, CredentialRef::Password(1));
    }

    #[test]
    fn test_key_file_name() {
        let key = Key {
            description: "staging".to_string(),
            path: String::new(),
            key_data: Some("material".to_string()),
        };
        assert!(key.is_local());
        assert_eq!(key.file_name(), "staging.key");
    }

    #[test]
    fn test_key_description_must_be_a_plain_file_name() {
        let key = |description: &str| Key {
            description: description.to_string(),
            path: String::new(),
            key_data: None,
        };

        assert!(key("prod deploy").check_description().is_ok());
        assert!(key("").check_description().is_err());
        assert!(key("../../escaped").check_description().is_err());
        assert!(key("a/b").check_description().is_err());
        assert!(key("a\\b").check_description().is_err());
        assert!(key("up..down").check_description().is_err());
    }
}
