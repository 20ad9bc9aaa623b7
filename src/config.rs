//! Configuration paths and startup options.
//!
//! All state lives under a single config directory (`~/.davit` by default):
//! the credential document, the keys directory, the encrypted API token, and
//! the log directory. Tests point everything at a temp directory instead.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Document file name inside the config directory.
const DOCUMENT_FILE: &str = "credentials.json";

/// Encrypted API-token file name.
const TOKEN_FILE: &str = "api_token";

/// Keys subdirectory name.
const KEYS_DIR: &str = "keys";

/// Which view the interface starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Connect list (default).
    #[default]
    Connect,
    /// Host/credential editing.
    Edit,
    /// File transfer.
    Transfer,
}

impl StartMode {
    /// Parses a mode from a CLI flag, returning `None` for unknown flags.
    #[must_use]
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "--edit" | "-e" => Some(Self::Edit),
            "--transfer" | "-t" => Some(Self::Transfer),
            _ => None,
        }
    }
}

/// Filesystem layout of the vault.
#[derive(Debug, Clone)]
pub struct VaultPaths {
    root: PathBuf,
}

impl VaultPaths {
    /// Creates the default layout under `~/.davit`.
    #[must_use]
    pub fn new() -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".davit");
        Self { root }
    }

    /// Creates a layout rooted at a custom directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the config root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the credential document path.
    #[must_use]
    pub fn document(&self) -> PathBuf {
        self.root.join(DOCUMENT_FILE)
    }

    /// Returns the encrypted API-token path.
    #[must_use]
    pub fn api_token(&self) -> PathBuf {
        self.root.join(TOKEN_FILE)
    }

    /// Returns the keys directory path.
    #[must_use]
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join(KEYS_DIR)
    }

    /// Returns the log directory path.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Creates the root directory if missing. Idempotent.
    pub fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Creates the keys directory if missing. Idempotent.
    pub fn ensure_keys_dir(&self) -> io::Result<()> {
        fs::create_dir_all(self.keys_dir())
    }
}

impl Default for VaultPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let paths = VaultPaths::new();
        assert!(paths.root().to_string_lossy().contains(".davit"));
        assert!(paths.document().ends_with("credentials.json"));
        assert!(paths.keys_dir().ends_with("keys"));
    }

    #[test]
    fn test_custom_root() {
        let dir = tempfile::tempdir().unwrap();
        let paths = VaultPaths::with_root(dir.path());

        paths.ensure_keys_dir().unwrap();
        assert!(paths.keys_dir().is_dir());

        // Second call is a no-op.
        paths.ensure_keys_dir().unwrap();
    }

    #[test]
    fn test_start_mode_flags() {
        assert_eq!(StartMode::from_flag("--edit"), Some(StartMode::Edit));
        assert_eq!(StartMode::from_flag("-t"), Some(StartMode::Transfer));
        assert_eq!(StartMode::from_flag("--bogus"), None);
    }
}
