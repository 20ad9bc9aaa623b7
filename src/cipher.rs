//! Authenticated encryption for secrets at rest.
//!
//! A [`CipherEngine`] is derived once per unlock from the user's passphrase
//! and shared read-only by everything that seals or opens secrets: the
//! credential document fields pushed to the remote, and the API-token file.
//!
//! Sealed blobs are text: `v1:<base64(nonce || ciphertext)>`. The version
//! prefix is part of the format; decrypt rejects anything else up front.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// PBKDF2 iteration count for key derivation.
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Fixed application salt for key derivation.
///
/// Derivation must be deterministic from the passphrase alone so that two
/// devices sharing a passphrase can open each other's remote snapshots.
const KDF_SALT: &[u8] = b"davit.credential-vault.kdf.v1";

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Sealed blob format version prefix.
const BLOB_PREFIX: &str = "v1:";

/// Errors from sealing or opening a secret.
#[derive(Debug, Error)]
pub enum CipherError {
    /// Encryption failed (should not happen with a valid key).
    #[error("encryption failed")]
    Encryption,

    /// Authentication failed: wrong passphrase or tampered data.
    #[error("authentication failed: wrong passphrase or corrupted data")]
    Authentication,

    /// The blob is not in the expected sealed format.
    #[error("invalid sealed blob: {0}")]
    Format(String),
}

/// Symmetric AEAD engine keyed from the user passphrase.
///
/// The key lives for the process lifetime and is zeroed on drop. It is never
/// persisted and never logged.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CipherEngine {
    key: [u8; 32],
}

impl CipherEngine {
    /// Derives an engine from a passphrase.
    ///
    /// PBKDF2-HMAC-SHA256 with a fixed application salt, so arbitrary-length
    /// passphrases always produce a full-strength 256-bit key.
    #[must_use]
    pub fn derive(passphrase: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), KDF_SALT, PBKDF2_ITERATIONS, &mut key);
        Self { key }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }

    /// Seals a plaintext secret into a textual blob.
    ///
    /// A fresh random nonce is generated per call and prepended to the
    /// ciphertext before encoding.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", BLOB_PREFIX, BASE64.encode(sealed)))
    }

    /// Opens a sealed blob back into the plaintext secret.
    ///
    /// Rejects unknown versions and malformed encodings with
    /// [`CipherError::Format`], and tag mismatches (wrong passphrase,
    /// truncation, tampering) with [`CipherError::Authentication`].
    pub fn decrypt(&self, blob: &str) -> Result<String, CipherError> {
        let encoded = blob
            .strip_prefix(BLOB_PREFIX)
            .ok_or_else(|| CipherError::Format("missing version prefix".to_string()))?;

        let sealed = BASE64
            .decode(encoded.trim())
            .map_err(|e| CipherError::Format(format!("bad base64: {e}")))?;

        if sealed.len() < NONCE_LEN {
            return Err(CipherError::Authentication);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Authentication)
    }
}

impl std::fmt::Debug for CipherEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must never leak through Debug output.
        f.debug_struct("CipherEngine").finish_non_exhaustive()
    }
}
