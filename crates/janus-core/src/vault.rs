//! AES-256-GCM encryption for state persisted at rest.
//!
//! The durable mode record and audit blobs carry the operating history of both
//! memory domains, so the reference sled store encrypts them before they touch
//! disk. Even if the sled files are stolen, the ciphertext is unreadable
//! without the 32-byte key.
//!
//! ## Wire Format
//!
//! Each encrypted blob is stored as: `[12-byte nonce][ciphertext+tag]`.
//! The nonce is randomly generated per write via `OsRng`.
//!
//! ## Key
//!
//! The master key is read from `JANUS_STATE_KEY` (64 hex chars = 32 bytes).
//! If the env var is absent or malformed, the vault is a pass-through: blobs
//! are stored in plaintext. State persistence must keep working on hosts
//! without a provisioned key, unlike a locked content vault.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};

/// AES-256-GCM nonce length (96 bits).
const NONCE_LEN: usize = 12;

/// Environment variable holding the 64-hex-char master key.
const ENV_STATE_KEY: &str = "JANUS_STATE_KEY";

/// Marker byte prepended to every stored blob: `E` for encrypted, `P` for plain.
/// Lets a store opened with a key read blobs written before one was provisioned.
const TAG_ENCRYPTED: u8 = b'E';
const TAG_PLAIN: u8 = b'P';

/// Errors specific to the state vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("state vault encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("state vault decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("state vault: corrupt blob (too short or unknown marker)")]
    CorruptBlob,
}

/// Encryption wrapper for persisted state. With no key it degrades to a
/// tagged pass-through rather than refusing writes.
#[derive(Clone)]
pub struct StateVault {
    cipher: Option<Aes256Gcm>,
}

impl StateVault {
    /// Creates a vault from a 32-byte key. Pass `None` for plaintext storage.
    pub fn new(master_key: Option<&[u8; 32]>) -> Self {
        let cipher = master_key.map(|k| Aes256Gcm::new_from_slice(k).expect("key length is 32"));
        Self { cipher }
    }

    /// Attempts to create a vault from the `JANUS_STATE_KEY` environment
    /// variable. Falls back to pass-through if the var is missing or malformed.
    pub fn from_env() -> Self {
        let key_bytes = std::env::var(ENV_STATE_KEY).ok().and_then(|hex| {
            let hex = hex.trim().replace([' ', '\n'], "");
            if hex.len() != 64 {
                tracing::warn!(
                    target: "janus::vault",
                    "JANUS_STATE_KEY must be 64 hex chars (32 bytes); persisting state in plaintext"
                );
                return None;
            }
            (0..32)
                .map(|i| u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok())
                .collect::<Option<Vec<u8>>>()
        });
        let cipher = key_bytes.and_then(|k| {
            let arr: [u8; 32] = k.try_into().ok()?;
            Some(Aes256Gcm::new_from_slice(&arr).expect("key length is 32"))
        });
        if cipher.is_some() {
            tracing::info!(target: "janus::vault", "🔐 state vault active; persisted state encrypted at rest");
        } else {
            tracing::info!(target: "janus::vault", "state vault inactive; persisted state stored in plaintext");
        }
        Self { cipher }
    }

    /// Returns `true` when blobs are encrypted before hitting disk.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.cipher.is_some()
    }

    /// Seals plaintext into `[marker][nonce || ciphertext]` (or a tagged
    /// plaintext blob when no key is provisioned).
    pub fn seal(&self, data: &[u8]) -> Result<Vec<u8>, VaultError> {
        match &self.cipher {
            Some(cipher) => {
                let nonce = Aes256Gcm::generate_nonce(OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, data)
                    .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;
                let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
                out.push(TAG_ENCRYPTED);
                out.extend_from_slice(nonce.as_slice());
                out.extend_from_slice(&ciphertext);
                Ok(out)
            }
            None => {
                let mut out = Vec::with_capacity(1 + data.len());
                out.push(TAG_PLAIN);
                out.extend_from_slice(data);
                Ok(out)
            }
        }
    }

    /// Opens a blob previously produced by `seal`.
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, VaultError> {
        let (marker, rest) = blob.split_first().ok_or(VaultError::CorruptBlob)?;
        match *marker {
            TAG_PLAIN => Ok(rest.to_vec()),
            TAG_ENCRYPTED => {
                let cipher = self.cipher.as_ref().ok_or_else(|| {
                    VaultError::DecryptionFailed("blob is encrypted but no key is set".to_string())
                })?;
                if rest.len() < NONCE_LEN {
                    return Err(VaultError::CorruptBlob);
                }
                let (nonce_bytes, ct) = rest.split_at(NONCE_LEN);
                let nonce = Nonce::from_slice(nonce_bytes);
                cipher
                    .decrypt(nonce, ct)
                    .map_err(|e| VaultError::DecryptionFailed(e.to_string()))
            }
            _ => Err(VaultError::CorruptBlob),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        // Deterministic test key (NOT for production)
        let mut key = [0u8; 32];
        for (i, b) in key.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(13).wrapping_add(7);
        }
        key
    }

    #[test]
    fn seal_open_roundtrip_encrypted() {
        let key = test_key();
        let vault = StateVault::new(Some(&key));
        assert!(vault.is_active());

        let plaintext = br#"{"current_mode":"personal"}"#;
        let sealed = vault.seal(plaintext).unwrap();
        assert_ne!(&sealed[1..], plaintext.as_slice());
        assert_eq!(vault.open(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn passthrough_without_key() {
        let vault = StateVault::new(None);
        assert!(!vault.is_active());
        let sealed = vault.seal(b"mode state").unwrap();
        assert_eq!(vault.open(&sealed).unwrap(), b"mode state");
    }

    #[test]
    fn keyed_vault_reads_plain_blobs() {
        let plain = StateVault::new(None).seal(b"pre-key record").unwrap();
        let key = test_key();
        let vault = StateVault::new(Some(&key));
        assert_eq!(vault.open(&plain).unwrap(), b"pre-key record");
    }

    #[test]
    fn wrong_key_fails_open() {
        let key1 = test_key();
        let mut key2 = test_key();
        key2[0] ^= 0xFF;

        let sealed = StateVault::new(Some(&key1)).seal(b"secret").unwrap();
        assert!(matches!(
            StateVault::new(Some(&key2)).open(&sealed),
            Err(VaultError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn corrupt_blob_detected() {
        let key = test_key();
        let vault = StateVault::new(Some(&key));
        assert!(matches!(vault.open(&[]), Err(VaultError::CorruptBlob)));
        assert!(matches!(vault.open(&[b'E', 1, 2]), Err(VaultError::CorruptBlob)));
        assert!(matches!(vault.open(&[b'X', 1, 2]), Err(VaultError::CorruptBlob)));
    }
}
