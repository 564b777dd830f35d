//! Symmetric file encryption using AES-256-GCM.
//!
//! Provides `encrypt_file` and `decrypt_file` for standalone file encryption
//! with a random per-file key. Independent of the Signal protocol — the caller
//! distributes `FileKey` to recipients via their Signal sessions.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

const NONCE_SIZE: usize = 12; // 96-bit nonce for AES-256-GCM
const KEY_SIZE: usize = 32; // 256-bit key

/// A 32-byte AES-256 key that is securely zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct FileKey {
    pub(crate) key: [u8; 32],
}

impl FileKey {
    /// Reconstruct a `FileKey` from raw bytes carried in an attachment
    /// envelope (the caller distributes these bytes over a Signal session).
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Export the raw key bytes for embedding in an attachment envelope.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.key
    }
}

/// Container for encrypted output: `nonce (12 bytes) || ciphertext || auth tag (16 bytes)`.
pub struct EncryptedBlob {
    pub data: Vec<u8>,
}

/// Encrypt file bytes with a random AES-256-GCM key.
///
/// Returns the encrypted blob and the key. The caller is responsible for
/// distributing the key to recipients (e.g., via `encrypt_message`).
///
/// If `aad` is provided, it is used as additional authenticated data to
/// bind the ciphertext to contextual data and prevent blob substitution.
pub fn encrypt_file(
    file_bytes: &[u8],
    aad: Option<&[u8]>,
) -> Result<(EncryptedBlob, FileKey), CryptoError> {
    let mut key_bytes = Zeroizing::new([0u8; KEY_SIZE]);
    rand::rng().fill_bytes(key_bytes.as_mut());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key_bytes.as_ref())
        .map_err(|e| CryptoError::FileEncryptionError(format!("encryption failed: {e}")))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = match aad {
        Some(aad_bytes) => cipher.encrypt(
            nonce,
            Payload {
                msg: file_bytes,
                aad: aad_bytes,
            },
        ),
        None => cipher.encrypt(
            nonce,
            Payload {
                msg: file_bytes,
                aad: &[],
            },
        ),
    }
    .map_err(|e| CryptoError::FileEncryptionError(format!("encryption failed: {e}")))?;

    let mut data = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    data.extend_from_slice(&nonce_bytes);
    data.extend_from_slice(&ciphertext);

    Ok((EncryptedBlob { data }, FileKey { key: *key_bytes }))
}

/// Decrypt an encrypted blob using the provided file key.
///
/// The `aad` must match what was provided during encryption. If the
/// original encryption used AAD, the same AAD must be supplied here.
pub fn decrypt_file(
    key: &FileKey,
    blob: &EncryptedBlob,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, CryptoError> {
    if blob.data.len() < NONCE_SIZE {
        return Err(CryptoError::FileEncryptionError(
            "blob too short to contain nonce".into(),
        ));
    }

    let (nonce_bytes, ciphertext_with_tag) = blob.data.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(&key.key)
        .map_err(|e| CryptoError::FileEncryptionError(format!("decryption failed: {e}")))?;

    let plaintext = match aad {
        Some(aad_bytes) => cipher.decrypt(
            nonce,
            Payload {
                msg: ciphertext_with_tag,
                aad: aad_bytes,
            },
        ),
        None => cipher.decrypt(
            nonce,
            Payload {
                msg: ciphertext_with_tag,
                aad: &[],
            },
        ),
    }
    .map_err(|e| CryptoError::FileEncryptionError(format!("decryption failed: {e}")))?;

    Ok(plaintext)
}
