//! Password-derived encryption for the identity/prekey blob (§3, §6).
//!
//! The identity keypair and prekey material are persisted as one ciphertext
//! blob sealed with a key derived from the user's password via
//! PBKDF2-HMAC-SHA256 (100,000 iterations, 128-bit salt), then encrypted with
//! AES-256-GCM under a random 96-bit nonce. Unlike the OS-keychain-backed
//! whole-database key this crate's teacher derives, nothing here touches the
//! database file itself — `tessera-client` decides separately how to store
//! session records and other local state.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// A 32-byte key derived from the user's password, securely wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey").field("key", &"[REDACTED]").finish()
    }
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

/// The identity/prekey blob as persisted at rest: `{salt, nonce, ciphertext}` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedIdentityBlob {
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Derive a 256-bit key from a password and salt via PBKDF2-HMAC-SHA256.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<DerivedKey, CryptoError> {
    if salt.len() != SALT_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "salt must be {SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }

    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    Ok(DerivedKey { key })
}

/// Generate a fresh random 128-bit salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Encrypt `plaintext` (the serialized identity+prekey material) under a
/// freshly-derived password key, producing a self-contained sealed blob.
pub fn seal_identity_blob(plaintext: &[u8], password: &str) -> Result<SealedIdentityBlob, CryptoError> {
    let salt = generate_salt();
    let key = derive_key(password, &salt)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::DecryptionFailed(format!("seal failed: {e}")))?;

    Ok(SealedIdentityBlob {
        salt: salt.to_vec(),
        nonce: nonce_bytes.to_vec(),
        ciphertext,
    })
}

/// Decrypt a sealed identity blob given the user's password.
pub fn open_identity_blob(blob: &SealedIdentityBlob, password: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let key = derive_key(password, &blob.salt)?;

    if blob.nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            blob.nonce.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let nonce = Nonce::from_slice(&blob.nonce);

    let plaintext = cipher
        .decrypt(nonce, blob.ciphertext.as_ref())
        .map_err(|_| CryptoError::DecryptionFailed("wrong password or corrupted blob".into()))?;

    Ok(Zeroizing::new(plaintext))
}

/// Process-lifetime cache of unlocked passphrases, keyed by the identity's
/// public key bytes (not a single global slot): `libsignal`'s
/// `IdentityKeyStore::get_identity_key_pair` has a fixed, password-less async
/// signature and is called internally during X3DH session establishment, well
/// after the user actually typed their password in. Keying by public key
/// rather than a single slot also keeps distinct identities that coexist in
/// one process (as in this crate's own test fixtures) from clobbering each
/// other's cached password.
fn passphrase_cache() -> &'static Mutex<HashMap<Vec<u8>, Zeroizing<String>>> {
    static CACHE: OnceLock<Mutex<HashMap<Vec<u8>, Zeroizing<String>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Cache `password` for `public_key` for the remaining lifetime of the
/// process, or until explicitly cleared.
pub fn cache_passphrase(public_key: &[u8], password: &str) {
    passphrase_cache()
        .lock()
        .expect("passphrase cache poisoned")
        .insert(public_key.to_vec(), Zeroizing::new(password.to_string()));
}

/// Look up the cached passphrase for `public_key`, if one has been cached.
pub fn cached_passphrase(public_key: &[u8]) -> Option<Zeroizing<String>> {
    passphrase_cache()
        .lock()
        .expect("passphrase cache poisoned")
        .get(public_key)
        .cloned()
}

/// Forget the cached passphrase for `public_key`, e.g. on logout.
pub fn clear_cached_passphrase(public_key: &[u8]) {
    passphrase_cache()
        .lock()
        .expect("passphrase cache poisoned")
        .remove(public_key);
}
