//! Error types for the tessera-crypto crate (§7).

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
///
/// `SessionNotFound` and `DecryptionFailed` are this crate's names for the
/// spec's `NoSessionError` and `DecryptError` (§7) — C7 matches on them to
/// decide whether an inbound failure should trigger a session reset.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provided key material is invalid (wrong length, malformed, etc.).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Decryption failed (wrong key, tampered ciphertext, MAC/tag failure). Spec: `DecryptError`.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// No session exists for the given address. Spec: `NoSessionError`.
    #[error("session not found for address: {address}")]
    SessionNotFound { address: String },

    /// Session state is corrupted and needs recovery.
    #[error("session corrupted for address {address}: {detail}")]
    SessionCorrupted { address: String, detail: String },

    /// A previously-trusted identity key for this address has changed. Spec: `IdentityChangedError`.
    #[error("identity changed for address {address}")]
    IdentityChanged { address: String },

    /// No identity keypair has been generated yet.
    #[error("identity not initialized")]
    IdentityNotInitialized,

    /// An identity row exists but no passphrase has been cached this process
    /// to decrypt it. Callers must go through `identity::get_identity` with
    /// the password at least once before cache-only accessors will work.
    #[error("identity locked: no cached passphrase for this identity")]
    IdentityLocked,

    /// All one-time pre-keys have been consumed. Spec: `PrekeyExhaustedError`.
    #[error("pre-keys exhausted")]
    PreKeyExhausted,

    /// Database storage error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Error from the Signal protocol layer.
    #[error("signal protocol error: {0}")]
    SignalProtocolError(String),

    /// File/attachment encryption or decryption error.
    #[error("file encryption error: {0}")]
    FileEncryptionError(String),

    /// Safety-number fingerprint generation/comparison error.
    #[error("fingerprint error: {0}")]
    FingerprintError(String),
}

impl From<rusqlite::Error> for CryptoError {
    fn from(err: rusqlite::Error) -> Self {
        CryptoError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::SerializationError(err.to_string())
    }
}

impl From<libsignal_protocol::SignalProtocolError> for CryptoError {
    fn from(err: libsignal_protocol::SignalProtocolError) -> Self {
        CryptoError::SignalProtocolError(err.to_string())
    }
}
