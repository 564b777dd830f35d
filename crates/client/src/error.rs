//! Client-level error taxonomy.
//!
//! Wraps `tessera-crypto`'s `CryptoError` plus the network/storage/serde
//! errors the client layer introduces, and names the handful of error
//! kinds that callers (UI, sync loop) need to match on directly rather
//! than match against wrapped crypto variants.

use tessera_shared::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("crypto error: {0}")]
    Crypto(#[from] tessera_crypto::error::CryptoError),

    #[error("no session established with {address}")]
    NoSession { address: String },

    #[error("failed to decrypt message from {address}: {detail}")]
    Decrypt { address: String, detail: String },

    #[error("identity changed for {address}; verification required")]
    IdentityChanged { address: String },

    #[error("attachment {attachment_id} failed integrity verification")]
    Integrity { attachment_id: String },

    #[error("pre-key bundle for {address} exhausted")]
    PrekeyExhausted { address: String },

    #[error("link challenge is invalid, expired, or already consumed")]
    LinkChallengeInvalid,

    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("gateway connection error: {0}")]
    Gateway(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("local storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("server returned {status}: {body}")]
    ServerError { status: u16, body: String },
}

impl From<CoreError> for ClientError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::UnknownModel(name) => ClientError::UnknownModel(name),
            other => ClientError::Config(other.to_string()),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
