//! tessera-crypto -- Signal protocol implementation for the Tessera client core.
//!
//! Provides identity keypair generation (Curve25519), X3DH key agreement,
//! Double Ratchet message encryption, AES-256-GCM file encryption, and
//! a SQLite-backed libsignal store implementation. The identity/prekey
//! material itself is sealed at the value level with a password-derived key
//! (see [`master_key`]); the database file is otherwise unencrypted.
//!
//! ## Architecture
//!
//! - **Sync public API**: All public functions are synchronous. Callers in async
//!   contexts should use `spawn_blocking`.
//! - **Caller-provided connection**: Functions accept `&rusqlite::Connection`.
//!   The client crate manages the connection lifecycle and passes it in.
//! - **libsignal internally**: Uses the reference Signal protocol implementation
//!   for X3DH and Double Ratchet. Async trait implementations bridge to sync
//!   SQLite via `futures::executor::block_on`.
//!
//! ## Modules
//!
//! - [`error`] -- `CryptoError` enum
//! - [`master_key`] -- password-derived identity/prekey blob sealing
//! - [`storage`] -- SQLite storage layer and libsignal store trait implementations
//! - [`identity`] -- Identity keypair generation and management
//! - [`prekeys`] -- Pre-key bundle and one-time pre-key management
//! - [`session`] -- Signal session creation and recovery
//! - [`message`] -- Message encryption and decryption
//! - [`file_encryption`] -- AES-256-GCM symmetric file encryption
//! - [`fingerprint`] -- Safety number generation and verification

pub mod error;
pub mod master_key;
pub mod storage;
pub mod identity;
pub mod prekeys;
pub mod session;
pub mod message;
pub mod file_encryption;
pub mod fingerprint;

#[cfg(test)]
mod tests {
    #[test]
    fn all_public_modules_accessible() {
        use crate::error::CryptoError;
        use crate::master_key::{DerivedKey, SealedIdentityBlob};
        use crate::identity;
        use crate::prekeys;
        use crate::session;
        use crate::message::EncryptedMessage;
        use crate::file_encryption::{FileKey, EncryptedBlob};
        use crate::fingerprint::Fingerprint;

        // Verify types are accessible via size_of (compile-time check)
        let _ = (
            std::mem::size_of::<CryptoError>(),
            std::mem::size_of::<DerivedKey>(),
            std::mem::size_of::<SealedIdentityBlob>(),
        );
        let _ = identity::generate_identity as fn(&_) -> _;
        let _ = std::mem::size_of::<EncryptedMessage>();
        let _ = std::mem::size_of::<FileKey>();
        let _ = std::mem::size_of::<EncryptedBlob>();
        let _ = std::mem::size_of::<Fingerprint>();

        // Verify CryptoStore is accessible
        let _ = std::mem::size_of::<crate::storage::CryptoStore>();
    }
}
