//! Pre-key management for the Signal protocol.
//!
//! Generates signed pre-key bundles and one-time pre-keys for X3DH
//! asynchronous key exchange. Handles upload tracking, replenishment
//! thresholds, and signed pre-key rotation.

use libsignal_protocol::{
    kem, GenericSignedPreKey, KeyPair, KyberPreKeyId, KyberPreKeyRecord, KyberPreKeyStore,
    PreKeyId, PreKeyRecord, PreKeyStore, SignedPreKeyId, SignedPreKeyRecord, SignedPreKeyStore,
    Timestamp,
};
use rusqlite::Connection;

use crate::error::CryptoError;
use crate::identity::get_identity_cached;
use crate::storage::CryptoStore;

/// A serialized pre-key bundle containing the identity key, signed pre-key, and
/// last-resort Kyber pre-key, ready for upload to the server. Recipients use
/// this to establish X3DH/PQXDH sessions.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SerializedPreKeyBundle {
    /// The server-assigned user ID this bundle belongs to.
    pub user_id: String,
    /// The local identity public key (Curve25519), serialized via libsignal
    pub identity_key: Vec<u8>,
    /// The ID of the signed pre-key
    pub signed_pre_key_id: u32,
    /// The signed pre-key public key bytes, serialized via libsignal
    pub signed_pre_key: Vec<u8>,
    /// Signature over the signed pre-key, created with the identity private key
    pub signed_pre_key_signature: Vec<u8>,
    /// The local registration ID (14-bit range: 1..=16380)
    pub registration_id: u32,
    /// The ID of the last-resort Kyber pre-key
    pub kyber_pre_key_id: u32,
    /// The Kyber pre-key public key bytes, serialized via libsignal
    pub kyber_pre_key: Vec<u8>,
    /// Signature over the Kyber pre-key, created with the identity private key
    pub kyber_pre_key_signature: Vec<u8>,
}

/// A serialized one-time pre-key for upload to the server.
/// Each key is used at most once during session establishment.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SerializedPreKey {
    /// Unique ID for this pre-key
    pub key_id: u32,
    /// The pre-key public key bytes, serialized via libsignal
    pub public_key: Vec<u8>,
}

/// Generate a pre-key bundle containing the identity key, a new signed
/// pre-key, and a last-resort Kyber pre-key.
///
/// The returned bundle should be uploaded to the server so that other clients
/// can establish X3DH/PQXDH sessions with this device. `user_id` is the
/// server-assigned ID this bundle will be published under.
pub fn generate_pre_key_bundle(
    conn: &Connection,
    user_id: &str,
) -> Result<SerializedPreKeyBundle, CryptoError> {
    let identity = get_identity_cached(conn)?;

    let mut store = CryptoStore::new(conn);
    let reg_bytes = store
        .get_config("registration_id")?
        .ok_or_else(|| CryptoError::IdentityNotInitialized)?;
    let arr: [u8; 4] = reg_bytes
        .try_into()
        .map_err(|_| CryptoError::StorageError("invalid registration_id length".into()))?;
    let registration_id = u32::from_be_bytes(arr);

    // Determine next signed pre-key ID
    let next_spk_id: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(key_id), 0) + 1 FROM crypto_signed_pre_keys",
            [],
            |row| row.get(0),
        )?;

    // Generate signed pre-key
    let spk_pair = KeyPair::generate(&mut rand::rng());
    let signature = identity
        .private_key()
        .calculate_signature(&spk_pair.public_key.serialize(), &mut rand::rng())
        .map_err(|e| CryptoError::SignalProtocolError(e.to_string()))?;
    let timestamp = Timestamp::from_epoch_millis(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as u64,
    );
    let spk_record = SignedPreKeyRecord::new(
        SignedPreKeyId::from(next_spk_id),
        timestamp,
        &spk_pair,
        &signature,
    );

    // Store signed pre-key
    futures::executor::block_on(
        store.save_signed_pre_key(SignedPreKeyId::from(next_spk_id), &spk_record),
    )
    .map_err(|e| CryptoError::SignalProtocolError(e.to_string()))?;

    // Determine next Kyber pre-key ID
    let next_kpk_id: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(key_id), 0) + 1 FROM crypto_kyber_pre_keys",
            [],
            |row| row.get(0),
        )?;

    let kpk_record = KyberPreKeyRecord::generate(
        kem::KeyType::Kyber1024,
        KyberPreKeyId::from(next_kpk_id),
        identity.private_key(),
    )
    .map_err(|e| CryptoError::SignalProtocolError(e.to_string()))?;

    futures::executor::block_on(
        store.save_kyber_pre_key(KyberPreKeyId::from(next_kpk_id), &kpk_record),
    )
    .map_err(|e| CryptoError::SignalProtocolError(e.to_string()))?;

    Ok(SerializedPreKeyBundle {
        user_id: user_id.to_string(),
        identity_key: identity.public_key().serialize().to_vec(),
        signed_pre_key_id: next_spk_id,
        signed_pre_key: spk_pair.public_key.serialize().to_vec(),
        signed_pre_key_signature: Vec::from(signature.as_ref()),
        registration_id,
        kyber_pre_key_id: next_kpk_id,
        kyber_pre_key: kpk_record
            .public_key()
            .map_err(|e| CryptoError::SignalProtocolError(e.to_string()))?
            .serialize()
            .to_vec(),
        kyber_pre_key_signature: kpk_record
            .signature()
            .map_err(|e| CryptoError::SignalProtocolError(e.to_string()))?
            .to_vec(),
    })
}

/// Generate a batch of one-time pre-keys for upload to the server.
///
/// Each pre-key is stored in the database with `uploaded = 0`. After uploading
/// to the server, call `mark_pre_keys_uploaded` with the key IDs.
pub fn generate_one_time_pre_keys(
    conn: &Connection,
    count: u32,
) -> Result<Vec<SerializedPreKey>, CryptoError> {
    let tx = conn.unchecked_transaction()?;

    let start_id: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(key_id), 0) + 1 FROM crypto_pre_keys",
            [],
            |row| row.get(0),
        )?;

    let mut keys = Vec::with_capacity(count as usize);
    let mut store = CryptoStore::new(conn);

    for i in 0..count {
        let key_id = start_id + i;
        let pair = KeyPair::generate(&mut rand::rng());
        let record = PreKeyRecord::new(PreKeyId::from(key_id), &pair);

        futures::executor::block_on(store.save_pre_key(PreKeyId::from(key_id), &record))
            .map_err(|e| CryptoError::SignalProtocolError(e.to_string()))?;

        keys.push(SerializedPreKey {
            key_id,
            public_key: pair.public_key.serialize().to_vec(),
        });
    }

    tx.commit()?;
    Ok(keys)
}

/// Mark one-time pre-keys as uploaded to the server.
///
/// Sets the `uploaded` flag to 1 for each key ID in the provided slice.
pub fn mark_pre_keys_uploaded(conn: &Connection, key_ids: &[u32]) -> Result<(), CryptoError> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = conn.prepare("UPDATE crypto_pre_keys SET uploaded = 1 WHERE key_id = ?1")?;
        for &id in key_ids {
            stmt.execute([id])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Check if the number of uploaded pre-keys is below the replenishment threshold.
///
/// Returns `true` if fewer than `threshold` pre-keys have been uploaded,
/// indicating that new pre-keys should be generated and uploaded.
pub fn needs_pre_key_replenishment(conn: &Connection, threshold: u32) -> Result<bool, CryptoError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM crypto_pre_keys WHERE uploaded = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(count < threshold)
}

/// Rotate the signed pre-key by generating a new one with a new ID.
///
/// The old signed pre-key is retained in storage because existing sessions
/// may still reference it. Returns an updated bundle for server upload.
pub fn rotate_signed_pre_key(
    conn: &Connection,
    user_id: &str,
) -> Result<SerializedPreKeyBundle, CryptoError> {
    generate_pre_key_bundle(conn, user_id)
}

/// Check if the most recent signed pre-key is older than `max_age_days`.
///
/// Returns `true` if the most recent signed pre-key was created more than
/// `max_age_days` ago, or if no signed pre-key exists at all.
pub fn is_signed_pre_key_stale(conn: &Connection, max_age_days: u32) -> Result<bool, CryptoError> {
    let result: Result<i64, _> = conn.query_row(
        "SELECT MAX(created_at) FROM crypto_signed_pre_keys",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(created_at) => {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system clock before epoch")
                .as_secs() as i64;
            let max_age_secs = (max_age_days as i64) * 86400;
            Ok(now - created_at > max_age_secs)
        }
        Err(rusqlite::Error::InvalidColumnType(..)) => {
            // MAX returns NULL when table is empty
            Ok(true)
        }
        Err(e) => Err(CryptoError::from(e)),
    }
}
