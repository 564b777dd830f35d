//! Per-peer-device session orchestration (§4.2/§5, C6).
//!
//! Establishes outgoing sessions on demand, drives pre-key replenishment,
//! and converts between the wire-level `EncryptedMessage`/`MessageTypeTag`
//! shapes and the crypto crate's `MessageType`. Every operation against a
//! given device address runs under that address's lock from
//! [`crate::peer_lock::PeerLockRegistry`] so two concurrent sends to the
//! same device can't race the ratchet state.

use std::sync::Arc;

use libsignal_protocol::{DeviceId, ProtocolAddress};
use rusqlite::Connection;

use tessera_crypto::error::CryptoError;
use tessera_crypto::message::{self, MessageType};
use tessera_crypto::prekeys;
use tessera_crypto::session;
use tessera_shared::ids::{DeviceAddress, MessageId};
use tessera_shared::wire::{ClientMessage, EncryptedMessage, MessageTypeTag};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::peer_lock::PeerLockRegistry;
use crate::reset_manager::ResetManager;
use crate::rest::RestClient;

fn to_wire_type(message_type: MessageType) -> MessageTypeTag {
    match message_type {
        MessageType::PreKey => MessageTypeTag::PreKey,
        MessageType::Signal => MessageTypeTag::Encrypted,
    }
}

fn from_wire_type(tag: MessageTypeTag) -> MessageType {
    match tag {
        MessageTypeTag::PreKey => MessageType::PreKey,
        MessageTypeTag::Encrypted => MessageType::Signal,
    }
}

/// `libsignal_protocol::ProtocolAddress` for a device, addressed by the
/// composite `"{user_id}.{device_sub_id}"` name this application uses as
/// the Signal address name. The crypto crate always pins device id 1 on
/// its own addresses (it has no notion of multiple sub-devices per name),
/// so the sub-device distinction lives entirely in the name string here.
fn protocol_address(device: DeviceAddress) -> ProtocolAddress {
    ProtocolAddress::new(device.to_string(), DeviceId::new(1).expect("device id 1 is valid"))
}

/// Orchestrates session establishment and message encrypt/decrypt against
/// peer devices, serialized per-address via `locks`.
pub struct SessionManager {
    locks: Arc<PeerLockRegistry>,
}

impl SessionManager {
    pub fn new(locks: Arc<PeerLockRegistry>) -> Self {
        Self { locks }
    }

    /// Decrypt an inbound wire message from `device`. On a recoverable
    /// session error, `tessera_crypto` has already deleted the local
    /// session (auto-recovery, §4.6); the caller should surface this to
    /// the reset manager so a `SESSION_RESET` can be sent.
    pub async fn decrypt_from_device(
        &self,
        conn: &Connection,
        device: DeviceAddress,
        message: &EncryptedMessage,
    ) -> ClientResult<Vec<u8>> {
        let _guard = self.locks.acquire(&device.to_string()).await;
        let address = protocol_address(device);
        let message_type = from_wire_type(message.message_type);

        message::decrypt_message(conn, &address, &message.content, message_type).map_err(|e| {
            map_session_error(e, device)
        })
    }

    /// Decrypt an inbound message and, on a recoverable session failure,
    /// run it through `reset_manager` so the peer learns its session is
    /// stale (§4.6, C7). `envelope_id` is the gateway envelope id this
    /// message arrived as, used by the reset manager to dedupe redelivery.
    ///
    /// On success, tells `reset_manager` this device's session is healthy
    /// again (clearing any `ResetSent` marker left by a past break). On a
    /// `Decrypt`/`IdentityChanged` failure, returns the `SESSION_RESET`
    /// message to send to `device` in place of acking the envelope — `None`
    /// if a reset is already in flight or this envelope was already seen.
    pub async fn decrypt_and_recover(
        &self,
        conn: &Connection,
        device: DeviceAddress,
        message: &EncryptedMessage,
        reset_manager: &ResetManager,
        envelope_id: MessageId,
        now: i64,
    ) -> Result<Vec<u8>, RecoverableDecryptError> {
        match self.decrypt_from_device(conn, device, message).await {
            Ok(plaintext) => {
                reset_manager.mark_recovered(device);
                Ok(plaintext)
            }
            Err(error @ (ClientError::Decrypt { .. } | ClientError::IdentityChanged { .. })) => {
                let reset_message = reset_manager.on_decrypt_failure(device, envelope_id, now);
                Err(RecoverableDecryptError { error, reset_message })
            }
            Err(error) => Err(RecoverableDecryptError {
                error,
                reset_message: None,
            }),
        }
    }

    /// Ensure a session exists with `device`, fetching a pre-key bundle and
    /// calling `create_outgoing_session` if necessary. Idempotent: if a
    /// session already exists this does nothing network-visible.
    pub async fn ensure_session(
        &self,
        conn: &Connection,
        rest: &RestClient,
        device: DeviceAddress,
    ) -> ClientResult<()> {
        let _guard = self.locks.acquire(&device.to_string()).await;
        self.establish_session(conn, rest, device).await
    }

    async fn establish_session(
        &self,
        conn: &Connection,
        rest: &RestClient,
        device: DeviceAddress,
    ) -> ClientResult<()> {
        let bundle = rest.fetch_pre_key_bundle(device.to_string().as_str()).await?;
        let bundle_bytes = serde_json::to_vec(&bundle)?;
        session::create_outgoing_session(conn, &bundle_bytes).map_err(ClientError::from)?;
        Ok(())
    }

    /// Encrypt `plaintext` for `device`, transparently establishing a
    /// session on first contact (§4.2 step: no session yet).
    pub async fn encrypt(
        &self,
        conn: &Connection,
        rest: &RestClient,
        device: DeviceAddress,
        plaintext: &[u8],
    ) -> ClientResult<EncryptedMessage> {
        let _guard = self.locks.acquire(&device.to_string()).await;
        let address = protocol_address(device);

        match message::encrypt_message(conn, &address, plaintext) {
            Ok(enc) => Ok(EncryptedMessage {
                message_type: to_wire_type(enc.message_type),
                content: enc.ciphertext,
            }),
            Err(CryptoError::SessionNotFound { .. }) => {
                self.establish_session(conn, rest, device).await?;
                let enc = message::encrypt_message(conn, &address, plaintext)
                    .map_err(ClientError::from)?;
                Ok(EncryptedMessage {
                    message_type: to_wire_type(enc.message_type),
                    content: enc.ciphertext,
                })
            }
            Err(e) => Err(map_session_error(e, device)),
        }
    }

    /// Replenish one-time pre-keys if the local supply has dropped to the
    /// low-water mark, uploading the freshly generated batch (§4.2).
    pub async fn maintain_pre_key_supply(
        &self,
        conn: &Connection,
        rest: &RestClient,
        config: &ClientConfig,
    ) -> ClientResult<u32> {
        if !prekeys::needs_pre_key_replenishment(conn, config.pre_key_low_water_mark)
            .map_err(ClientError::from)?
        {
            return Ok(0);
        }

        let keys = prekeys::generate_one_time_pre_keys(conn, config.pre_key_replenish_batch_size)
            .map_err(ClientError::from)?;
        rest.upload_pre_keys(&keys).await?;

        let ids: Vec<u32> = keys.iter().map(|k| k.key_id).collect();
        prekeys::mark_pre_keys_uploaded(conn, &ids).map_err(ClientError::from)?;

        Ok(keys.len() as u32)
    }
}

/// Returned by `SessionManager::decrypt_and_recover` when decryption fails.
/// `reset_message` is `Some` exactly when this failure is the one that
/// should trigger an outbound `SESSION_RESET`; the caller dispatches it
/// over the gateway instead of acking the envelope.
#[derive(Debug)]
pub struct RecoverableDecryptError {
    pub error: ClientError,
    pub reset_message: Option<ClientMessage>,
}

impl std::fmt::Display for RecoverableDecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for RecoverableDecryptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

fn map_session_error(err: CryptoError, device: DeviceAddress) -> ClientError {
    match err {
        CryptoError::SessionNotFound { .. } => ClientError::NoSession {
            address: device.to_string(),
        },
        CryptoError::SessionCorrupted { detail, .. } => ClientError::Decrypt {
            address: device.to_string(),
            detail,
        },
        CryptoError::IdentityChanged { .. } => ClientError::IdentityChanged {
            address: device.to_string(),
        },
        CryptoError::PreKeyExhausted => ClientError::PrekeyExhausted {
            address: device.to_string(),
        },
        CryptoError::DecryptionFailed(detail) => ClientError::Decrypt {
            address: device.to_string(),
            detail,
        },
        other => ClientError::Crypto(other),
    }
}
