//! Session-reset coordination (§4.6, C7).
//!
//! `tessera_crypto::message::decrypt_message` already auto-recovers from a
//! corrupted session by deleting it locally; what's missing at that layer
//! is telling the *peer* their side is now stale so they stop encrypting
//! into a session this end just threw away. This module tracks a small
//! per-device state machine (`Idle` / `ResetSent`) so a `SESSION_RESET`
//! request is sent at most once per break, and keeps a process-lifetime
//! set of envelope ids already acted on so the gateway's at-least-once
//! redelivery can't retrigger the same reset twice.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex as StdMutex;

use rusqlite::Connection;

use tessera_crypto::session::recover_session;
use tessera_shared::ids::{DeviceAddress, MessageId};
use tessera_shared::wire::ClientMessage;

use crate::error::ClientResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetState {
    /// No reset in flight with this device.
    Idle,
    /// A `SESSION_RESET` has been sent and we're waiting for the peer to
    /// re-establish (by fetching a fresh pre-key bundle and sending a new
    /// `PreKey` message).
    ResetSent,
}

/// Tracks reset state per peer device for the life of the process. Not
/// persisted: a restart simply goes back to `Idle` everywhere, which is
/// safe — worst case is one redundant `SESSION_RESET` is sent.
pub struct ResetManager {
    states: StdMutex<HashMap<String, ResetState>>,
    tried_envelopes: StdMutex<HashSet<MessageId>>,
}

impl Default for ResetManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetManager {
    pub fn new() -> Self {
        Self {
            states: StdMutex::new(HashMap::new()),
            tried_envelopes: StdMutex::new(HashSet::new()),
        }
    }

    /// Called when decrypting an inbound envelope from `device` failed in a
    /// way `tessera_crypto` classified as recoverable (it has already
    /// deleted the local session). Returns the `SESSION_RESET` message to
    /// send to the peer the first time this happens for `device`; returns
    /// `None` if a reset is already in flight or this exact envelope was
    /// already processed (redelivery after the first reset attempt).
    pub fn on_decrypt_failure(
        &self,
        device: DeviceAddress,
        envelope_id: MessageId,
        now: i64,
    ) -> Option<ClientMessage> {
        {
            let mut tried = self.tried_envelopes.lock().expect("poisoned");
            if !tried.insert(envelope_id) {
                return None;
            }
        }

        let mut states = self.states.lock().expect("poisoned");
        let key = device.to_string();
        match states.get(&key) {
            Some(ResetState::ResetSent) => None,
            _ => {
                states.insert(key, ResetState::ResetSent);
                Some(ClientMessage::SessionReset { timestamp: now })
            }
        }
    }

    /// Called on receipt of a `SESSION_RESET` from `device`: drop the local
    /// session (so the next send re-establishes from scratch) and clear
    /// any in-flight reset state, since the peer's request supersedes it.
    pub fn on_session_reset_received(
        &self,
        conn: &Connection,
        address: &libsignal_protocol::ProtocolAddress,
        device: DeviceAddress,
    ) -> ClientResult<()> {
        recover_session(conn, address)?;
        self.states
            .lock()
            .expect("poisoned")
            .insert(device.to_string(), ResetState::Idle);
        Ok(())
    }

    /// Called after a successful encrypt or decrypt with `device`,
    /// confirming the session is healthy again and clearing any
    /// `ResetSent` marker.
    pub fn mark_recovered(&self, device: DeviceAddress) {
        self.states
            .lock()
            .expect("poisoned")
            .insert(device.to_string(), ResetState::Idle);
    }

    /// Force every known device back to `Idle` and forget tried envelopes.
    /// Used on full local wipe / self-unlink (§4.7), since stale reset
    /// bookkeeping from before a wipe has no meaning afterward.
    pub fn reset_all(&self) {
        self.states.lock().expect("poisoned").clear();
        self.tried_envelopes.lock().expect("poisoned").clear();
    }
}
