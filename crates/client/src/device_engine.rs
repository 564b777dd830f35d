//! Multi-device linking, fan-out enumeration, and self-unlink (§4.7, C8).
//!
//! A user's devices fan out every message to each other's sub-devices via
//! `DEVICE_ANNOUNCE`; this module owns turning that gossip into local
//! `friend_devices` rows, migrating any conversation that was filed under a
//! bare `UserId` before the announce rebinds it to the friend's username,
//! and the link-code challenge/response used to approve a new device.

use serde::{Deserialize, Serialize};

use tessera_shared::ids::{AttachmentId, ConversationId, DeviceAddress, LinkCode, MessageId, UserId};
use tessera_shared::wire::{AnnouncedDevice, ClientMessage, MessageTypeTag};

use crate::error::ClientResult;
use crate::local_store::{Friend, FriendStatus, LocalStore, StoredMessage};

/// Mint a fresh single-use link code and record it as pending.
pub fn generate_link_code(store: &LocalStore<'_>, now: i64) -> ClientResult<LinkCode> {
    let code = LinkCode::generate();
    store.create_link_challenge(&code.0, now)?;
    Ok(code)
}

/// Redeem a link code presented by a device asking to join this account.
/// Returns `true` if the code was pending and has now been consumed;
/// `false` if it was unknown, already consumed, or expired — the caller
/// should treat both as "link rejected" without distinguishing them to the
/// requesting device.
pub fn approve_link(store: &LocalStore<'_>, code: &str) -> ClientResult<bool> {
    store.consume_link_challenge(code)
}

/// Register a newly-approved device under this account.
pub fn register_new_device(
    store: &LocalStore<'_>,
    user_id: UserId,
    device_sub_id: u32,
    device_name: &str,
    identity_key: &[u8],
) -> ClientResult<()> {
    store.register_own_device(user_id, device_sub_id, device_name, identity_key)
}

/// Build the `DEVICE_ANNOUNCE` payload listing every device registered
/// under this account, to be sent to every accepted friend whenever the
/// device list changes.
pub fn build_device_announce(
    store: &LocalStore<'_>,
    user_id: UserId,
) -> ClientResult<ClientMessage> {
    let devices = store
        .own_devices(user_id)?
        .into_iter()
        .map(|(device_sub_id, identity_key)| AnnouncedDevice {
            user_id,
            device_sub_id,
            identity_key,
        })
        .collect();

    Ok(ClientMessage::DeviceAnnounce { devices })
}

/// Result of applying an inbound `DEVICE_ANNOUNCE`: the set of device
/// addresses now known for this friend, and how many previously-filed
/// messages were migrated onto the friend's username conversation.
pub struct DeviceAnnounceOutcome {
    pub devices: Vec<DeviceAddress>,
    pub messages_migrated: u32,
}

/// Apply a `DEVICE_ANNOUNCE` from `sender_username`: record every announced
/// device and migrate any messages filed under a device's raw `UserId`
/// conversation onto the username conversation now that it's known (§9,
/// the raw-id-to-username rebind this type exists for).
pub fn apply_device_announce(
    store: &LocalStore<'_>,
    sender_username: &str,
    message: &ClientMessage,
) -> ClientResult<DeviceAnnounceOutcome> {
    let ClientMessage::DeviceAnnounce { devices } = message else {
        return Ok(DeviceAnnounceOutcome {
            devices: Vec::new(),
            messages_migrated: 0,
        });
    };

    let mut addresses = Vec::with_capacity(devices.len());
    let mut messages_migrated = 0u32;
    let username_conversation = ConversationId::from_username(sender_username);

    for device in devices {
        store.add_friend_device(
            sender_username,
            device.user_id,
            device.device_sub_id,
            &device.identity_key,
        )?;
        addresses.push(DeviceAddress::new(device.user_id, device.device_sub_id));

        let raw_conversation = ConversationId::from_raw_user_id(device.user_id);
        messages_migrated += store.migrate_messages(
            &raw_conversation.to_string(),
            &username_conversation.to_string(),
        )?;
    }

    Ok(DeviceAnnounceOutcome {
        devices: addresses,
        messages_migrated,
    })
}

/// The device addresses a message to a friend must fan out to: the friend's
/// own devices, each of which gets the real `CONTENT` envelope, and the
/// sender's *other* devices, which instead get a `SENT_SYNC` copy so every
/// device in the account sees what was sent (§4.7, C8).
pub struct FanOutTargets {
    pub content: Vec<DeviceAddress>,
    pub sent_sync: Vec<DeviceAddress>,
}

/// Enumerate the device addresses a message to `username` must fan out to:
/// `(F.devices) ∪ (own devices except the sending device)`. Returns empty
/// target lists for an unknown or not-yet-accepted friend.
pub fn fan_out_targets(
    store: &LocalStore<'_>,
    username: &str,
    user_id: UserId,
    device_sub_id: u32,
) -> ClientResult<FanOutTargets> {
    let Some(friend) = store.get_friend(username)? else {
        return Ok(FanOutTargets {
            content: Vec::new(),
            sent_sync: Vec::new(),
        });
    };

    let content = friend
        .devices
        .into_iter()
        .map(|(friend_user_id, friend_device_sub_id, _identity_key)| {
            DeviceAddress::new(friend_user_id, friend_device_sub_id)
        })
        .collect();

    let sent_sync = store
        .own_devices(user_id)?
        .into_iter()
        .filter(|&(other_device_sub_id, _)| other_device_sub_id != device_sub_id)
        .map(|(other_device_sub_id, _identity_key)| DeviceAddress::new(user_id, other_device_sub_id))
        .collect();

    Ok(FanOutTargets { content, sent_sync })
}

/// Turn `targets` plus the `message` being sent into the concrete per-device
/// wire payloads: friend devices get `message` verbatim (real `CONTENT`),
/// the sender's own other devices get a `SentSync` copy wrapping it so every
/// linked device sees what was sent (§4.7, C8). The caller is left to drive
/// `session_manager::encrypt`/the gateway per `(device, message)` pair —
/// this only decides *what* goes to *which* device, not how it's delivered.
pub fn plan_fan_out(
    targets: &FanOutTargets,
    message: &ClientMessage,
    message_type: MessageTypeTag,
    recipient: UserId,
    attachment_id: Option<AttachmentId>,
) -> ClientResult<Vec<(DeviceAddress, ClientMessage)>> {
    let mut plan = Vec::with_capacity(targets.content.len() + targets.sent_sync.len());

    for &device in &targets.content {
        plan.push((device, message.clone()));
    }

    if !targets.sent_sync.is_empty() {
        let sync = ClientMessage::SentSync {
            original_content: serde_json::to_vec(message)?,
            original_type: message_type,
            recipient,
            attachment_id,
        };
        for &device in &targets.sent_sync {
            plan.push((device, sync.clone()));
        }
    }

    Ok(plan)
}

/// Self-unlink: purge every locally-cached friend, message, attachment, and
/// CRDT record (§4.7). Irreversible — the caller is expected to have
/// already confirmed this with the user and notified the server.
pub fn self_unlink(store: &LocalStore<'_>) -> ClientResult<()> {
    store.clear_all()
}

// -- link-approval full-state sync (SYNC_BLOB) ------------------------------
//
// A device approving a link sends the new device everything it needs to
// reconstruct the account locally: every friend (with devices), the full
// message history, and every CRDT record. The blob travels as opaque bytes
// inside `ClientMessage::SyncBlob`; these snapshot types exist only to give
// that payload a stable shape and are never exposed outside this module.

#[derive(Serialize, Deserialize)]
struct SnapshotFriend {
    username: String,
    canonical_user_id: UserId,
    status: String,
    devices: Vec<(UserId, u32, Vec<u8>)>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotMessage {
    message_id: MessageId,
    conversation_id: String,
    timestamp: i64,
    content: Vec<u8>,
    is_sent: bool,
    author_device_id: String,
    media_url: Option<String>,
    content_reference: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotCrdtRecord {
    model: String,
    record_id: String,
    data: Vec<u8>,
    author_device_id: Option<String>,
    updated_at: i64,
}

#[derive(Serialize, Deserialize, Default)]
struct SyncSnapshot {
    friends: Vec<SnapshotFriend>,
    messages: Vec<SnapshotMessage>,
    crdt_records: Vec<SnapshotCrdtRecord>,
}

impl From<Friend> for SnapshotFriend {
    fn from(friend: Friend) -> Self {
        SnapshotFriend {
            username: friend.username,
            canonical_user_id: friend.canonical_user_id,
            status: friend.status.as_str().to_string(),
            devices: friend.devices,
        }
    }
}

impl From<StoredMessage> for SnapshotMessage {
    fn from(msg: StoredMessage) -> Self {
        SnapshotMessage {
            message_id: msg.message_id,
            conversation_id: msg.conversation_id,
            timestamp: msg.timestamp,
            content: msg.content,
            is_sent: msg.is_sent,
            author_device_id: msg.author_device_id,
            media_url: msg.media_url,
            content_reference: msg.content_reference,
        }
    }
}

/// Build the `SYNC_BLOB` payload sent to a newly-approved device: the full
/// friend list, message history, and CRDT state this device currently holds
/// (§4.7 link flow, §8 scenario 5).
pub fn build_sync_blob(store: &LocalStore<'_>) -> ClientResult<ClientMessage> {
    let snapshot = SyncSnapshot {
        friends: store.all_friends()?.into_iter().map(SnapshotFriend::from).collect(),
        messages: store.all_messages()?.into_iter().map(SnapshotMessage::from).collect(),
        crdt_records: store
            .all_crdt_records()?
            .into_iter()
            .map(|(model, record_id, data, author_device_id, updated_at)| SnapshotCrdtRecord {
                model,
                record_id,
                data,
                author_device_id,
                updated_at,
            })
            .collect(),
    };

    let blob = serde_json::to_vec(&snapshot)?;
    Ok(ClientMessage::SyncBlob { blob })
}

/// Apply an inbound `SYNC_BLOB` on a freshly-linked device: replays every
/// friend, message, and CRDT record it carries into the local store.
/// Idempotent — reapplying the same blob (or a later, larger one) only adds
/// or overwrites rows, matching the upsert/idempotent-insert semantics of
/// the underlying store operations.
pub fn apply_sync_blob(store: &LocalStore<'_>, message: &ClientMessage) -> ClientResult<()> {
    let ClientMessage::SyncBlob { blob } = message else {
        return Ok(());
    };
    let snapshot: SyncSnapshot = serde_json::from_slice(blob)?;

    for friend in snapshot.friends {
        let status = FriendStatus::from_str(&friend.status)?;
        store.upsert_friend(&friend.username, friend.canonical_user_id, status, 0)?;
        for (user_id, device_sub_id, identity_key) in friend.devices {
            store.add_friend_device(&friend.username, user_id, device_sub_id, &identity_key)?;
        }
    }

    for msg in snapshot.messages {
        store.insert_message(&StoredMessage {
            message_id: msg.message_id,
            conversation_id: msg.conversation_id,
            timestamp: msg.timestamp,
            content: msg.content,
            is_sent: msg.is_sent,
            author_device_id: msg.author_device_id,
            media_url: msg.media_url,
            content_reference: msg.content_reference,
        })?;
    }

    for record in snapshot.crdt_records {
        store.upsert_crdt_record(
            &record.model,
            &record.record_id,
            &record.data,
            record.author_device_id.as_deref(),
            record.updated_at,
        )?;
    }

    Ok(())
}
