//! End-to-end coverage of device fan-out and the raw-id-to-username message
//! migration that `DEVICE_ANNOUNCE` drives (§4.7, §4.8 boundary with C8/C9).
//!
//! Exercises `tessera_client::device_engine` and `local_store` together
//! through a plain `rusqlite::Connection`, without any crypto or network
//! layer — this is the pure bookkeeping path a real client drives on top of
//! an already-decrypted `DEVICE_ANNOUNCE` payload.

use rusqlite::Connection;

use tessera_client::device_engine::{apply_device_announce, fan_out_targets};
use tessera_client::local_store::{FriendStatus, LocalStore, StoredMessage};
use tessera_shared::ids::{ConversationId, MessageId, UserId};
use tessera_shared::wire::{AnnouncedDevice, ClientMessage};

// `tessera_client::local_store::init_test_db` is `#[cfg(test)]`-gated in its
// own crate, so it isn't visible to an external integration test binary.
fn init_client_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "journal_mode", "WAL").unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    tessera_client::local_store::run_client_migrations(&conn).unwrap();
    conn
}

#[test]
fn fan_out_reaches_every_known_device_of_an_accepted_friend() {
    let conn = init_client_db();
    let store = LocalStore::new(&conn);

    let me = UserId::new();
    let bob = UserId::new();
    store.upsert_friend("bob", bob, FriendStatus::Accepted, 0).unwrap();
    store.add_friend_device("bob", bob, 1, b"phone-key").unwrap();
    store.add_friend_device("bob", bob, 2, b"laptop-key").unwrap();
    store.add_friend_device("bob", bob, 3, b"tablet-key").unwrap();

    let targets = fan_out_targets(&store, "bob", me, 1).unwrap();
    assert_eq!(targets.content.len(), 3);
    for sub_id in [1, 2, 3] {
        assert!(targets.content.iter().any(|a| a.user_id == bob && a.device_sub_id == sub_id));
    }
    assert!(targets.sent_sync.is_empty());
}

/// Own other devices receive a `SENT_SYNC` copy; the sending device itself
/// is excluded from that set.
#[test]
fn fan_out_includes_own_other_devices_as_sent_sync_targets() {
    let conn = init_client_db();
    let store = LocalStore::new(&conn);

    let me = UserId::new();
    let bob = UserId::new();
    store.upsert_friend("bob", bob, FriendStatus::Accepted, 0).unwrap();
    store.add_friend_device("bob", bob, 1, b"phone-key").unwrap();
    store.register_own_device(me, 1, "laptop", b"laptop-key").unwrap();
    store.register_own_device(me, 2, "phone", b"phone-key").unwrap();
    store.register_own_device(me, 3, "tablet", b"tablet-key").unwrap();

    let targets = fan_out_targets(&store, "bob", me, 1).unwrap();
    assert_eq!(targets.content.len(), 1);
    assert_eq!(targets.sent_sync.len(), 2);
    assert!(targets.sent_sync.iter().all(|a| a.user_id == me && a.device_sub_id != 1));
}

/// A message arrives from Bob's device before any `DEVICE_ANNOUNCE` has
/// been seen, so it's filed under his raw device `UserId`. A later announce
/// introducing two more of his devices must both migrate that message onto
/// the username conversation and widen the fan-out set.
#[test]
fn multi_device_announce_migrates_preexisting_messages_and_expands_fanout() {
    let conn = init_client_db();
    let store = LocalStore::new(&conn);

    let bob_primary = UserId::new();
    store
        .upsert_friend("bob", bob_primary, FriendStatus::Accepted, 0)
        .unwrap();

    let raw_conversation = ConversationId::from_raw_user_id(bob_primary);
    store
        .insert_message(&StoredMessage {
            message_id: MessageId::new(),
            conversation_id: raw_conversation.to_string(),
            timestamp: 1,
            content: b"before any announce".to_vec(),
            is_sent: false,
            author_device_id: raw_conversation.to_string(),
            media_url: None,
            content_reference: None,
        })
        .unwrap();

    let me = UserId::new();
    let empty_targets = fan_out_targets(&store, "bob", me, 1).unwrap();
    assert!(empty_targets.content.is_empty());

    let bob_secondary = UserId::new();
    let bob_tertiary = UserId::new();
    let announce = ClientMessage::DeviceAnnounce {
        devices: vec![
            AnnouncedDevice {
                user_id: bob_primary,
                device_sub_id: 1,
                identity_key: vec![1],
            },
            AnnouncedDevice {
                user_id: bob_secondary,
                device_sub_id: 2,
                identity_key: vec![2],
            },
            AnnouncedDevice {
                user_id: bob_tertiary,
                device_sub_id: 3,
                identity_key: vec![3],
            },
        ],
    };

    let outcome = apply_device_announce(&store, "bob", &announce).unwrap();
    assert_eq!(outcome.devices.len(), 3);
    // Only `bob_primary`'s raw-id conversation had any messages filed under it.
    assert_eq!(outcome.messages_migrated, 1);

    let username_conversation = ConversationId::from_username("bob");
    let migrated = store
        .messages_for_conversation(&username_conversation.to_string())
        .unwrap();
    assert_eq!(migrated.len(), 1);
    assert_eq!(migrated[0].content, b"before any announce");
    assert!(store.messages_for_conversation(&raw_conversation.to_string()).unwrap().is_empty());

    let targets = fan_out_targets(&store, "bob", me, 1).unwrap();
    assert_eq!(targets.content.len(), 3);
}
