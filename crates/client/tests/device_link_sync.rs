//! Linked-device full-state sync (§4.7 `SYNC_BLOB`, §8 scenario 5).
//!
//! Covers the whole link-approval path — generate a link code, redeem it,
//! register the new device, hand it a `SYNC_BLOB` — and then a simulated
//! logout/login cycle: the approving device's state is written to a
//! file-backed database, closed, and reopened in a fresh connection to
//! stand in for a process restart, proving `SYNC_BLOB` building reads back
//! correctly from disk and not just from an in-memory fixture.

use rusqlite::Connection;

use tessera_client::device_engine::{
    apply_sync_blob, approve_link, build_sync_blob, generate_link_code, register_new_device,
};
use tessera_client::local_store::{FriendStatus, LocalStore, StoredMessage};
use tessera_shared::ids::{MessageId, UserId};

fn init_client_db_at(path: &std::path::Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    conn.pragma_update(None, "journal_mode", "WAL").unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    tessera_client::local_store::run_client_migrations(&conn).unwrap();
    conn
}

fn init_client_db_in_memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "journal_mode", "WAL").unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    tessera_client::local_store::run_client_migrations(&conn).unwrap();
    conn
}

#[test]
fn link_code_is_single_use_and_gates_new_device_registration() {
    let conn = init_client_db_in_memory();
    let store = LocalStore::new(&conn);

    let code = generate_link_code(&store, 1_000).unwrap();
    assert!(approve_link(&store, &code.0).unwrap());
    assert!(!approve_link(&store, &code.0).unwrap(), "a link code must not be redeemable twice");

    let new_user = UserId::new();
    register_new_device(&store, new_user, 2, "new-laptop", b"new-device-key").unwrap();
    let devices = store.own_devices(new_user).unwrap();
    assert_eq!(devices, vec![(2, b"new-device-key".to_vec())]);
}

/// The approving device's full state — friends, message history, and CRDT
/// records — survives a file-backed close/reopen and still produces a
/// complete `SYNC_BLOB` that a brand-new device can apply to reconstruct
/// the same account state.
#[test]
fn sync_blob_survives_a_logout_login_cycle_and_reconstructs_full_state() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let db_path = tmp.path().to_path_buf();

    {
        let conn = init_client_db_at(&db_path);
        let store = LocalStore::new(&conn);

        let carol = UserId::new();
        store.upsert_friend("carol", carol, FriendStatus::Accepted, 0).unwrap();
        store.add_friend_device("carol", carol, 1, b"carol-key").unwrap();

        store
            .insert_message(&StoredMessage {
                message_id: MessageId::new(),
                conversation_id: "carol".into(),
                timestamp: 10,
                content: b"see you at 6".to_vec(),
                is_sent: true,
                author_device_id: "dev-1".into(),
                media_url: None,
                content_reference: None,
            })
            .unwrap();

        store.upsert_crdt_record("Story", "s1", br#"{"attachment_id":null}"#, Some("dev-1"), 10).unwrap();
    }
    // `conn` dropped here — simulates logging out / closing the app.

    // "Login" again: reopen the same on-disk database in a fresh connection.
    let reopened_conn = init_client_db_at(&db_path);
    let reopened_store = LocalStore::new(&reopened_conn);
    assert!(reopened_store.get_friend("carol").unwrap().is_some());

    let sync_blob_message = build_sync_blob(&reopened_store).unwrap();

    // A brand-new device, approved via a link code, applies the blob.
    let new_device_conn = init_client_db_in_memory();
    let new_device_store = LocalStore::new(&new_device_conn);
    apply_sync_blob(&new_device_store, &sync_blob_message).unwrap();

    let carol_on_new_device = new_device_store.get_friend("carol").unwrap().unwrap();
    assert_eq!(carol_on_new_device.devices.len(), 1);

    let messages = new_device_store.messages_for_conversation("carol").unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, b"see you at 6");

    assert!(new_device_store.get_crdt_record("Story", "s1").unwrap().is_some());
}

/// Applying the same `SYNC_BLOB` twice (e.g. redelivered by the gateway)
/// must not duplicate rows or error — every underlying write is an
/// idempotent insert or upsert.
#[test]
fn reapplying_the_same_sync_blob_is_idempotent() {
    let source_conn = init_client_db_in_memory();
    let source_store = LocalStore::new(&source_conn);

    let dave = UserId::new();
    source_store.upsert_friend("dave", dave, FriendStatus::Accepted, 0).unwrap();
    source_store.add_friend_device("dave", dave, 1, b"dave-key").unwrap();
    source_store
        .insert_message(&StoredMessage {
            message_id: MessageId::new(),
            conversation_id: "dave".into(),
            timestamp: 5,
            content: b"hi".to_vec(),
            is_sent: false,
            author_device_id: "dev-1".into(),
            media_url: None,
            content_reference: None,
        })
        .unwrap();

    let blob_message = build_sync_blob(&source_store).unwrap();

    let target_conn = init_client_db_in_memory();
    let target_store = LocalStore::new(&target_conn);
    apply_sync_blob(&target_store, &blob_message).unwrap();
    apply_sync_blob(&target_store, &blob_message).unwrap();

    assert_eq!(target_store.messages_for_conversation("dave").unwrap().len(), 1);
    assert_eq!(target_store.get_friend("dave").unwrap().unwrap().devices.len(), 1);
}
