//! Generic CRDT synchronization engine (§4.8, C9).
//!
//! Per-model sync logic used to be duck-typed onto each model definition;
//! here one engine drives every model off the static `MODEL_REGISTRY`
//! table (`tessera_shared::model`), dispatching on `SyncStrategy` instead
//! of per-model code. `apply_model_sync` handles an inbound `MODEL_SYNC`
//! message; `collect_expired` runs the TTL sweep, cascading through
//! `belongs_to`/`has_many` edges and evicting any attachment the expiring
//! record referenced.
//!
//! Records are opaque JSON blobs to this engine. Two conventions let it
//! stay generic instead of growing a match arm per model: a record that
//! carries an attachment stores its id under an `"attachment_id"` key, and
//! a record that belongs to a parent stores the parent's record id under
//! `"{parent_model_lowercased}_id"`.

use serde_json::Value;

use tessera_shared::ids::AttachmentId;
use tessera_shared::model::{find_model, ModelDescriptor, SyncStrategy, MODEL_REGISTRY};

use crate::error::{ClientError, ClientResult};
use crate::local_store::LocalStore;

/// One CRDT record as it rides inside a `MODEL_SYNC` message.
pub struct IncomingRecord<'a> {
    pub model: &'a str,
    pub record_id: &'a str,
    pub data: &'a [u8],
    pub author_device_id: Option<&'a str>,
    pub updated_at: i64,
}

/// Apply an inbound CRDT record, merging per the model's declared
/// `SyncStrategy`. Returns `true` if the record was written (new or won
/// the merge), `false` if it was rejected as stale or a duplicate add.
pub fn apply_model_sync(store: &LocalStore<'_>, record: IncomingRecord<'_>) -> ClientResult<bool> {
    let descriptor = find_model(record.model)
        .ok_or_else(|| ClientError::UnknownModel(record.model.to_string()))?;

    let existing = store.get_crdt_record_full(record.model, record.record_id)?;

    let should_write = match descriptor.sync {
        // Grow-only: the first writer wins; a later add for the same id
        // changes nothing (there's nothing to compare — records are
        // immutable once created).
        SyncStrategy::GSet => existing.is_none(),

        // Last-writer-wins by (timestamp desc, authorDeviceId desc).
        SyncStrategy::Lww | SyncStrategy::Private => match existing {
            None => true,
            Some((_, existing_author, existing_updated_at)) => {
                match record.updated_at.cmp(&existing_updated_at) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Equal => record.author_device_id > existing_author.as_deref(),
                }
            }
        },
    };

    if should_write {
        store.upsert_crdt_record(
            record.model,
            record.record_id,
            record.data,
            record.author_device_id,
            record.updated_at,
        )?;
    }

    Ok(should_write)
}

/// Report of one TTL sweep: how many records were expired directly, how
/// many were cascade-deleted as children, and how many cached attachments
/// were evicted alongside them.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub records_expired: u32,
    pub records_cascaded: u32,
    pub attachments_evicted: u32,
}

/// Sweep every collectable model for TTL-expired records, cascading the
/// deletion to declared `has_many` children and evicting any attachment
/// cache entries the expiring records referenced (§4.8).
pub fn collect_expired(store: &LocalStore<'_>, now: i64) -> ClientResult<CleanupReport> {
    let mut report = CleanupReport::default();

    for descriptor in MODEL_REGISTRY.iter().filter(|d| d.collectable) {
        let Some(ttl) = descriptor.ttl else { continue };
        let ttl_secs = ttl.as_secs() as i64;

        let records = store.crdt_records_for_model(descriptor.name)?;
        for (record_id, data, updated_at) in records {
            if now - updated_at < ttl_secs {
                continue;
            }

            evict_attachment(store, &data, &mut report.attachments_evicted)?;
            store.delete_crdt_record(descriptor.name, &record_id)?;
            report.records_expired += 1;

            cascade_delete_children(store, descriptor, &record_id, &mut report)?;
        }
    }

    Ok(report)
}

fn cascade_delete_children(
    store: &LocalStore<'_>,
    parent: &ModelDescriptor,
    parent_record_id: &str,
    report: &mut CleanupReport,
) -> ClientResult<()> {
    for child_name in parent.has_many {
        let Some(child_descriptor) = find_model(child_name) else {
            continue;
        };
        let parent_key = format!("{}_id", parent.name.to_lowercase());

        for (child_id, data, _updated_at) in store.crdt_records_for_model(child_name)? {
            let references_parent = serde_json::from_slice::<Value>(&data)
                .ok()
                .and_then(|v| v.get(&parent_key).and_then(Value::as_str).map(str::to_owned))
                .map(|parent_ref| parent_ref == parent_record_id)
                .unwrap_or(false);

            if !references_parent {
                continue;
            }

            evict_attachment(store, &data, &mut report.attachments_evicted)?;
            store.delete_crdt_record(child_name, &child_id)?;
            report.records_cascaded += 1;

            // Walk the child's own has_many edges too, so e.g. a deleted
            // Story takes its whole Comment thread (including nested
            // Comment -> Comment replies) with it, not just one level.
            if !child_descriptor.has_many.is_empty() {
                cascade_delete_children(store, child_descriptor, &child_id, report)?;
            }
        }
    }
    Ok(())
}

fn evict_attachment(store: &LocalStore<'_>, data: &[u8], counter: &mut u32) -> ClientResult<()> {
    if let Some(attachment_id) = serde_json::from_slice::<Value>(data)
        .ok()
        .and_then(|v| v.get("attachment_id").and_then(Value::as_str).map(str::to_owned))
        .and_then(|s| s.parse::<AttachmentId>().ok())
    {
        store.delete_cached_attachment(attachment_id)?;
        *counter += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::init_test_db;

    fn record(model: &str, id: &str, author: Option<&str>, updated_at: i64, json: &str) -> Vec<u8> {
        let _ = (model, id, author, updated_at);
        json.as_bytes().to_vec()
    }

    #[test]
    fn gset_first_write_wins_second_add_is_rejected() {
        let conn = init_test_db();
        let store = LocalStore::new(&conn);
        let data = record("Friend", "f1", None, 100, "{}");

        assert!(apply_model_sync(
            &store,
            IncomingRecord {
                model: "Friend",
                record_id: "f1",
                data: &data,
                author_device_id: None,
                updated_at: 100,
            }
        )
        .unwrap());

        assert!(!apply_model_sync(
            &store,
            IncomingRecord {
                model: "Friend",
                record_id: "f1",
                data: &data,
                author_device_id: None,
                updated_at: 200,
            }
        )
        .unwrap());
    }

    #[test]
    fn lww_newer_timestamp_wins() {
        let conn = init_test_db();
        let store = LocalStore::new(&conn);
        let v1 = record("Story", "s1", Some("dev-a"), 100, "{}");
        let v2 = record("Story", "s1", Some("dev-b"), 200, "{}");

        apply_model_sync(
            &store,
            IncomingRecord {
                model: "Story",
                record_id: "s1",
                data: &v1,
                author_device_id: Some("dev-a"),
                updated_at: 100,
            },
        )
        .unwrap();

        let applied = apply_model_sync(
            &store,
            IncomingRecord {
                model: "Story",
                record_id: "s1",
                data: &v2,
                author_device_id: Some("dev-b"),
                updated_at: 200,
            },
        )
        .unwrap();
        assert!(applied);

        let (data, _, _) = store.get_crdt_record_full("Story", "s1").unwrap().unwrap();
        assert_eq!(data, v2);
    }

    #[test]
    fn lww_stale_write_is_rejected() {
        let conn = init_test_db();
        let store = LocalStore::new(&conn);
        let v1 = record("Story", "s1", Some("dev-a"), 200, "{}");
        let v2 = record("Story", "s1", Some("dev-b"), 100, "{}");

        apply_model_sync(
            &store,
            IncomingRecord {
                model: "Story",
                record_id: "s1",
                data: &v1,
                author_device_id: Some("dev-a"),
                updated_at: 200,
            },
        )
        .unwrap();

        let applied = apply_model_sync(
            &store,
            IncomingRecord {
                model: "Story",
                record_id: "s1",
                data: &v2,
                author_device_id: Some("dev-b"),
                updated_at: 100,
            },
        )
        .unwrap();
        assert!(!applied);
    }

    #[test]
    fn unknown_model_is_rejected() {
        let conn = init_test_db();
        let store = LocalStore::new(&conn);
        let data = record("Nope", "x", None, 1, "{}");
        let result = apply_model_sync(
            &store,
            IncomingRecord {
                model: "Nope",
                record_id: "x",
                data: &data,
                author_device_id: None,
                updated_at: 1,
            },
        );
        assert!(matches!(result, Err(ClientError::UnknownModel(_))));
    }

    #[test]
    fn ttl_sweep_expires_story_and_cascades_to_comment() {
        let conn = init_test_db();
        let store = LocalStore::new(&conn);

        store
            .upsert_crdt_record("Story", "s1", br#"{"attachment_id":null}"#, Some("dev-a"), 0)
            .unwrap();
        store
            .upsert_crdt_record("Comment", "c1", br#"{"story_id":"s1"}"#, Some("dev-a"), 0)
            .unwrap();

        // One day past the Story TTL (24h) — both Story and its Comment expire.
        let report = collect_expired(&store, 60 * 60 * 25).unwrap();
        assert_eq!(report.records_expired, 1);
        assert_eq!(report.records_cascaded, 1);

        assert!(store.get_crdt_record("Story", "s1").unwrap().is_none());
        assert!(store.get_crdt_record("Comment", "c1").unwrap().is_none());
    }

    #[test]
    fn ttl_sweep_skips_fresh_records() {
        let conn = init_test_db();
        let store = LocalStore::new(&conn);
        store
            .upsert_crdt_record("Story", "s1", b"{}", Some("dev-a"), 100)
            .unwrap();

        let report = collect_expired(&store, 101).unwrap();
        assert_eq!(report.records_expired, 0);
        assert!(store.get_crdt_record("Story", "s1").unwrap().is_some());
    }

    #[test]
    fn ttl_sweep_evicts_referenced_attachment_cache() {
        let conn = init_test_db();
        let store = LocalStore::new(&conn);
        let attachment_id = tessera_shared::ids::AttachmentId::new();
        store.cache_attachment(attachment_id, "image/png", b"bytes", 0).unwrap();

        let payload = format!(r#"{{"attachment_id":"{attachment_id}"}}"#);
        store
            .upsert_crdt_record("Story", "s1", payload.as_bytes(), Some("dev-a"), 0)
            .unwrap();

        let report = collect_expired(&store, 60 * 60 * 25).unwrap();
        assert_eq!(report.attachments_evicted, 1);
        assert!(store.get_cached_attachment(attachment_id).unwrap().is_none());
    }
}
