//! Client-side SQLite cache: friends, messages, attachments, CRDT model
//! rows, link challenges, and the device registry (§6 "Persisted state
//! layout", §10.4).
//!
//! Shares one `rusqlite::Connection` with `tessera_crypto::storage`, but
//! tracks its own migrations under `_client_migrations` so the crypto
//! crate's schema evolution stays independent of this one.

use rusqlite::{params, Connection, OptionalExtension};

use tessera_shared::ids::{AttachmentId, MessageId, UserId};

use crate::error::{ClientError, ClientResult};

const MIGRATIONS: &[(i32, &str)] = &[(1, MIGRATION_001), (2, MIGRATION_002)];

const MIGRATION_001: &str = "
CREATE TABLE local_user (
    user_id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    device_sub_id INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE friends (
    username TEXT PRIMARY KEY,
    canonical_user_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE friend_devices (
    username TEXT NOT NULL REFERENCES friends(username) ON DELETE CASCADE,
    user_id TEXT NOT NULL,
    device_sub_id INTEGER NOT NULL,
    identity_key BLOB NOT NULL,
    PRIMARY KEY (username, user_id, device_sub_id)
);

CREATE TABLE messages (
    message_id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    content BLOB NOT NULL,
    is_sent INTEGER NOT NULL,
    author_device_id TEXT NOT NULL,
    content_reference TEXT
);

CREATE INDEX idx_messages_conversation ON messages (conversation_id);
CREATE INDEX idx_messages_timestamp ON messages (timestamp);
CREATE INDEX idx_messages_conversation_timestamp ON messages (conversation_id, timestamp);

CREATE TABLE attachments_cache (
    attachment_id TEXT PRIMARY KEY,
    content_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    cached_at INTEGER NOT NULL,
    blob BLOB NOT NULL
);

CREATE TABLE crdt_records (
    model TEXT NOT NULL,
    record_id TEXT NOT NULL,
    data BLOB NOT NULL,
    author_device_id TEXT,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (model, record_id)
);

CREATE TABLE link_challenges (
    link_code TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL,
    state TEXT NOT NULL
);

CREATE TABLE own_devices (
    user_id TEXT NOT NULL,
    device_sub_id INTEGER NOT NULL,
    device_name TEXT,
    identity_key BLOB,
    PRIMARY KEY (user_id, device_sub_id)
);
";

// Resolves §9 Open Question 1: the superset MessageStore schema carries both
// `media_url` and `content_reference` from migration 1 onward; this backfills
// `media_url` for rows that predate the column's existence in the column-less
// legacy shape.
const MIGRATION_002: &str = "
ALTER TABLE messages ADD COLUMN media_url TEXT;
UPDATE messages SET media_url = NULL WHERE media_url IS NULL;
";

pub fn run_client_migrations(conn: &Connection) -> ClientResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _client_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _client_migrations",
        [],
        |row| row.get(0),
    )?;

    for &(version, sql) in MIGRATIONS {
        if version > current_version {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(sql)?;
            tx.execute("INSERT INTO _client_migrations (version) VALUES (?1)", [version])?;
            tx.commit()?;
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FriendStatus {
    PendingSent,
    PendingReceived,
    Accepted,
}

impl FriendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendStatus::PendingSent => "pending_sent",
            FriendStatus::PendingReceived => "pending_received",
            FriendStatus::Accepted => "accepted",
        }
    }

    pub fn from_str(s: &str) -> ClientResult<Self> {
        match s {
            "pending_sent" => Ok(FriendStatus::PendingSent),
            "pending_received" => Ok(FriendStatus::PendingReceived),
            "accepted" => Ok(FriendStatus::Accepted),
            other => Err(ClientError::Storage(rusqlite::Error::InvalidColumnType(
                0,
                format!("unknown friend status {other}"),
                rusqlite::types::Type::Text,
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Friend {
    pub username: String,
    pub canonical_user_id: UserId,
    pub status: FriendStatus,
    pub devices: Vec<(UserId, u32, Vec<u8>)>,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub conversation_id: String,
    pub timestamp: i64,
    pub content: Vec<u8>,
    pub is_sent: bool,
    pub author_device_id: String,
    pub media_url: Option<String>,
    pub content_reference: Option<String>,
}

/// Thin wrapper over the shared connection exposing the client-owned tables.
pub struct LocalStore<'a> {
    conn: &'a Connection,
}

impl<'a> LocalStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn run_migrations(&self) -> ClientResult<()> {
        run_client_migrations(self.conn)
    }

    // -- friends --------------------------------------------------------

    pub fn upsert_friend(
        &self,
        username: &str,
        canonical_user_id: UserId,
        status: FriendStatus,
        now: i64,
    ) -> ClientResult<()> {
        self.conn.execute(
            "INSERT INTO friends (username, canonical_user_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(username) DO UPDATE SET status = excluded.status",
            params![username, canonical_user_id.to_string(), status.as_str(), now],
        )?;
        Ok(())
    }

    pub fn add_friend_device(
        &self,
        username: &str,
        user_id: UserId,
        device_sub_id: u32,
        identity_key: &[u8],
    ) -> ClientResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO friend_devices (username, user_id, device_sub_id, identity_key)
             VALUES (?1, ?2, ?3, ?4)",
            params![username, user_id.to_string(), device_sub_id, identity_key],
        )?;
        Ok(())
    }

    pub fn get_friend(&self, username: &str) -> ClientResult<Option<Friend>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT canonical_user_id, status FROM friends WHERE username = ?1",
                [username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((canonical_user_id, status)) = row else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT user_id, device_sub_id, identity_key FROM friend_devices WHERE username = ?1",
        )?;
        let devices = stmt
            .query_map([username], |row| {
                let user_id: String = row.get(0)?;
                let device_sub_id: u32 = row.get(1)?;
                let identity_key: Vec<u8> = row.get(2)?;
                Ok((user_id, device_sub_id, identity_key))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(uid, dsid, key)| {
                let uid: UserId = uid.parse().map_err(|_| {
                    ClientError::Storage(rusqlite::Error::InvalidColumnType(
                        0,
                        "user_id".to_string(),
                        rusqlite::types::Type::Text,
                    ))
                })?;
                Ok((uid, dsid, key))
            })
            .collect::<ClientResult<Vec<_>>>()?;

        Ok(Some(Friend {
            username: username.to_string(),
            canonical_user_id: canonical_user_id.parse().map_err(|_| {
                ClientError::Storage(rusqlite::Error::InvalidColumnType(
                    0,
                    "canonical_user_id".to_string(),
                    rusqlite::types::Type::Text,
                ))
            })?,
            status: FriendStatus::from_str(&status)?,
            devices,
        }))
    }

    /// Find the friend (if any) who already lists `user_id` as one of their devices.
    pub fn find_friend_by_device_user_id(&self, user_id: UserId) -> ClientResult<Option<String>> {
        let username: Option<String> = self
            .conn
            .query_row(
                "SELECT username FROM friend_devices WHERE user_id = ?1 LIMIT 1",
                [user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(username)
    }

    pub fn accepted_friends(&self) -> ClientResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT username FROM friends WHERE status = 'accepted'")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every friend with its full device list, for a full-state snapshot
    /// (§4.7 `SYNC_BLOB`).
    pub fn all_friends(&self) -> ClientResult<Vec<Friend>> {
        let mut stmt = self.conn.prepare("SELECT username FROM friends")?;
        let usernames: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut friends = Vec::with_capacity(usernames.len());
        for username in usernames {
            if let Some(friend) = self.get_friend(&username)? {
                friends.push(friend);
            }
        }
        Ok(friends)
    }

    // -- messages ---------------------------------------------------------

    /// Insert a message, idempotent on `message_id` (§3 invariant).
    pub fn insert_message(&self, msg: &StoredMessage) -> ClientResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO messages
                (message_id, conversation_id, timestamp, content, is_sent, author_device_id, media_url, content_reference)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                msg.message_id.to_string(),
                msg.conversation_id,
                msg.timestamp,
                msg.content,
                msg.is_sent as i64,
                msg.author_device_id,
                msg.media_url,
                msg.content_reference,
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn messages_for_conversation(&self, conversation_id: &str) -> ClientResult<Vec<StoredMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, conversation_id, timestamp, content, is_sent, author_device_id, media_url, content_reference
             FROM messages WHERE conversation_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map([conversation_id], |row| {
                let message_id: String = row.get(0)?;
                Ok(StoredMessage {
                    message_id: message_id.parse().unwrap_or_else(|_| MessageId::new()),
                    conversation_id: row.get(1)?,
                    timestamp: row.get(2)?,
                    content: row.get(3)?,
                    is_sent: row.get::<_, i64>(4)? != 0,
                    author_device_id: row.get(5)?,
                    media_url: row.get(6)?,
                    content_reference: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every message across every conversation, for a full-state snapshot
    /// (§4.7 `SYNC_BLOB`).
    pub fn all_messages(&self) -> ClientResult<Vec<StoredMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, conversation_id, timestamp, content, is_sent, author_device_id, media_url, content_reference
             FROM messages ORDER BY conversation_id ASC, timestamp ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let message_id: String = row.get(0)?;
                Ok(StoredMessage {
                    message_id: message_id.parse().unwrap_or_else(|_| MessageId::new()),
                    conversation_id: row.get(1)?,
                    timestamp: row.get(2)?,
                    content: row.get(3)?,
                    is_sent: row.get::<_, i64>(4)? != 0,
                    author_device_id: row.get(5)?,
                    media_url: row.get(6)?,
                    content_reference: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rewrite every message filed under the raw device identifier `from`
    /// to the resolved conversation `to` (§4.7 message migration). A no-op
    /// when `from == to`. Returns the number of rows rewritten.
    pub fn migrate_messages(&self, from: &str, to: &str) -> ClientResult<u32> {
        if from == to {
            return Ok(0);
        }
        let count = self.conn.execute(
            "UPDATE messages SET conversation_id = ?1 WHERE conversation_id = ?2",
            params![to, from],
        )?;
        Ok(count as u32)
    }

    // -- attachments --------------------------------------------------------

    pub fn cache_attachment(
        &self,
        attachment_id: AttachmentId,
        content_type: &str,
        plaintext: &[u8],
        now: i64,
    ) -> ClientResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO attachments_cache (attachment_id, content_type, size_bytes, cached_at, blob)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![attachment_id.to_string(), content_type, plaintext.len() as i64, now, plaintext],
        )?;
        Ok(())
    }

    pub fn get_cached_attachment(&self, attachment_id: AttachmentId) -> ClientResult<Option<Vec<u8>>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT blob FROM attachments_cache WHERE attachment_id = ?1",
                [attachment_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob)
    }

    /// Evict one cached attachment. Used by TTL cascade (§4.8): once the
    /// CRDT record referencing an attachment expires, its plaintext cache
    /// entry no longer needs to be retained either.
    pub fn delete_cached_attachment(&self, attachment_id: AttachmentId) -> ClientResult<()> {
        self.conn.execute(
            "DELETE FROM attachments_cache WHERE attachment_id = ?1",
            [attachment_id.to_string()],
        )?;
        Ok(())
    }

    // -- CRDT records --------------------------------------------------------

    /// Like [`LocalStore::get_crdt_record`] but also returns the
    /// author-device tiebreaker needed for LWW comparison.
    pub fn get_crdt_record_full(
        &self,
        model: &str,
        record_id: &str,
    ) -> ClientResult<Option<(Vec<u8>, Option<String>, i64)>> {
        let row: Option<(Vec<u8>, Option<String>, i64)> = self
            .conn
            .query_row(
                "SELECT data, author_device_id, updated_at FROM crdt_records WHERE model = ?1 AND record_id = ?2",
                params![model, record_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(row)
    }

    pub fn upsert_crdt_record(
        &self,
        model: &str,
        record_id: &str,
        data: &[u8],
        author_device_id: Option<&str>,
        updated_at: i64,
    ) -> ClientResult<()> {
        self.conn.execute(
            "INSERT INTO crdt_records (model, record_id, data, author_device_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(model, record_id) DO UPDATE SET
                data = excluded.data,
                author_device_id = excluded.author_device_id,
                updated_at = excluded.updated_at",
            params![model, record_id, data, author_device_id, updated_at],
        )?;
        Ok(())
    }

    pub fn get_crdt_record(&self, model: &str, record_id: &str) -> ClientResult<Option<(Vec<u8>, i64)>> {
        let row: Option<(Vec<u8>, i64)> = self
            .conn
            .query_row(
                "SELECT data, updated_at FROM crdt_records WHERE model = ?1 AND record_id = ?2",
                params![model, record_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    pub fn delete_crdt_record(&self, model: &str, record_id: &str) -> ClientResult<()> {
        self.conn.execute(
            "DELETE FROM crdt_records WHERE model = ?1 AND record_id = ?2",
            params![model, record_id],
        )?;
        Ok(())
    }

    pub fn crdt_records_for_model(&self, model: &str) -> ClientResult<Vec<(String, Vec<u8>, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT record_id, data, updated_at FROM crdt_records WHERE model = ?1")?;
        let rows = stmt
            .query_map([model], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every CRDT record across every model, for a full-state snapshot
    /// (§4.7 `SYNC_BLOB`). `Private`-sync models are included: the blob only
    /// ever travels between one account's own devices.
    pub fn all_crdt_records(&self) -> ClientResult<Vec<(String, String, Vec<u8>, Option<String>, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT model, record_id, data, author_device_id, updated_at FROM crdt_records")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -- link challenges --------------------------------------------------------

    pub fn create_link_challenge(&self, code: &str, now: i64) -> ClientResult<()> {
        self.conn.execute(
            "INSERT INTO link_challenges (link_code, created_at, state) VALUES (?1, ?2, 'pending')",
            params![code, now],
        )?;
        Ok(())
    }

    pub fn consume_link_challenge(&self, code: &str) -> ClientResult<bool> {
        let state: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM link_challenges WHERE link_code = ?1",
                [code],
                |row| row.get(0),
            )
            .optional()?;

        match state.as_deref() {
            Some("pending") => {
                self.conn.execute(
                    "UPDATE link_challenges SET state = 'consumed' WHERE link_code = ?1",
                    [code],
                )?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // -- own devices --------------------------------------------------------

    pub fn register_own_device(
        &self,
        user_id: UserId,
        device_sub_id: u32,
        device_name: &str,
        identity_key: &[u8],
    ) -> ClientResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO own_devices (user_id, device_sub_id, device_name, identity_key)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id.to_string(), device_sub_id, device_name, identity_key],
        )?;
        Ok(())
    }

    pub fn own_devices(&self, user_id: UserId) -> ClientResult<Vec<(u32, Vec<u8>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT device_sub_id, identity_key FROM own_devices WHERE user_id = ?1")?;
        let rows = stmt
            .query_map([user_id.to_string()], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Purge every client-owned table. Part of self-unlink (§4.7); callers
    /// are responsible for also clearing the crypto store and credentials.
    pub fn clear_all(&self) -> ClientResult<()> {
        self.conn.execute_batch(
            "DELETE FROM friends;
             DELETE FROM friend_devices;
             DELETE FROM messages;
             DELETE FROM attachments_cache;
             DELETE FROM crdt_records;
             DELETE FROM link_challenges;
             DELETE FROM own_devices;
             DELETE FROM local_user;",
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub fn init_test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "journal_mode", "WAL").unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    conn.pragma_update(None, "busy_timeout", 5000).unwrap();
    run_client_migrations(&conn).unwrap();
    conn
}
