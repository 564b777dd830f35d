//! Crypto storage layer — SQLite-backed store for all crypto state.

pub mod migrations;
pub mod identity_store;
pub mod pre_key_store;
pub mod signed_pre_key_store;
pub mod session_store;
pub mod sender_key_store;

use crate::error::CryptoError;
use rusqlite::Connection;

/// Central storage coordinator for all crypto state.
/// Wraps a borrowed SQLite connection and exposes libsignal store
/// traits plus convenience methods.
pub struct CryptoStore<'a> {
    conn: &'a Connection,
}

impl<'a> CryptoStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn run_migrations(&self) -> Result<(), CryptoError> {
        migrations::run_crypto_migrations(self.conn)
    }

    /// Returns `true` if an identity keypair row already exists.
    pub fn has_identity(&self) -> Result<bool, CryptoError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM crypto_identity_keys WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn load_sealed_identity_row(
        &self,
    ) -> Result<(Vec<u8>, crate::master_key::SealedIdentityBlob), CryptoError> {
        self.conn
            .query_row(
                "SELECT public_key, salt, nonce, private_key FROM crypto_identity_keys WHERE id = 1",
                [],
                |row| {
                    let public_key: Vec<u8> = row.get(0)?;
                    let salt: Vec<u8> = row.get(1)?;
                    let nonce: Vec<u8> = row.get(2)?;
                    let ciphertext: Vec<u8> = row.get(3)?;
                    Ok((public_key, salt, nonce, ciphertext))
                },
            )
            .map_err(|_| CryptoError::IdentityNotInitialized)
            .map(|(public_key, salt, nonce, ciphertext)| {
                (
                    public_key,
                    crate::master_key::SealedIdentityBlob { salt, nonce, ciphertext },
                )
            })
    }

    /// Seal `private_key` under `password` (§3, §6) and persist it alongside
    /// the plaintext public key. Caches `password` against `public_key` so
    /// later cache-only reads in this process don't need it again.
    pub fn store_identity_keypair(
        &self,
        public_key: &[u8],
        private_key: &[u8],
        password: &str,
    ) -> Result<(), CryptoError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs() as i64;

        let blob = crate::master_key::seal_identity_blob(private_key, password)?;

        self.conn.execute(
            "INSERT OR REPLACE INTO crypto_identity_keys (id, public_key, private_key, salt, nonce, created_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![public_key, blob.ciphertext, blob.salt, blob.nonce, now],
        )?;

        crate::master_key::cache_passphrase(public_key, password);
        Ok(())
    }

    /// Decrypt the stored identity keypair with an explicit password,
    /// caching it for subsequent cache-only reads this process.
    pub fn get_identity_keypair(&self, password: &str) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let (public_key, blob) = self.load_sealed_identity_row()?;
        let private_key = crate::master_key::open_identity_blob(&blob, password)?;
        crate::master_key::cache_passphrase(&public_key, password);
        Ok((public_key, private_key.to_vec()))
    }

    /// Decrypt the stored identity keypair using a previously-cached
    /// password for this public key. Used by callers that run after the
    /// identity has already been unlocked once this process (libsignal's
    /// `IdentityKeyStore`, pre-key rotation, challenge signing).
    pub fn get_identity_keypair_cached(&self) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let (public_key, blob) = self.load_sealed_identity_row()?;
        let password = crate::master_key::cached_passphrase(&public_key)
            .ok_or(CryptoError::IdentityLocked)?;
        let private_key = crate::master_key::open_identity_blob(&blob, &password)?;
        Ok((public_key, private_key.to_vec()))
    }

    pub fn count_available_pre_keys(&self) -> Result<u32, CryptoError> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM crypto_pre_keys",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn prune_skipped_message_keys(&self, max_age_seconds: u64) -> Result<u32, CryptoError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs();
        let cutoff = now.saturating_sub(max_age_seconds) as i64;

        let deleted = self.conn.execute(
            "DELETE FROM crypto_skipped_message_keys WHERE created_at < ?1",
            [cutoff],
        )?;
        Ok(deleted as u32)
    }

    pub fn store_config(&self, key: &str, value: &[u8]) -> Result<(), CryptoError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO crypto_config (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    pub fn get_config(&self, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        let result = self.conn.query_row(
            "SELECT value FROM crypto_config WHERE key = ?1",
            [key],
            |row| row.get(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CryptoError::from(e)),
        }
    }
}

/// Execute a closure within a SQLite transaction.
/// Commits on Ok, rolls back on Err.
pub fn with_transaction<F, T>(conn: &Connection, f: F) -> Result<T, CryptoError>
where
    F: FnOnce(&CryptoStore) -> Result<T, CryptoError>,
{
    let tx = conn.unchecked_transaction()?;
    let store = CryptoStore::new(conn);
    match f(&store) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            // Transaction drops without commit = implicit rollback
            drop(tx);
            Err(e)
        }
    }
}

/// Create an in-memory database with migrations applied.
/// For use in tests only.
#[cfg(test)]
pub fn init_test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "journal_mode", "WAL").unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    conn.pragma_update(None, "busy_timeout", 5000).unwrap();
    migrations::run_crypto_migrations(&conn).unwrap();
    conn
}
