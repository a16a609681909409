//! Environment persistence using SQLite.
//!
//! Keeps runner variables between invocations so a pagination can span many
//! separate `pagekeep handle` calls.

use super::{seal, EnvironmentStore};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// File-backed environment.
///
/// # Schema
/// ```sql
/// CREATE TABLE environment (
///     key        TEXT PRIMARY KEY,
///     value      TEXT NOT NULL,   -- plaintext, or base64 ciphertext when nonce is set
///     nonce      TEXT,            -- base64 nonce for sealed values
///     updated_at TEXT NOT NULL    -- RFC 3339
/// );
/// ```
///
/// Keys registered with [`with_secret_keys`](Self::with_secret_keys) are sealed
/// on write. Reads decide by the stored nonce, so values written before a key
/// became secret stay readable.
pub struct SqliteEnvironment {
    conn: Mutex<Connection>,
    master_key: Option<Vec<u8>>,
    secret_keys: HashSet<String>,
}

impl SqliteEnvironment {
    /// Opens (or creates) the SQLite database and ensures the table exists.
    ///
    /// # Arguments
    /// * `db_path` - Database file; `":memory:"` gives a throwaway environment
    ///
    /// # Returns
    /// * `Ok(SqliteEnvironment)` - Store with no secret keys
    /// * `Err` - If the file cannot be opened or the table cannot be created
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open environment DB at {}", path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
            master_key: None,
            secret_keys: HashSet::new(),
        };
        store.create_table()?;
        Ok(store)
    }

    /// Seals the given keys on write.
    ///
    /// # Arguments
    /// * `encryption_key` - Base64-encoded 32-byte master key
    /// * `secret_keys` - Environment keys stored encrypted (normally the credential)
    ///
    /// # Returns
    /// * `Ok(SqliteEnvironment)` - The same store, now sealing `secret_keys`
    /// * `Err` - If `encryption_key` is invalid
    pub fn with_secret_keys<I, S>(mut self, encryption_key: &str, secret_keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.master_key =
            Some(seal::parse_master_key(encryption_key).context("Invalid encryption key")?);
        self.secret_keys = secret_keys.into_iter().map(Into::into).collect();
        Ok(self)
    }

    fn create_table(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS environment (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                nonce      TEXT,
                updated_at TEXT NOT NULL
            );",
        )
        .context("Failed to create environment table")?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("environment connection lock poisoned"))
    }

    fn seals(&self, key: &str) -> Option<&[u8]> {
        match &self.master_key {
            Some(master) if self.secret_keys.contains(key) => Some(master.as_slice()),
            _ => None,
        }
    }

    /// Returns the raw stored row `(value, nonce)` without decrypting.
    pub fn raw(&self, key: &str) -> Result<Option<(String, Option<String>)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT value, nonce FROM environment WHERE key = ?1")
            .context("Failed to prepare environment query")?;
        let mut rows = stmt
            .query(params![key])
            .context("Failed to query environment")?;

        match rows.next().context("Failed to read environment row")? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
            None => Ok(None),
        }
    }
}

impl EnvironmentStore for SqliteEnvironment {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let Some((value, nonce)) = self.raw(key)? else {
            return Ok(None);
        };

        match nonce {
            None => Ok(Some(value)),
            Some(nonce) => {
                let master = self.master_key.as_deref().ok_or_else(|| {
                    anyhow!(
                        "'{}' is encrypted but no encryption key is configured",
                        key
                    )
                })?;
                let sealed = seal::Sealed {
                    ciphertext: value,
                    nonce,
                };
                let plaintext = seal::open(&sealed, master)
                    .with_context(|| format!("Failed to decrypt '{}'", key))?;
                Ok(Some(plaintext))
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let (stored, nonce) = match self.seals(key) {
            Some(master) => {
                let sealed = seal::seal(value, master)
                    .with_context(|| format!("Failed to encrypt '{}'", key))?;
                (sealed.ciphertext, Some(sealed.nonce))
            }
            None => (value.to_string(), None),
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO environment (key, value, nonce, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                nonce = excluded.nonce,
                updated_at = excluded.updated_at",
            params![key, stored, nonce, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to set '{}'", key))?;
        Ok(())
    }

    fn unset(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn
            .execute("DELETE FROM environment WHERE key = ?1", params![key])
            .with_context(|| format!("Failed to unset '{}'", key))?;
        Ok(rows > 0)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key FROM environment ORDER BY key")
            .context("Failed to prepare keys query")?;
        let keys = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to query keys")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read keys")?;
        Ok(keys)
    }
}
