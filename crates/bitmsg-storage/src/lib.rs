//! bitmsg storage -- the node's object inventory.
//!
//! Objects are stored as received (full payload, nonce included) and keyed by
//! their inventory hash. Two backends: an in-process map for tests and
//! ephemeral nodes, and SQLite (WAL mode) for persistent ones.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use bitmsg_protocol::{Command, InventoryHash, WireMessage};

/// Schema version written by this crate.
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: u32, found: u32 },
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// An object as held in the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub hash: InventoryHash,
    pub command: Command,
    /// Full object payload, nonce first.
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn new(command: Command, payload: Vec<u8>) -> Self {
        Self {
            hash: InventoryHash::of(&payload),
            command,
            payload,
            received_at: Utc::now(),
        }
    }

    /// Frame for sending back out.
    pub fn to_wire(&self) -> bitmsg_protocol::Result<WireMessage> {
        WireMessage::new(self.command.clone(), self.payload.clone())
    }
}

/// Inventory of known objects, shared across connection tasks.
pub trait InventoryStore: Send + Sync {
    fn contains(&self, hash: &InventoryHash) -> Result<bool>;
    fn get(&self, hash: &InventoryHash) -> Result<Option<StoredObject>>;
    /// Insert; returns `false` if the hash was already present.
    fn put(&self, object: &StoredObject) -> Result<bool>;
    fn hashes(&self) -> Result<Vec<InventoryHash>>;
    fn len(&self) -> Result<usize>;
    /// Drop objects received before `cutoff`. Returns how many were removed.
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// In-process inventory.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    objects: RwLock<HashMap<InventoryHash, StoredObject>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InventoryStore for MemoryInventory {
    fn contains(&self, hash: &InventoryHash) -> Result<bool> {
        let objects = self.objects.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(objects.contains_key(hash))
    }

    fn get(&self, hash: &InventoryHash) -> Result<Option<StoredObject>> {
        let objects = self.objects.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(objects.get(hash).cloned())
    }

    fn put(&self, object: &StoredObject) -> Result<bool> {
        let mut objects = self.objects.write().map_err(|_| StorageError::LockPoisoned)?;
        if objects.contains_key(&object.hash) {
            return Ok(false);
        }
        objects.insert(object.hash, object.clone());
        Ok(true)
    }

    fn hashes(&self) -> Result<Vec<InventoryHash>> {
        let objects = self.objects.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(objects.keys().copied().collect())
    }

    fn len(&self) -> Result<usize> {
        let objects = self.objects.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(objects.len())
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut objects = self.objects.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = objects.len();
        objects.retain(|_, o| o.received_at >= cutoff);
        Ok(before - objects.len())
    }
}

/// SQLite-backed inventory.
pub struct SqliteInventory {
    conn: Mutex<Connection>,
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl SqliteInventory {
    fn db(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.ensure_schema()?;
        Ok(storage)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.db()?;
        conn.execute_batch(include_str!("schema_v1.sql"))?;

        let version: u32 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0);

        if version != SCHEMA_VERSION {
            return Err(StorageError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: version,
            });
        }
        Ok(())
    }

    fn row_to_object(
        hash: Vec<u8>,
        command: String,
        payload: Vec<u8>,
        received_at: String,
    ) -> Result<StoredObject> {
        let hash = InventoryHash::from_slice(&hash)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let command = Command::from_wire(command.as_bytes())
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let received_at = DateTime::parse_from_rfc3339(&received_at)
            .map_err(|e| StorageError::Corrupt(format!("received_at: {e}")))?
            .with_timezone(&Utc);
        Ok(StoredObject {
            hash,
            command,
            payload,
            received_at,
        })
    }
}

impl InventoryStore for SqliteInventory {
    fn contains(&self, hash: &InventoryHash) -> Result<bool> {
        let conn = self.db()?;
        let found: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM objects WHERE hash = ?1",
            params![&hash.0[..]],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn get(&self, hash: &InventoryHash) -> Result<Option<StoredObject>> {
        let conn = self.db()?;
        let row = conn
            .query_row(
                "SELECT hash, command, payload, received_at FROM objects WHERE hash = ?1",
                params![&hash.0[..]],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((hash, command, payload, received_at)) => {
                Self::row_to_object(hash, command, payload, received_at).map(Some)
            }
            None => Ok(None),
        }
    }

    fn put(&self, object: &StoredObject) -> Result<bool> {
        let conn = self.db()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO objects (hash, command, payload, received_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &object.hash.0[..],
                object.command.as_str(),
                &object.payload,
                timestamp(&object.received_at),
            ],
        )?;
        if inserted > 0 {
            tracing::debug!(
                hash = %object.hash,
                command = %object.command,
                "storage: object stored"
            );
        }
        Ok(inserted > 0)
    }

    fn hashes(&self) -> Result<Vec<InventoryHash>> {
        let conn = self.db()?;
        let mut stmt = conn.prepare("SELECT hash FROM objects ORDER BY received_at")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

        let mut hashes = Vec::new();
        for raw in rows {
            let raw = raw?;
            let hash = InventoryHash::from_slice(&raw)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
            hashes.push(hash);
        }
        Ok(hashes)
    }

    fn len(&self) -> Result<usize> {
        let conn = self.db()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.db()?;
        let removed = conn.execute(
            "DELETE FROM objects WHERE received_at < ?1",
            params![timestamp(&cutoff)],
        )?;
        if removed > 0 {
            tracing::info!(removed, "storage: pruned expired objects");
        }
        Ok(removed)
    }
}
