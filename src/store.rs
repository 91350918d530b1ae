//! SQLite-backed ordered store.
//!
//! All entries live in one `kv` table keyed by BLOB. SQLite orders BLOBs with
//! `memcmp`, which is the unsigned lexicographic order the namespace layer
//! relies on.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{
    Connection, DatabaseName, OpenFlags, OptionalExtension, TransactionBehavior, params,
};
use tracing::debug;

use crate::config::StoreConfig;
use crate::kv::{
    BatchOp, Expectation, KeyValueStore, KvCursor, KvSnapshot, StoreError, StoreResult,
    WriteBatch,
};

pub fn derive_db_path(name: &str) -> PathBuf {
    let mut path = PathBuf::from(name);
    if path.extension().is_none() {
        path.set_extension("kvtree.db");
    }
    path
}

pub fn ensure_parent_dirs(path: &Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn create_store(path: &Path, config: &StoreConfig) -> StoreResult<Connection> {
    ensure_parent_dirs(path)?;
    if path.exists() {
        return Err(StoreError::AlreadyExists(path.to_path_buf()));
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_READ_WRITE,
    )?;

    configure_pragmas(&conn, config)?;
    install_schema(&conn)?;
    Ok(conn)
}

pub fn open_store(path: &Path, config: &StoreConfig) -> StoreResult<Connection> {
    if !path.exists() {
        return Err(StoreError::Missing(path.to_path_buf()));
    }

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
    configure_pragmas(&conn, config)?;
    install_schema(&conn)?;
    Ok(conn)
}

pub fn configure_pragmas(conn: &Connection, config: &StoreConfig) -> StoreResult<()> {
    conn.pragma_update(Some(DatabaseName::Main), "journal_mode", "WAL")?;
    conn.pragma_update(Some(DatabaseName::Main), "synchronous", "NORMAL")?;
    conn.pragma_update(Some(DatabaseName::Main), "temp_store", "MEMORY")?;
    conn.pragma_update(Some(DatabaseName::Main), "mmap_size", 268_435_456i64)?;
    conn.pragma_update(Some(DatabaseName::Main), "cache_size", -262_144i64)?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}

pub fn install_schema(conn: &Connection) -> StoreResult<()> {
    const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
  key   BLOB PRIMARY KEY,
  value BLOB NOT NULL
) WITHOUT ROWID;
"#;

    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Connection shared by a store and the cursors and batches it hands out.
struct Shared {
    conn: Mutex<Connection>,
    /// Holds an open read transaction that must be rolled back on drop.
    snapshot: bool,
}

impl Shared {
    fn new(conn: Connection, snapshot: bool) -> Arc<Self> {
        Arc::new(Self {
            conn: Mutex::new(conn),
            snapshot,
        })
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
        let value = stmt.query_row(params![key], |row| row.get(0)).optional()?;
        Ok(value)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if self.snapshot {
            if let Ok(conn) = self.conn.get_mut() {
                let _ = conn.execute_batch("ROLLBACK");
            }
        }
    }
}

/// [`KeyValueStore`] over a single SQLite connection.
pub struct SqliteStore {
    shared: Arc<Shared>,
    path: Option<PathBuf>,
    config: StoreConfig,
}

impl SqliteStore {
    /// Create a new database file; fails if it already exists.
    pub fn create(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        let conn = create_store(path, config)?;
        Ok(Self::from_parts(conn, Some(path.to_path_buf()), config))
    }

    /// Open an existing database file.
    pub fn open(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        let conn = open_store(path, config)?;
        Ok(Self::from_parts(conn, Some(path.to_path_buf()), config))
    }

    pub fn open_or_create(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        if path.exists() {
            Self::open(path, config)
        } else {
            Self::create(path, config)
        }
    }

    /// Private in-memory database; has no snapshot support.
    pub fn in_memory(config: &StoreConfig) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        install_schema(&conn)?;
        Ok(Self::from_parts(conn, None, config))
    }

    fn from_parts(conn: Connection, path: Option<PathBuf>, config: &StoreConfig) -> Self {
        Self {
            shared: Shared::new(conn, false),
            path,
            config: config.clone(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.shared.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let conn = self.shared.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
        stmt.execute(params![key, value])?;
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> StoreResult<()> {
        let conn = self.shared.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
        stmt.execute(params![key])?;
        Ok(())
    }

    fn cursor(&self) -> StoreResult<Box<dyn KvCursor>> {
        Ok(Box::new(SqliteCursor::new(
            self.shared.clone(),
            self.config.cursor_page_size,
        )))
    }

    fn write_batch(&self) -> StoreResult<Box<dyn WriteBatch>> {
        Ok(Box::new(SqliteBatch {
            shared: self.shared.clone(),
            ops: Vec::new(),
            expectations: Vec::new(),
        }))
    }

    /// Opens a second read-only connection pinned inside a read transaction.
    fn snapshot(&self) -> StoreResult<Option<Box<dyn KvSnapshot>>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))?;
        conn.execute_batch("BEGIN DEFERRED")?;
        // the first read fixes the snapshot
        conn.query_row("SELECT count(*) FROM kv", [], |row| row.get::<_, i64>(0))?;
        Ok(Some(Box::new(SqliteSnapshot {
            shared: Shared::new(conn, true),
            page_size: self.config.cursor_page_size,
        })))
    }

    fn compact(&self) -> StoreResult<bool> {
        let conn = self.shared.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute_batch("VACUUM")?;
        debug!(path = ?self.path, "vacuumed sqlite store");
        Ok(true)
    }
}

/// Reads the table in pages of `page_size` rows, resuming after the last key.
struct SqliteCursor {
    shared: Arc<Shared>,
    page_size: usize,
    page: VecDeque<(Vec<u8>, Vec<u8>)>,
    current: Option<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
}

impl SqliteCursor {
    fn new(shared: Arc<Shared>, page_size: usize) -> Self {
        Self {
            shared,
            page_size: page_size.max(1),
            page: VecDeque::new(),
            current: None,
            exhausted: true,
        }
    }

    fn fetch(&mut self, lower: &[u8], inclusive: bool) -> StoreResult<()> {
        let sql = if inclusive {
            "SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key LIMIT ?2"
        } else {
            "SELECT key, value FROM kv WHERE key > ?1 ORDER BY key LIMIT ?2"
        };
        let rows = {
            let conn = self.shared.conn.lock().map_err(|_| StoreError::Poisoned)?;
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt
                .query_map(params![lower, self.page_size as i64], |row| {
                    Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<Result<VecDeque<_>, _>>()?;
            rows
        };
        self.exhausted = rows.len() < self.page_size;
        self.page = rows;
        Ok(())
    }
}

impl KvCursor for SqliteCursor {
    fn seek(&mut self, key: &[u8]) -> StoreResult<bool> {
        self.current = None;
        self.fetch(key, true)?;
        self.current = self.page.pop_front();
        Ok(self.current.is_some())
    }

    fn move_next(&mut self) -> StoreResult<bool> {
        let Some((key, _)) = self.current.take() else {
            return Ok(false);
        };
        if self.page.is_empty() && !self.exhausted {
            self.fetch(&key, false)?;
        }
        self.current = self.page.pop_front();
        Ok(self.current.is_some())
    }

    fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }
}

struct SqliteBatch {
    shared: Arc<Shared>,
    ops: Vec<BatchOp>,
    expectations: Vec<Expectation>,
}

impl WriteBatch for SqliteBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push(BatchOp::Put(key.to_vec(), value.to_vec()));
    }

    fn remove(&mut self, key: &[u8]) {
        self.ops.push(BatchOp::Remove(key.to_vec()));
    }

    fn expect(&mut self, key: &[u8], expected: Option<&[u8]>) {
        self.expectations.push(Expectation {
            key: key.to_vec(),
            value: expected.map(<[u8]>::to_vec),
        });
    }

    fn len(&self) -> usize {
        self.ops.len()
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut conn = self.shared.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for exp in &self.expectations {
            let current: Option<Vec<u8>> = tx
                .query_row("SELECT value FROM kv WHERE key = ?1", params![exp.key], |row| {
                    row.get(0)
                })
                .optional()?;
            if current != exp.value {
                return Err(StoreError::Conflict);
            }
        }
        {
            let mut put = tx.prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
            let mut delete = tx.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
            for op in &self.ops {
                match op {
                    BatchOp::Put(key, value) => {
                        put.execute(params![key, value])?;
                    }
                    BatchOp::Remove(key) => {
                        delete.execute(params![key])?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

struct SqliteSnapshot {
    shared: Arc<Shared>,
    page_size: usize,
}

impl KvSnapshot for SqliteSnapshot {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.shared.get(key)
    }

    fn cursor(&self) -> StoreResult<Box<dyn KvCursor>> {
        Ok(Box::new(SqliteCursor::new(self.shared.clone(), self.page_size)))
    }
}
