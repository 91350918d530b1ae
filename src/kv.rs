//! Minimal ordered key-value store contract consumed by the namespace layer.
//!
//! Keys and values are opaque byte strings. Keys are ordered lexicographically
//! by unsigned byte value. Backends: [`crate::mem_store::MemStore`] and
//! [`crate::store::SqliteStore`].

use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a key-value backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A write batch precondition did not hold at commit time.
    #[error("write batch precondition failed")]
    Conflict,

    #[error("store lock poisoned")]
    Poisoned,

    #[error("database already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("database not found at {}", .0.display())]
    Missing(PathBuf),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Ordered byte-keyed store.
///
/// Implementations are shared between threads; cursors, batches and
/// snapshots they hand out are owned values that keep whatever backend state
/// they need alive.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Removing an absent key succeeds.
    fn remove(&self, key: &[u8]) -> StoreResult<()>;

    /// Lazy forward cursor over the live store.
    fn cursor(&self) -> StoreResult<Box<dyn KvCursor>>;

    fn write_batch(&self) -> StoreResult<Box<dyn WriteBatch>>;

    /// Point-in-time read view, or `None` when the backend has none.
    fn snapshot(&self) -> StoreResult<Option<Box<dyn KvSnapshot>>> {
        Ok(None)
    }

    /// Reclaim unused space. Returns `false` when the backend has nothing to do.
    fn compact(&self) -> StoreResult<bool> {
        Ok(false)
    }
}

/// Single-pass forward cursor.
///
/// A fresh cursor is unpositioned; `seek` positions it at the first key
/// `>= key`. After either call returns `false` the cursor is exhausted until
/// the next `seek`.
pub trait KvCursor {
    fn seek(&mut self, key: &[u8]) -> StoreResult<bool>;

    fn move_next(&mut self) -> StoreResult<bool>;

    fn key(&self) -> Option<&[u8]>;

    fn value(&self) -> Option<&[u8]>;
}

/// Mutations applied atomically by [`WriteBatch::commit`].
///
/// Dropping a batch without committing discards it.
pub trait WriteBatch {
    fn put(&mut self, key: &[u8], value: &[u8]);

    fn remove(&mut self, key: &[u8]);

    /// Require `key` to hold `expected` (or be absent for `None`) when the
    /// batch commits; otherwise the commit fails with [`StoreError::Conflict`]
    /// and nothing is applied.
    fn expect(&mut self, key: &[u8], expected: Option<&[u8]>);

    /// Number of queued mutations.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn commit(self: Box<Self>) -> StoreResult<()>;

    fn discard(self: Box<Self>) {}
}

/// Consistent read view of a store.
pub trait KvSnapshot: Send + Sync {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    fn cursor(&self) -> StoreResult<Box<dyn KvCursor>>;
}

/// Queued batch operation shared by the bundled backends.
#[derive(Clone, Debug)]
pub(crate) enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
}

/// Commit precondition shared by the bundled backends.
#[derive(Clone, Debug)]
pub(crate) struct Expectation {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}
