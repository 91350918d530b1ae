//! In-memory ordered store backed by a `BTreeMap`.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use crate::kv::{
    BatchOp, Expectation, KeyValueStore, KvCursor, KvSnapshot, StoreError, StoreResult,
    WriteBatch,
};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Process-local store. Clones share the same entries.
#[derive(Clone, Debug, Default)]
pub struct MemStore {
    entries: Arc<RwLock<Map>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> StoreResult<usize> {
        let guard = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl KeyValueStore for MemStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let guard = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let mut guard = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        guard.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> StoreResult<()> {
        let mut guard = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        guard.remove(key);
        Ok(())
    }

    fn cursor(&self) -> StoreResult<Box<dyn KvCursor>> {
        Ok(Box::new(MemCursor::new(Source::Live(self.entries.clone()))))
    }

    fn write_batch(&self) -> StoreResult<Box<dyn WriteBatch>> {
        Ok(Box::new(MemBatch {
            entries: self.entries.clone(),
            ops: Vec::new(),
            expectations: Vec::new(),
        }))
    }

    fn snapshot(&self) -> StoreResult<Option<Box<dyn KvSnapshot>>> {
        let guard = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(Some(Box::new(MemSnapshot {
            entries: Arc::new(guard.clone()),
        })))
    }
}

enum Source {
    Live(Arc<RwLock<Map>>),
    Frozen(Arc<Map>),
}

impl Source {
    fn first_from(&self, lower: Bound<&[u8]>) -> StoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        match self {
            Source::Live(entries) => {
                let guard = entries.read().map_err(|_| StoreError::Poisoned)?;
                Ok(first_in(&guard, lower))
            }
            Source::Frozen(entries) => Ok(first_in(entries, lower)),
        }
    }
}

fn first_in(map: &Map, lower: Bound<&[u8]>) -> Option<(Vec<u8>, Vec<u8>)> {
    map.range::<[u8], _>((lower, Bound::Unbounded))
        .next()
        .map(|(k, v)| (k.clone(), v.clone()))
}

/// Re-queries the map on every step, so it never holds the lock between calls.
struct MemCursor {
    source: Source,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl MemCursor {
    fn new(source: Source) -> Self {
        Self {
            source,
            current: None,
        }
    }
}

impl KvCursor for MemCursor {
    fn seek(&mut self, key: &[u8]) -> StoreResult<bool> {
        self.current = self.source.first_from(Bound::Included(key))?;
        Ok(self.current.is_some())
    }

    fn move_next(&mut self) -> StoreResult<bool> {
        let Some((key, _)) = self.current.take() else {
            return Ok(false);
        };
        self.current = self.source.first_from(Bound::Excluded(key.as_slice()))?;
        Ok(self.current.is_some())
    }

    fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }
}

struct MemBatch {
    entries: Arc<RwLock<Map>>,
    ops: Vec<BatchOp>,
    expectations: Vec<Expectation>,
}

impl WriteBatch for MemBatch {
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
        let batch = *self;
        let mut guard = batch.entries.write().map_err(|_| StoreError::Poisoned)?;
        for exp in &batch.expectations {
            if guard.get(&exp.key).map(Vec::as_slice) != exp.value.as_deref() {
                return Err(StoreError::Conflict);
            }
        }
        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => {
                    guard.insert(key, value);
                }
                BatchOp::Remove(key) => {
                    guard.remove(&key);
                }
            }
        }
        Ok(())
    }
}

struct MemSnapshot {
    entries: Arc<Map>,
}

impl KvSnapshot for MemSnapshot {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn cursor(&self) -> StoreResult<Box<dyn KvCursor>> {
        Ok(Box::new(MemCursor::new(Source::Frozen(self.entries.clone()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(cursor: &mut dyn KvCursor, from: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        if cursor.seek(from)? {
            loop {
                keys.push(cursor.key().unwrap().to_vec());
                if !cursor.move_next()? {
                    break;
                }
            }
        }
        Ok(keys)
    }

    #[test]
    fn cursor_orders_by_unsigned_bytes() -> StoreResult<()> {
        let store = MemStore::new();
        store.put(&[0xff], b"c")?;
        store.put(&[0x01, 0x02], b"b")?;
        store.put(&[0x01], b"a")?;
        let mut cursor = store.cursor()?;
        let keys = collect(cursor.as_mut(), &[])?;
        assert_eq!(keys, vec![vec![0x01], vec![0x01, 0x02], vec![0xff]]);

        assert!(cursor.seek(&[0x01, 0x00])?);
        assert_eq!(cursor.key(), Some(&[0x01, 0x02][..]));
        assert_eq!(cursor.value(), Some(&b"b"[..]));
        assert!(!cursor.seek(&[0xff, 0x00])?);
        assert_eq!(cursor.key(), None);
        Ok(())
    }

    #[test]
    fn batch_applies_all_or_nothing() -> StoreResult<()> {
        let store = MemStore::new();
        store.put(b"counter", b"1")?;

        let mut batch = store.write_batch()?;
        batch.expect(b"counter", Some(b"2"));
        batch.put(b"x", b"1");
        assert!(matches!(batch.commit(), Err(StoreError::Conflict)));
        assert_eq!(store.get(b"x")?, None);

        let mut batch = store.write_batch()?;
        batch.expect(b"counter", Some(b"1"));
        batch.expect(b"missing", None);
        batch.put(b"counter", b"2");
        batch.put(b"x", b"1");
        batch.commit()?;
        assert_eq!(store.get(b"counter")?, Some(b"2".to_vec()));
        assert_eq!(store.get(b"x")?, Some(b"1".to_vec()));
        Ok(())
    }

    #[test]
    fn dropped_batch_is_discarded() -> StoreResult<()> {
        let store = MemStore::new();
        {
            let mut batch = store.write_batch()?;
            batch.put(b"k", b"v");
        }
        let mut batch = store.write_batch()?;
        batch.put(b"k2", b"v");
        batch.discard();
        assert!(store.is_empty()?);
        Ok(())
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() -> StoreResult<()> {
        let store = MemStore::new();
        store.put(b"a", b"1")?;
        let snapshot = store.snapshot()?.expect("mem store supports snapshots");
        store.put(b"b", b"2")?;
        store.remove(b"a")?;

        assert_eq!(snapshot.get(b"a")?, Some(b"1".to_vec()));
        let mut cursor = snapshot.cursor()?;
        assert_eq!(collect(cursor.as_mut(), b"")?, vec![b"a".to_vec()]);
        Ok(())
    }

    #[test]
    fn cursor_sees_writes_made_between_steps() -> StoreResult<()> {
        let store = MemStore::new();
        store.put(b"a", b"1")?;
        store.put(b"c", b"3")?;
        let mut cursor = store.cursor()?;
        assert!(cursor.seek(b"a")?);
        store.put(b"b", b"2")?;
        assert!(cursor.move_next()?);
        assert_eq!(cursor.key(), Some(&b"b"[..]));
        Ok(())
    }
}
