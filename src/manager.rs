//! Dictionary manager: the only component that touches the key-value store.
//!
//! Dictionaries are nodes of a tree laid out in one flat keyspace (see
//! [`crate::codec`]). The manager allocates ids from a counter stored in the
//! same keyspace, resolves and writes pointer entries, deletes subtrees in
//! bounded batches, and iterates the item or dictionary range of a node.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::codec::{
    COUNTER_KEY, DictionaryId, EntryKind, VarintBuf, decode_counter, decode_pointer,
    encode_counter, encode_key, encode_pointer, encode_prefix,
};
use crate::config::{Config, ManagerConfig};
use crate::error::{NamespaceError, Result};
use crate::kv::{KeyValueStore, KvCursor, StoreError, StoreResult};
use crate::namespace::Dictionary;
use crate::store::SqliteStore;
use crate::value::{Value, decode_item, encode_item};

/// Work done by one recursive removal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemoveStats {
    /// Dictionaries deleted, including the target.
    pub dictionaries: u64,
    /// Item and pointer keys deleted.
    pub entries: u64,
    /// Write batches committed.
    pub batches: u64,
}

pub struct DictionaryManager {
    store: Arc<dyn KeyValueStore>,
    config: ManagerConfig,
    /// Serializes lookup-or-allocate in [`DictionaryManager::create_dictionary`].
    create_lock: Mutex<()>,
}

impl DictionaryManager {
    pub fn open(store: Arc<dyn KeyValueStore>, config: ManagerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            store,
            config,
            create_lock: Mutex::new(()),
        }))
    }

    /// Open (or create) an SQLite database at `path`.
    pub fn open_path(path: &Path, config: &Config) -> Result<Arc<Self>> {
        let store = SqliteStore::open_or_create(path, &config.store)?;
        Self::open(Arc::new(store), config.manager.clone())
    }

    /// Handle on the root dictionary, which always exists.
    pub fn root(self: &Arc<Self>) -> Dictionary {
        Dictionary::new(self.clone(), DictionaryId::ROOT)
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Highest id handed out so far; the root when nothing was allocated.
    pub fn last_allocated_id(&self) -> Result<DictionaryId> {
        Ok(self.read_counter()?.0)
    }

    pub fn create_dictionary(&self, parent: DictionaryId, name: &str) -> Result<DictionaryId> {
        let key = encode_key(parent, EntryKind::Dictionary, name)?;
        let _guard = self.create_lock.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(id) = self.read_pointer(parent, &key)? {
            return Ok(id);
        }
        match self.allocate(&key)? {
            Ok(id) => {
                debug!(parent = parent.get(), id = id.get(), name, "allocated dictionary");
                Ok(id)
            }
            Err(source) => {
                warn!(parent = parent.get(), name, error = %source, "dictionary allocation commit failed, re-checking pointer");
                match self.read_pointer(parent, &key)? {
                    Some(id) => Ok(id),
                    None => Err(NamespaceError::AllocationConflict {
                        parent: parent.get(),
                        name: name.to_string(),
                        source,
                    }),
                }
            }
        }
    }

    pub fn get_dictionary(&self, parent: DictionaryId, name: &str) -> Result<Option<DictionaryId>> {
        let key = encode_key(parent, EntryKind::Dictionary, name)?;
        self.read_pointer(parent, &key)
    }

    /// Deletes the named child and its whole subtree. Returns `false` when no
    /// such child exists.
    ///
    /// Not atomic: a failure part way leaves a partially emptied subtree whose
    /// pointer is still in place, and calling again resumes the removal.
    pub fn remove_dictionary(&self, parent: DictionaryId, name: &str) -> Result<bool> {
        Ok(self.remove_dictionary_with_stats(parent, name)?.is_some())
    }

    pub fn remove_dictionary_with_stats(
        &self,
        parent: DictionaryId,
        name: &str,
    ) -> Result<Option<RemoveStats>> {
        let key = encode_key(parent, EntryKind::Dictionary, name)?;
        let Some(child) = self.read_pointer(parent, &key)? else {
            return Ok(None);
        };
        let mut stats = RemoveStats::default();
        self.remove_subtree(parent, child, key, &mut stats)?;
        debug!(
            parent = parent.get(),
            id = child.get(),
            name,
            dictionaries = stats.dictionaries,
            entries = stats.entries,
            batches = stats.batches,
            "removed dictionary"
        );
        Ok(Some(stats))
    }

    pub fn get_item(&self, parent: DictionaryId, name: &str) -> Result<Option<Value>> {
        let key = encode_key(parent, EntryKind::Item, name)?;
        match self.store.get(&key)? {
            None => Ok(None),
            Some(bytes) => decode_item(&bytes)
                .map(Some)
                .map_err(|detail| NamespaceError::corrupt(parent.get(), format!("item `{name}`: {detail}"))),
        }
    }

    /// Stores `value` under `name`; `None` removes the item.
    pub fn put_item(&self, parent: DictionaryId, name: &str, value: Option<&Value>) -> Result<()> {
        let Some(value) = value else {
            return self.remove_item(parent, name);
        };
        let key = encode_key(parent, EntryKind::Item, name)?;
        let bytes = encode_item(value)?;
        self.store.put(&key, &bytes)?;
        Ok(())
    }

    pub fn remove_item(&self, parent: DictionaryId, name: &str) -> Result<()> {
        let key = encode_key(parent, EntryKind::Item, name)?;
        self.store.remove(&key)?;
        Ok(())
    }

    pub fn iterate_items(&self, parent: DictionaryId) -> Result<ItemIter> {
        Ok(ItemIter {
            entries: PrefixIter::new(parent, EntryKind::Item, self.read_cursor()?),
        })
    }

    pub fn iterate_dictionaries(&self, parent: DictionaryId) -> Result<DictionaryIter> {
        Ok(DictionaryIter {
            entries: PrefixIter::new(parent, EntryKind::Dictionary, self.read_cursor()?),
        })
    }

    fn read_cursor(&self) -> Result<Box<dyn KvCursor>> {
        if self.config.snapshot_iterators {
            if let Some(snapshot) = self.store.snapshot()? {
                return Ok(snapshot.cursor()?);
            }
        }
        Ok(self.store.cursor()?)
    }

    fn read_pointer(&self, parent: DictionaryId, key: &[u8]) -> Result<Option<DictionaryId>> {
        let Some(value) = self.store.get(key)? else {
            return Ok(None);
        };
        decode_pointer(&value).map(Some).ok_or_else(|| {
            NamespaceError::corrupt(parent.get(), format!("malformed pointer value {value:02x?}"))
        })
    }

    /// Current counter and its raw bytes, for use as a commit precondition.
    fn read_counter(&self) -> Result<(DictionaryId, Option<Vec<u8>>)> {
        let raw = self.store.get(COUNTER_KEY)?;
        let last = match &raw {
            None => DictionaryId::ROOT,
            Some(bytes) => decode_counter(bytes)
                .ok_or_else(|| NamespaceError::corrupt(0, "malformed dictionary id counter"))?,
        };
        Ok((last, raw))
    }

    /// Bumps the counter and writes the pointer in one batch. The batch
    /// requires the counter to be unchanged and the pointer absent, so
    /// concurrent allocators sharing the store cannot mint the same id.
    ///
    /// The outer error covers reading the counter and opening the batch; the
    /// inner one is the commit outcome.
    fn allocate(&self, pointer_key: &[u8]) -> Result<StoreResult<DictionaryId>> {
        let (last, raw) = self.read_counter()?;
        let id = last.next().ok_or(NamespaceError::IdSpaceExhausted)?;
        let mut batch = self.store.write_batch()?;
        batch.expect(COUNTER_KEY, raw.as_deref());
        batch.expect(pointer_key, None);
        batch.put(COUNTER_KEY, &encode_counter(id));
        batch.put(pointer_key, &encode_pointer(id));
        Ok(batch.commit().map(|()| id))
    }

    /// Deletes dictionary `root` and finally its pointer `root_key` in
    /// `parent`, depth-first without recursion.
    ///
    /// Keys from every frame go into one queue that is committed in batches
    /// of `remove_batch_size`, so the number of commits depends on the number
    /// of keys and not on the shape of the tree. Each frame resumes its scans
    /// after the last key it queued. A dictionary's pointer is queued only
    /// after all of its own keys, so it is committed in the same batch as the
    /// end of its subtree or in a later one.
    fn remove_subtree(
        &self,
        parent: DictionaryId,
        root: DictionaryId,
        root_key: Vec<u8>,
        stats: &mut RemoveStats,
    ) -> Result<()> {
        let mut last_allocated = self.read_counter()?.0;
        let mut pending: Vec<Vec<u8>> = Vec::new();
        // dictionaries on the path from `parent` down to the current frame
        let mut active = HashSet::from([parent, root]);
        let mut stack = vec![Frame::new(root, root_key)];

        while let Some(frame) = stack.last_mut() {
            if let Some((child, key)) = frame.pending_children.pop() {
                active.insert(child);
                stack.push(Frame::new(child, key));
                continue;
            }

            let id = frame.id;
            let kind = match frame.stage {
                Stage::Dictionaries => EntryKind::Dictionary,
                Stage::Items => EntryKind::Item,
            };
            let entries = self.scan_after(id, kind, frame.resume.as_deref())?;
            let Some((last_key, _)) = entries.last() else {
                match frame.stage {
                    Stage::Dictionaries => {
                        frame.stage = Stage::Items;
                        frame.resume = None;
                    }
                    Stage::Items => {
                        pending.push(std::mem::take(&mut frame.pointer_key));
                        stack.pop();
                        active.remove(&id);
                        stats.dictionaries += 1;
                        self.flush_full(&mut pending, stats)?;
                    }
                }
                continue;
            };
            frame.resume = Some(last_key.clone());

            match frame.stage {
                Stage::Dictionaries => {
                    let mut children = Vec::with_capacity(entries.len());
                    for (key, value) in entries {
                        let child = decode_pointer(&value).ok_or_else(|| {
                            NamespaceError::corrupt(
                                id.get(),
                                format!("malformed pointer value {value:02x?} during removal"),
                            )
                        })?;
                        if active.contains(&child) {
                            return Err(NamespaceError::corrupt(
                                id.get(),
                                format!("pointer to {child} forms a cycle"),
                            ));
                        }
                        if child > last_allocated {
                            last_allocated = self.read_counter()?.0;
                            if child > last_allocated {
                                return Err(NamespaceError::corrupt(
                                    id.get(),
                                    format!("pointer to unallocated dictionary {child}"),
                                ));
                            }
                        }
                        children.push((child, key));
                    }
                    // popped from the back, so visit in name order
                    children.reverse();
                    frame.pending_children = children;
                }
                Stage::Items => {
                    pending.extend(entries.into_iter().map(|(key, _)| key));
                    self.flush_full(&mut pending, stats)?;
                }
            }
        }

        if !pending.is_empty() {
            self.remove_keys(&pending, stats)?;
        }
        Ok(())
    }

    /// Up to `remove_batch_size` entries of one range, starting after `resume`.
    fn scan_after(
        &self,
        parent: DictionaryId,
        kind: EntryKind,
        resume: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let prefix = encode_prefix(parent, kind);
        let start = match resume {
            // smallest key greater than `after`
            Some(after) => {
                let mut start = after.to_vec();
                start.push(0);
                start
            }
            None => prefix.to_vec(),
        };
        let mut cursor = self.store.cursor()?;
        let mut out = Vec::new();
        if !cursor.seek(&start)? {
            return Ok(out);
        }
        while let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
            if !key.starts_with(&prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
            if out.len() >= self.config.remove_batch_size || !cursor.move_next()? {
                break;
            }
        }
        Ok(out)
    }

    /// Commits full batches from the front of `pending`.
    fn flush_full(&self, pending: &mut Vec<Vec<u8>>, stats: &mut RemoveStats) -> Result<()> {
        let batch_size = self.config.remove_batch_size;
        while pending.len() >= batch_size {
            let rest = pending.split_off(batch_size);
            self.remove_keys(pending, stats)?;
            *pending = rest;
        }
        Ok(())
    }

    fn remove_keys(&self, keys: &[Vec<u8>], stats: &mut RemoveStats) -> Result<()> {
        let mut batch = self.store.write_batch()?;
        for key in keys {
            batch.remove(key);
        }
        batch.commit()?;
        stats.batches += 1;
        stats.entries += keys.len() as u64;
        Ok(())
    }
}

enum Stage {
    Dictionaries,
    Items,
}

/// One dictionary being emptied.
struct Frame {
    id: DictionaryId,
    /// Key of this dictionary's pointer in its parent.
    pointer_key: Vec<u8>,
    stage: Stage,
    /// Last key queued from the current range.
    resume: Option<Vec<u8>>,
    pending_children: Vec<(DictionaryId, Vec<u8>)>,
}

impl Frame {
    fn new(id: DictionaryId, pointer_key: Vec<u8>) -> Self {
        Self {
            id,
            pointer_key,
            stage: Stage::Dictionaries,
            resume: None,
            pending_children: Vec::new(),
        }
    }
}

enum CursorState {
    /// Not yet positioned at the start of the range.
    Fresh,
    /// Positioned at an entry that has not been yielded.
    Ready,
    /// Positioned at an entry that was already yielded.
    Yielded,
    Done,
}

/// Walks the entries of one kind directly under one dictionary.
struct PrefixIter {
    parent: DictionaryId,
    prefix: VarintBuf,
    cursor: Box<dyn KvCursor>,
    state: CursorState,
}

impl PrefixIter {
    fn new(parent: DictionaryId, kind: EntryKind, cursor: Box<dyn KvCursor>) -> Self {
        Self {
            parent,
            prefix: encode_prefix(parent, kind),
            cursor,
            state: CursorState::Fresh,
        }
    }

    fn seek(&mut self, name: &str) -> Result<()> {
        crate::codec::validate_name(name)?;
        let mut key = self.prefix.to_vec();
        key.extend_from_slice(name.as_bytes());
        self.state = match self.cursor.seek(&key) {
            Ok(true) => CursorState::Ready,
            Ok(false) => CursorState::Done,
            Err(err) => {
                self.state = CursorState::Done;
                return Err(err.into());
            }
        };
        Ok(())
    }

    fn step(&mut self) -> Result<Option<(String, Vec<u8>)>> {
        loop {
            match self.state {
                CursorState::Done => return Ok(None),
                CursorState::Fresh => {
                    let found = self.cursor.seek(&self.prefix)?;
                    self.state = if found { CursorState::Ready } else { CursorState::Done };
                }
                CursorState::Yielded => {
                    let found = self.cursor.move_next()?;
                    self.state = if found { CursorState::Ready } else { CursorState::Done };
                }
                CursorState::Ready => {
                    let (Some(key), Some(value)) = (self.cursor.key(), self.cursor.value()) else {
                        self.state = CursorState::Done;
                        continue;
                    };
                    let Some(name) = key.strip_prefix(self.prefix.as_slice()) else {
                        self.state = CursorState::Done;
                        continue;
                    };
                    self.state = CursorState::Yielded;
                    if name.is_empty() {
                        continue;
                    }
                    let name = String::from_utf8(name.to_vec()).map_err(|_| {
                        NamespaceError::corrupt(self.parent.get(), format!("non UTF-8 name {name:02x?}"))
                    })?;
                    return Ok(Some((name, value.to_vec())));
                }
            }
        }
    }

    fn next_raw(&mut self) -> Option<Result<(String, Vec<u8>)>> {
        match self.step() {
            Ok(entry) => entry.map(Ok),
            Err(err) => {
                self.state = CursorState::Done;
                Some(Err(err))
            }
        }
    }
}

/// Items of one dictionary in name order.
pub struct ItemIter {
    entries: PrefixIter,
}

impl ItemIter {
    pub fn parent(&self) -> DictionaryId {
        self.entries.parent
    }

    /// Resume at the first item whose name is `>= name`.
    pub fn seek(&mut self, name: &str) -> Result<()> {
        self.entries.seek(name)
    }
}

impl Iterator for ItemIter {
    type Item = Result<(String, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        let parent = self.entries.parent;
        self.entries.next_raw().map(|entry| {
            let (name, bytes) = entry?;
            let value = decode_item(&bytes).map_err(|detail| {
                NamespaceError::corrupt(parent.get(), format!("item `{name}`: {detail}"))
            })?;
            Ok((name, value))
        })
    }
}

/// Child dictionaries of one dictionary in name order.
pub struct DictionaryIter {
    entries: PrefixIter,
}

impl DictionaryIter {
    pub fn parent(&self) -> DictionaryId {
        self.entries.parent
    }

    /// Resume at the first child whose name is `>= name`.
    pub fn seek(&mut self, name: &str) -> Result<()> {
        self.entries.seek(name)
    }
}

impl Iterator for DictionaryIter {
    type Item = Result<(String, DictionaryId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let parent = self.entries.parent;
        self.entries.next_raw().map(|entry| {
            let (name, bytes) = entry?;
            let id = decode_pointer(&bytes).ok_or_else(|| {
                NamespaceError::corrupt(parent.get(), format!("malformed pointer for `{name}`"))
            })?;
            Ok((name, id))
        })
    }
}
