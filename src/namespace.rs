//! Caller-facing handles over the dictionary tree.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::codec::DictionaryId;
use crate::config::{Config, ManagerConfig};
use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::manager::{DictionaryIter, DictionaryManager, ItemIter, RemoveStats};
use crate::value::Value;

/// Reference to one dictionary. Cloning is cheap; the dictionary itself is
/// not copied.
#[derive(Clone)]
pub struct Dictionary {
    manager: Arc<DictionaryManager>,
    id: DictionaryId,
}

impl Dictionary {
    pub(crate) fn new(manager: Arc<DictionaryManager>, id: DictionaryId) -> Self {
        Self { manager, id }
    }

    pub fn id(&self) -> DictionaryId {
        self.id
    }

    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }

    pub fn manager(&self) -> &Arc<DictionaryManager> {
        &self.manager
    }

    /// Returns the existing child when one is already present.
    pub fn create_child_dictionary(&self, name: &str) -> Result<Dictionary> {
        let id = self.manager.create_dictionary(self.id, name)?;
        Ok(self.child(id))
    }

    pub fn get_child_dictionary(&self, name: &str) -> Result<Option<Dictionary>> {
        Ok(self
            .manager
            .get_dictionary(self.id, name)?
            .map(|id| self.child(id)))
    }

    pub fn remove_child_dictionary(&self, name: &str) -> Result<bool> {
        self.manager.remove_dictionary(self.id, name)
    }

    pub fn remove_child_dictionary_with_stats(&self, name: &str) -> Result<Option<RemoveStats>> {
        self.manager.remove_dictionary_with_stats(self.id, name)
    }

    pub fn get_item(&self, name: &str) -> Result<Option<Value>> {
        self.manager.get_item(self.id, name)
    }

    pub fn put_item(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.manager.put_item(self.id, name, Some(&value.into()))
    }

    pub fn remove_item(&self, name: &str) -> Result<()> {
        self.manager.remove_item(self.id, name)
    }

    pub fn items(&self) -> Result<ItemIter> {
        self.manager.iterate_items(self.id)
    }

    pub fn dictionaries(&self) -> Result<Children> {
        Ok(Children {
            manager: self.manager.clone(),
            inner: self.manager.iterate_dictionaries(self.id)?,
        })
    }

    /// Child dictionary `name`, or else item `name`.
    pub fn get(&self, name: &str) -> Result<Option<Namespace>> {
        if let Some(child) = self.get_child_dictionary(name)? {
            return Ok(Some(Namespace::Dictionary(child)));
        }
        Ok(self.get_item(name)?.map(Namespace::Scalar))
    }

    fn child(&self, id: DictionaryId) -> Dictionary {
        Dictionary::new(self.manager.clone(), id)
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dictionary").field("id", &self.id).finish()
    }
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.manager, &other.manager)
    }
}

/// Child dictionaries of a [`Dictionary`] as handles, in name order.
pub struct Children {
    manager: Arc<DictionaryManager>,
    inner: DictionaryIter,
}

impl Children {
    pub fn seek(&mut self, name: &str) -> Result<()> {
        self.inner.seek(name)
    }
}

impl Iterator for Children {
    type Item = Result<(String, Dictionary)>;

    fn next(&mut self) -> Option<Self::Item> {
        let manager = &self.manager;
        self.inner
            .next()
            .map(|entry| entry.map(|(name, id)| (name, Dictionary::new(manager.clone(), id))))
    }
}

/// Either a dictionary or a stored scalar.
#[derive(Clone, Debug, PartialEq)]
pub enum Namespace {
    Dictionary(Dictionary),
    Scalar(Value),
}

impl Namespace {
    /// Root of the SQLite database at `path`, created when missing.
    pub fn open(path: &Path) -> Result<Namespace> {
        let manager = DictionaryManager::open_path(path, &Config::default())?;
        Ok(Namespace::Dictionary(manager.root()))
    }

    /// Root of an arbitrary store.
    pub fn open_store(store: Arc<dyn KeyValueStore>, config: ManagerConfig) -> Result<Namespace> {
        let manager = DictionaryManager::open(store, config)?;
        Ok(Namespace::Dictionary(manager.root()))
    }

    /// Navigates one level down. Scalars index into map values.
    pub fn get(&self, name: &str) -> Result<Option<Namespace>> {
        match self {
            Namespace::Dictionary(dict) => dict.get(name),
            Namespace::Scalar(value) => Ok(value.get(name).cloned().map(Namespace::Scalar)),
        }
    }

    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            Namespace::Dictionary(dict) => Some(dict),
            Namespace::Scalar(_) => None,
        }
    }

    pub fn into_dictionary(self) -> Option<Dictionary> {
        match self {
            Namespace::Dictionary(dict) => Some(dict),
            Namespace::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Namespace::Scalar(value) => Some(value),
            Namespace::Dictionary(_) => None,
        }
    }

    pub fn is_dictionary(&self) -> bool {
        matches!(self, Namespace::Dictionary(_))
    }
}

impl From<Dictionary> for Namespace {
    fn from(dict: Dictionary) -> Self {
        Namespace::Dictionary(dict)
    }
}

impl From<Value> for Namespace {
    fn from(value: Value) -> Self {
        Namespace::Scalar(value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use tempfile::tempdir;

    use super::*;
    use crate::config::StoreConfig;
    use crate::mem_store::MemStore;
    use crate::store::SqliteStore;

    fn mem_root() -> Dictionary {
        Namespace::open_store(Arc::new(MemStore::new()), ManagerConfig::default())
            .unwrap()
            .into_dictionary()
            .unwrap()
    }

    #[test]
    fn example_tree_on_disk() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.kvtree.db");
        let root = Namespace::open(&path)?.into_dictionary().unwrap();
        assert!(root.is_root());

        let a = root.create_child_dictionary("a")?;
        assert_eq!(a.id().get(), 1);
        let b = a.create_child_dictionary("b")?;
        assert_eq!(b.id().get(), 2);
        a.put_item("x", "1")?;
        b.put_item("y", 2)?;
        let (a_id, b_id) = (a.id(), b.id());
        drop((root, a, b));

        let root = Namespace::open(&path)?.into_dictionary().unwrap();
        let a = root.get_child_dictionary("a")?.unwrap();
        assert_eq!(a.id(), a_id);
        assert_eq!(a.get_item("x")?, Some(Value::from("1")));
        assert!(root.remove_child_dictionary("a")?);

        assert!(root.dictionaries()?.next().is_none());
        let manager = root.manager();
        assert_eq!(manager.get_item(a_id, "x")?, None);
        assert_eq!(manager.get_item(b_id, "y")?, None);
        assert_eq!(manager.last_allocated_id()?.get(), 2);
        Ok(())
    }

    #[test]
    fn in_memory_sqlite_backend() -> Result<()> {
        let store = SqliteStore::in_memory(&StoreConfig::default())?;
        let root = Namespace::open_store(Arc::new(store), ManagerConfig::default())?
            .into_dictionary()
            .unwrap();
        let child = root.create_child_dictionary("c")?;
        child.put_item("k", vec![0u8, 0xd1, 0xff])?;
        assert_eq!(child.get_item("k")?, Some(Value::Bytes(vec![0, 0xd1, 0xff])));
        child.remove_item("k")?;
        assert!(child.items()?.next().is_none());
        Ok(())
    }

    #[test]
    fn get_prefers_dictionaries_then_items() -> Result<()> {
        let root = mem_root();
        let dir = root.create_child_dictionary("both")?;
        root.put_item("both", 1)?;
        root.put_item("only", true)?;

        let ns = Namespace::from(root.clone());
        assert_eq!(ns.get("both")?, Some(Namespace::Dictionary(dir)));
        assert_eq!(ns.get("only")?, Some(Namespace::Scalar(Value::Bool(true))));
        assert_eq!(ns.get("missing")?, None);
        Ok(())
    }

    #[test]
    fn scalar_navigation_indexes_maps() -> Result<()> {
        let root = mem_root();
        let mut inner = BTreeMap::new();
        inner.insert("port".to_string(), Value::Int(8080));
        let mut outer = BTreeMap::new();
        outer.insert("server".to_string(), Value::Map(inner));
        root.put_item("config", Value::Map(outer))?;

        let ns = Namespace::from(root);
        let port = ns
            .get("config")?
            .and_then(|n| n.get("server").ok().flatten())
            .and_then(|n| n.get("port").ok().flatten());
        assert_eq!(port.as_ref().and_then(Namespace::as_scalar), Some(&Value::Int(8080)));
        let scalar = Namespace::Scalar(Value::Int(1));
        assert_eq!(scalar.get("anything")?, None);
        assert!(!scalar.is_dictionary());
        Ok(())
    }

    #[test]
    fn children_yield_usable_handles() -> Result<()> {
        let root = mem_root();
        for name in ["beta", "alpha", "gamma"] {
            root.create_child_dictionary(name)?.put_item("name", name)?;
        }
        let mut seen = Vec::new();
        for entry in root.dictionaries()? {
            let (name, dict) = entry?;
            assert_eq!(dict.get_item("name")?, Some(Value::from(name.as_str())));
            seen.push(name);
        }
        assert_eq!(seen, ["alpha", "beta", "gamma"]);

        let mut children = root.dictionaries()?;
        children.seek("b")?;
        assert_eq!(children.next().unwrap()?.0, "beta");
        Ok(())
    }

    #[test]
    fn clones_refer_to_the_same_dictionary() -> Result<()> {
        let root = mem_root();
        let a = root.create_child_dictionary("a")?;
        let alias = a.clone();
        alias.put_item("k", 5)?;
        assert_eq!(a.get_item("k")?, Some(Value::Int(5)));
        assert_eq!(root.get_child_dictionary("a")?, Some(a));
        Ok(())
    }

    proptest! {
        #[test]
        fn put_then_get_returns_value(
            name in "[a-zA-Z0-9 ._/-]{1,48}",
            n in any::<i64>(),
            text in "\\PC{0,24}",
        ) {
            let root = mem_root();
            root.put_item(&name, n).unwrap();
            prop_assert_eq!(root.get_item(&name).unwrap(), Some(Value::Int(n)));
            root.put_item(&name, text.as_str()).unwrap();
            prop_assert_eq!(root.get_item(&name).unwrap(), Some(Value::Text(text.clone())));
            root.remove_item(&name).unwrap();
            prop_assert_eq!(root.get_item(&name).unwrap(), None);
        }
    }
}
