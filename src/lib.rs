//! Hierarchical dictionaries of named items layered over an ordered key-value store.

pub mod codec;
pub mod config;
pub mod error;
pub mod kv;
pub mod manager;
pub mod mem_store;
pub mod namespace;
pub mod store;
pub mod value;

pub use codec::{DictionaryId, EntryKind, MAX_NAME_LEN};
pub use config::{Config, ManagerConfig, StoreConfig};
pub use error::{NamespaceError, Result};
pub use kv::{KeyValueStore, KvCursor, KvSnapshot, StoreError, StoreResult, WriteBatch};
pub use manager::{DictionaryIter, DictionaryManager, ItemIter, RemoveStats};
pub use mem_store::MemStore;
pub use namespace::{Children, Dictionary, Namespace};
pub use store::{SqliteStore, derive_db_path};
pub use value::Value;
