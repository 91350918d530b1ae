//! Error types for the namespace layer.

use thiserror::Error;

use crate::codec::MAX_NAME_LEN;
use crate::kv::StoreError;

/// Errors surfaced by the dictionary manager and namespace handles.
///
/// Absence is not an error: lookups return `Option` and removals return
/// `bool` when the target does not exist.
#[derive(Debug, Error)]
pub enum NamespaceError {
    /// Empty name, or a name longer than [`MAX_NAME_LEN`] bytes.
    #[error("invalid name of {len} bytes (must be 1..={max} bytes)", max = MAX_NAME_LEN)]
    InvalidName { len: usize },

    /// The underlying key-value store failed.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// A stored entry does not decode the way its key range requires.
    #[error("corrupt entry under dictionary {parent}: {detail}")]
    Corrupt { parent: u64, detail: String },

    /// Id allocation lost a race and the retry observed no pointer either.
    #[error("could not allocate dictionary `{name}` under {parent}: {source}")]
    AllocationConflict {
        parent: u64,
        name: String,
        #[source]
        source: StoreError,
    },

    /// An item value could not be serialized.
    #[error("item encoding failed: {0}")]
    Encoding(#[from] serde_cbor::Error),

    /// The id counter reached the largest encodable dictionary id.
    #[error("dictionary id space exhausted")]
    IdSpaceExhausted,

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl NamespaceError {
    pub(crate) fn corrupt(parent: u64, detail: impl Into<String>) -> Self {
        NamespaceError::Corrupt {
            parent,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NamespaceError>;
