//! Byte layout of the namespace inside the flat keyspace.
//!
//! ```text
//! key      = varint(parent_id * 2 + kind) ++ name     kind: 0 = item, 1 = dictionary
//! pointer  = POINTER_TAG ++ varint(child_id)
//! counter  = META_PREFIX "last_dictionary_id" -> varint(last_allocated_id)
//! ```
//!
//! The varint is the SQLite4 order-preserving encoding: comparing two encodings
//! bytewise gives the same result as comparing the integers, and no encoding is
//! a strict prefix of another. Ids are capped at [`MAX_DICTIONARY_ID`] so no
//! entry prefix begins with [`META_PREFIX`].
//!
//! This layout is the persisted format. Changing it makes existing stores
//! unreadable.

use std::fmt;

use smallvec::SmallVec;

use crate::error::{NamespaceError, Result};

/// Longest accepted item or dictionary name, in bytes.
pub const MAX_NAME_LEN: usize = 1024;

/// Largest dictionary id; keeps `id * 2 + 1` below `2^56`.
pub const MAX_DICTIONARY_ID: u64 = (1 << 55) - 1;

/// First byte of every dictionary pointer value.
pub const POINTER_TAG: u8 = 0xD1;

/// First byte of every key reserved for layer metadata.
pub const META_PREFIX: u8 = 0xFF;

/// Key of the id counter.
pub const COUNTER_KEY: &[u8] = b"\xfflast_dictionary_id";

pub type VarintBuf = SmallVec<[u8; 9]>;

/// Identifier of a dictionary node; `0` is the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DictionaryId(u64);

impl DictionaryId {
    pub const ROOT: DictionaryId = DictionaryId(0);

    /// Returns `None` above [`MAX_DICTIONARY_ID`].
    pub fn new(raw: u64) -> Option<Self> {
        (raw <= MAX_DICTIONARY_ID).then_some(Self(raw))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_root(self) -> bool {
        self.0 == 0
    }

    pub(crate) fn next(self) -> Option<Self> {
        Self::new(self.0 + 1)
    }
}

impl fmt::Display for DictionaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which of a dictionary's two key ranges an entry lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Item,
    Dictionary,
}

impl EntryKind {
    fn bit(self) -> u64 {
        match self {
            EntryKind::Item => 0,
            EntryKind::Dictionary => 1,
        }
    }
}

pub fn encode_varint(value: u64) -> VarintBuf {
    let mut out = VarintBuf::new();
    if value <= 240 {
        out.push(value as u8);
    } else if value <= 2287 {
        let y = value - 240;
        out.push((y / 256 + 241) as u8);
        out.push((y % 256) as u8);
    } else if value <= 67823 {
        let y = value - 2288;
        out.push(249);
        out.push((y / 256) as u8);
        out.push((y % 256) as u8);
    } else {
        let bits = 64 - value.leading_zeros() as usize;
        let len = bits.div_ceil(8).max(3);
        out.push(247 + len as u8);
        out.extend_from_slice(&value.to_be_bytes()[8 - len..]);
    }
    out
}

/// Decodes a canonical varint from the front of `bytes`, returning the value
/// and the number of bytes consumed.
pub fn decode_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let (&first, rest) = bytes.split_first()?;
    match first {
        0..=240 => Some((u64::from(first), 1)),
        241..=248 => {
            let second = *rest.first()?;
            Some((240 + 256 * u64::from(first - 241) + u64::from(second), 2))
        }
        249 => {
            let [hi, lo, ..] = rest else {
                return None;
            };
            Some((2288 + 256 * u64::from(*hi) + u64::from(*lo), 3))
        }
        _ => {
            let len = usize::from(first - 247);
            let payload = rest.get(..len)?;
            let mut buf = [0u8; 8];
            buf[8 - len..].copy_from_slice(payload);
            let value = u64::from_be_bytes(buf);
            let min = if len == 3 { 67824 } else { 1u64 << (8 * (len - 1)) };
            if value < min {
                return None;
            }
            Some((value, 1 + len))
        }
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    let len = name.len();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(NamespaceError::InvalidName { len });
    }
    Ok(())
}

/// Prefix shared by every entry of `kind` directly under `parent`.
pub fn encode_prefix(parent: DictionaryId, kind: EntryKind) -> VarintBuf {
    encode_varint((parent.0 << 1) | kind.bit())
}

pub fn encode_key(parent: DictionaryId, kind: EntryKind, name: &str) -> Result<Vec<u8>> {
    validate_name(name)?;
    let prefix = encode_prefix(parent, kind);
    let mut key = Vec::with_capacity(prefix.len() + name.len());
    key.extend_from_slice(&prefix);
    key.extend_from_slice(name.as_bytes());
    Ok(key)
}

/// Name bytes of `key` if it is a non-empty extension of `prefix`.
pub fn strip_prefix<'a>(key: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    key.strip_prefix(prefix).filter(|name| !name.is_empty())
}

pub fn encode_pointer(child: DictionaryId) -> VarintBuf {
    let mut out = VarintBuf::new();
    out.push(POINTER_TAG);
    out.extend_from_slice(&encode_varint(child.0));
    out
}

/// Decodes a pointer value. Anything without the tag, with trailing bytes, or
/// naming the root or an out-of-range id is rejected.
pub fn decode_pointer(value: &[u8]) -> Option<DictionaryId> {
    let rest = value.strip_prefix(&[POINTER_TAG])?;
    let (raw, used) = decode_varint(rest)?;
    if used != rest.len() || raw == 0 {
        return None;
    }
    DictionaryId::new(raw)
}

pub fn encode_counter(last: DictionaryId) -> VarintBuf {
    encode_varint(last.0)
}

pub fn decode_counter(value: &[u8]) -> Option<DictionaryId> {
    let (raw, used) = decode_varint(value)?;
    if used != value.len() {
        return None;
    }
    DictionaryId::new(raw)
}
