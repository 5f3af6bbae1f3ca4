//! Operator-private scratch storage.
//!
//! Stateful operators (Join, Take, Exists, ExtractMatchingKeys) remember
//! what they have already emitted in a `Storage`: a string-keyed value
//! store with prefix scan. Every operator owns its own instance; storage
//! is never shared between operators, and there is no locking because
//! there is no concurrent access.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt::Write as _;
use rivulet_core::{Row, Value};

/// A value held in operator storage.
#[derive(Clone, Debug, PartialEq)]
pub enum StorageValue {
    /// A remembered row.
    Row(Row),
    /// A maintained count.
    Count(usize),
    /// A multiset of encoded keys.
    Keys(Vec<String>),
    /// Take's per-partition window state.
    TakeState { size: usize, bound: Option<Row> },
}

/// Operator-private key/value scratch space.
pub trait Storage {
    /// Inserts or replaces a value.
    fn set(&self, key: String, value: StorageValue);

    /// Reads a value.
    fn get(&self, key: &str) -> Option<StorageValue>;

    /// Deletes a value.
    fn remove(&self, key: &str);

    /// Returns every (key, value) pair whose key starts with `prefix`,
    /// in key order.
    fn scan_prefix(&self, prefix: &str) -> Vec<(String, StorageValue)>;
}

/// In-memory `Storage` over a sorted map.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RefCell<BTreeMap<String, StorageValue>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn set(&self, key: String, value: StorageValue) {
        self.entries.borrow_mut().insert(key, value);
    }

    fn get(&self, key: &str) -> Option<StorageValue> {
        self.entries.borrow().get(key).cloned()
    }

    fn remove(&self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }

    fn scan_prefix(&self, prefix: &str) -> Vec<(String, StorageValue)> {
        self.entries
            .borrow()
            .range(String::from(prefix)..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Encodes a value vector into an unambiguous string key segment.
///
/// Each value gets a type tag; `/` and `\` inside strings are escaped so
/// composite keys built with `/` separators stay prefix-safe.
pub fn encode_key(values: &[Value]) -> String {
    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        match value {
            Value::Null => out.push('n'),
            Value::Bool(false) => out.push_str("b0"),
            Value::Bool(true) => out.push_str("b1"),
            Value::Int(v) => {
                let _ = write!(out, "i{}", v);
            }
            Value::Float(v) => {
                let _ = write!(out, "f{:016x}", v.to_bits());
            }
            Value::String(s) => {
                out.push('s');
                escape_into(&mut out, s);
            }
            Value::Json(s) => {
                out.push('j');
                escape_into(&mut out, s);
            }
        }
    }
    out
}

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            other => out.push(other),
        }
    }
}
