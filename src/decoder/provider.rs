//! Named in-memory blobs that decoders open by file name

use std::collections::HashMap;
use std::sync::Arc;

/// Named-blob lookup used by decoders
///
/// Holds the song file while it is being decoded and any auxiliary files a
/// format needs (instrument banks and the like). Entries are immutable once
/// added; opening an entry hands out a shared view of the bytes.
#[derive(Debug, Clone, Default)]
pub struct DataProvider {
    files: HashMap<String, Arc<[u8]>>,
}

impl DataProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `data` under `name`.
    ///
    /// Returns `false` and leaves the existing entry untouched if the name is
    /// already taken.
    pub fn add(&mut self, name: &str, data: &[u8]) -> bool {
        if self.files.contains_key(name) {
            return false;
        }
        self.files.insert(name.to_string(), Arc::from(data));
        true
    }

    /// Remove an entry; returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.files.remove(name).is_some()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Open an entry from the start.
    pub fn open(&self, name: &str) -> Option<Arc<[u8]>> {
        self.files.get(name).cloned()
    }

    /// Whether an entry named `name` exists
    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the provider holds no entries
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
