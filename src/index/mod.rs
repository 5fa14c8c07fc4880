//! Identity index: the only structure scanned for listing, filtering and
//! duplicate checks. Record bodies are opened only for detail fetches.

pub mod builder;
pub mod format;
pub mod journal;
pub mod reader;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::message::CanonicalMessage;

/// One entry per record ever accepted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIndexEntry {
    pub id: String,
    pub thread_id: String,
    pub date: DateTime<Utc>,
    /// Record file name, relative to the store's `messages/` directory.
    pub location: String,
}

impl StoredIndexEntry {
    pub fn for_record(record: &CanonicalMessage, location: impl Into<String>) -> Self {
        Self {
            id: record.id.clone(),
            thread_id: record.thread_id.clone(),
            date: record.date,
            location: location.into(),
        }
    }
}

/// In-memory index with O(1) identity lookup.
#[derive(Debug, Default)]
pub struct Index {
    entries: Vec<StoredIndexEntry>,
    by_id: HashMap<String, usize>,
}

impl Index {
    /// Build from loaded entries. Later entries with an already seen id are dropped.
    pub fn new(entries: Vec<StoredIndexEntry>) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index.insert(entry);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&StoredIndexEntry> {
        self.by_id.get(id).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[StoredIndexEntry] {
        &self.entries
    }

    /// Add an entry. Returns `false` (and changes nothing) if the id is known.
    pub fn insert(&mut self, entry: StoredIndexEntry) -> bool {
        if self.by_id.contains_key(&entry.id) {
            return false;
        }
        self.by_id.insert(entry.id.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }
}
