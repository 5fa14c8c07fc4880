//! File-backed store: one JSON file per record plus a binary index.
//!
//! ```text
//! <root>/.lock
//! <root>/index.bin
//! <root>/index.journal
//! <root>/messages/<sha256(id)>.json
//! ```
//!
//! `index.bin` is a full snapshot; `index.journal` lists the entries
//! accepted since. Every operation runs under the in-process mutex and an
//! exclusive advisory lock on `.lock`, and first catches up with whatever
//! other stores on the same root have published. `put` keeps both locks
//! across the duplicate check, the record write and the journal append, so
//! concurrent puts of one id can never both insert, whether they come from
//! threads or from separate processes.

use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use fs2::FileExt;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::atomic::write_atomic;
use super::{MessageStore, PutOutcome, StoreStats};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, VaultError};
use crate::index::builder::{load_index, read_header, rebuild_from_records, write_index, RECORD_EXTENSION};
use crate::index::{journal, reader, Index, StoredIndexEntry};
use crate::model::message::CanonicalMessage;
use crate::model::thread::ThreadView;

/// Number of decoded records kept in memory.
const DEFAULT_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(256) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// Journal entries accepted before they are folded into a new snapshot.
pub const JOURNAL_COMPACT_ENTRIES: usize = 256;

const INDEX_FILE: &str = "index.bin";
const JOURNAL_FILE: &str = "index.journal";
const LOCK_FILE: &str = ".lock";
const MESSAGES_DIR: &str = "messages";

struct State {
    index: Index,
    cache: LruCache<String, CanonicalMessage>,
    /// Snapshot generation `index` was loaded from; `None` before the first load.
    generation: Option<u64>,
    /// Journal bytes already applied to `index`.
    journal_len: u64,
    /// Journal entries applied since the snapshot.
    journal_entries: usize,
}

/// Holds the advisory lock on `.lock` until dropped.
struct RootLock<'a> {
    file: &'a File,
}

impl Drop for RootLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(self.file) {
            warn!(error = %e, "Failed to release store lock");
        }
    }
}

/// Deduplicating store rooted at one directory.
///
/// Share it through `Arc`. Any number of stores, in this process or in
/// others, may be open on the same root.
pub struct FileStore {
    root: PathBuf,
    messages_dir: PathBuf,
    index_path: PathBuf,
    journal_path: PathBuf,
    lock_path: PathBuf,
    lock_file: File,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl FileStore {
    /// Open the store at `root`, creating the directory layout on first use.
    ///
    /// A missing or unreadable index is rebuilt from the record files and
    /// republished.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_clock(root, Arc::new(SystemClock))
    }

    /// Like [`FileStore::open`], stamping published indexes with `clock`.
    pub fn open_with_clock(root: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let messages_dir = root.join(MESSAGES_DIR);
        let lock_path = root.join(LOCK_FILE);

        std::fs::create_dir_all(&messages_dir)
            .map_err(|e| VaultError::storage(VaultError::io(&messages_dir, e)))?;
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| VaultError::storage(VaultError::io(&lock_path, e)))?;

        let store = Self {
            index_path: root.join(INDEX_FILE),
            journal_path: root.join(JOURNAL_FILE),
            root,
            messages_dir,
            lock_path,
            lock_file,
            clock,
            state: Mutex::new(State {
                index: Index::default(),
                cache: LruCache::new(DEFAULT_CACHE_SIZE),
                generation: None,
                journal_len: 0,
                journal_entries: 0,
            }),
        };

        let count = {
            let mut state = store.lock()?;
            let _root = store.lock_root()?;
            store.refresh(&mut state)?;
            state.index.len()
        };
        info!(root = %store.root.display(), messages = count, "Store opened");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rescan every record file, republish the index and return its size.
    pub fn rebuild_index(&self) -> Result<usize> {
        let mut state = self.lock()?;
        let _root = self.lock_root()?;
        self.rebuild(&mut state)?;
        Ok(state.index.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| VaultError::StorageUnavailable {
            cause: "store lock poisoned".into(),
        })
    }

    /// Take the cross-process lock. Always acquired after the mutex.
    fn lock_root(&self) -> Result<RootLock<'_>> {
        FileExt::lock_exclusive(&self.lock_file)
            .map_err(|e| VaultError::storage(VaultError::io(&self.lock_path, e)))?;
        Ok(RootLock {
            file: &self.lock_file,
        })
    }

    /// Bring `state` up to date with what is on disk. Root lock held.
    fn refresh(&self, state: &mut State) -> Result<()> {
        let on_disk = match read_header(&self.index_path) {
            Ok(header) => header.map(|h| h.generation),
            Err(e) => {
                warn!(error = %e, "Index header unreadable");
                None
            }
        };
        let journal_len = journal::len(&self.journal_path).map_err(VaultError::storage)?;

        if on_disk.is_none() || on_disk != state.generation || journal_len < state.journal_len {
            self.reload(state)
        } else if journal_len > state.journal_len {
            self.replay_journal(state)
        } else {
            Ok(())
        }
    }

    /// Load the snapshot (rebuilding it if needed) and replay the journal.
    fn reload(&self, state: &mut State) -> Result<()> {
        let loaded = match load_index(&self.index_path) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                debug!(root = %self.root.display(), "No index yet");
                return self.rebuild(state);
            }
            Err(e) => {
                warn!(error = %e, "Index unreadable, rebuilding");
                return self.rebuild(state);
            }
        };

        state.index = Index::new(loaded.entries);
        state.cache.clear();
        state.generation = Some(loaded.header.generation);
        state.journal_len = 0;
        state.journal_entries = 0;
        self.replay_journal(state)
    }

    /// Apply journal frames past `state.journal_len`, cutting off a torn tail.
    fn replay_journal(&self, state: &mut State) -> Result<()> {
        let tail = journal::read_from(&self.journal_path, state.journal_len)
            .map_err(VaultError::storage)?;
        let applied = tail.entries.len();
        for entry in tail.entries {
            state.index.insert(entry);
        }
        if tail.torn {
            warn!(offset = tail.end, "Dropping torn journal tail");
            journal::truncate(&self.journal_path, tail.end).map_err(VaultError::storage)?;
        }
        state.journal_len = tail.end;
        state.journal_entries += applied;
        if applied > 0 {
            debug!(applied, "Journal entries applied");
        }
        Ok(())
    }

    /// Rebuild from the record files and publish a new snapshot. Root lock held.
    fn rebuild(&self, state: &mut State) -> Result<()> {
        let entries = rebuild_from_records(&self.messages_dir).map_err(VaultError::storage)?;
        let index = Index::new(entries);
        self.publish(state, index)
    }

    /// Fold the journal into a new snapshot.
    fn compact(&self, state: &mut State) -> Result<()> {
        let index = Index::new(state.index.entries().to_vec());
        self.publish(state, index)?;
        info!(entries = state.index.len(), "Index journal compacted");
        Ok(())
    }

    /// Write `index` as the next snapshot generation and empty the journal.
    fn publish(&self, state: &mut State, index: Index) -> Result<()> {
        let previous = read_header(&self.index_path)
            .ok()
            .flatten()
            .map(|h| h.generation);
        let generation = previous.max(state.generation).map_or(1, |g| g + 1);

        write_index(&self.index_path, index.entries(), generation, self.clock.now())
            .map_err(VaultError::storage)?;
        state.index = index;
        state.cache.clear();
        state.generation = Some(generation);

        // Entries still in the journal are already in the snapshot and are
        // skipped as known ids if the truncate below does not happen.
        journal::truncate(&self.journal_path, 0).map_err(VaultError::storage)?;
        state.journal_len = 0;
        state.journal_entries = 0;
        Ok(())
    }

    /// Record file name for an id: hex SHA-256, safe on every filesystem.
    fn location_for(id: &str) -> String {
        format!("{:x}.{RECORD_EXTENSION}", Sha256::digest(id.as_bytes()))
    }

    fn load_record(&self, state: &mut State, entry: &StoredIndexEntry) -> Result<CanonicalMessage> {
        if let Some(cached) = state.cache.get(&entry.id) {
            return Ok(cached.clone());
        }

        let path = self.messages_dir.join(&entry.location);
        let bytes =
            std::fs::read(&path).map_err(|e| VaultError::storage(VaultError::io(&path, e)))?;
        let record: CanonicalMessage =
            serde_json::from_slice(&bytes).map_err(|e| VaultError::StorageUnavailable {
                cause: format!("corrupt record '{}': {e}", path.display()),
            })?;

        state.cache.put(entry.id.clone(), record.clone());
        Ok(record)
    }
}

impl MessageStore for FileStore {
    fn put(&self, record: &CanonicalMessage) -> Result<PutOutcome> {
        let mut state = self.lock()?;
        let _root = self.lock_root()?;
        self.refresh(&mut state)?;

        if state.index.contains(&record.id) {
            debug!(id = %record.id, "Duplicate, skipping");
            return Ok(PutOutcome::Duplicate);
        }

        let location = Self::location_for(&record.id);
        let path = self.messages_dir.join(&location);
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| VaultError::StorageUnavailable {
            cause: format!("cannot serialize record {}: {e}", record.id),
        })?;
        write_atomic(&path, &bytes).map_err(VaultError::storage)?;

        // The record is on disk; publish the entry that names it.
        let entry = StoredIndexEntry::for_record(record, location);
        let written = journal::append(&self.journal_path, &entry).map_err(VaultError::storage)?;
        state.journal_len += written;
        state.journal_entries += 1;
        state.index.insert(entry);
        state.cache.put(record.id.clone(), record.clone());
        debug!(id = %record.id, thread = %record.thread_id, "Stored");

        if state.journal_entries >= JOURNAL_COMPACT_ENTRIES {
            // The entry is already durable in the journal.
            if let Err(e) = self.compact(&mut state) {
                warn!(error = %e, "Journal compaction failed");
            }
        }
        Ok(PutOutcome::Inserted)
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<CanonicalMessage>> {
        let mut state = self.lock()?;
        let _root = self.lock_root()?;
        self.refresh(&mut state)?;

        let picked: Vec<StoredIndexEntry> = reader::page(state.index.entries(), limit, offset)
            .into_iter()
            .cloned()
            .collect();

        picked
            .iter()
            .map(|entry| self.load_record(&mut state, entry))
            .collect()
    }

    fn get_thread(&self, thread_id: &str) -> Result<ThreadView> {
        let mut state = self.lock()?;
        let _root = self.lock_root()?;
        self.refresh(&mut state)?;

        let members: Vec<StoredIndexEntry> = reader::thread_members(state.index.entries(), thread_id)
            .into_iter()
            .cloned()
            .collect();

        let messages = members
            .iter()
            .map(|entry| self.load_record(&mut state, entry))
            .collect::<Result<Vec<_>>>()?;

        ThreadView::from_messages(thread_id, messages).ok_or_else(|| VaultError::ThreadNotFound {
            thread_id: thread_id.to_string(),
        })
    }

    fn exists(&self, id: &str) -> Result<bool> {
        let mut state = self.lock()?;
        let _root = self.lock_root()?;
        self.refresh(&mut state)?;
        Ok(state.index.contains(id))
    }

    fn stats(&self) -> Result<StoreStats> {
        let mut state = self.lock()?;
        let _root = self.lock_root()?;
        self.refresh(&mut state)?;

        let entries = state.index.entries();
        let range = reader::date_range(entries);
        Ok(StoreStats {
            message_count: entries.len(),
            thread_count: reader::count_threads(entries),
            oldest: range.map(|(oldest, _)| oldest),
            newest: range.map(|(_, newest)| newest),
        })
    }

    fn get(&self, id: &str) -> Result<Option<CanonicalMessage>> {
        let mut state = self.lock()?;
        let _root = self.lock_root()?;
        self.refresh(&mut state)?;

        let Some(entry) = state.index.get(id).cloned() else {
            return Ok(None);
        };
        self.load_record(&mut state, &entry).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::message::MessageMetadata;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    fn record(id: &str, thread: &str, day: u32) -> CanonicalMessage {
        let date = Utc.with_ymd_and_hms(2024, 1, day, 10, 0, 0).unwrap();
        CanonicalMessage {
            id: id.into(),
            thread_id: thread.into(),
            subject: format!("subject {id}"),
            from_addr: "alice@example.com".into(),
            to_addrs: vec!["bob@example.com".into()],
            cc_addrs: Vec::new(),
            date,
            body_text: "hello".into(),
            body_html: None,
            attachments: Vec::new(),
            raw_headers: Default::default(),
            metadata: MessageMetadata {
                fetched_at: date,
                normalized_at: date,
                source: "imap".into(),
                date_fallback: false,
                arrived_at: None,
            },
        }
    }

    #[test]
    fn test_put_then_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let msg = record("<a@x>", "<a@x>", 1);

        assert_eq!(store.put(&msg).unwrap(), PutOutcome::Inserted);
        assert_eq!(store.put(&msg).unwrap(), PutOutcome::Duplicate);
        assert!(store.exists("<a@x>").unwrap());
        assert_eq!(store.stats().unwrap().message_count, 1);
        assert_eq!(store.get("<a@x>").unwrap(), Some(msg));
        assert_eq!(store.get("<zz@x>").unwrap(), None);
    }

    #[test]
    fn test_record_file_named_by_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.put(&record("<a@x>", "<a@x>", 1)).unwrap();

        let expected = dir.path().join("messages").join(FileStore::location_for("<a@x>"));
        assert!(expected.exists());
        assert!(dir.path().join("index.bin").exists());
    }

    #[test]
    fn test_reopen_keeps_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.put(&record("<a@x>", "<t@x>", 1)).unwrap();
            store.put(&record("<b@x>", "<t@x>", 2)).unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.thread_count, 1);
        assert_eq!(store.put(&record("<a@x>", "<t@x>", 1)).unwrap(), PutOutcome::Duplicate);
    }

    #[test]
    fn test_corrupt_index_is_rebuilt_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.put(&record("<a@x>", "<t@x>", 1)).unwrap();
        }
        std::fs::write(dir.path().join("index.bin"), b"garbage").unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.exists("<a@x>").unwrap());
    }

    #[test]
    fn test_unknown_thread() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.get_thread("<none@x>"),
            Err(VaultError::ThreadNotFound { .. })
        ));
    }

    #[test]
    fn test_empty_store_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.stats().unwrap(), StoreStats::default());
        assert!(store.list(10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_journal_compacts_into_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let stamp = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let store = FileStore::open_with_clock(dir.path(), Arc::new(FixedClock(stamp))).unwrap();

        let total = JOURNAL_COMPACT_ENTRIES + 3;
        for i in 0..total {
            let day = 1 + (i % 28) as u32;
            store.put(&record(&format!("<m{i}@x>"), "<t@x>", day)).unwrap();
        }

        let snapshot = load_index(&dir.path().join(INDEX_FILE)).unwrap().unwrap();
        assert_eq!(snapshot.entries.len(), JOURNAL_COMPACT_ENTRIES);
        assert_eq!(snapshot.header.written_at, stamp.timestamp());
        let pending = journal::read_from(&dir.path().join(JOURNAL_FILE), 0).unwrap();
        assert_eq!(pending.entries.len(), 3);
        drop(store);

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.stats().unwrap().message_count, total);
        assert_eq!(
            reopened.put(&record("<m0@x>", "<t@x>", 1)).unwrap(),
            PutOutcome::Duplicate
        );
    }

    #[test]
    fn test_torn_journal_tail_is_dropped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.put(&record("<a@x>", "<t@x>", 1)).unwrap();
        }
        let journal_path = dir.path().join(JOURNAL_FILE);
        let intact = journal::len(&journal_path).unwrap();
        let mut file = OpenOptions::new().append(true).open(&journal_path).unwrap();
        file.write_all(&[200, 0, 0, 0, 9, 9]).unwrap();
        drop(file);

        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.exists("<a@x>").unwrap());
        assert_eq!(journal::len(&journal_path).unwrap(), intact);

        store.put(&record("<b@x>", "<t@x>", 2)).unwrap();
        drop(store);
        assert_eq!(FileStore::open(dir.path()).unwrap().stats().unwrap().message_count, 2);
    }
}
