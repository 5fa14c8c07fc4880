//! Deduplicating message store.
//!
//! [`MessageStore`] is the capability the ingestion pipeline and readers
//! need; [`file::FileStore`] implements it over plain files and an index.

pub mod atomic;
pub mod file;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::model::message::CanonicalMessage;
use crate::model::thread::ThreadView;

pub use file::FileStore;

/// Result of offering a record to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was new and is now durable.
    Inserted,
    /// A record with the same id was already stored; nothing was written.
    Duplicate,
}

/// Aggregate counts computed from the index alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub message_count: usize,
    pub thread_count: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Durable, deduplicating persistence for canonical messages.
///
/// `put` must be safe under concurrent calls: two puts of one id yield
/// exactly one `Inserted`. Every failure surfaces as `StorageUnavailable`,
/// except `get_thread`, which reports an unknown thread as `ThreadNotFound`.
pub trait MessageStore: Send + Sync {
    /// Insert the record unless its id is already stored.
    fn put(&self, record: &CanonicalMessage) -> Result<PutOutcome>;

    /// Records ordered by date descending (ties by id), after skipping `offset`.
    fn list(&self, limit: usize, offset: usize) -> Result<Vec<CanonicalMessage>>;

    /// Every record of one thread.
    fn get_thread(&self, thread_id: &str) -> Result<ThreadView>;

    fn exists(&self, id: &str) -> Result<bool>;

    fn stats(&self) -> Result<StoreStats>;

    /// One record by id.
    fn get(&self, id: &str) -> Result<Option<CanonicalMessage>>;
}
