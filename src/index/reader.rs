//! Index querying utilities. All of these read entries only.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::StoredIndexEntry;

/// Newest first, ties broken by id ascending so pages are stable.
fn newest_first(a: &StoredIndexEntry, b: &StoredIndexEntry) -> Ordering {
    b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id))
}

/// One page of entries ordered by date descending.
pub fn page(entries: &[StoredIndexEntry], limit: usize, offset: usize) -> Vec<&StoredIndexEntry> {
    let mut sorted: Vec<&StoredIndexEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| newest_first(a, b));
    sorted.into_iter().skip(offset).take(limit).collect()
}

/// Entries of one thread, in index order.
pub fn thread_members<'a>(
    entries: &'a [StoredIndexEntry],
    thread_id: &str,
) -> Vec<&'a StoredIndexEntry> {
    entries.iter().filter(|e| e.thread_id == thread_id).collect()
}

/// Number of distinct threads.
pub fn count_threads(entries: &[StoredIndexEntry]) -> usize {
    entries
        .iter()
        .map(|e| e.thread_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}

/// Return the date range (oldest, newest) across the given entries.
pub fn date_range(entries: &[StoredIndexEntry]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let min = entries.iter().map(|e| e.date).min()?;
    let max = entries.iter().map(|e| e.date).max()?;
    Some((min, max))
}
