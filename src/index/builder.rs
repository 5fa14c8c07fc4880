//! Index persistence: load, validate, publish and rebuild from records.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{Result, VaultError};
use crate::index::format::{IndexHeader, HEADER_SIZE};
use crate::index::StoredIndexEntry;
use crate::model::message::CanonicalMessage;
use crate::store::atomic::write_atomic;

/// Extension of record files inside the messages directory.
pub const RECORD_EXTENSION: &str = "json";

/// A published index as read back from disk.
#[derive(Debug)]
pub struct LoadedIndex {
    pub header: IndexHeader,
    pub entries: Vec<StoredIndexEntry>,
}

fn invalid(path: &Path, reason: String) -> VaultError {
    VaultError::InvalidIndex {
        path: path.to_path_buf(),
        reason,
    }
}

fn decode_header(path: &Path, bytes: &[u8]) -> Result<IndexHeader> {
    let header: IndexHeader = bincode::deserialize(bytes)
        .map_err(|e| invalid(path, format!("Header deserialization failed: {e}")))?;
    header.validate().map_err(|reason| invalid(path, reason))?;
    Ok(header)
}

/// Read only the fixed-size header of the index at `path`.
///
/// Cheap enough to call before every store operation to detect publishes
/// made by other processes.
pub fn read_header(path: &Path) -> Result<Option<IndexHeader>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(VaultError::io(path, e)),
    };
    let mut buf = [0u8; HEADER_SIZE];
    file.read_exact(&mut buf)
        .map_err(|e| invalid(path, format!("header unreadable: {e}")))?;
    decode_header(path, &buf).map(Some)
}

/// Load the index at `path`.
///
/// Returns `Ok(None)` when no index file exists, and `InvalidIndex` when a
/// file exists but is truncated, foreign, from another version or corrupt.
pub fn load_index(path: &Path) -> Result<Option<LoadedIndex>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(VaultError::io(path, e)),
    };

    if data.len() < HEADER_SIZE {
        return Err(invalid(path, format!("file too small ({} bytes)", data.len())));
    }

    let header = decode_header(path, &data[..HEADER_SIZE])?;
    let entries: Vec<StoredIndexEntry> = bincode::deserialize(&data[HEADER_SIZE..])
        .map_err(|e| invalid(path, format!("Entry deserialization failed: {e}")))?;

    if entries.len() as u64 != header.entry_count {
        return Err(invalid(
            path,
            format!(
                "entry count mismatch: header says {}, found {}",
                header.entry_count,
                entries.len()
            ),
        ));
    }

    debug!(
        path = %path.display(),
        count = entries.len(),
        generation = header.generation,
        "Loaded index"
    );
    Ok(Some(LoadedIndex { header, entries }))
}

/// Publish `entries` as generation `generation` of the index at `path`,
/// atomically.
pub fn write_index(
    path: &Path,
    entries: &[StoredIndexEntry],
    generation: u64,
    written_at: DateTime<Utc>,
) -> Result<()> {
    let encode_err = |e: bincode::Error| invalid(path, format!("serialization failed: {e}"));

    let header = IndexHeader::new(entries.len(), generation, written_at.timestamp());
    let header_bytes = bincode::serialize(&header).map_err(encode_err)?;
    let entries_bytes = bincode::serialize(entries).map_err(encode_err)?;

    // Pad header to HEADER_SIZE
    let mut data = vec![0u8; HEADER_SIZE];
    let copy_len = header_bytes.len().min(HEADER_SIZE);
    data[..copy_len].copy_from_slice(&header_bytes[..copy_len]);
    data.extend_from_slice(&entries_bytes);

    write_atomic(path, &data)?;
    debug!(path = %path.display(), count = entries.len(), generation, "Index written");
    Ok(())
}

/// Reconstruct index entries by decoding every record file in `messages_dir`.
///
/// Undecodable files are skipped with a warning. Entries come back sorted by
/// file name, so repeated rebuilds of the same directory are identical.
pub fn rebuild_from_records(messages_dir: &Path) -> Result<Vec<StoredIndexEntry>> {
    info!(dir = %messages_dir.display(), "Rebuilding index from records");

    let read_dir = std::fs::read_dir(messages_dir).map_err(|e| VaultError::io(messages_dir, e))?;
    let mut files: Vec<_> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == RECORD_EXTENSION))
        .collect();
    files.sort();

    let mut entries = Vec::with_capacity(files.len());
    let mut skipped = 0usize;

    for path in files {
        let Some(location) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let decoded = std::fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                serde_json::from_slice::<CanonicalMessage>(&bytes).map_err(|e| e.to_string())
            });
        match decoded {
            Ok(record) => entries.push(StoredIndexEntry::for_record(&record, location)),
            Err(reason) => {
                skipped += 1;
                warn!(path = %path.display(), error = %reason, "Skipping unreadable record");
            }
        }
    }

    info!(count = entries.len(), skipped, "Index rebuilt");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: &str) -> StoredIndexEntry {
        StoredIndexEntry {
            id: id.into(),
            thread_id: "<t@x>".into(),
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            location: "f.json".into(),
        }
    }

    fn written_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 12, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_missing_index_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        assert!(load_index(&path).unwrap().is_none());
        assert!(read_header(&path).unwrap().is_none());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let entries = vec![entry("<a@x>"), entry("<b@x>")];

        write_index(&path, &entries, 7, written_at()).unwrap();
        let loaded = load_index(&path).unwrap().unwrap();
        assert_eq!(loaded.entries, entries);
        assert_eq!(loaded.header.generation, 7);
    }

    #[test]
    fn test_header_carries_given_time_and_generation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        write_index(&path, &[entry("<a@x>")], 3, written_at()).unwrap();

        let header = read_header(&path).unwrap().unwrap();
        assert_eq!(header.written_at, written_at().timestamp());
        assert_eq!(header.generation, 3);
        assert_eq!(header.entry_count, 1);
    }

    #[test]
    fn test_truncated_index_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        std::fs::write(&path, b"MAILVLT\0 short").unwrap();
        assert!(matches!(load_index(&path), Err(VaultError::InvalidIndex { .. })));
        assert!(matches!(read_header(&path), Err(VaultError::InvalidIndex { .. })));
    }

    #[test]
    fn test_corrupt_entries_are_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        write_index(&path, &[entry("<a@x>")], 1, written_at()).unwrap();

        let mut data = std::fs::read(&path).unwrap();
        data.truncate(HEADER_SIZE + 3);
        std::fs::write(&path, &data).unwrap();
        assert!(matches!(load_index(&path), Err(VaultError::InvalidIndex { .. })));
    }

    #[test]
    fn test_rebuild_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        assert!(rebuild_from_records(dir.path()).unwrap().is_empty());
    }
}
