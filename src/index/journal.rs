//! Append-only log of index entries published since the last full index.
//!
//! ```text
//! ┌────────────────────┬───────────────────────────────┐
//! │ len: u32 (LE)      │ bincode StoredIndexEntry      │  repeated
//! └────────────────────┴───────────────────────────────┘
//! ```
//!
//! A frame is only trusted once it is complete and decodes. A torn tail left
//! by a crash mid-append is reported so the owner can cut it off.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{Result, VaultError};
use crate::index::StoredIndexEntry;

const LEN_PREFIX: usize = 4;

/// Entries read from a journal starting at some byte offset.
#[derive(Debug, Default)]
pub struct JournalTail {
    pub entries: Vec<StoredIndexEntry>,
    /// Byte offset just past the last complete frame.
    pub end: u64,
    /// Bytes after `end` that do not form a complete frame.
    pub torn: bool,
}

/// Current journal size in bytes; a missing journal is empty.
pub fn len(path: &Path) -> Result<u64> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(VaultError::io(path, e)),
    }
}

/// Append one entry and flush it to disk. Returns the bytes written.
pub fn append(path: &Path, entry: &StoredIndexEntry) -> Result<u64> {
    let payload = bincode::serialize(entry).map_err(|e| VaultError::InvalidIndex {
        path: path.to_path_buf(),
        reason: format!("serialization failed: {e}"),
    })?;
    let frame_len = u32::try_from(payload.len()).map_err(|_| VaultError::InvalidIndex {
        path: path.to_path_buf(),
        reason: format!("entry too large ({} bytes)", payload.len()),
    })?;

    let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
    frame.extend_from_slice(&frame_len.to_le_bytes());
    frame.extend_from_slice(&payload);

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| VaultError::io(path, e))?;
    file.write_all(&frame).map_err(|e| VaultError::io(path, e))?;
    file.sync_data().map_err(|e| VaultError::io(path, e))?;

    Ok(frame.len() as u64)
}

/// Decode every complete frame from byte `offset` onwards.
pub fn read_from(path: &Path, offset: u64) -> Result<JournalTail> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(JournalTail {
                end: offset,
                ..Default::default()
            })
        }
        Err(e) => return Err(VaultError::io(path, e)),
    };
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| VaultError::io(path, e))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| VaultError::io(path, e))?;

    let mut tail = JournalTail::default();
    let mut pos = 0usize;
    while pos < buf.len() {
        let Some(prefix) = buf.get(pos..pos + LEN_PREFIX) else {
            tail.torn = true;
            break;
        };
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(prefix);
        let frame_len = u32::from_le_bytes(len_bytes) as usize;

        let body_start = pos + LEN_PREFIX;
        let Some(body) = buf.get(body_start..body_start + frame_len) else {
            tail.torn = true;
            break;
        };
        match bincode::deserialize::<StoredIndexEntry>(body) {
            Ok(entry) => tail.entries.push(entry),
            Err(e) => {
                debug!(path = %path.display(), offset = offset + pos as u64, error = %e, "Undecodable journal frame");
                tail.torn = true;
                break;
            }
        }
        pos = body_start + frame_len;
    }

    tail.end = offset + pos as u64;
    Ok(tail)
}

/// Cut the journal to `len` bytes. A missing journal is left alone.
pub fn truncate(path: &Path, len: u64) -> Result<()> {
    let file = match OpenOptions::new().write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(VaultError::io(path, e)),
    };
    file.set_len(len).map_err(|e| VaultError::io(path, e))?;
    file.sync_all().map_err(|e| VaultError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(id: &str) -> StoredIndexEntry {
        StoredIndexEntry {
            id: id.into(),
            thread_id: "<t@x>".into(),
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            location: format!("{id}.json"),
        }
    }

    #[test]
    fn test_missing_journal_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.journal");
        assert_eq!(len(&path).unwrap(), 0);
        let tail = read_from(&path, 0).unwrap();
        assert!(tail.entries.is_empty());
        assert_eq!(tail.end, 0);
        assert!(!tail.torn);
        truncate(&path, 0).unwrap();
    }

    #[test]
    fn test_append_then_read_from_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.journal");

        let first = append(&path, &entry("<a@x>")).unwrap();
        append(&path, &entry("<b@x>")).unwrap();
        assert_eq!(len(&path).unwrap(), read_from(&path, 0).unwrap().end);

        let all = read_from(&path, 0).unwrap();
        assert_eq!(all.entries, vec![entry("<a@x>"), entry("<b@x>")]);

        let rest = read_from(&path, first).unwrap();
        assert_eq!(rest.entries, vec![entry("<b@x>")]);
        assert_eq!(rest.end, all.end);
    }

    #[test]
    fn test_torn_tail_is_reported_and_truncatable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.journal");
        let good = append(&path, &entry("<a@x>")).unwrap();

        // Half of a second frame, as left by a crash mid-append.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[40, 0, 0, 0, 1, 2, 3]).unwrap();
        drop(file);

        let tail = read_from(&path, 0).unwrap();
        assert_eq!(tail.entries.len(), 1);
        assert_eq!(tail.end, good);
        assert!(tail.torn);

        truncate(&path, tail.end).unwrap();
        assert_eq!(len(&path).unwrap(), good);
        assert!(!read_from(&path, 0).unwrap().torn);
    }
}
