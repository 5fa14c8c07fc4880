//! Binary index file format.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER (128 bytes, fixed)            │
//! │  magic: [u8; 8] = b"MAILVLT\0"      │
//! │  version: u32                        │
//! │  flags: u32                          │
//! │  entry_count: u64                    │
//! │  generation: u64                     │
//! │  written_at: i64 (Unix seconds)      │
//! │  (padding to 128 bytes)              │
//! ├──────────────────────────────────────┤
//! │ ENTRIES (variable)                   │
//! │  bincode Vec<StoredIndexEntry>       │
//! └──────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Magic bytes identifying a mailvault index file.
pub const MAGIC: &[u8; 8] = b"MAILVLT\0";

/// Current index format version.
pub const VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 128;

/// Serializable index header.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexHeader {
    /// Magic bytes (must equal [`MAGIC`]).
    pub magic: [u8; 8],
    /// Format version (must equal [`VERSION`]).
    pub version: u32,
    /// Reserved.
    pub flags: u32,
    /// Number of entries following the header.
    pub entry_count: u64,
    /// Bumped on every publish; a store whose copy is older reloads.
    pub generation: u64,
    /// When this index was published.
    pub written_at: i64,
}

impl IndexHeader {
    pub fn new(entry_count: usize, generation: u64, written_at: i64) -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            flags: 0,
            entry_count: entry_count as u64,
            generation,
            written_at,
        }
    }

    /// Validate that the header is well-formed and matches the current format.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.magic != *MAGIC {
            return Err("Invalid magic bytes".into());
        }
        if self.version != VERSION {
            return Err(format!(
                "Incompatible version: expected {VERSION}, found {}",
                self.version
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fits_fixed_size() {
        let bytes = bincode::serialize(&IndexHeader::new(usize::MAX, u64::MAX, i64::MAX)).unwrap();
        assert!(bytes.len() <= HEADER_SIZE);
    }

    #[test]
    fn test_validate_rejects_foreign_magic() {
        let mut header = IndexHeader::new(0, 0, 0);
        header.magic = *b"MBOXTUI\0";
        assert!(header.validate().is_err());
        header.magic = *MAGIC;
        header.version = VERSION + 1;
        assert!(header.validate().unwrap_err().contains("Incompatible version"));
    }
}
