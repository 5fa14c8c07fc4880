//! Crash-safe file replacement: temp file, fsync, rename.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, VaultError};

/// Write `bytes` to `path` so readers see either the old file or the
/// complete new one, never a partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path_for(path);

    let mut file = File::create(&tmp).map_err(|e| VaultError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| VaultError::io(&tmp, e))?;
    file.sync_all().map_err(|e| VaultError::io(&tmp, e))?;
    drop(file);

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(VaultError::io(path, e));
    }

    if let Some(parent) = path.parent() {
        sync_dir(parent);
    }
    Ok(())
}

/// Hidden sibling used as the staging file: `dir/.name.tmp`.
fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Persist the rename itself. Not supported on every platform.
fn sync_dir(dir: &Path) {
    match File::open(dir).and_then(|d| d.sync_all()) {
        Ok(()) => {}
        Err(e) => debug!(dir = %dir.display(), error = %e, "Directory fsync skipped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");

        write_atomic(&path, b"first").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");

        assert!(!dir.path().join(".data.bin.tmp").exists());
    }

    #[test]
    fn test_missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("data.bin");
        assert!(matches!(
            write_atomic(&path, b"x"),
            Err(VaultError::Io { .. })
        ));
    }
}
