use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};

/// Reads a whole file, `None` when it does not exist.
pub fn read_file(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read file: {}", path.display())),
    }
}

/// Creates (or truncates) `path`, writes `data`, flushes and syncs it to disk.
///
/// The parent directory is created when missing.
pub fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let file = OpenOptions::new().write(true).create(true).truncate(true).open(path).with_context(|| format!("failed to create file: {}", path.display()))?;

    let mut writer = BufWriter::new(file);
    writer.write_all(data).with_context(|| format!("failed to write file: {}", path.display()))?;
    let file: File = writer.into_inner().map_err(|e| e.into_error()).with_context(|| format!("failed to flush file: {}", path.display()))?;
    file.sync_all().with_context(|| format!("failed to sync file: {}", path.display()))
}

/// Removes a file. Returns `false` when it was already gone.
pub fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("cannot remove: {}", path.display())),
    }
}

/// Modification time, `None` when the file is missing or the platform has none.
#[must_use]
pub fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[must_use]
pub fn exists(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("record");

        write_synced(&path, b"Hello, World!").unwrap();
        assert_eq!(read_file(&path).unwrap().as_deref(), Some(&b"Hello, World!"[..]));
        assert!(modified(&path).is_some());
    }

    #[test]
    fn test_read_missing() {
        let dir = tempdir().unwrap();
        assert!(read_file(&dir.path().join("absent")).unwrap().is_none());
    }

    #[test]
    fn test_remove_twice() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("record");
        write_synced(&path, b"x").unwrap();

        assert!(remove_file(&path).unwrap());
        assert!(!remove_file(&path).unwrap());
        assert!(!exists(&path));
    }
}
