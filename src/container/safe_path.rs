//! Dual-generation record files.
//!
//! A safe record lives in `<name>0` and `<name>1`. Writes go to the generation
//! that is not current; the other one is removed only once the new bytes are
//! synced, so a crash mid-write leaves the last committed generation intact.
//! Non-safe records are a single `<name>s` file.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{debug, warn};

use crate::container::deserializer::Envelope;
use crate::error::FormatError;
use crate::file;

/// Handle on the physical file(s) backing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeFile {
    base: PathBuf,
    safe: bool,
}

impl SafeFile {
    /// Record named `name` inside `dir`.
    pub fn new(dir: &Path, name: &str, safe: bool) -> Self {
        Self { base: dir.join(name), safe }
    }

    #[inline]
    #[must_use]
    pub const fn is_safe(&self) -> bool {
        self.safe
    }

    /// Path of generation `0` or `1`.
    #[must_use]
    pub fn generation(&self, index: u8) -> PathBuf {
        Self::suffixed(&self.base, &index.to_string())
    }

    /// Path of the single non-safe file.
    #[must_use]
    pub fn single(&self) -> PathBuf {
        Self::suffixed(&self.base, "s")
    }

    /// Every path this record may occupy, whether or not it exists.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        if self.safe { vec![self.generation(0), self.generation(1)] } else { vec![self.single()] }
    }

    /// True when any generation (or the single file) exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.paths().iter().any(|path| file::exists(path))
    }

    /// Writes a finished container record.
    ///
    /// # Errors
    ///
    /// Fails only when every candidate generation failed to write.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        if !self.safe {
            return file::write_synced(&self.single(), bytes);
        }

        let (target, other) = self.write_order();
        match file::write_synced(&target, bytes) {
            Ok(()) => {
                if let Err(e) = file::remove_file(&other) {
                    warn!(path = %other.display(), error = %e, "failed to remove stale generation");
                }
                Ok(())
            }
            Err(first) => {
                warn!(path = %target.display(), error = %first, "generation write failed, trying the other one");
                match file::write_synced(&other, bytes) {
                    Ok(()) => Ok(()),
                    Err(second) => bail!("both generations failed: {first:#}; {second:#}"),
                }
            }
        }
    }

    /// Reads and validates the record.
    ///
    /// Prefers the generation with the later modification time and falls back
    /// to the other one when validation fails. When both are valid, the older
    /// one is deleted; a newer one that fails validation is deleted once the
    /// older one has been read.
    ///
    /// # Errors
    ///
    /// [`FormatError::Missing`] when nothing exists, otherwise the error of the
    /// last generation tried.
    pub fn read(&self) -> Result<Envelope, FormatError> {
        if !self.safe {
            return Self::read_path(&self.single());
        }

        let (newer, older) = self.read_order();
        match Self::read_path(&newer) {
            Ok(envelope) => {
                if file::exists(&older) {
                    debug!(path = %older.display(), "removing superseded generation");
                    if let Err(e) = file::remove_file(&older) {
                        warn!(path = %older.display(), error = %e, "failed to remove superseded generation");
                    }
                }
                Ok(envelope)
            }
            Err(first) => {
                let newer_corrupt = !matches!(first, FormatError::Missing);
                if newer_corrupt {
                    debug!(path = %newer.display(), error = %first, "newest generation rejected");
                }
                match Self::read_path(&older) {
                    Ok(envelope) => {
                        if newer_corrupt {
                            if let Err(e) = file::remove_file(&newer) {
                                warn!(path = %newer.display(), error = %e, "failed to remove corrupt generation");
                            }
                        }
                        Ok(envelope)
                    }
                    Err(FormatError::Missing) => Err(first),
                    Err(second) => Err(second),
                }
            }
        }
    }

    /// Deletes every generation. Returns `true` if all of them are gone.
    pub fn remove(&self) -> bool {
        let mut removed = true;
        for path in self.paths() {
            if let Err(e) = file::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove record file");
                removed = false;
            }
        }
        removed
    }

    fn read_path(path: &Path) -> Result<Envelope, FormatError> {
        match file::read_file(path) {
            Ok(Some(data)) => Envelope::parse(&data),
            Ok(None) => Err(FormatError::Missing),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "record read failed");
                Err(FormatError::Missing)
            }
        }
    }

    /// (target, stale): write into whichever generation is not the newest
    /// valid one. A newer generation that fails validation is the target, so
    /// the only committed copy is never overwritten.
    fn write_order(&self) -> (PathBuf, PathBuf) {
        let (newer, older) = self.read_order();
        if !file::exists(&newer) {
            return (newer, older);
        }
        if Self::read_path(&newer).is_err() && Self::read_path(&older).is_ok() { (newer, older) } else { (older, newer) }
    }

    /// (newer, older) by modification time; generation `0` wins ties.
    fn read_order(&self) -> (PathBuf, PathBuf) {
        let first = self.generation(0);
        let second = self.generation(1);
        let first_time = file::modified(&first);
        let second_time = file::modified(&second);

        match (first_time, second_time) {
            (Some(a), Some(b)) if b > a => (second, first),
            (None, Some(_)) => (second, first),
            (Some(_) | None, _) => (first, second),
        }
    }

    fn suffixed(base: &Path, suffix: &str) -> PathBuf {
        let mut name = base.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::container::serializer::Serializer;

    fn record(payload: &[u8]) -> Vec<u8> {
        Serializer::new().push(payload).finish()
    }

    #[test]
    fn test_safe_roundtrip_single_generation() {
        let dir = tempdir().unwrap();
        let file = SafeFile::new(dir.path(), "settings", true);

        file.write(&record(b"v1")).unwrap();
        file.write(&record(b"v2")).unwrap();

        assert_eq!(file.read().unwrap().chunk(0), Some(&b"v2"[..]));
        let existing: Vec<_> = file.paths().into_iter().filter(|p| p.exists()).collect();
        assert_eq!(existing.len(), 1);
    }

    #[test]
    fn test_crash_during_new_generation_keeps_old() {
        let dir = tempdir().unwrap();
        let file = SafeFile::new(dir.path(), "map", true);
        file.write(&record(b"committed")).unwrap();

        let current = file.generation(0);
        assert!(current.exists());

        // A half-written generation 1, newer than generation 0.
        let partial = record(b"never finished");
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(file.generation(1), &partial[..partial.len() / 2]).unwrap();

        assert_eq!(file.read().unwrap().chunk(0), Some(&b"committed"[..]));
        assert!(current.exists());
    }

    #[test]
    fn test_write_after_crash_targets_corrupt_generation() {
        let dir = tempdir().unwrap();
        let file = SafeFile::new(dir.path(), "map", true);
        assert!(file.is_safe());
        file.write(&record(b"committed")).unwrap();

        let partial = record(b"never finished");
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(file.generation(1), &partial[..partial.len() / 2]).unwrap();

        let (target, _) = file.write_order();
        assert_eq!(target, file.generation(1));

        // A second crash half way through the next write.
        let next = record(b"next");
        fs::write(&target, &next[..next.len() / 2]).unwrap();
        assert_eq!(file.read().unwrap().chunk(0), Some(&b"committed"[..]));

        file.write(&record(b"next")).unwrap();
        assert_eq!(file.read().unwrap().chunk(0), Some(&b"next"[..]));
    }

    #[test]
    fn test_read_drops_corrupt_newer_generation() {
        let dir = tempdir().unwrap();
        let file = SafeFile::new(dir.path(), "key", true);
        file.write(&record(b"committed")).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(file.generation(1), b"TDF$torn").unwrap();

        assert_eq!(file.read().unwrap().chunk(0), Some(&b"committed"[..]));
        assert!(!file.generation(1).exists());
        assert!(file.generation(0).exists());
    }

    #[test]
    fn test_complete_new_generation_before_cleanup() {
        let dir = tempdir().unwrap();
        let file = SafeFile::new(dir.path(), "map", true);
        file.write(&record(b"old")).unwrap();

        // Generation 1 fully written but generation 0 never removed.
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(file.generation(1), record(b"new")).unwrap();

        assert_eq!(file.read().unwrap().chunk(0), Some(&b"new"[..]));
        assert!(!file.generation(0).exists());
    }

    #[test]
    fn test_missing() {
        let dir = tempdir().unwrap();
        let file = SafeFile::new(dir.path(), "absent", true);
        assert_eq!(file.read(), Err(FormatError::Missing));
        assert!(!file.exists());
    }

    #[test]
    fn test_non_safe_single_file() {
        let dir = tempdir().unwrap();
        let file = SafeFile::new(dir.path(), "0123456789ABCDEF", false);
        assert!(!file.is_safe());

        file.write(&record(b"blob")).unwrap();
        assert!(file.single().exists());
        assert!(!file.generation(0).exists());
        assert_eq!(file.read().unwrap().chunk(0), Some(&b"blob"[..]));

        assert!(file.remove());
        assert!(!file.exists());
    }

    #[test]
    fn test_corrupt_only_generation() {
        let dir = tempdir().unwrap();
        let file = SafeFile::new(dir.path(), "draft", true);
        fs::write(file.generation(0), b"TDF$garbage-garbage-garbage").unwrap();

        assert!(file.read().is_err());
    }
}
