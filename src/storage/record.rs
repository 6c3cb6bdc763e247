//! Encrypted record plumbing shared by every record kind.
//!
//! A record on disk is a container holding a single chunk, the encrypted body.
//! Reads that fail validation or authentication yield a [`ReadError`]; callers
//! decide whether that means "absent" or something worse.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, trace};

use crate::cipher::{self, LocalKey};
use crate::config::MAX_KEY_ATTEMPTS;
use crate::container::{SafeFile, Serializer, envelope_len};
use crate::error::{FormatError, ReadError};
use crate::logging::RedactedBytes;
use crate::types::FileKey;

/// Physical file(s) of the record named by `file_key`.
#[inline]
pub fn record_file(dir: &Path, file_key: FileKey, safe: bool) -> SafeFile {
    SafeFile::new(dir, &file_key.file_name(), safe)
}

/// On-disk size of a single-chunk record with a `plain_len`-byte plaintext.
#[inline]
#[must_use]
pub fn record_len(plain_len: usize) -> u64 {
    envelope_len(&[cipher::encrypted_len(plain_len)]) as u64
}

/// Encrypts `plaintext` and writes it as a one-chunk record.
pub fn write_encrypted(file: &SafeFile, plaintext: &[u8], key: &LocalKey) -> Result<()> {
    let body = cipher::encrypt(plaintext, key).context("failed to encrypt record")?;
    file.write(&Serializer::new().push(&body).finish())?;
    trace!(path = %file.paths()[0].display(), plaintext = %RedactedBytes(plaintext), "record written");
    Ok(())
}

/// Reads, validates and decrypts a one-chunk record.
pub fn read_encrypted(file: &SafeFile, key: &LocalKey) -> Result<Vec<u8>, ReadError> {
    let mut envelope = file.read()?;
    let body = envelope.take_chunk(0)?;
    Ok(cipher::decrypt(&body, key)?)
}

/// Like [`read_encrypted`] but folds every failure into "absent".
pub fn read_optional(file: &SafeFile, key: &LocalKey) -> Option<Vec<u8>> {
    match read_encrypted(file, key) {
        Ok(data) => Some(data),
        Err(ReadError::Format(FormatError::Missing)) => None,
        Err(e) => {
            debug!(path = %file.paths()[0].display(), error = %e, "record rejected");
            None
        }
    }
}

/// Picks a FileKey with no file on disk and no in-memory owner.
///
/// # Errors
///
/// Fails after [`MAX_KEY_ATTEMPTS`] collisions in a row.
pub fn allocate_file_key(dir: &Path, taken: impl Fn(FileKey) -> bool) -> Result<FileKey> {
    for _ in 0..MAX_KEY_ATTEMPTS {
        let candidate = FileKey::random();
        if taken(candidate) {
            continue;
        }
        let safe = record_file(dir, candidate, true);
        let single = record_file(dir, candidate, false);
        if safe.exists() || single.exists() {
            continue;
        }
        return Ok(candidate);
    }
    bail!("no free file key after {MAX_KEY_ATTEMPTS} attempts")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_roundtrip_and_size() {
        let dir = tempdir().unwrap();
        let key = LocalKey::generate();
        let file = record_file(dir.path(), FileKey(7), false);

        write_encrypted(&file, b"hello record", &key).unwrap();
        assert_eq!(read_encrypted(&file, &key).unwrap(), b"hello record");
        assert_eq!(fs::metadata(file.single()).unwrap().len(), record_len(12));
    }

    #[test]
    fn test_wrong_key_is_crypto_error() {
        let dir = tempdir().unwrap();
        let file = record_file(dir.path(), FileKey(8), true);

        write_encrypted(&file, b"data", &LocalKey::generate()).unwrap();
        assert!(matches!(read_encrypted(&file, &LocalKey::generate()), Err(ReadError::Crypto(_))));
        assert!(read_optional(&file, &LocalKey::generate()).is_none());
    }

    #[test]
    fn test_missing_is_absent() {
        let dir = tempdir().unwrap();
        let file = record_file(dir.path(), FileKey(9), true);
        assert!(matches!(read_encrypted(&file, &LocalKey::generate()), Err(ReadError::Format(FormatError::Missing))));
    }

    #[test]
    fn test_allocation_skips_taken_and_existing() {
        let dir = tempdir().unwrap();
        let key = allocate_file_key(dir.path(), |_| false).unwrap();
        assert!(!record_file(dir.path(), key, true).exists());

        assert!(allocate_file_key(dir.path(), |_| true).is_err());
    }
}
