//! The key file: salt plus the data key wrapped under the passcode key.
//!
//! Unlike every other record it is not encrypted as a whole, since the salt
//! must be readable before any key exists. Layout is a two-chunk container:
//! `[SALT] [encrypt(DATA KEY, passcode key)]`.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cipher::{self, LocalKey, derive_key, generate_salt};
use crate::config::{KdfProfile, SALT_LEN};
use crate::container::{SafeFile, Serializer};
use crate::error::FormatError;

#[derive(Clone, Debug)]
pub struct KeyFile {
    salt: [u8; SALT_LEN],
    wrapped: Vec<u8>,
}

impl KeyFile {
    /// Wraps `data_key` under a key derived from `passcode` and a fresh salt.
    pub fn wrap(data_key: &LocalKey, passcode: &[u8], kdf: &KdfProfile) -> Result<Self> {
        let salt = generate_salt();
        let passcode_key = derive_key(passcode, &salt, kdf)?;
        let wrapped = cipher::encrypt(data_key.as_bytes(), &passcode_key).context("failed to wrap data key")?;
        Ok(Self { salt, wrapped })
    }

    /// Parses the key file record.
    ///
    /// # Errors
    ///
    /// Any [`FormatError`]; a wrong chunk count or salt size is `Malformed`.
    pub fn read(file: &SafeFile) -> Result<Self, FormatError> {
        let mut envelope = file.read()?;
        if envelope.chunks().len() != 2 {
            return Err(FormatError::Malformed("key file chunk count"));
        }

        let salt: [u8; SALT_LEN] = envelope.take_chunk(0)?.try_into().map_err(|_| FormatError::Malformed("key file salt"))?;
        let wrapped = envelope.take_chunk(1)?;
        Ok(Self { salt, wrapped })
    }

    /// Writes the key file synchronously.
    pub fn write(&self, file: &SafeFile) -> Result<()> {
        let bytes = Serializer::new().push(&self.salt).push(&self.wrapped).finish();
        file.write(&bytes)?;
        info!("key file written");
        Ok(())
    }

    /// Recovers the data key; `Ok(None)` means the passcode is wrong.
    ///
    /// # Errors
    ///
    /// Only when key derivation itself fails.
    pub fn unwrap_key(&self, passcode: &[u8], kdf: &KdfProfile) -> Result<Option<LocalKey>> {
        let passcode_key = derive_key(passcode, &self.salt, kdf)?;
        match cipher::decrypt(&self.wrapped, &passcode_key) {
            Ok(bytes) => Ok(LocalKey::from_slice(&bytes)),
            Err(e) => {
                debug!(error = %e, "data key unwrap failed");
                Ok(None)
            }
        }
    }

    #[inline]
    pub const fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::config::KdfParams;

    fn kdf() -> KdfProfile {
        let tiny = KdfParams { memory: 8, time: 1, lanes: 1 };
        KdfProfile { empty: tiny, strong: tiny }
    }

    #[test]
    fn test_wrap_unwrap() {
        let dir = tempdir().unwrap();
        let file = SafeFile::new(dir.path(), "key", true);
        let data_key = LocalKey::generate();

        KeyFile::wrap(&data_key, b"1234", &kdf()).unwrap().write(&file).unwrap();
        let loaded = KeyFile::read(&file).unwrap();

        let unwrapped = loaded.unwrap_key(b"1234", &kdf()).unwrap().unwrap();
        assert_eq!(unwrapped.as_bytes(), data_key.as_bytes());
        assert!(loaded.unwrap_key(b"4321", &kdf()).unwrap().is_none());
        assert!(loaded.unwrap_key(b"", &kdf()).unwrap().is_none());
    }

    #[test]
    fn test_rewrap_changes_salt() {
        let data_key = LocalKey::generate();
        let first = KeyFile::wrap(&data_key, b"", &kdf()).unwrap();
        let second = KeyFile::wrap(&data_key, b"new", &kdf()).unwrap();

        assert_ne!(first.salt(), second.salt());
        assert!(second.unwrap_key(b"new", &kdf()).unwrap().is_some());
    }

    #[test]
    fn test_malformed() {
        let dir = tempdir().unwrap();
        let file = SafeFile::new(dir.path(), "key", true);
        file.write(&Serializer::new().push(b"short").finish()).unwrap();

        assert!(matches!(KeyFile::read(&file), Err(FormatError::Malformed(_))));
    }
}
