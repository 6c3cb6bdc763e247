//! Container record parsing.
//!
//! # Deserialization Process
//!
//! 1. Check the record is long enough for magic, version and checksum
//! 2. Verify the magic bytes
//! 3. Reject versions newer than this build
//! 4. Verify the trailing checksum over the chunk area
//! 5. Split the chunk area into length-prefixed payloads

use crate::config::{CHECKSUM_SIZE, ENVELOPE_OVERHEAD, FORMAT_VERSION, MAGIC_BYTES, MAGIC_SIZE, NULL_CHUNK};
use crate::container::checksum::Checksum;
use crate::error::FormatError;

/// A validated container record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    version: i32,
    chunks: Vec<Option<Vec<u8>>>,
}

impl Envelope {
    /// Parses and validates a whole record.
    ///
    /// # Errors
    ///
    /// Any [`FormatError`]; callers treat all of them as "record absent".
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < ENVELOPE_OVERHEAD {
            return Err(FormatError::Truncated);
        }

        if data[..MAGIC_SIZE] != MAGIC_BYTES {
            return Err(FormatError::BadMagic);
        }

        let version = Self::read_i32(&data[MAGIC_SIZE..MAGIC_SIZE + 4]);
        if version > FORMAT_VERSION {
            return Err(FormatError::VersionTooNew { found: version, supported: FORMAT_VERSION });
        }

        let (body, trailer) = data[MAGIC_SIZE + 4..].split_at(data.len() - ENVELOPE_OVERHEAD);
        debug_assert_eq!(trailer.len(), CHECKSUM_SIZE);
        if !Checksum::new(body, version).matches(trailer) {
            return Err(FormatError::ChecksumMismatch);
        }

        let chunks = Self::split_chunks(body)?;
        Ok(Self { version, chunks })
    }

    #[inline]
    #[must_use]
    pub const fn version(&self) -> i32 {
        self.version
    }

    #[inline]
    #[must_use]
    pub fn chunks(&self) -> &[Option<Vec<u8>>] {
        &self.chunks
    }

    /// Chunk at `index`; `None` for a null chunk or an index past the end.
    #[inline]
    #[must_use]
    pub fn chunk(&self, index: usize) -> Option<&[u8]> {
        self.chunks.get(index).and_then(Option::as_deref)
    }

    /// Takes ownership of the chunk at `index`.
    ///
    /// # Errors
    ///
    /// [`FormatError::Malformed`] when the chunk is missing or null.
    pub fn take_chunk(&mut self, index: usize) -> Result<Vec<u8>, FormatError> {
        self.chunks.get_mut(index).and_then(Option::take).ok_or(FormatError::Malformed("missing chunk"))
    }

    fn split_chunks(mut body: &[u8]) -> Result<Vec<Option<Vec<u8>>>, FormatError> {
        let mut chunks = Vec::new();

        while !body.is_empty() {
            if body.len() < 4 {
                return Err(FormatError::Truncated);
            }
            let (prefix, rest) = body.split_at(4);
            let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);

            if length == NULL_CHUNK {
                chunks.push(None);
                body = rest;
                continue;
            }

            let length = length as usize;
            if length > rest.len() {
                return Err(FormatError::Truncated);
            }
            let (payload, rest) = rest.split_at(length);
            chunks.push(Some(payload.to_vec()));
            body = rest;
        }

        Ok(chunks)
    }

    #[inline]
    fn read_i32(bytes: &[u8]) -> i32 {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::serializer::Serializer;

    #[test]
    fn test_parse_chunks() {
        let bytes = Serializer::new().push(b"first").push(b"").push_null().push(b"last").finish();
        let envelope = Envelope::parse(&bytes).unwrap();

        assert_eq!(envelope.version(), FORMAT_VERSION);
        assert_eq!(envelope.chunks().len(), 4);
        assert_eq!(envelope.chunk(0), Some(&b"first"[..]));
        assert_eq!(envelope.chunk(1), Some(&b""[..]));
        assert_eq!(envelope.chunk(2), None);
        assert_eq!(envelope.chunk(3), Some(&b"last"[..]));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = Serializer::new().push(b"data").finish();
        bytes[0] = b'X';
        assert_eq!(Envelope::parse(&bytes), Err(FormatError::BadMagic));
    }

    #[test]
    fn test_version_too_new() {
        let bytes = Serializer::with_version(FORMAT_VERSION + 1).push(b"data").finish();
        assert_eq!(Envelope::parse(&bytes), Err(FormatError::VersionTooNew { found: FORMAT_VERSION + 1, supported: FORMAT_VERSION }));
    }

    #[test]
    fn test_older_version_accepted() {
        let bytes = Serializer::with_version(1).push(b"data").finish();
        assert_eq!(Envelope::parse(&bytes).unwrap().version(), 1);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = Serializer::new().push(b"payload").finish();
        bytes[13] ^= 0x01;
        assert_eq!(Envelope::parse(&bytes), Err(FormatError::ChecksumMismatch));
    }

    #[test]
    fn test_truncated() {
        let bytes = Serializer::new().push(b"payload").finish();
        assert!(Envelope::parse(&bytes[..bytes.len() - 1]).is_err());
        assert_eq!(Envelope::parse(&bytes[..10]), Err(FormatError::Truncated));
    }

    #[test]
    fn test_take_chunk() {
        let bytes = Serializer::new().push(b"one").push_null().finish();
        let mut envelope = Envelope::parse(&bytes).unwrap();

        assert_eq!(envelope.take_chunk(0).unwrap(), b"one");
        assert!(envelope.take_chunk(1).is_err());
        assert!(envelope.take_chunk(5).is_err());
    }
}
