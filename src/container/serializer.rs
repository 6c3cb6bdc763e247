use crate::config::{ENVELOPE_OVERHEAD, FORMAT_VERSION, MAGIC_BYTES, NULL_CHUNK};
use crate::container::checksum::Checksum;

/// Builds a container record chunk by chunk.
///
/// Layout: `MAGIC | VERSION (i32 LE) | [LENGTH (u32 BE) | PAYLOAD]* | CHECKSUM`.
pub struct Serializer {
    version: i32,
    body: Vec<u8>,
}

impl Serializer {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_version(FORMAT_VERSION)
    }

    #[inline]
    #[must_use]
    pub fn with_version(version: i32) -> Self {
        Self { version, body: Vec::new() }
    }

    /// Appends a length-prefixed payload chunk.
    pub fn push(&mut self, chunk: &[u8]) -> &mut Self {
        self.body.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
        self.body.extend_from_slice(chunk);
        self
    }

    /// Appends a null chunk, distinct from an empty one.
    pub fn push_null(&mut self) -> &mut Self {
        self.body.extend_from_slice(&NULL_CHUNK.to_be_bytes());
        self
    }

    /// Assembles the record with its trailing checksum.
    #[must_use]
    pub fn finish(&self) -> Vec<u8> {
        let checksum = Checksum::new(&self.body, self.version);

        let mut result = Vec::with_capacity(ENVELOPE_OVERHEAD + self.body.len());
        result.extend_from_slice(&MAGIC_BYTES);
        result.extend_from_slice(&self.version.to_le_bytes());
        result.extend_from_slice(&self.body);
        result.extend_from_slice(checksum.as_bytes());

        debug_assert_eq!(result.len(), ENVELOPE_OVERHEAD + self.body.len());
        result
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Exact on-disk size of a record whose chunks have the given lengths.
#[must_use]
pub fn envelope_len(chunk_lens: &[usize]) -> usize {
    ENVELOPE_OVERHEAD + chunk_lens.iter().map(|len| 4 + len).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let bytes = Serializer::new().push(b"abc").finish();

        assert_eq!(&bytes[0..4], b"TDF$");
        assert_eq!(&bytes[4..8], &FORMAT_VERSION.to_le_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_be_bytes());
        assert_eq!(&bytes[12..15], b"abc");
        assert_eq!(bytes.len(), envelope_len(&[3]));
    }

    #[test]
    fn test_null_chunk_marker() {
        let bytes = Serializer::new().push_null().finish();
        assert_eq!(&bytes[8..12], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(bytes.len(), ENVELOPE_OVERHEAD + 4);
    }
}
