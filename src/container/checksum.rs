use subtle::ConstantTimeEq;

use crate::config::{CHECKSUM_SIZE, MAGIC_BYTES};

/// Trailing checksum of a container record.
///
/// Covers the chunk bytes as written, then the chunk byte count, the format
/// version and the magic, in that order.
pub struct Checksum {
    hash: [u8; CHECKSUM_SIZE],
}

impl Checksum {
    #[must_use]
    pub fn new(body: &[u8], version: i32) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(body);
        hasher.update(&(body.len() as u32).to_le_bytes());
        hasher.update(&version.to_le_bytes());
        hasher.update(&MAGIC_BYTES);

        let mut hash = [0u8; CHECKSUM_SIZE];
        hash.copy_from_slice(&hasher.finalize().as_bytes()[..CHECKSUM_SIZE]);
        Self { hash }
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CHECKSUM_SIZE] {
        &self.hash
    }

    #[must_use]
    pub fn matches(&self, expected: &[u8]) -> bool {
        expected.len() == CHECKSUM_SIZE && bool::from(self.hash.ct_eq(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_covers_version() {
        let a = Checksum::new(b"body", 1);
        let b = Checksum::new(b"body", 2);
        assert!(!a.matches(b.as_bytes()));
        assert!(a.matches(Checksum::new(b"body", 1).as_bytes()));
    }

    #[test]
    fn test_checksum_rejects_short() {
        let a = Checksum::new(b"body", 1);
        assert!(!a.matches(&a.as_bytes()[..8]));
    }
}
