use hmac::digest::{Key, KeyInit};
use hmac::{Hmac, Mac as _};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::{KEY_HALF_LEN, TAG_SIZE};

/// SHA-256 block size; HMAC zero-pads shorter keys to it.
const HMAC_BLOCK: usize = 64;

/// Keyed integrity tag over the unpadded record body.
pub struct Mac {
    key: [u8; HMAC_BLOCK],
}

impl Mac {
    /// Keys longer than one SHA-256 block are truncated; local keys use a
    /// [`KEY_HALF_LEN`]-byte half.
    pub fn new(key: &[u8]) -> Self {
        let len = key.len().min(HMAC_BLOCK);
        let mut padded = [0u8; HMAC_BLOCK];
        padded[..len].copy_from_slice(&key[..len]);
        Self { key: padded }
    }

    /// First [`TAG_SIZE`] bytes of HMAC-SHA256 over `parts`, in order.
    pub fn compute_parts(&self, parts: &[&[u8]]) -> [u8; TAG_SIZE] {
        let key = Key::<Hmac<Sha256>>::clone_from_slice(&self.key);
        let mut mac = <Hmac<Sha256> as KeyInit>::new(&key);
        parts.iter().for_each(|part| mac.update(part));

        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&mac.finalize().into_bytes()[..TAG_SIZE]);
        tag
    }

    pub fn verify_parts(&self, expected: &[u8], parts: &[&[u8]]) -> bool {
        expected.len() == TAG_SIZE && bool::from(self.compute_parts(parts).ct_eq(expected))
    }
}

impl Drop for Mac {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_key_matches_plain_hmac() {
        let key = [0x42u8; KEY_HALF_LEN];
        let ours = Mac::new(&key).compute_parts(&[b"len", b"body"]);

        let mut reference = <Hmac<Sha256> as hmac::Mac>::new_from_slice(&key).unwrap();
        reference.update(b"lenbody");
        let full = reference.finalize().into_bytes();

        assert_eq!(&ours[..], &full[..TAG_SIZE]);
    }

    #[test]
    fn test_verify() {
        let mac = Mac::new(&[1u8; KEY_HALF_LEN]);
        let tag = mac.compute_parts(&[b"data"]);

        assert!(mac.verify_parts(&tag, &[b"data"]));
        assert!(!mac.verify_parts(&tag, &[b"date"]));
        assert!(!mac.verify_parts(&tag[..8], &[b"data"]));
    }
}
