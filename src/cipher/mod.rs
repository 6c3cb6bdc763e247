//! Record encryption.
//!
//! Every record body is encrypted the same way:
//!
//! ```text
//! [TAG (16)] [AES-256-IGE( LENGTH (u32 LE) | PLAINTEXT | PADDING )]
//! ```
//!
//! The tag is a truncated HMAC-SHA256 under the first half of the
//! [`LocalKey`]. The AES key and IV of each record are hashed from the second
//! half together with the tag, so no two records share a key stream.

use std::fmt::{Debug, Formatter};

use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::config::{BLOCK_SIZE, KEY_HALF_LEN, LOCAL_KEY_LEN, TAG_SIZE};
use crate::error::CryptoError;

pub mod derive;
pub mod ige;
pub mod mac;
pub mod protected;

pub use derive::{derive_key, generate_salt, random_bytes};

use ige::{IV_LEN, Ige};
use mac::Mac;
use protected::Protected;

/// Size of the length prefix inside the encrypted body.
const LENGTH_PREFIX: usize = 4;

/// 64 bytes of key material: a MAC half and a cipher half.
#[derive(Clone)]
pub struct LocalKey {
    bytes: Protected<[u8; LOCAL_KEY_LEN]>,
}

impl LocalKey {
    pub const fn from_bytes(bytes: [u8; LOCAL_KEY_LEN]) -> Self {
        Self { bytes: Protected::new(bytes) }
    }

    /// Parses a key from a slice of exactly [`LOCAL_KEY_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; LOCAL_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self::from_bytes(array))
    }

    /// A fresh random data key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; LOCAL_KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; LOCAL_KEY_LEN] {
        self.bytes.expose()
    }

    fn mac_half(&self) -> &[u8] {
        &self.bytes[..KEY_HALF_LEN]
    }

    fn cipher_half(&self) -> &[u8] {
        &self.bytes[KEY_HALF_LEN..]
    }

    /// Per-record AES key and IGE IV.
    fn record_cipher(&self, tag: &[u8]) -> Ige {
        let key: [u8; 32] = Sha256::new().chain_update(tag).chain_update(self.cipher_half()).finalize().into();
        let iv: [u8; IV_LEN] = Sha256::new().chain_update(self.cipher_half()).chain_update(tag).finalize().into();
        Ige::new(&key, &iv)
    }
}

impl Debug for LocalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKey").field("bytes", &self.bytes).finish()
    }
}

/// Size of the encrypted form of a `plain_len`-byte plaintext.
#[inline]
#[must_use]
pub const fn encrypted_len(plain_len: usize) -> usize {
    TAG_SIZE + (LENGTH_PREFIX + plain_len).next_multiple_of(BLOCK_SIZE)
}

/// Encrypts `plaintext` under `key`.
///
/// # Errors
///
/// [`CryptoError::SizeInconsistent`] when the plaintext does not fit the
/// 32-bit length prefix.
pub fn encrypt(plaintext: &[u8], key: &LocalKey) -> Result<Vec<u8>, CryptoError> {
    let length = u32::try_from(plaintext.len()).map_err(|_| CryptoError::SizeInconsistent)?.to_le_bytes();
    let total = encrypted_len(plaintext.len());

    let tag = Mac::new(key.mac_half()).compute_parts(&[&length[..], plaintext]);

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&length);
    out.extend_from_slice(plaintext);

    let padding_start = out.len();
    out.resize(total, 0);
    rand::rng().fill_bytes(&mut out[padding_start..]);

    key.record_cipher(&tag).encrypt(&mut out[TAG_SIZE..]);
    trace!(plain = plaintext.len(), encrypted = total, "record encrypted");
    Ok(out)
}

/// Decrypts and authenticates a record body.
///
/// # Errors
///
/// - [`CryptoError::SizeInconsistent`] if the body is not block aligned, is too
///   short, or embeds a length that does not fit the decrypted buffer
/// - [`CryptoError::WrongKeyOrCorrupt`] if the tag does not match
pub fn decrypt(data: &[u8], key: &LocalKey) -> Result<Vec<u8>, CryptoError> {
    if data.len() < TAG_SIZE + BLOCK_SIZE {
        return Err(CryptoError::SizeInconsistent);
    }

    let (tag, body) = data.split_at(TAG_SIZE);
    if body.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::SizeInconsistent);
    }

    let mut body = body.to_vec();
    key.record_cipher(tag).decrypt(&mut body);

    let (length, rest) = body.split_at(LENGTH_PREFIX);
    let plain_len = u32::from_le_bytes([length[0], length[1], length[2], length[3]]) as usize;
    if plain_len > rest.len() || rest.len() - plain_len >= BLOCK_SIZE {
        return Err(CryptoError::SizeInconsistent);
    }

    let plaintext = &rest[..plain_len];
    if !Mac::new(key.mac_half()).verify_parts(tag, &[length, plaintext]) {
        return Err(CryptoError::WrongKeyOrCorrupt);
    }

    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_sizes() {
        let key = LocalKey::generate();

        for len in [0usize, 1, 11, 12, 13, 27, 28, 100, 10 * 1024] {
            let plaintext = random_bytes(len);
            let encrypted = encrypt(&plaintext, &key).unwrap();

            assert_eq!(encrypted.len(), encrypted_len(len));
            assert_eq!(decrypt(&encrypted, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_encrypted_len() {
        assert_eq!(encrypted_len(0), 32);
        assert_eq!(encrypted_len(12), 32);
        assert_eq!(encrypted_len(13), 48);
        assert_eq!(encrypted_len(10 * 1024 + 24), 16 + 10 * 1024 + 32);
    }

    #[test]
    fn test_every_bit_flip_rejected() {
        let key = LocalKey::generate();
        let encrypted = encrypt(b"attack at dawn, bring snacks", &key).unwrap();

        for position in 0..encrypted.len() {
            for bit in 0..8 {
                let mut tampered = encrypted.clone();
                tampered[position] ^= 1 << bit;
                assert!(decrypt(&tampered, &key).is_err(), "flip at {position}:{bit} accepted");
            }
        }
    }

    #[test]
    fn test_wrong_key() {
        let encrypted = encrypt(b"secret", &LocalKey::generate()).unwrap();
        assert!(decrypt(&encrypted, &LocalKey::generate()).is_err());
    }

    #[test]
    fn test_size_checks() {
        let key = LocalKey::generate();
        let encrypted = encrypt(b"secret", &key).unwrap();

        assert_eq!(decrypt(&encrypted[..encrypted.len() - 1], &key), Err(CryptoError::SizeInconsistent));
        assert_eq!(decrypt(&encrypted[..TAG_SIZE], &key), Err(CryptoError::SizeInconsistent));
        assert_eq!(decrypt(&[], &key), Err(CryptoError::SizeInconsistent));
    }

    #[test]
    fn test_padding_is_random() {
        let key = LocalKey::generate();
        let a = encrypt(b"same", &key).unwrap();
        let b = encrypt(b"same", &key).unwrap();

        assert_eq!(a[..TAG_SIZE], b[..TAG_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_debug_redacted() {
        let key = LocalKey::generate();
        assert!(format!("{key:?}").contains("[REDACTED]"));
        assert!(LocalKey::from_slice(&[0u8; 10]).is_none());
        assert!(LocalKey::from_slice(key.as_bytes()).is_some());
    }
}
