//! AES-256 in Infinite Garble Extension mode.
//!
//! `y_i = E(x_i ^ y_{i-1}) ^ x_{i-1}`, with `y_0` and `x_0` taken from the
//! first and second half of the 32-byte IV. Any change to a ciphertext block
//! garbles every plaintext block from that point on, which the record tag then
//! catches.

use aes_gcm::aes::Aes256;
use aes_gcm::aes::cipher::generic_array::GenericArray;
use aes_gcm::aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::config::BLOCK_SIZE;

pub const IV_LEN: usize = BLOCK_SIZE * 2;

type Block = [u8; BLOCK_SIZE];

pub struct Ige {
    cipher: Aes256,
    iv: [u8; IV_LEN],
}

impl Ige {
    pub fn new(key: &[u8; 32], iv: &[u8; IV_LEN]) -> Self {
        Self { cipher: Aes256::new(&GenericArray::from(*key)), iv: *iv }
    }

    /// Encrypts `data` in place. The caller guarantees block alignment.
    pub fn encrypt(&self, data: &mut [u8]) {
        debug_assert_eq!(data.len() % BLOCK_SIZE, 0);
        let (mut y_prev, mut x_prev) = self.chaining();

        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let x = Self::load(chunk);
            let mut block = GenericArray::from(xor(&x, &y_prev));
            self.cipher.encrypt_block(&mut block);
            let y = xor(&Self::load(&block), &x_prev);

            chunk.copy_from_slice(&y);
            x_prev = x;
            y_prev = y;
        }
    }

    /// Decrypts `data` in place. The caller guarantees block alignment.
    pub fn decrypt(&self, data: &mut [u8]) {
        debug_assert_eq!(data.len() % BLOCK_SIZE, 0);
        let (mut y_prev, mut x_prev) = self.chaining();

        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let y = Self::load(chunk);
            let mut block = GenericArray::from(xor(&y, &x_prev));
            self.cipher.decrypt_block(&mut block);
            let x = xor(&Self::load(&block), &y_prev);

            chunk.copy_from_slice(&x);
            x_prev = x;
            y_prev = y;
        }
    }

    fn chaining(&self) -> (Block, Block) {
        let mut y = [0u8; BLOCK_SIZE];
        let mut x = [0u8; BLOCK_SIZE];
        y.copy_from_slice(&self.iv[..BLOCK_SIZE]);
        x.copy_from_slice(&self.iv[BLOCK_SIZE..]);
        (y, x)
    }

    #[inline]
    fn load(chunk: &[u8]) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);
        block
    }
}

#[inline]
fn xor(a: &Block, b: &Block) -> Block {
    let mut out = [0u8; BLOCK_SIZE];
    for (o, (l, r)) in out.iter_mut().zip(a.iter().zip(b)) {
        *o = l ^ r;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let ige = Ige::new(&[3u8; 32], &[9u8; IV_LEN]);
        let original: Vec<u8> = (0..64u8).collect();

        let mut data = original.clone();
        ige.encrypt(&mut data);
        assert_ne!(data, original);

        ige.decrypt(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_error_propagates_forward() {
        let ige = Ige::new(&[3u8; 32], &[9u8; IV_LEN]);
        let original = vec![0u8; 64];

        let mut data = original.clone();
        ige.encrypt(&mut data);
        data[20] ^= 0x01;
        ige.decrypt(&mut data);

        assert_eq!(&data[..16], &original[..16]);
        assert_ne!(&data[16..32], &original[16..32]);
        assert_ne!(&data[48..], &original[48..]);
    }

    #[test]
    fn test_iv_changes_output() {
        let mut a = vec![5u8; 32];
        let mut b = a.clone();
        Ige::new(&[1u8; 32], &[0u8; IV_LEN]).encrypt(&mut a);
        Ige::new(&[1u8; 32], &[1u8; IV_LEN]).encrypt(&mut b);
        assert_ne!(a, b);
    }
}
