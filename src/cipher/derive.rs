//! # Key Derivation with Argon2id
//!
//! Passcode keys are derived with Argon2id (v1.3) into a full 64-byte
//! [`LocalKey`]. The empty passcode uses a cheap profile since there is no
//! secret to stretch; every other passcode uses the strong profile.
//!
//! Salts and random keys come from the thread-local CSPRNG.

use anyhow::{Result, anyhow};
use argon2::Algorithm::Argon2id;
use argon2::Version::V0x13;
use argon2::{Argon2, Params};
use rand::RngCore;
use tracing::debug;

use crate::cipher::LocalKey;
use crate::config::{KdfProfile, LOCAL_KEY_LEN, SALT_LEN};

/// Derives the local key protecting the data key.
///
/// Deterministic for a given (passcode, salt, profile).
///
/// # Errors
///
/// Returns error if the selected Argon2 parameters are out of range.
pub fn derive_key(passcode: &[u8], salt: &[u8], profile: &KdfProfile) -> Result<LocalKey> {
    let kdf = profile.params_for(passcode);
    debug!(memory = kdf.memory, time = kdf.time, lanes = kdf.lanes, "deriving passcode key");

    let params = Params::new(kdf.memory, kdf.time, kdf.lanes, Some(LOCAL_KEY_LEN)).map_err(|e| anyhow!("invalid argon2 parameter: {e}"))?;
    let argon2 = Argon2::new(Argon2id, V0x13, params);

    let mut key = [0u8; LOCAL_KEY_LEN];
    argon2.hash_password_into(passcode, salt, &mut key).map_err(|e| anyhow!("key derivation failed: {e}"))?;

    Ok(LocalKey::from_bytes(key))
}

/// Fresh salt for the key file.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Fills a new buffer of `len` random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}
