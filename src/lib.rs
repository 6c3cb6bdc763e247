//! Localstore - encrypted on-disk persistence for a messaging client.
//!
//! Everything a client keeps between runs lives here, encrypted under one
//! random data key that is itself wrapped by a passcode-derived key:
//! - Container records with magic, version and a BLAKE3 checksum
//! - Crash-safe dual-generation files for critical records
//! - HMAC-SHA256 tagged AES-256-IGE record encryption
//! - Argon2id passcode key derivation
//! - Size-accounted blob caches with aliasing and background loading
//! - Debounced directory writes and coalesced bulk clearing

pub mod cipher;
pub mod clear;
pub mod config;
pub mod container;
pub mod error;
pub mod file;
pub mod loader;
pub mod logging;
pub mod secret;
pub mod storage;
pub mod types;

pub use clear::ClearEvent;
pub use config::{KdfParams, KdfProfile, Profile, StoreConfig};
pub use error::{CryptoError, FormatError, ReadError, StoreError};
pub use loader::{BlobLoadSink, TaskId};
pub use secret::Passcode;
pub use storage::{Draft, LocalStore, MapCategory, StoreStatus, WriteMode};
pub use types::{BlobCategory, ClearKind, FileKey, StorageKey};
