//! Error taxonomy of the local store.
//!
//! Format and crypto failures mean "record absent" everywhere except passcode
//! verification. Only the directory record and the key file escalate to
//! [`StoreError`].

use thiserror::Error;

/// Reasons a container record is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// No generation of the record exists.
    #[error("record not found")]
    Missing,

    #[error("bad magic bytes")]
    BadMagic,

    /// Written by a newer build; never interpreted.
    #[error("format version {found} is newer than supported {supported}")]
    VersionTooNew { found: i32, supported: i32 },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A chunk length points past the end of the record.
    #[error("record truncated")]
    Truncated,

    /// The record parsed but its body has the wrong shape.
    #[error("malformed record body: {0}")]
    Malformed(&'static str),
}

/// Reasons an encrypted body is rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// The keyed tag does not match: wrong key or corrupt ciphertext.
    #[error("wrong key or corrupt data")]
    WrongKeyOrCorrupt,

    /// Embedded length out of bounds or ciphertext not block aligned.
    #[error("inconsistent encrypted size")]
    SizeInconsistent,
}

/// Failures surfaced to the host application.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Both generations of the directory record failed to write.
    #[error("directory record write failed")]
    MapWrite(#[source] anyhow::Error),

    /// The key file could not be written.
    #[error("key file write failed")]
    KeyWrite(#[source] anyhow::Error),

    /// Operation needs an unlocked store.
    #[error("store is locked")]
    Locked,

    /// A full clear is queued or running; the profile cannot be opened yet.
    #[error("clear all in progress")]
    ClearInProgress,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Any reason a record read yields nothing.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
