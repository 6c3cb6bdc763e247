//! Store Configuration
//!
//! This module holds every constant that shapes the on-disk format of the local
//! store, the key derivation cost profiles, and the write scheduling delays. It
//! also defines [`StoreConfig`], the runtime value the host application hands to
//! [`crate::LocalStore::open`].
//!
//! ## Design Notes
//!
//! - Format constants (magic, version, block size) are part of the bit-exact
//!   container layout and must never change without a version bump
//! - KDF profiles are values, not globals, so a host can tune them per device
//! - Debounce delays bound how long a directory mutation may stay in memory

use std::path::PathBuf;
use std::time::Duration;

// === Container Format ===

/// Magic bytes opening every container record.
///
/// A file that does not start with these four bytes is not a store record and
/// is treated as absent.
pub const MAGIC_BYTES: [u8; 4] = *b"TDF$";

/// Size of the magic prefix in bytes.
pub const MAGIC_SIZE: usize = 4;

/// Container format version written by this build.
///
/// Records carrying a larger version were written by a newer build and are
/// never interpreted.
pub const FORMAT_VERSION: i32 = 2;

/// Size of the trailing container checksum in bytes.
///
/// The checksum is a BLAKE3 digest truncated to 16 bytes.
pub const CHECKSUM_SIZE: usize = 16;

/// Chunk length marking a null payload chunk (distinct from an empty one).
pub const NULL_CHUNK: u32 = u32::MAX;

/// Fixed per-record overhead: magic, version and checksum.
pub const ENVELOPE_OVERHEAD: usize = MAGIC_SIZE + 4 + CHECKSUM_SIZE;

// === Record Encryption ===

/// Cipher block size; every encrypted body is padded to a multiple of it.
pub const BLOCK_SIZE: usize = 16;

/// Size of the keyed integrity tag prefixed to every encrypted body.
pub const TAG_SIZE: usize = 16;

/// Length of a local key (data key or passcode-derived key) in bytes.
///
/// The first half keys the integrity tag, the second half feeds the per-record
/// AES key and IV derivation.
pub const LOCAL_KEY_LEN: usize = 64;

/// Length of each half of a local key.
pub const KEY_HALF_LEN: usize = 32;

/// Length of the key derivation salt stored in the key file.
pub const SALT_LEN: usize = 32;

// === Argon2id Profiles ===

/// Argon2id time cost for a non-empty passcode.
///
/// Three passes over memory keeps interactive unlocking under a second on
/// typical hardware.
pub const ARGON_TIME: u32 = 3;

/// Argon2id memory cost in KiB for a non-empty passcode (64 MiB).
pub const ARGON_MEMORY: u32 = 64 * 1024;

/// Argon2id lanes for a non-empty passcode.
pub const ARGON_THREADS: u32 = 4;

/// Argon2id time cost for the empty passcode.
///
/// An empty passcode has no entropy to protect, so a single pass is enough.
pub const ARGON_TIME_EMPTY: u32 = 1;

/// Argon2id memory cost in KiB for the empty passcode (1 MiB).
pub const ARGON_MEMORY_EMPTY: u32 = 1024;

/// Argon2id lanes for the empty passcode.
pub const ARGON_THREADS_EMPTY: u32 = 1;

// === Directory Write Scheduling ===

/// Delay for a `Fast` directory write, roughly one event-loop tick.
pub const FAST_WRITE_DELAY: Duration = Duration::from_millis(1);

/// Coalescing window for a `Deferred` directory write.
pub const DEFERRED_WRITE_DELAY: Duration = Duration::from_millis(1000);

// === File Names ===

/// Root name of the directory record.
pub const MAP_FILE_NAME: &str = "map";

/// Root name of the key file.
pub const KEY_FILE_NAME: &str = "key";

/// Suffix appended to root names for the secondary profile.
pub const SECONDARY_SUFFIX: &str = "_test";

/// Directory (under the root) holding the profile's records.
pub const DATA_DIR_NAME: &str = "data";

/// Directory (under the root) holding temporary downloads.
pub const TEMP_DIR_NAME: &str = "temp";

/// Upper bound on FileKey allocation attempts before giving up.
pub const MAX_KEY_ATTEMPTS: usize = 64;

/// Argon2id cost parameters for one passcode class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory: u32,
    /// Number of passes.
    pub time: u32,
    /// Number of lanes.
    pub lanes: u32,
}

/// Pair of Argon2id profiles: a cheap one for the empty passcode and a strong
/// one for everything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfProfile {
    pub empty: KdfParams,
    pub strong: KdfParams,
}

impl KdfProfile {
    /// Picks the parameters for the given passcode.
    #[inline]
    #[must_use]
    pub fn params_for(&self, passcode: &[u8]) -> KdfParams {
        if passcode.is_empty() { self.empty } else { self.strong }
    }
}

impl Default for KdfProfile {
    fn default() -> Self {
        Self {
            empty: KdfParams { memory: ARGON_MEMORY_EMPTY, time: ARGON_TIME_EMPTY, lanes: ARGON_THREADS_EMPTY },
            strong: KdfParams { memory: ARGON_MEMORY, time: ARGON_TIME, lanes: ARGON_THREADS },
        }
    }
}

/// Which local profile a store instance serves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Primary,
    /// A second account sharing the same root (test server login).
    Secondary,
}

impl Profile {
    fn suffix(self) -> &'static str {
        match self {
            Self::Primary => "",
            Self::Secondary => SECONDARY_SUFFIX,
        }
    }
}

/// Runtime configuration supplied by the host application.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Working directory root; everything the store writes lives below it.
    pub root: PathBuf,
    pub profile: Profile,
    pub kdf: KdfProfile,
    pub fast_delay: Duration,
    pub deferred_delay: Duration,
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), profile: Profile::Primary, kdf: KdfProfile::default(), fast_delay: FAST_WRITE_DELAY, deferred_delay: DEFERRED_WRITE_DELAY }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    #[must_use]
    pub fn with_kdf(mut self, kdf: KdfProfile) -> Self {
        self.kdf = kdf;
        self
    }

    #[must_use]
    pub fn with_delays(mut self, fast: Duration, deferred: Duration) -> Self {
        self.fast_delay = fast;
        self.deferred_delay = deferred;
        self
    }

    /// Directory holding the map, key file and every record.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join(format!("{DATA_DIR_NAME}{}", self.profile.suffix()))
    }

    /// Directory holding temporary downloads, swept by `ClearDownloads`.
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(format!("{TEMP_DIR_NAME}{}", self.profile.suffix()))
    }

    #[must_use]
    pub fn map_name(&self) -> String {
        format!("{MAP_FILE_NAME}{}", self.profile.suffix())
    }

    #[must_use]
    pub fn key_name(&self) -> String {
        format!("{KEY_FILE_NAME}{}", self.profile.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_names() {
        let primary = StoreConfig::new("/tmp/root");
        assert_eq!(primary.map_name(), "map");
        assert_eq!(primary.key_name(), "key");

        let secondary = StoreConfig::new("/tmp/root").with_profile(Profile::Secondary);
        assert_eq!(secondary.map_name(), "map_test");
        assert_eq!(secondary.data_dir(), PathBuf::from("/tmp/root/data_test"));
    }

    #[test]
    fn test_kdf_profile_selection() {
        let kdf = KdfProfile::default();
        assert_eq!(kdf.params_for(b""), kdf.empty);
        assert_eq!(kdf.params_for(b"1234"), kdf.strong);
        assert!(kdf.empty.time < kdf.strong.time);
    }
}
