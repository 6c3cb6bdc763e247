//! Common type definitions for the local store.
//!
//! # Overview
//!
//! - [`FileKey`]: random identifier naming a physical record on disk
//! - [`StorageKey`]: content/location identifier of a cached blob
//! - [`BlobCategory`]: independently accounted blob caches
//! - [`ClearKind`]: bulk removal requests

use std::fmt::{Display, Formatter, Result};

use strum::{EnumIter, IntoStaticStr};

/// Random 64-bit identifier of a physical record.
///
/// Rendered as 16 uppercase hex characters, which is the file name of the
/// record (plus a generation suffix).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileKey(pub u64);

impl FileKey {
    /// Returns a random key. Callers check it against the filesystem before use.
    #[inline]
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// File name stem of the record.
    #[inline]
    pub fn file_name(self) -> String {
        hex::encode_upper(self.0.to_be_bytes())
    }
}

impl Display for FileKey {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(&self.file_name())
    }
}

/// Identifier of a content-addressed blob: a remote location (volume, id) or
/// a 128-bit content hash split in two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey {
    pub high: u64,
    pub low: u64,
}

impl StorageKey {
    #[inline]
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// Derives a key from the blob content itself.
    pub fn from_content(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        let bytes = hash.as_bytes();
        let mut high = [0u8; 8];
        let mut low = [0u8; 8];
        high.copy_from_slice(&bytes[0..8]);
        low.copy_from_slice(&bytes[8..16]);
        Self { high: u64::from_be_bytes(high), low: u64::from_be_bytes(low) }
    }
}

impl Display for StorageKey {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{:016x}:{:016x}", self.high, self.low)
    }
}

/// Blob caches with their own index and size counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum BlobCategory {
    Images,
    StickerImages,
    Audios,
    WebFiles,
}

impl BlobCategory {
    /// Tag written into every blob record header.
    #[inline]
    pub const fn tag(self) -> u32 {
        match self {
            Self::Images => 1,
            Self::StickerImages => 2,
            Self::Audios => 3,
            Self::WebFiles => 4,
        }
    }

    #[inline]
    pub fn label(self) -> &'static str {
        self.into()
    }
}

impl Display for BlobCategory {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.label())
    }
}

/// Kinds of bulk removal handed to the clear manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ClearKind {
    /// Everything: records, key file, temp directory. Superset of the others.
    All,
    /// Every cached blob and the blob indices.
    Storage,
    /// The temporary downloads directory.
    Downloads,
}

impl Display for ClearKind {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str((*self).into())
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_file_key_name() {
        assert_eq!(FileKey(0x0123_4567_89AB_CDEF).file_name(), "0123456789ABCDEF");
        assert_eq!(FileKey(1).file_name().len(), 16);
    }

    #[test]
    fn test_storage_key_from_content() {
        let a = StorageKey::from_content(b"same bytes");
        let b = StorageKey::from_content(b"same bytes");
        let c = StorageKey::from_content(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_category_tags_unique() {
        let tags: Vec<u32> = BlobCategory::iter().map(BlobCategory::tag).collect();
        let mut sorted = tags.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(tags.len(), sorted.len());
        assert_eq!(BlobCategory::StickerImages.to_string(), "sticker_images");
        assert_eq!(ClearKind::Downloads.to_string(), "downloads");
    }
}
