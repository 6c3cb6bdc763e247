//! The directory record ("map").
//!
//! Lists the FileKey of every well-known category record and of every per-peer
//! draft. It is the only record encrypted directly with the data key that also
//! references other records; losing it means losing the whole store.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use hashbrown::HashMap;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};
use tracing::{debug, info};
use wincode::{SchemaRead, SchemaWrite};

use crate::cipher::LocalKey;
use crate::container::SafeFile;
use crate::error::{ReadError, StoreError};
use crate::storage::record::{self, record_file};
use crate::storage::scheduler::{WriteMode, WriteScheduler};
use crate::types::{BlobCategory, FileKey};

/// Well-known record categories listed in the directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum MapCategory {
    Settings,
    StickerSets,
    SavedPeers,
    ReportSpam,
    Background,
    RecentHashtags,
    ImagesIndex,
    StickerImagesIndex,
    AudiosIndex,
    WebFilesIndex,
}

impl MapCategory {
    /// Stable numeric id written into the directory record.
    const fn id(self) -> u32 {
        match self {
            Self::Settings => 1,
            Self::StickerSets => 2,
            Self::SavedPeers => 3,
            Self::ReportSpam => 4,
            Self::Background => 5,
            Self::RecentHashtags => 6,
            Self::ImagesIndex => 7,
            Self::StickerImagesIndex => 8,
            Self::AudiosIndex => 9,
            Self::WebFilesIndex => 10,
        }
    }

    fn from_id(id: u32) -> Option<Self> {
        Self::iter().find(|category| category.id() == id)
    }

    /// Index record category of a blob cache.
    pub const fn index_of(category: BlobCategory) -> Self {
        match category {
            BlobCategory::Images => Self::ImagesIndex,
            BlobCategory::StickerImages => Self::StickerImagesIndex,
            BlobCategory::Audios => Self::AudiosIndex,
            BlobCategory::WebFiles => Self::WebFilesIndex,
        }
    }

    pub fn label(self) -> &'static str {
        self.into()
    }
}

#[derive(SchemaRead, SchemaWrite)]
struct CategoryEntry {
    category: u32,
    file_key: u64,
}

#[derive(SchemaRead, SchemaWrite)]
struct DraftEntry {
    peer: u64,
    file_key: u64,
}

/// Serialized form of the directory.
#[derive(SchemaRead, SchemaWrite)]
struct MapRecord {
    categories: Vec<CategoryEntry>,
    drafts: Vec<DraftEntry>,
}

/// In-memory directory plus its write scheduling.
#[derive(Debug)]
pub struct DirectoryMap {
    categories: HashMap<MapCategory, FileKey>,
    drafts: HashMap<u64, FileKey>,
    scheduler: WriteScheduler,
    writes: usize,
}

impl DirectoryMap {
    pub fn new(scheduler: WriteScheduler) -> Self {
        Self { categories: HashMap::new(), drafts: HashMap::new(), scheduler, writes: 0 }
    }

    /// Loads the directory record.
    ///
    /// # Errors
    ///
    /// Any read error, or [`FormatError::Malformed`](crate::error::FormatError::Malformed)
    /// when the body does not decode.
    pub fn load(file: &SafeFile, key: &LocalKey, scheduler: WriteScheduler) -> Result<Self, ReadError> {
        let plaintext = record::read_encrypted(file, key)?;
        let parsed: MapRecord = wincode::deserialize(&plaintext).map_err(|_| crate::error::FormatError::Malformed("directory body"))?;

        let mut map = Self::new(scheduler);
        for entry in parsed.categories {
            match MapCategory::from_id(entry.category) {
                Some(category) => {
                    map.categories.insert(category, FileKey(entry.file_key));
                }
                None => debug!(id = entry.category, "skipping unknown directory category"),
            }
        }
        map.drafts.extend(parsed.drafts.into_iter().map(|d| (d.peer, FileKey(d.file_key))));

        info!(categories = map.categories.len(), drafts = map.drafts.len(), "directory loaded");
        Ok(map)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut categories: Vec<CategoryEntry> = self.categories.iter().map(|(c, k)| CategoryEntry { category: c.id(), file_key: k.0 }).collect();
        categories.sort_unstable_by_key(|entry| entry.category);
        let mut drafts: Vec<DraftEntry> = self.drafts.iter().map(|(peer, k)| DraftEntry { peer: *peer, file_key: k.0 }).collect();
        drafts.sort_unstable_by_key(|entry| entry.peer);

        wincode::serialize(&MapRecord { categories, drafts }).context("failed to serialize directory")
    }

    #[inline]
    pub fn key(&self, category: MapCategory) -> Option<FileKey> {
        self.categories.get(&category).copied()
    }

    /// FileKey of `category`, allocating and registering one if absent.
    pub fn get_or_create_key(&mut self, category: MapCategory, dir: &Path, taken: impl Fn(FileKey) -> bool, now: Instant) -> Result<FileKey> {
        if let Some(existing) = self.key(category) {
            return Ok(existing);
        }

        let file_key = record::allocate_file_key(dir, |k| taken(k) || self.references(k))?;
        self.categories.insert(category, file_key);
        self.scheduler.schedule(WriteMode::Fast, now);
        debug!(category = category.label(), %file_key, "directory entry created");
        Ok(file_key)
    }

    /// Deletes the record of `category` and drops its entry.
    pub fn clear_key(&mut self, category: MapCategory, dir: &Path, now: Instant) -> Option<FileKey> {
        let file_key = self.categories.remove(&category)?;
        record_file(dir, file_key, true).remove();
        self.scheduler.schedule(WriteMode::Deferred, now);
        Some(file_key)
    }

    #[inline]
    pub fn draft_key(&self, peer: u64) -> Option<FileKey> {
        self.drafts.get(&peer).copied()
    }

    pub fn get_or_create_draft_key(&mut self, peer: u64, dir: &Path, taken: impl Fn(FileKey) -> bool, now: Instant) -> Result<FileKey> {
        if let Some(existing) = self.draft_key(peer) {
            return Ok(existing);
        }

        let file_key = record::allocate_file_key(dir, |k| taken(k) || self.references(k))?;
        self.drafts.insert(peer, file_key);
        self.scheduler.schedule(WriteMode::Fast, now);
        Ok(file_key)
    }

    pub fn clear_draft_key(&mut self, peer: u64, dir: &Path, now: Instant) -> Option<FileKey> {
        let file_key = self.drafts.remove(&peer)?;
        record_file(dir, file_key, true).remove();
        self.scheduler.schedule(WriteMode::Deferred, now);
        Some(file_key)
    }

    /// True when `file_key` is already owned by a directory entry.
    pub fn references(&self, file_key: FileKey) -> bool {
        self.categories.values().chain(self.drafts.values()).any(|k| *k == file_key)
    }

    /// Every FileKey the directory references.
    pub fn file_keys(&self) -> impl Iterator<Item = FileKey> + '_ {
        self.categories.values().chain(self.drafts.values()).copied()
    }

    /// Drops the blob index entries; used when a storage sweep takes over their files.
    pub fn forget_indices(&mut self, now: Instant) -> Vec<FileKey> {
        let removed: Vec<FileKey> = BlobCategory::iter().filter_map(|c| self.categories.remove(&MapCategory::index_of(c))).collect();
        if !removed.is_empty() {
            self.scheduler.schedule(WriteMode::Fast, now);
        }
        removed
    }

    #[inline]
    pub fn mark_dirty(&mut self, mode: WriteMode, now: Instant) {
        self.scheduler.schedule(mode, now);
    }

    #[inline]
    pub fn due(&self, now: Instant) -> bool {
        self.scheduler.due(now)
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.scheduler.is_pending()
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.scheduler.deadline()
    }

    /// Drops a pending write without performing it.
    #[inline]
    pub fn discard_pending(&mut self) {
        self.scheduler.begin_write();
    }

    /// Number of physical directory writes performed so far.
    #[inline]
    pub const fn write_count(&self) -> usize {
        self.writes
    }

    /// Serializes and writes the directory now.
    ///
    /// # Errors
    ///
    /// [`StoreError::MapWrite`] when both generations failed.
    pub fn write(&mut self, file: &SafeFile, key: &LocalKey) -> Result<(), StoreError> {
        self.scheduler.begin_write();
        let plaintext = self.to_bytes().map_err(StoreError::MapWrite)?;
        record::write_encrypted(file, &plaintext, key).map_err(StoreError::MapWrite)?;
        self.writes += 1;
        debug!(writes = self.writes, "directory written");
        Ok(())
    }
}
