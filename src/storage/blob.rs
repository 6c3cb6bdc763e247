//! Content-addressed blob caches.
//!
//! Each [`BlobCategory`] has a [`BlobIndex`]: key → (FileKey, accounted size)
//! plus an alias table mapping secondary keys onto stored entries. Blob files
//! are non-safe records whose plaintext starts with a header naming the
//! category and the key the bytes were stored under:
//!
//! ```text
//! [CATEGORY (u32 LE)] [KEY LEN (u32 LE)] [KEY] [DATA]
//! ```
//!
//! A record whose header does not match what the index expects is treated as
//! absent.

use std::fmt::Display;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytesize::ByteSize;
use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};
use wincode::{SchemaRead, SchemaWrite};

use crate::cipher::LocalKey;
use crate::error::{FormatError, ReadError};
use crate::storage::record::{self, record_file};
use crate::types::{BlobCategory, FileKey, StorageKey};

const HEADER_FIXED: usize = 8;

/// Key type of a blob index.
pub trait IndexKey: Clone + Eq + Hash + Display {
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Option<Self>;
}

impl IndexKey for StorageKey {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&self.high.to_le_bytes());
        bytes.extend_from_slice(&self.low.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (high, low) = bytes.split_first_chunk::<8>()?;
        let low: [u8; 8] = low.try_into().ok()?;
        Some(Self::new(u64::from_le_bytes(*high), u64::from_le_bytes(low)))
    }
}

impl IndexKey for String {
    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        String::from_utf8(bytes.to_vec()).ok()
    }
}

/// Builds the plaintext of a blob record.
pub fn encode_blob(category: BlobCategory, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let key_len = u32::try_from(key.len()).context("blob key too long")?;
    let mut plaintext = Vec::with_capacity(HEADER_FIXED + key.len() + data.len());
    plaintext.extend_from_slice(&category.tag().to_le_bytes());
    plaintext.extend_from_slice(&key_len.to_le_bytes());
    plaintext.extend_from_slice(key);
    plaintext.extend_from_slice(data);
    Ok(plaintext)
}

/// Strips and checks the header of a decrypted blob record.
///
/// Returns `None` when the category or key does not match.
pub fn decode_blob(mut plaintext: Vec<u8>, category: BlobCategory, key: &[u8]) -> Option<Vec<u8>> {
    if plaintext.len() < HEADER_FIXED {
        return None;
    }
    let tag = u32::from_le_bytes(plaintext[0..4].try_into().ok()?);
    let key_len = u32::from_le_bytes(plaintext[4..8].try_into().ok()?) as usize;

    let data_start = HEADER_FIXED.checked_add(key_len)?;
    if tag != category.tag() || data_start > plaintext.len() || &plaintext[HEADER_FIXED..data_start] != key {
        return None;
    }

    plaintext.drain(..data_start);
    Some(plaintext)
}

/// Reads a blob record off disk; every failure is a miss.
pub fn read_blob(path_dir: &Path, file_key: FileKey, data_key: &LocalKey, category: BlobCategory, key: &[u8]) -> Option<Vec<u8>> {
    let file = record_file(path_dir, file_key, false);
    let plaintext = record::read_optional(&file, data_key)?;
    let data = decode_blob(plaintext, category, key);
    if data.is_none() {
        warn!(category = category.label(), %file_key, "blob header mismatch");
    }
    data
}

#[derive(SchemaRead, SchemaWrite)]
struct EntryRecord {
    key: Vec<u8>,
    file_key: u64,
    size: u64,
}

#[derive(SchemaRead, SchemaWrite)]
struct AliasRecord {
    key: Vec<u8>,
    target: Vec<u8>,
}

/// Serialized form of a blob index.
#[derive(SchemaRead, SchemaWrite)]
struct IndexRecord {
    entries: Vec<EntryRecord>,
    aliases: Vec<AliasRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    pub file_key: FileKey,
    /// On-disk size of the record in bytes.
    pub size: u64,
}

/// Index of one blob cache.
#[derive(Debug)]
pub struct BlobIndex<K: IndexKey> {
    category: BlobCategory,
    entries: HashMap<K, Entry>,
    aliases: HashMap<K, K>,
    files: HashSet<FileKey>,
    total: u64,
    dirty: bool,
}

impl<K: IndexKey> BlobIndex<K> {
    pub fn new(category: BlobCategory) -> Self {
        Self { category, entries: HashMap::new(), aliases: HashMap::new(), files: HashSet::new(), total: 0, dirty: false }
    }

    #[inline]
    pub const fn category(&self) -> BlobCategory {
        self.category
    }

    /// Sum of entry sizes in bytes.
    #[inline]
    pub const fn total(&self) -> u64 {
        self.total
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Stored key a lookup of `key` lands on, following at most one alias hop.
    pub fn resolve<'a>(&'a self, key: &'a K) -> Option<&'a K> {
        if self.entries.contains_key(key) {
            return Some(key);
        }
        self.aliases.get(key).filter(|target| self.entries.contains_key(*target))
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.resolve(key).is_some()
    }

    /// Entry behind `key`, resolving aliases.
    pub fn entry(&self, key: &K) -> Option<Entry> {
        self.resolve(key).and_then(|stored| self.entries.get(stored)).copied()
    }

    #[inline]
    pub fn references(&self, file_key: FileKey) -> bool {
        self.files.contains(&file_key)
    }

    /// Every FileKey referenced by this index.
    pub fn file_keys(&self) -> impl Iterator<Item = FileKey> + '_ {
        self.files.iter().copied()
    }

    /// Writes `data` under `key` into `file_key` and accounts for it.
    ///
    /// An alias key writes through to the entry it points at.
    pub fn put(&mut self, key: K, data: &[u8], file_key: FileKey, dir: &Path, data_key: &LocalKey) -> Result<()> {
        let stored = self.resolve(&key).cloned().unwrap_or(key);
        let plaintext = encode_blob(self.category, &stored.to_bytes(), data)?;
        let size = record::record_len(plaintext.len());

        record::write_encrypted(&record_file(dir, file_key, false), &plaintext, data_key).with_context(|| format!("failed to write {} blob {stored}", self.category))?;

        if let Some(old) = self.entries.insert(stored, Entry { file_key, size }) {
            self.total = self.total.saturating_sub(old.size);
            if old.file_key != file_key {
                self.files.remove(&old.file_key);
            }
        }
        self.files.insert(file_key);
        self.total += size;
        self.dirty = true;

        debug!(category = self.category.label(), %file_key, size = %ByteSize::b(size), total = %ByteSize::b(self.total), "blob stored");
        Ok(())
    }

    /// Reads the bytes behind `key`; `None` on any miss.
    pub fn get(&self, key: &K, dir: &Path, data_key: &LocalKey) -> Option<Vec<u8>> {
        let stored = self.resolve(key)?;
        let entry = self.entries.get(stored)?;
        read_blob(dir, entry.file_key, data_key, self.category, &stored.to_bytes())
    }

    /// Registers `new_key` as another name for the entry behind `existing`.
    ///
    /// Returns `false` when `existing` is not stored. Aliases always point at a
    /// stored entry directly, so chains never form.
    pub fn add_alias(&mut self, new_key: K, existing: &K) -> bool {
        let Some(target) = self.resolve(existing).cloned() else {
            return false;
        };
        if new_key == target {
            return true;
        }
        if self.entries.contains_key(&new_key) {
            return false;
        }
        self.aliases.insert(new_key, target);
        self.dirty = true;
        true
    }

    /// Deletes the file behind `key` and every name pointing at it.
    ///
    /// The entry is kept when the file could not be deleted.
    pub fn remove(&mut self, key: &K, dir: &Path) -> bool {
        let Some(stored) = self.resolve(key).cloned() else {
            return false;
        };
        let Some(entry) = self.entries.get(&stored).copied() else {
            return false;
        };

        if !record_file(dir, entry.file_key, false).remove() {
            warn!(category = self.category.label(), file_key = %entry.file_key, "blob file not removed, keeping entry");
            return false;
        }

        self.entries.remove(&stored);
        self.aliases.retain(|_, target| *target != stored);
        self.files.remove(&entry.file_key);
        self.total = self.total.saturating_sub(entry.size);
        self.dirty = true;
        true
    }

    /// Forgets everything; files are left to whoever took the snapshot.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.aliases.clear();
        self.files.clear();
        self.total = 0;
        self.dirty = false;
    }

    /// Physical files of every entry, for a storage sweep.
    pub fn snapshot_paths(&self, dir: &Path) -> Vec<PathBuf> {
        self.files.iter().map(|k| record_file(dir, *k, false).single()).collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let entries = self.entries.iter().map(|(k, e)| EntryRecord { key: k.to_bytes(), file_key: e.file_key.0, size: e.size }).collect();
        let aliases = self.aliases.iter().map(|(k, t)| AliasRecord { key: k.to_bytes(), target: t.to_bytes() }).collect();
        wincode::serialize(&IndexRecord { entries, aliases }).context("failed to serialize blob index")
    }

    /// Rebuilds an index from its record body; the total is recomputed.
    pub fn from_bytes(category: BlobCategory, bytes: &[u8]) -> Result<Self, FormatError> {
        let record: IndexRecord = wincode::deserialize(bytes).map_err(|_| FormatError::Malformed("blob index body"))?;
        let mut index = Self::new(category);

        for entry in record.entries {
            let Some(key) = K::from_bytes(&entry.key) else {
                continue;
            };
            let file_key = FileKey(entry.file_key);
            index.files.insert(file_key);
            index.total += entry.size;
            index.entries.insert(key, Entry { file_key, size: entry.size });
        }
        for alias in record.aliases {
            let (Some(key), Some(target)) = (K::from_bytes(&alias.key), K::from_bytes(&alias.target)) else {
                continue;
            };
            if index.entries.contains_key(&target) {
                index.aliases.insert(key, target);
            }
        }
        Ok(index)
    }

    /// Loads the index record at `file_key`; a missing or corrupt record is an empty index.
    pub fn load(category: BlobCategory, dir: &Path, file_key: FileKey, data_key: &LocalKey) -> Self {
        let file = record_file(dir, file_key, true);
        let result = record::read_encrypted(&file, data_key).map_err(ReadError::from).and_then(|bytes| Self::from_bytes(category, &bytes).map_err(ReadError::from));
        match result {
            Ok(index) => {
                debug!(category = category.label(), count = index.count(), total = %ByteSize::b(index.total), "blob index loaded");
                index
            }
            Err(e) => {
                warn!(category = category.label(), error = %e, "blob index unreadable, starting empty");
                Self::new(category)
            }
        }
    }

    /// Writes the index record if it changed since the last save.
    pub fn save(&mut self, dir: &Path, file_key: FileKey, data_key: &LocalKey) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let bytes = self.to_bytes()?;
        record::write_encrypted(&record_file(dir, file_key, true), &bytes, data_key)?;
        self.dirty = false;
        Ok(())
    }
}

/// The four blob caches of a profile.
#[derive(Debug)]
pub struct BlobCaches {
    images: BlobIndex<StorageKey>,
    stickers: BlobIndex<StorageKey>,
    audios: BlobIndex<StorageKey>,
    web_files: BlobIndex<String>,
}

impl Default for BlobCaches {
    fn default() -> Self {
        Self {
            images: BlobIndex::new(BlobCategory::Images),
            stickers: BlobIndex::new(BlobCategory::StickerImages),
            audios: BlobIndex::new(BlobCategory::Audios),
            web_files: BlobIndex::new(BlobCategory::WebFiles),
        }
    }
}

impl BlobCaches {
    /// Index of a cache keyed by [`StorageKey`]; `None` for web files.
    pub const fn storage(&self, category: BlobCategory) -> Option<&BlobIndex<StorageKey>> {
        match category {
            BlobCategory::Images => Some(&self.images),
            BlobCategory::StickerImages => Some(&self.stickers),
            BlobCategory::Audios => Some(&self.audios),
            BlobCategory::WebFiles => None,
        }
    }

    pub const fn storage_mut(&mut self, category: BlobCategory) -> Option<&mut BlobIndex<StorageKey>> {
        match category {
            BlobCategory::Images => Some(&mut self.images),
            BlobCategory::StickerImages => Some(&mut self.stickers),
            BlobCategory::Audios => Some(&mut self.audios),
            BlobCategory::WebFiles => None,
        }
    }

    #[inline]
    pub const fn web_files(&self) -> &BlobIndex<String> {
        &self.web_files
    }

    /// Web file index when `category` is [`BlobCategory::WebFiles`].
    pub const fn web_files_mut(&mut self, category: BlobCategory) -> Option<&mut BlobIndex<String>> {
        match category {
            BlobCategory::WebFiles => Some(&mut self.web_files),
            _ => None,
        }
    }

    pub fn total(&self, category: BlobCategory) -> u64 {
        self.storage(category).map_or_else(|| self.web_files.total(), BlobIndex::total)
    }

    pub fn count(&self, category: BlobCategory) -> usize {
        self.storage(category).map_or_else(|| self.web_files.count(), BlobIndex::count)
    }

    /// True when any cache owns `file_key`.
    pub fn references(&self, file_key: FileKey) -> bool {
        self.images.references(file_key) || self.stickers.references(file_key) || self.audios.references(file_key) || self.web_files.references(file_key)
    }

    /// Loads the index of `category` from its record.
    pub fn load(&mut self, category: BlobCategory, dir: &Path, file_key: FileKey, data_key: &LocalKey) {
        match self.storage_mut(category) {
            Some(index) => *index = BlobIndex::load(category, dir, file_key, data_key),
            None => self.web_files = BlobIndex::load(category, dir, file_key, data_key),
        }
    }

    /// Saves the index of `category` if dirty.
    pub fn save(&mut self, category: BlobCategory, dir: &Path, file_key: FileKey, data_key: &LocalKey) -> Result<()> {
        match self.storage_mut(category) {
            Some(index) => index.save(dir, file_key, data_key),
            None => self.web_files.save(dir, file_key, data_key),
        }
    }

    /// Paths of every blob file, for a storage sweep.
    pub fn snapshot_paths(&self, dir: &Path) -> Vec<PathBuf> {
        let mut paths = self.images.snapshot_paths(dir);
        paths.extend(self.stickers.snapshot_paths(dir));
        paths.extend(self.audios.snapshot_paths(dir));
        paths.extend(self.web_files.snapshot_paths(dir));
        paths
    }

    /// Empties every cache.
    pub fn clear(&mut self) {
        self.images.clear();
        self.stickers.clear();
        self.audios.clear();
        self.web_files.clear();
    }
}
