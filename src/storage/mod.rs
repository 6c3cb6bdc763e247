//! The collaborator-facing store.
//!
//! [`LocalStore`] owns the directory, the blob indices and the background
//! workers. All methods run on the owner's thread; background threads only ever
//! see file paths, byte buffers and a shared copy of the data key.
//!
//! # Lifecycle
//!
//! 1. [`LocalStore::open`] spawns the load and clear workers
//! 2. [`LocalStore::start`] unlocks (or creates) the profile with a passcode
//! 3. The host calls [`LocalStore::poll`] from its event loop, no later than
//!    [`LocalStore::next_deadline`], to run debounced writes and deliver loads
//! 4. [`LocalStore::shutdown`] flushes the directory and joins the workers

use std::fs;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use bytesize::ByteSize;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use crate::cipher::LocalKey;
use crate::clear::{ClearEvent, ClearManager, ClearTargets};
use crate::config::StoreConfig;
use crate::container::SafeFile;
use crate::error::{FormatError, ReadError, StoreError};
use crate::loader::{BlobLoadSink, BlobReadTask, LoadQueue, LoadTask, MissTask, TaskId};
use crate::secret::Passcode;
use crate::types::{BlobCategory, ClearKind, FileKey, StorageKey};

pub mod blob;
pub mod draft;
pub mod keyfile;
pub mod map;
pub mod record;
pub mod scheduler;

pub use blob::{BlobCaches, BlobIndex, IndexKey};
pub use draft::Draft;
pub use keyfile::KeyFile;
pub use map::{DirectoryMap, MapCategory};
pub use scheduler::{WriteMode, WriteScheduler};

use record::record_file;

/// Outcome of [`LocalStore::start`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreStatus {
    /// No key file existed; a new profile was created.
    Created,
    /// The existing profile was unlocked and its directory loaded.
    Loaded,
    /// The passcode does not unwrap the data key; retry with another one.
    PasscodeNeeded,
    /// The key file or directory was unreadable; a fresh, empty profile replaced it.
    Reset,
}

pub struct LocalStore {
    config: StoreConfig,
    data_dir: PathBuf,
    key_file: Option<KeyFile>,
    data_key: Option<Arc<LocalKey>>,
    map: DirectoryMap,
    blobs: BlobCaches,
    loader: LoadQueue,
    clear: ClearManager,
    pending_clears: Vec<(ClearKind, Vec<PathBuf>)>,
}

impl LocalStore {
    /// Prepares a store rooted at `config.root` and spawns its workers.
    ///
    /// Nothing is read until [`start`](Self::start).
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let data_dir = config.data_dir();
        let loader = LoadQueue::start()?;
        let clear = ClearManager::start(ClearTargets { data_dir: data_dir.clone(), temp_dir: config.temp_dir() })?;
        let map = DirectoryMap::new(Self::scheduler(&config));

        debug!(root = %config.root.display(), profile = ?config.profile, "store opened");
        Ok(Self { config, data_dir, key_file: None, data_key: None, map, blobs: BlobCaches::default(), loader, clear, pending_clears: Vec::new() })
    }

    fn scheduler(config: &StoreConfig) -> WriteScheduler {
        WriteScheduler::new(config.fast_delay, config.deferred_delay)
    }

    fn key_record(&self) -> SafeFile {
        SafeFile::new(&self.data_dir, &self.config.key_name(), true)
    }

    fn map_record(&self) -> SafeFile {
        SafeFile::new(&self.data_dir, &self.config.map_name(), true)
    }

    #[inline]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// True once a passcode unlocked the data key.
    #[inline]
    pub const fn is_unlocked(&self) -> bool {
        self.data_key.is_some()
    }

    fn unlocked(&self) -> Result<Arc<LocalKey>, StoreError> {
        self.data_key.clone().ok_or(StoreError::Locked)
    }

    // === Unlocking ===

    /// Unlocks the profile with `passcode`, creating it on first use.
    ///
    /// The key file is read once and cached, so retries after
    /// [`StoreStatus::PasscodeNeeded`] only pay for key derivation.
    ///
    /// # Errors
    ///
    /// [`StoreError::KeyWrite`] / [`StoreError::MapWrite`] when a new profile
    /// cannot be persisted, [`StoreError::ClearInProgress`] while a requested
    /// `All` clear has not finished.
    pub fn start(&mut self, passcode: &Passcode) -> Result<StoreStatus, StoreError> {
        self.dispatch_clears();
        if self.clear.is_clearing(ClearKind::All) {
            info!("start deferred until clear all finishes");
            return Err(StoreError::ClearInProgress);
        }

        fs::create_dir_all(&self.data_dir).with_context(|| format!("failed to create directory: {}", self.data_dir.display()))?;

        if self.key_file.is_none() {
            match KeyFile::read(&self.key_record()) {
                Ok(key_file) => self.key_file = Some(key_file),
                Err(FormatError::Missing) => return self.create(passcode, StoreStatus::Created),
                Err(e) => {
                    warn!(error = %e, "key file unreadable, resetting profile");
                    return self.create(passcode, StoreStatus::Reset);
                }
            }
        }

        let Some(key_file) = &self.key_file else {
            return Err(StoreError::Other(anyhow!("key file not cached")));
        };
        let Some(data_key) = key_file.unwrap_key(passcode.expose_secret(), &self.config.kdf)? else {
            info!("passcode rejected");
            return Ok(StoreStatus::PasscodeNeeded);
        };

        self.data_key = Some(Arc::new(data_key));
        self.load_directory()
    }

    fn create(&mut self, passcode: &Passcode, status: StoreStatus) -> Result<StoreStatus, StoreError> {
        let data_key = LocalKey::generate();
        let key_file = KeyFile::wrap(&data_key, passcode.expose_secret(), &self.config.kdf)?;
        key_file.write(&self.key_record()).map_err(StoreError::KeyWrite)?;

        self.key_file = Some(key_file);
        self.data_key = Some(Arc::new(data_key));
        self.map = DirectoryMap::new(Self::scheduler(&self.config));
        self.blobs = BlobCaches::default();
        self.write_directory()?;

        info!(?status, dir = %self.data_dir.display(), "profile created");
        Ok(status)
    }

    fn load_directory(&mut self) -> Result<StoreStatus, StoreError> {
        let data_key = self.unlocked()?;

        match DirectoryMap::load(&self.map_record(), &data_key, Self::scheduler(&self.config)) {
            Ok(map) => self.map = map,
            Err(ReadError::Format(FormatError::Missing)) => {
                info!("directory missing, starting empty");
                self.map = DirectoryMap::new(Self::scheduler(&self.config));
                self.blobs = BlobCaches::default();
                self.write_directory()?;
                return Ok(StoreStatus::Created);
            }
            Err(e) => {
                warn!(error = %e, "directory unreadable, resetting profile");
                self.map = DirectoryMap::new(Self::scheduler(&self.config));
                self.blobs = BlobCaches::default();
                self.write_directory()?;
                return Ok(StoreStatus::Reset);
            }
        }

        self.blobs = BlobCaches::default();
        for category in BlobCategory::iter() {
            if let Some(file_key) = self.map.key(MapCategory::index_of(category)) {
                self.blobs.load(category, &self.data_dir, file_key, &data_key);
            }
        }

        info!(images = %ByteSize::b(self.blobs.total(BlobCategory::Images)), stickers = %ByteSize::b(self.blobs.total(BlobCategory::StickerImages)), "profile loaded");
        Ok(StoreStatus::Loaded)
    }

    /// True when `candidate` unwraps the data key. Never changes state.
    pub fn check_passcode(&self, candidate: &Passcode) -> bool {
        let Some(key_file) = &self.key_file else {
            return false;
        };
        match key_file.unwrap_key(candidate.expose_secret(), &self.config.kdf) {
            Ok(key) => key.is_some(),
            Err(e) => {
                warn!(error = %e, "passcode check failed");
                false
            }
        }
    }

    /// Re-wraps the data key under `passcode` with a fresh salt.
    ///
    /// Only the key file changes; every other record stays as it is.
    ///
    /// # Errors
    ///
    /// [`StoreError::Locked`] before a successful start, [`StoreError::KeyWrite`]
    /// when the key file cannot be written.
    pub fn set_passcode(&mut self, passcode: &Passcode) -> Result<(), StoreError> {
        let data_key = self.unlocked()?;
        let key_file = KeyFile::wrap(&data_key, passcode.expose_secret(), &self.config.kdf)?;
        key_file.write(&self.key_record()).map_err(StoreError::KeyWrite)?;
        self.key_file = Some(key_file);
        info!(empty = passcode.is_empty(), "passcode changed");
        Ok(())
    }

    // === Drafts ===

    /// Saves the draft of `peer`; an empty draft removes it.
    pub fn store_draft(&mut self, peer: u64, value: &Draft) {
        if value.is_empty() {
            if self.map.clear_draft_key(peer, &self.data_dir, Instant::now()).is_some() {
                debug!(peer, "draft cleared");
            }
            return;
        }
        if let Err(e) = self.try_store_draft(peer, value) {
            warn!(peer, error = %e, "failed to store draft");
        }
    }

    fn try_store_draft(&mut self, peer: u64, value: &Draft) -> Result<()> {
        let data_key = self.unlocked()?;
        let file_key = self.map.get_or_create_draft_key(peer, &self.data_dir, |k| self.blobs.references(k), Instant::now())?;
        let bytes = draft::encode(peer, value)?;
        record::write_encrypted(&record_file(&self.data_dir, file_key, true), &bytes, &data_key)
    }

    /// The stored draft of `peer`, if any.
    pub fn load_drafts_for(&self, peer: u64) -> Option<Draft> {
        let data_key = self.data_key.as_ref()?;
        let file_key = self.map.draft_key(peer)?;
        let bytes = record::read_optional(&record_file(&self.data_dir, file_key, true), data_key)?;
        draft::decode(peer, &bytes)
    }

    // === Category records ===

    /// Writes the record of a user category; empty bytes clear it.
    ///
    /// Blob index categories are managed by the blob caches and rejected here.
    pub fn store_record(&mut self, category: MapCategory, bytes: &[u8]) {
        if Self::is_index(category) {
            warn!(category = category.label(), "index records are not written directly");
            return;
        }
        if bytes.is_empty() {
            self.clear_record(category);
            return;
        }
        if let Err(e) = self.try_store_record(category, bytes) {
            warn!(category = category.label(), error = %e, "failed to store record");
        }
    }

    fn try_store_record(&mut self, category: MapCategory, bytes: &[u8]) -> Result<()> {
        let data_key = self.unlocked()?;
        let file_key = self.map.get_or_create_key(category, &self.data_dir, |k| self.blobs.references(k), Instant::now())?;
        record::write_encrypted(&record_file(&self.data_dir, file_key, true), bytes, &data_key)
    }

    pub fn load_record(&self, category: MapCategory) -> Option<Vec<u8>> {
        let data_key = self.data_key.as_ref()?;
        let file_key = self.map.key(category)?;
        record::read_optional(&record_file(&self.data_dir, file_key, true), data_key)
    }

    /// Deletes the record of a user category.
    pub fn clear_record(&mut self, category: MapCategory) {
        if !Self::is_index(category) {
            self.map.clear_key(category, &self.data_dir, Instant::now());
        }
    }

    const fn is_index(category: MapCategory) -> bool {
        matches!(category, MapCategory::ImagesIndex | MapCategory::StickerImagesIndex | MapCategory::AudiosIndex | MapCategory::WebFilesIndex)
    }

    #[inline]
    pub fn store_settings(&mut self, bytes: &[u8]) {
        self.store_record(MapCategory::Settings, bytes);
    }

    #[inline]
    pub fn load_settings(&self) -> Option<Vec<u8>> {
        self.load_record(MapCategory::Settings)
    }

    // === Blobs ===

    /// Caches `data` under `key`, replacing what was there.
    #[inline]
    pub fn store_blob(&mut self, category: BlobCategory, key: StorageKey, data: &[u8]) -> bool {
        self.store_blob_with(category, key, data, true)
    }

    /// Caches `data` under `key`. Without `overwrite` an existing entry wins
    /// and nothing is written. Returns whether a record was written.
    pub fn store_blob_with(&mut self, category: BlobCategory, key: StorageKey, data: &[u8], overwrite: bool) -> bool {
        match self.put_blob(category, BlobCaches::storage_mut, key, data, overwrite) {
            Ok(written) => written,
            Err(e) => {
                warn!(category = category.label(), %key, error = %e, "failed to store blob");
                false
            }
        }
    }

    fn put_blob<K: IndexKey>(&mut self, category: BlobCategory, select: fn(&mut BlobCaches, BlobCategory) -> Option<&mut BlobIndex<K>>, key: K, data: &[u8], overwrite: bool) -> Result<bool> {
        let data_key = self.unlocked()?;
        let now = Instant::now();

        let existing = {
            let Some(index) = select(&mut self.blobs, category) else {
                bail!("{category} is not a cache of this key type");
            };
            if index.contains(&key) && !overwrite {
                return Ok(false);
            }
            index.entry(&key).map(|entry| entry.file_key)
        };

        let file_key = match existing {
            Some(file_key) => file_key,
            None => record::allocate_file_key(&self.data_dir, |k| self.map.references(k) || self.blobs.references(k))?,
        };
        self.map.get_or_create_key(MapCategory::index_of(category), &self.data_dir, |k| self.blobs.references(k) || k == file_key, now)?;

        let index = select(&mut self.blobs, category).context("cache vanished")?;
        index.put(key, data, file_key, &self.data_dir, &data_key)?;
        self.map.mark_dirty(WriteMode::Deferred, now);
        Ok(true)
    }

    /// The bytes cached under `key`, resolving aliases.
    pub fn blob(&self, category: BlobCategory, key: &StorageKey) -> Option<Vec<u8>> {
        let data_key = self.data_key.as_ref()?;
        self.blobs.storage(category)?.get(key, &self.data_dir, data_key)
    }

    /// Makes `new_key` another name for the blob cached under `existing`.
    pub fn add_blob_alias(&mut self, category: BlobCategory, new_key: StorageKey, existing: &StorageKey) -> bool {
        let Some(index) = self.blobs.storage_mut(category) else {
            return false;
        };
        let added = index.add_alias(new_key, existing);
        if added {
            self.map.mark_dirty(WriteMode::Deferred, Instant::now());
        }
        added
    }

    /// Deletes the blob behind `key` together with all its aliases.
    pub fn remove_blob(&mut self, category: BlobCategory, key: &StorageKey) -> bool {
        let Some(index) = self.blobs.storage_mut(category) else {
            return false;
        };
        let removed = index.remove(key, &self.data_dir);
        if removed {
            self.map.mark_dirty(WriteMode::Deferred, Instant::now());
        }
        removed
    }

    /// Loads a blob on the worker thread; `sink` gets the result from
    /// [`poll`](Self::poll) or [`wait_loads`](Self::wait_loads).
    pub fn request_blob_async(&mut self, category: BlobCategory, key: &StorageKey, sink: Box<dyn BlobLoadSink>) -> TaskId {
        let task: Box<dyn LoadTask> = match (&self.data_key, self.blobs.storage(category)) {
            (Some(data_key), Some(index)) => match index.resolve(key).zip(index.entry(key)) {
                Some((stored, entry)) => Box::new(BlobReadTask::new(self.data_dir.clone(), entry.file_key, Arc::clone(data_key), category, stored.to_bytes())),
                None => Box::new(MissTask),
            },
            _ => Box::new(MissTask),
        };
        self.loader.submit(task, sink)
    }

    /// Cancels a pending load; its sink is never called.
    #[inline]
    pub fn cancel_load(&mut self, id: TaskId) -> bool {
        self.loader.cancel(id)
    }

    /// Waits for at least one pending load and delivers what finished.
    pub async fn wait_loads(&mut self) -> usize {
        self.loader.wait_finished().await
    }

    // === Web files ===

    pub fn store_web_file(&mut self, url: &str, data: &[u8]) -> bool {
        match self.put_blob(BlobCategory::WebFiles, BlobCaches::web_files_mut, url.to_owned(), data, true) {
            Ok(written) => written,
            Err(e) => {
                warn!(url, error = %e, "failed to store web file");
                false
            }
        }
    }

    pub fn web_file(&self, url: &str) -> Option<Vec<u8>> {
        let data_key = self.data_key.as_ref()?;
        self.blobs.web_files().get(&url.to_owned(), &self.data_dir, data_key)
    }

    pub fn remove_web_file(&mut self, url: &str) -> bool {
        let Some(index) = self.blobs.web_files_mut(BlobCategory::WebFiles) else {
            return false;
        };
        let removed = index.remove(&url.to_owned(), &self.data_dir);
        if removed {
            self.map.mark_dirty(WriteMode::Deferred, Instant::now());
        }
        removed
    }

    // === Size accounting ===

    /// Accounted on-disk bytes of a cache.
    #[inline]
    pub fn storage_size(&self, category: BlobCategory) -> u64 {
        self.blobs.total(category)
    }

    #[inline]
    pub fn storage_count(&self, category: BlobCategory) -> usize {
        self.blobs.count(category)
    }

    #[inline]
    pub fn storage_images_size(&self) -> u64 {
        self.storage_size(BlobCategory::Images)
    }

    #[inline]
    pub fn storage_stickers_size(&self) -> u64 {
        self.storage_size(BlobCategory::StickerImages)
    }

    #[inline]
    pub fn storage_audios_size(&self) -> u64 {
        self.storage_size(BlobCategory::Audios)
    }

    #[inline]
    pub fn storage_web_files_size(&self) -> u64 {
        self.storage_size(BlobCategory::WebFiles)
    }

    // === Clearing ===

    /// Requests a bulk removal. Local state is updated at once; the sweep is
    /// handed to the clear worker on the next [`poll`](Self::poll).
    ///
    /// `All` forgets the data key: call [`start`](Self::start) again after its
    /// completion event. Until then `start` fails with
    /// [`StoreError::ClearInProgress`].
    pub fn request_clear(&mut self, kind: ClearKind) {
        let now = Instant::now();
        let files = match kind {
            ClearKind::All => {
                self.map = DirectoryMap::new(Self::scheduler(&self.config));
                self.blobs.clear();
                self.data_key = None;
                self.key_file = None;
                Vec::new()
            }
            ClearKind::Storage => {
                let mut files = self.blobs.snapshot_paths(&self.data_dir);
                for file_key in self.map.forget_indices(now) {
                    files.extend(record_file(&self.data_dir, file_key, true).paths());
                }
                self.blobs.clear();
                files
            }
            ClearKind::Downloads => Vec::new(),
        };
        info!(%kind, files = files.len(), "clear scheduled");
        self.pending_clears.push((kind, files));
    }

    fn dispatch_clears(&mut self) {
        if !self.pending_clears.is_empty() {
            self.clear.request_many(mem::take(&mut self.pending_clears));
        }
    }

    /// Completion events of clear requests.
    pub fn poll_clear_events(&mut self) -> Vec<ClearEvent> {
        self.dispatch_clears();
        self.clear.poll_events()
    }

    /// Blocks up to `timeout` for the next clear completion.
    pub fn wait_clear_event(&mut self, timeout: std::time::Duration) -> Option<ClearEvent> {
        self.dispatch_clears();
        self.clear.events().recv_timeout(timeout).ok()
    }

    // === Scheduling ===

    /// Runs whatever is due at `now`: queued clears, finished loads and the
    /// debounced directory write.
    ///
    /// # Errors
    ///
    /// [`StoreError::MapWrite`] when the directory could not be written.
    pub fn poll(&mut self, now: Instant) -> Result<(), StoreError> {
        self.dispatch_clears();
        self.loader.dispatch_finished();
        if self.map.due(now) {
            self.write_directory()?;
        }
        Ok(())
    }

    /// Latest instant the host should call [`poll`](Self::poll) by.
    #[inline]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.map.deadline()
    }

    /// Schedules (or with `Immediate`, performs) a directory write.
    pub fn flush(&mut self, mode: WriteMode) -> Result<(), StoreError> {
        match mode {
            WriteMode::Immediate => self.write_directory(),
            _ => {
                self.map.mark_dirty(mode, Instant::now());
                Ok(())
            }
        }
    }

    /// Physical directory writes since open.
    #[inline]
    pub fn map_write_count(&self) -> usize {
        self.map.write_count()
    }

    fn write_directory(&mut self) -> Result<(), StoreError> {
        let Some(data_key) = self.data_key.clone() else {
            self.map.discard_pending();
            return Ok(());
        };

        for category in BlobCategory::iter() {
            let Some(file_key) = self.map.key(MapCategory::index_of(category)) else {
                continue;
            };
            if let Err(e) = self.blobs.save(category, &self.data_dir, file_key, &data_key) {
                warn!(category = category.label(), error = %e, "failed to save blob index");
            }
        }

        self.map.write(&self.map_record(), &data_key)
    }

    /// Flushes the directory and stops both workers.
    ///
    /// Queued clear requests that have not started are dropped.
    pub fn shutdown(&mut self) -> Result<(), StoreError> {
        self.dispatch_clears();
        let written = if self.is_unlocked() && self.map.is_pending() { self.write_directory() } else { Ok(()) };

        self.loader.stop()?;
        self.clear.stop()?;
        info!("store shut down");
        written
    }

    /// Every FileKey the directory and the blob indices reference.
    pub fn referenced_keys(&self) -> Vec<FileKey> {
        let mut keys: Vec<FileKey> = self.map.file_keys().collect();
        for category in BlobCategory::iter() {
            match self.blobs.storage(category) {
                Some(index) => keys.extend(index.file_keys()),
                None => keys.extend(self.blobs.web_files().file_keys()),
            }
        }
        keys
    }
}
