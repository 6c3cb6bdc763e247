use std::path::PathBuf;
use std::sync::Arc;

use crate::cipher::LocalKey;
use crate::storage::blob::read_blob;
use crate::types::{BlobCategory, FileKey};

/// Work executed on the load worker thread.
pub trait LoadTask: Send {
    /// Produces the loaded bytes, `None` for a miss.
    fn process(&mut self) -> Option<Vec<u8>>;
}

/// Receives the outcome of a load on the owner's thread.
pub trait BlobLoadSink {
    fn on_loaded(&self, data: Option<Vec<u8>>);
}

impl<F> BlobLoadSink for F
where
    F: Fn(Option<Vec<u8>>),
{
    fn on_loaded(&self, data: Option<Vec<u8>>) {
        self(data);
    }
}

/// Reads, decrypts and checks one blob record.
pub struct BlobReadTask {
    dir: PathBuf,
    file_key: FileKey,
    data_key: Arc<LocalKey>,
    category: BlobCategory,
    key: Vec<u8>,
}

impl BlobReadTask {
    pub fn new(dir: PathBuf, file_key: FileKey, data_key: Arc<LocalKey>, category: BlobCategory, key: Vec<u8>) -> Self {
        Self { dir, file_key, data_key, category, key }
    }
}

impl LoadTask for BlobReadTask {
    fn process(&mut self) -> Option<Vec<u8>> {
        read_blob(&self.dir, self.file_key, &self.data_key, self.category, &self.key)
    }
}

/// A load known to miss before it starts; still completes through the queue.
pub struct MissTask;

impl LoadTask for MissTask {
    fn process(&mut self) -> Option<Vec<u8>> {
        None
    }
}
