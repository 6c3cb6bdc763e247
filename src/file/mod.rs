//! Filesystem helpers shared by the container codec and the background workers.

pub mod operations;

pub use operations::{exists, modified, read_file, remove_file, write_synced};
