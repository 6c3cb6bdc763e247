//! Filesystem sweeps run by the clear worker.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::warn;
use walkdir::WalkDir;

use crate::file;

/// Removes everything below `dir`, and `dir` itself unless `keep_root`.
///
/// A missing directory counts as already swept.
pub fn remove_tree(dir: &Path, keep_root: bool) -> bool {
    if !dir.exists() {
        return true;
    }

    let min_depth = usize::from(keep_root);
    let mut success = true;
    for entry in WalkDir::new(dir).min_depth(min_depth).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.io_error().is_some_and(|io| io.kind() == ErrorKind::NotFound) => continue,
            Err(e) => {
                warn!(error = %e, "sweep walk failed");
                success = false;
                continue;
            }
        };

        let result = if entry.file_type().is_dir() { fs::remove_dir(entry.path()) } else { fs::remove_file(entry.path()) };
        match result {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                warn!(path = %entry.path().display(), error = %e, "sweep removal failed");
                success = false;
            }
            _ => {}
        }
    }
    success
}

/// Deletes every listed file in parallel.
pub fn remove_files(paths: &[PathBuf]) -> bool {
    paths
        .par_iter()
        .map(|path| match file::remove_file(path) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "sweep removal failed");
                false
            }
        })
        .reduce(|| true, |a, b| a && b)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_remove_tree() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        fs::create_dir_all(root.join("nested/deeper")).unwrap();
        fs::write(root.join("a"), b"a").unwrap();
        fs::write(root.join("nested/deeper/b"), b"b").unwrap();

        assert!(remove_tree(&root, false));
        assert!(!root.exists());
        assert!(remove_tree(&root, false));
    }

    #[test]
    fn test_remove_tree_keeps_root() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("x")).unwrap();
        fs::write(dir.path().join("x/file"), b"1").unwrap();

        assert!(remove_tree(dir.path(), true));
        assert!(dir.path().exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_files() {
        let dir = tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..8).map(|i| dir.path().join(format!("f{i}"))).collect();
        for path in &paths[..4] {
            fs::write(path, b"x").unwrap();
        }

        assert!(remove_files(&paths));
        assert!(paths.iter().all(|p| !p.exists()));
    }
}
