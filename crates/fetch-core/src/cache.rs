//! crates/fetch-core/src/cache.rs
//!
//! Maps a dataset id onto this rank's cache directory layout, and performs
//! the bookkeeping filesystem operations (`mkdir`, `current` symlink swap)
//! that bracket a fetch attempt.

use std::path::PathBuf;

use crate::error::FetchError;
use crate::error::FetchResult;

/// Cache directory layout and bookkeeping for a single rank.
pub trait CacheManager {
    /// Destination directory for a dataset's files on this rank, e.g.
    /// `<cache_base>/ckpt.10`.
    fn dataset_dir(&self, dataset_id: u64, name: &str) -> PathBuf;

    /// Creates the dataset directory (and parents) if it does not already
    /// exist.
    fn prepare(&self, dataset_id: u64, name: &str) -> FetchResult<PathBuf>;

    /// Removes a dataset directory and everything under it, used to clean
    /// up after a failed fetch attempt so a retry starts from scratch.
    fn purge(&self, dataset_id: u64, name: &str) -> FetchResult<()>;

    /// Atomically repoints the `current` symlink at the named dataset
    /// directory, the final step of a successful fetch.
    fn set_current(&self, dataset_id: u64, name: &str) -> FetchResult<()>;
}

/// Filesystem-backed [`CacheManager`] rooted at a single base directory.
#[derive(Debug, Clone)]
pub struct FsCacheManager {
    base: PathBuf,
}

impl FsCacheManager {
    /// Creates a cache manager rooted at `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn current_link(&self) -> PathBuf {
        self.base.join("current")
    }
}

impl CacheManager for FsCacheManager {
    fn dataset_dir(&self, dataset_id: u64, name: &str) -> PathBuf {
        let _ = dataset_id;
        self.base.join(name)
    }

    fn prepare(&self, dataset_id: u64, name: &str) -> FetchResult<PathBuf> {
        let dir = self.dataset_dir(dataset_id, name);
        std::fs::create_dir_all(&dir).map_err(|e| FetchError::io(&dir, e))?;
        Ok(dir)
    }

    fn purge(&self, dataset_id: u64, name: &str) -> FetchResult<()> {
        let dir = self.dataset_dir(dataset_id, name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| FetchError::io(&dir, e))?;
        }
        Ok(())
    }

    fn set_current(&self, dataset_id: u64, name: &str) -> FetchResult<()> {
        let dir = self.dataset_dir(dataset_id, name);
        let link = self.current_link();

        if link.exists() || link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link).map_err(|e| FetchError::io(&link, e))?;
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(&dir, &link).map_err(|e| FetchError::io(&link, e))?;

        #[cfg(not(unix))]
        std::fs::write(&link, dir.to_string_lossy().as_bytes())
            .map_err(|e| FetchError::io(&link, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_creates_dataset_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCacheManager::new(dir.path());
        let dataset_dir = cache.prepare(3, "ckpt.3").unwrap();
        assert!(dataset_dir.is_dir());
        assert_eq!(dataset_dir, dir.path().join("ckpt.3"));
    }

    #[test]
    fn set_current_points_at_dataset_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCacheManager::new(dir.path());
        cache.prepare(3, "ckpt.3").unwrap();
        cache.set_current(3, "ckpt.3").unwrap();

        let link = dir.path().join("current");
        let resolved = std::fs::read_link(&link).unwrap();
        assert_eq!(resolved, dir.path().join("ckpt.3"));
    }

    #[test]
    fn purge_removes_dataset_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCacheManager::new(dir.path());
        let dataset_dir = cache.prepare(3, "ckpt.3").unwrap();
        cache.purge(3, "ckpt.3").unwrap();
        assert!(!dataset_dir.exists());
    }
}
