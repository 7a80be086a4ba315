//! crates/fetch-core/src/index.rs
//!
//! The prefix-level index: the durable record of every checkpoint dataset
//! known under a prefix directory, and the candidate-selection rule
//! `CandidateLoop` uses to pick which one to try next.

use std::path::{Path, PathBuf};

use crate::error::{FetchError, FetchResult};
use crate::kvtree::KVTree;

/// One dataset's entry in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Monotonically increasing dataset id, also the name of the dataset's
    /// subdirectory under the prefix.
    pub dataset_id: u64,
    /// Caller-assigned checkpoint name (e.g. `"ckpt.10"`).
    pub name: String,
    /// Present and `true` only once a flush completed successfully for
    /// this dataset; absent is treated as `true` (a dataset with no
    /// `complete` key was written by a version that always completed
    /// flushes synchronously).
    pub complete: Option<bool>,
    /// Set by `CandidateLoop` once a fetch attempt against this dataset
    /// has been exhausted; excluded from future candidate selection.
    pub failed: bool,
    /// Set by `CandidateLoop` the moment this dataset is chosen as a
    /// candidate, before the attempt runs, so the index durably records
    /// that an attempt was made even if the process crashes mid-fetch.
    /// Not an eligibility criterion by itself — a previously-fetched
    /// dataset can be retried in a later invocation unless it is also
    /// `failed`.
    pub fetched: bool,
}

impl CheckpointRecord {
    fn to_tree(&self) -> KVTree {
        let mut tree = KVTree::new();
        tree.set_str("name", &self.name);
        if let Some(complete) = self.complete {
            tree.set_bool("complete", complete);
        }
        if self.failed {
            tree.set_bool("failed", true);
        }
        if self.fetched {
            tree.set_bool("fetched", true);
        }
        tree
    }

    fn from_tree(dataset_id: u64, tree: &KVTree) -> FetchResult<Self> {
        let name = tree
            .get_str("name")
            .ok_or_else(|| FetchError::manifest(format!("dataset {dataset_id} missing name")))?
            .to_string();
        Ok(Self {
            dataset_id,
            name,
            complete: tree.get_bool("complete"),
            failed: tree.get_bool("failed").unwrap_or(false),
            fetched: tree.get_bool("fetched").unwrap_or(false),
        })
    }

    /// Whether this dataset is eligible for a fetch attempt: complete (or
    /// unmarked, which defaults to complete) and not already failed.
    #[must_use]
    pub fn is_candidate(&self) -> bool {
        self.complete.unwrap_or(true) && !self.failed
    }
}

/// Durable collection of [`CheckpointRecord`]s, keyed by dataset id, backed
/// by a `KVTree` under the `"datasets"` key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileIndex {
    records: Vec<CheckpointRecord>,
}

impl FileIndex {
    /// Builds an index from already-loaded records.
    #[must_use]
    pub fn new(records: Vec<CheckpointRecord>) -> Self {
        Self { records }
    }

    /// Parses an index from its `KVTree` text representation.
    pub fn from_tree(tree: &KVTree) -> FetchResult<Self> {
        let mut records = Vec::new();
        if let Some(datasets) = tree.get("datasets") {
            for (key, node) in datasets.elements() {
                let dataset_id: u64 = key
                    .parse()
                    .map_err(|_| FetchError::manifest(format!("bad dataset id {key:?}")))?;
                let child = node
                    .as_tree()
                    .ok_or_else(|| FetchError::manifest(format!("dataset {key} is not a tree")))?;
                records.push(CheckpointRecord::from_tree(dataset_id, child)?);
            }
        }
        Ok(Self { records })
    }

    /// Serializes this index back to its `KVTree` representation.
    #[must_use]
    pub fn to_tree(&self) -> KVTree {
        let mut tree = KVTree::new();
        let datasets = tree.set("datasets", KVTree::new());
        for record in &self.records {
            datasets.set(record.dataset_id.to_string(), record.to_tree());
        }
        tree
    }

    /// All records, most-recently-added last.
    #[must_use]
    pub fn records(&self) -> &[CheckpointRecord] {
        &self.records
    }

    /// Marks the dataset with the given id as failed, so future candidate
    /// selection skips it.
    pub fn mark_failed(&mut self, dataset_id: u64) {
        if let Some(record) = self.records.iter_mut().find(|r| r.dataset_id == dataset_id) {
            record.failed = true;
        }
    }

    /// Marks the dataset with the given id as having had a fetch attempt
    /// made against it, regardless of outcome. Called (and the index
    /// persisted) before the attempt runs, so the record survives a
    /// mid-attempt crash.
    pub fn mark_fetched(&mut self, dataset_id: u64) {
        if let Some(record) = self.records.iter_mut().find(|r| r.dataset_id == dataset_id) {
            record.fetched = true;
        }
    }

    /// Selects the most recent candidate dataset with id strictly less
    /// than `ceiling` (or unbounded, when `ceiling` is `None`), skipping
    /// failed and incomplete datasets.
    ///
    /// Mirrors the original selection rule: newest-first, bounded above by
    /// a ceiling that only ever moves down after an attempt, and never
    /// revisiting a dataset marked failed.
    #[must_use]
    pub fn select_candidate(&self, ceiling: Option<u64>) -> Option<&CheckpointRecord> {
        self.records
            .iter()
            .filter(|record| ceiling.is_none_or(|ceiling| record.dataset_id < ceiling))
            .filter(|record| record.is_candidate())
            .max_by_key(|record| record.dataset_id)
    }

    /// Looks up the dataset id whose name matches `name`, the directory
    /// name a `current` symlink resolves to. Used to resume from the
    /// dataset the previous successful fetch left current, before falling
    /// back to [`FileIndex::select_candidate`].
    #[must_use]
    pub fn get_id_by_dir(&self, name: &str) -> Option<u64> {
        self.records
            .iter()
            .find(|record| record.name == name)
            .map(|record| record.dataset_id)
    }
}

/// Index file collaborator: load/store the prefix-level index from disk,
/// and track the prefix-level `current` pointer used to resume a fetch.
pub trait Index {
    /// Loads the index at `path`, returning an empty index if the file
    /// does not exist.
    fn load(&self, path: &Path) -> FetchResult<FileIndex>;

    /// Persists `index` to `path`.
    fn store(&self, path: &Path, index: &FileIndex) -> FetchResult<()>;

    /// Reads the prefix-level `current` symlink and returns the dataset
    /// directory name it points at, or `None` if the link does not exist.
    /// Resolved against [`FileIndex::get_id_by_dir`] to resume a fetch
    /// from the last successfully fetched checkpoint (C6 step 1).
    fn read_current(&self, prefix: &Path) -> FetchResult<Option<String>>;

    /// Repoints the prefix-level `current` symlink at `name`'s directory,
    /// the final step of a successful fetch.
    fn write_current(&self, prefix: &Path, name: &str) -> FetchResult<()>;

    /// Removes the prefix-level `current` symlink, run after a fetch
    /// attempt fails so a stale pointer never outlives its dataset.
    fn unlink_current(&self, prefix: &Path) -> FetchResult<()>;
}

/// Filesystem-backed [`Index`] implementation using the line-oriented
/// `KVTree` text format.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsIndex;

impl FsIndex {
    /// Path to the index file under `prefix`, matching the teacher
    /// workspace's convention of a single well-known control file per
    /// prefix directory.
    #[must_use]
    pub fn path_under(prefix: &Path) -> PathBuf {
        prefix.join(".scr").join("index.scr")
    }

    /// Path to the prefix-level `current` symlink under `prefix`.
    #[must_use]
    pub fn current_link_path(prefix: &Path) -> PathBuf {
        prefix.join(".scr").join("current")
    }
}

impl Index for FsIndex {
    fn load(&self, path: &Path) -> FetchResult<FileIndex> {
        if !path.exists() {
            return Ok(FileIndex::default());
        }
        let contents = std::fs::File::open(path).map_err(|e| FetchError::io(path, e))?;
        let mut reader = std::io::BufReader::new(contents);
        let tree = KVTree::read_text(&mut reader)?;
        FileIndex::from_tree(&tree)
    }

    fn store(&self, path: &Path, index: &FileIndex) -> FetchResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
        }
        let file = std::fs::File::create(path).map_err(|e| FetchError::io(path, e))?;
        let mut writer = std::io::BufWriter::new(file);
        index.to_tree().write_text(&mut writer).map_err(|e| FetchError::io(path, e))
    }

    fn read_current(&self, prefix: &Path) -> FetchResult<Option<String>> {
        let link = Self::current_link_path(prefix);
        match std::fs::read_link(&link) {
            Ok(target) => {
                let name = target
                    .file_name()
                    .ok_or_else(|| FetchError::manifest("current symlink has no file name"))?
                    .to_string_lossy()
                    .into_owned();
                Ok(Some(name))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FetchError::io(&link, e)),
        }
    }

    fn write_current(&self, prefix: &Path, name: &str) -> FetchResult<()> {
        let link = Self::current_link_path(prefix);
        if let Some(parent) = link.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
        }
        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link).map_err(|e| FetchError::io(&link, e))?;
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(prefix.join(name), &link)
            .map_err(|e| FetchError::io(&link, e))?;

        #[cfg(not(unix))]
        std::fs::write(&link, name.as_bytes()).map_err(|e| FetchError::io(&link, e))?;

        Ok(())
    }

    fn unlink_current(&self, prefix: &Path) -> FetchResult<()> {
        let link = Self::current_link_path(prefix);
        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link).map_err(|e| FetchError::io(&link, e))?;
        }
        Ok(())
    }
}
