//! crates/test-support/src/fixtures.rs
//!
//! Small builders for prefix directories, summary manifests and index
//! files, so integration tests can set up a realistic-looking checkpoint
//! directory without duplicating boilerplate in every test module.

use std::path::{Path, PathBuf};

use fetch_core::index::{CheckpointRecord, FileIndex};

/// A `tempfile::TempDir`-backed prefix directory, pre-populated with a
/// `.scr` control subdirectory.
pub struct PrefixFixture {
    /// Keeps the temp directory alive for the fixture's lifetime.
    pub dir: tempfile::TempDir,
}

impl PrefixFixture {
    /// Creates a new empty prefix fixture.
    #[must_use]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp prefix dir");
        std::fs::create_dir_all(dir.path().join(".scr")).expect("create .scr dir");
        Self { dir }
    }

    /// Root path of the prefix directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path to the index file under this prefix.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.path().join(".scr").join("index.scr")
    }

    /// Creates a dataset directory under the prefix and writes `files`
    /// (name -> contents) into it, returning the directory path.
    pub fn write_dataset(&self, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let dataset_dir = self.path().join(name);
        std::fs::create_dir_all(&dataset_dir).expect("create dataset dir");
        for (file_name, contents) in files {
            std::fs::write(dataset_dir.join(file_name), contents).expect("write fixture file");
        }
        dataset_dir
    }
}

impl Default for PrefixFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a [`FileIndex`] with the given `(dataset_id, name, complete,
/// failed)` records, for tests that exercise `CandidateLoop`'s selection
/// rule without needing a full prefix fixture.
#[must_use]
pub fn index_with(records: &[(u64, &str, Option<bool>, bool)]) -> FileIndex {
    FileIndex::new(
        records
            .iter()
            .map(|(dataset_id, name, complete, failed)| CheckpointRecord {
                dataset_id: *dataset_id,
                name: (*name).to_string(),
                complete: *complete,
                failed: *failed,
                fetched: false,
            })
            .collect(),
    )
}
