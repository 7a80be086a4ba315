//! crates/fetch-core/src/redundancy.rs
//!
//! Seam for the redundancy-scheme rebuild step that can run after a fetch
//! restores a dataset's raw files but before it is handed back to the
//! application. Out of scope for this pipeline (no partner/XOR rebuild is
//! implemented here), but the orchestration crates depend on the trait
//! rather than assuming "no rebuild is ever needed" so a real scheme can be
//! dropped in later without touching `engine`.

use std::path::Path;

use crate::error::FetchResult;
use crate::filemap::Filemap;

/// Post-fetch redundancy rebuild, applied once per dataset after every
/// rank's files are in place.
pub trait RedundancyApply {
    /// Attempts to rebuild any files missing or corrupt for `dataset_id`
    /// using whatever redundancy data accompanies it, consulting `filemap`
    /// (loaded from `map_path`) for which files belong to the dataset.
    /// Returns the number of bytes this rank holds complete for the
    /// dataset afterwards.
    fn apply(&self, filemap: &dyn Filemap, map_path: &Path, dataset_id: u64) -> FetchResult<u64>;
}

/// No-op [`RedundancyApply`] for checkpoint formats that carry no
/// redundancy data (the common case for a plain parallel-filesystem
/// fetch): every file already fetched is reported as-is, with no rebuild
/// attempted.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityRedundancy;

impl RedundancyApply for IdentityRedundancy {
    fn apply(&self, filemap: &dyn Filemap, map_path: &Path, dataset_id: u64) -> FetchResult<u64> {
        let entries = filemap.load(map_path)?;
        let bytes = entries
            .into_iter()
            .find(|entry| entry.dataset_id == dataset_id)
            .map(|entry| {
                entry
                    .files
                    .iter()
                    .filter_map(|(_, meta)| meta.as_ref())
                    .filter(|meta| meta.complete)
                    .map(|meta| meta.size)
                    .sum()
            })
            .unwrap_or(0);
        Ok(bytes)
    }
}
