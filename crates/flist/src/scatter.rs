//! crates/flist/src/scatter.rs
//!
//! `SummaryScatter`: rank 0 reads the summary manifest once and
//! distributes it to every other rank, broadcasting the container list
//! (small, needed by every rank) and scattering each rank's own file list
//! (potentially large, needed by exactly one rank).

use fetch_core::error::FetchResult;
use fetch_core::kvtree::KVTree;
use fetch_core::transport::Transport;

use crate::manifest::{ContainerInfo, DatasetHeader, FileRecord, SummaryManifest};

/// This rank's share of a scattered summary manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankFileList {
    /// The dataset header (C4 step 2), broadcast to every rank since each
    /// rank needs `ckpt_id` for the process-wide checkpoint-id observable.
    pub dataset: DatasetHeader,
    /// Every container referenced anywhere in the manifest, broadcast to
    /// all ranks so any rank can resolve a segment's `container_id`.
    pub containers: Vec<ContainerInfo>,
    /// This rank's own files.
    pub files: Vec<FileRecord>,
}

/// Distributes `manifest` (present only on `root`) to every rank.
///
/// Non-root callers pass `manifest: None`; every rank, including `root`,
/// gets back its own [`RankFileList`].
pub fn scatter(
    transport: &dyn Transport,
    root: usize,
    manifest: Option<&SummaryManifest>,
) -> FetchResult<RankFileList> {
    let dataset_send = manifest.map(SummaryManifest::dataset_tree);
    let dataset_tree = transport.broadcast_tree(root, dataset_send)?;
    let dataset = SummaryManifest::dataset_from_tree(&dataset_tree)?;

    let containers_send = manifest.map(SummaryManifest::containers_tree);
    let containers_tree = transport.broadcast_tree(root, containers_send)?;
    let containers = SummaryManifest::containers_from_tree(&containers_tree)?;

    let send: Vec<(usize, KVTree)> = manifest
        .map(|manifest| {
            manifest
                .rank_files
                .iter()
                .map(|(rank, files)| (*rank, SummaryManifest::rank_files_tree(files)))
                .collect()
        })
        .unwrap_or_default();

    let my_files_tree = transport.exchange(root, send)?;
    let files = match my_files_tree {
        Some(tree) => SummaryManifest::rank_files_from_tree(&tree)?,
        None => Vec::new(),
    };

    Ok(RankFileList {
        dataset,
        containers,
        files,
    })
}
