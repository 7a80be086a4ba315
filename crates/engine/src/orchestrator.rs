//! crates/engine/src/orchestrator.rs
//!
//! `FetchOrchestrator`: runs one fetch attempt against a single dataset,
//! from broadcasting which dataset was selected through to repointing the
//! `current` symlink (or purging the cache directory on failure).

use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use fetch_core::cache::CacheManager;
use fetch_core::error::{FetchError, FetchResult};
use fetch_core::filemap::Filemap;
use fetch_core::index::CheckpointRecord;
use fetch_core::kvtree::KVTree;
use fetch_core::log::Log;
use fetch_core::redundancy::RedundancyApply;
use fetch_core::transport::Transport;
use fetch_core::Config;
use flist::SummaryManifest;

use crate::file_list_fetcher;
use crate::flow_control;

/// Outcome of one [`FetchOrchestrator::attempt`], carrying what the
/// surrounding `CandidateLoop`/`fetch_sync` need beyond plain success:
/// the checkpoint id every rank learned from the broadcast dataset header
/// (spec C4 step 2), needed even on failure so the caller can tell
/// `fetch_attempted` apart from "never selected a candidate at all".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// Whether this attempt's files (and any redundancy rebuild) ended up
    /// complete and consistent.
    pub ok: bool,
    /// The checkpoint id within `dataset_id`, from the summary manifest's
    /// dataset header.
    pub ckpt_id: u64,
}

/// Name of the per-dataset summary manifest file under the dataset
/// directory in the prefix.
const SUMMARY_FILE_NAME: &str = "summary.scr";

/// Collaborators a [`FetchOrchestrator`] needs for one attempt. Borrowed
/// rather than owned so the same instances can be reused across every
/// candidate in a `CandidateLoop` run.
pub struct Collaborators<'a> {
    /// Cache directory layout and bookkeeping.
    pub cache: &'a dyn CacheManager,
    /// Per-rank filemap persistence.
    pub filemap: &'a dyn Filemap,
    /// Post-fetch redundancy rebuild.
    pub redundancy: &'a dyn RedundancyApply,
    /// Rank-0 event/transfer logging.
    pub log: &'a dyn Log,
}

/// Runs fetch attempts against a prefix directory.
pub struct FetchOrchestrator<'a> {
    config: &'a Config,
    collaborators: Collaborators<'a>,
}

impl<'a> FetchOrchestrator<'a> {
    /// Builds an orchestrator against the given config and collaborators.
    #[must_use]
    pub fn new(config: &'a Config, collaborators: Collaborators<'a>) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    /// Broadcasts `selection` (only meaningful on `root`) to every rank.
    /// Returns `None` when the candidate loop has run out of datasets to
    /// try.
    pub fn broadcast_selection(
        &self,
        transport: &dyn Transport,
        root: usize,
        selection: Option<&CheckpointRecord>,
    ) -> FetchResult<Option<(u64, String)>> {
        let send = if transport.rank() == root {
            let mut tree = KVTree::new();
            tree.set_bool("present", selection.is_some());
            if let Some(record) = selection {
                tree.set_u64("dataset_id", record.dataset_id);
                tree.set_str("name", &record.name);
            }
            Some(tree)
        } else {
            None
        };

        let tree = transport.broadcast_tree(root, send)?;
        if !tree.get_bool("present").unwrap_or(false) {
            return Ok(None);
        }
        let dataset_id = tree
            .get_u64("dataset_id")
            .ok_or_else(|| FetchError::Transport("selection missing dataset_id".into()))?;
        let name = tree
            .get_str("name")
            .ok_or_else(|| FetchError::Transport("selection missing name".into()))?
            .to_string();
        Ok(Some((dataset_id, name)))
    }

    /// Loads and parses the summary manifest for `name` under `prefix`.
    /// Only ever called on the root rank.
    fn load_summary(&self, prefix: &Path, name: &str) -> FetchResult<SummaryManifest> {
        let path = prefix.join(name).join(SUMMARY_FILE_NAME);
        let file = std::fs::File::open(&path).map_err(|e| FetchError::io(&path, e))?;
        let mut reader = BufReader::new(file);
        let tree = KVTree::read_text(&mut reader)?;
        SummaryManifest::from_tree(&tree)
    }

    /// Runs one fetch attempt against the dataset identified by
    /// `dataset_id`/`name`. Every rank must call this with the same
    /// arguments (having all learned them from
    /// [`FetchOrchestrator::broadcast_selection`]).
    pub fn attempt(
        &self,
        transport: &dyn Transport,
        root: usize,
        dataset_id: u64,
        name: &str,
        prefix: &Path,
    ) -> FetchResult<AttemptOutcome> {
        let rank = transport.rank();
        let started_at = transport.wall_time();
        if rank == root {
            self.collaborators
                .log
                .event("FETCH STARTED", name, Some(dataset_id), None);
        }

        let dataset_dir = self.collaborators.cache.prepare(dataset_id, name)?;

        // Loading the summary can fail (missing or corrupt summary.scr)
        // without aborting the collective: every rank, including root,
        // always reaches the broadcasts below, or a non-root rank would
        // block forever in flist::scatter waiting on a broadcast root
        // never sends. Root's load failure is instead folded into an
        // ordinary checkpoint-level failure so the retry path below runs.
        let summary_result = if rank == root {
            Some(self.load_summary(prefix, name))
        } else {
            None
        };
        let load_ok = transport.broadcast_bool(
            root,
            if rank == root {
                Some(!matches!(summary_result, Some(Err(_))))
            } else {
                None
            },
        )?;

        if !load_ok {
            let elapsed =
                Duration::from_secs_f64((transport.wall_time() - started_at).max(0.0));
            self.collaborators.cache.purge(dataset_id, name)?;
            if rank == root {
                self.collaborators
                    .log
                    .event("FETCH FAILED", name, Some(dataset_id), Some(elapsed));
            }
            return Ok(AttemptOutcome {
                ok: false,
                ckpt_id: 0,
            });
        }

        let summary = summary_result.map(|result| {
            result.expect("load_ok broadcast confirmed root's summary loaded")
        });
        let rank_files = flist::scatter(transport, root, summary.as_ref())?;
        let ckpt_id = rank_files.dataset.ckpt_id;

        let world_size = transport.size();
        let mut own_ok = true;
        if rank == root {
            let map_path = self.config.map_file.clone();
            own_ok = file_list_fetcher::fetch_all(
                dataset_id,
                &rank_files,
                &dataset_dir,
                &map_path,
                self.collaborators.filemap,
                self.config.file_buf_size,
                self.config.crc_on_flush,
                world_size,
            )?;

            let width = self.config.window_width(world_size);
            let window_ok = flow_control::drive_window(transport, width)?;
            own_ok &= window_ok;
        } else {
            let map_path = self.config.map_file.clone();
            let buf_size = self.config.file_buf_size;
            let crc_on_flush = self.config.crc_on_flush;
            let filemap = self.collaborators.filemap;
            flow_control::await_turn_and_report(transport, root, || {
                let ok = file_list_fetcher::fetch_all(
                    dataset_id,
                    &rank_files,
                    &dataset_dir,
                    &map_path,
                    filemap,
                    buf_size,
                    crc_on_flush,
                    world_size,
                )?;
                if ok {
                    Ok(())
                } else {
                    Err(FetchError::manifest("one or more files failed to fetch"))
                }
            })?;
        }

        let agreed_ok = transport.all_reduce_and(own_ok)?;

        // A failure inside RedundancyApply is a checkpoint-level failure
        // like any other: it must still reach CacheManager::purge below and
        // let the candidate loop retry, not abort the process.
        let (final_ok, bytes_copied) = if agreed_ok {
            let redundancy_result = if rank == root {
                Some(self.collaborators.redundancy.apply(
                    self.collaborators.filemap,
                    &self.config.map_file,
                    dataset_id,
                ))
            } else {
                None
            };
            let (redundancy_ok, bytes) = match redundancy_result {
                Some(Ok(bytes)) => (true, bytes),
                Some(Err(_)) | None => (false, 0),
            };
            let bcast_ok = transport
                .broadcast_bool(root, if rank == root { Some(redundancy_ok) } else { None })?;
            (bcast_ok, bytes)
        } else {
            (false, 0)
        };

        let elapsed = Duration::from_secs_f64((transport.wall_time() - started_at).max(0.0));

        if agreed_ok {
            if final_ok {
                if rank == root {
                    self.collaborators.cache.set_current(dataset_id, name)?;
                    self.collaborators
                        .log
                        .event("FETCH SUCCEEDED", name, Some(dataset_id), Some(elapsed));
                }
            } else {
                self.collaborators.cache.purge(dataset_id, name)?;
                if rank == root {
                    self.collaborators
                        .log
                        .event("FETCH FAILED", name, Some(dataset_id), Some(elapsed));
                }
            }
            if rank == root {
                self.collaborators.log.transfer(
                    "FETCH",
                    &prefix.join(name).to_string_lossy(),
                    &dataset_dir.to_string_lossy(),
                    dataset_id,
                    elapsed,
                    bytes_copied,
                );
            }
        } else {
            self.collaborators.cache.purge(dataset_id, name)?;
            if rank == root {
                self.collaborators
                    .log
                    .event("FETCH FAILED", name, Some(dataset_id), Some(elapsed));
            }
        }

        Ok(AttemptOutcome {
            ok: final_ok,
            ckpt_id,
        })
    }
}
