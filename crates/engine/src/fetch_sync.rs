//! crates/engine/src/fetch_sync.rs
//!
//! `fetch_sync`: the top-level, collective entry point (spec C7). Barriers
//! every rank, times the whole candidate loop, repoints (or clears) the
//! prefix-level `current` pointer based on the outcome, and surfaces the
//! `dataset_id`/`checkpoint_id` observables that only ever become known on
//! a successful fetch.

use std::path::Path;
use std::time::Duration;

use fetch_core::error::FetchResult;
use fetch_core::index::{FileIndex, Index};
use fetch_core::transport::Transport;

use crate::candidate_loop::{self, Outcome};
use crate::orchestrator::FetchOrchestrator;

/// Result of a complete [`fetch_sync`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSyncResult {
    /// Whether a checkpoint was fetched successfully.
    pub success: bool,
    /// Whether at least one candidate dataset was attempted, as opposed to
    /// the index holding nothing eligible to begin with.
    pub fetch_attempted: bool,
    /// The dataset id fetched, set only when `success`.
    pub dataset_id: Option<u64>,
    /// The checkpoint id within that dataset, set only when `success`.
    pub checkpoint_id: Option<u64>,
    /// Wall-clock duration of the whole candidate loop, as measured on
    /// this rank.
    pub elapsed: Duration,
}

/// Runs one collective fetch: every rank must call this with the same
/// `root` and a view of the same prefix directory.
pub fn fetch_sync(
    transport: &dyn Transport,
    root: usize,
    orchestrator: &FetchOrchestrator<'_>,
    prefix: &Path,
    index: &mut FileIndex,
    index_store: &dyn Index,
    index_path: &Path,
) -> FetchResult<FetchSyncResult> {
    transport.barrier();
    let started_at = transport.wall_time();

    let outcome = candidate_loop::run(
        transport,
        root,
        orchestrator,
        prefix,
        index,
        index_store,
        index_path,
    )?;

    let result = match outcome {
        Outcome::Fetched {
            dataset_id,
            checkpoint_id,
        } => {
            if transport.rank() == root {
                let name = index
                    .records()
                    .iter()
                    .find(|record| record.dataset_id == dataset_id)
                    .map(|record| record.name.clone());
                if let Some(name) = name {
                    index_store.write_current(prefix, &name)?;
                }
            }
            FetchSyncResult {
                success: true,
                fetch_attempted: true,
                dataset_id: Some(dataset_id),
                checkpoint_id: Some(checkpoint_id),
                elapsed: Duration::default(),
            }
        }
        Outcome::Exhausted { fetch_attempted } => {
            if transport.rank() == root {
                index_store.unlink_current(prefix)?;
            }
            FetchSyncResult {
                success: false,
                fetch_attempted,
                dataset_id: None,
                checkpoint_id: None,
                elapsed: Duration::default(),
            }
        }
    };

    let elapsed = Duration::from_secs_f64((transport.wall_time() - started_at).max(0.0));
    Ok(FetchSyncResult { elapsed, ..result })
}
