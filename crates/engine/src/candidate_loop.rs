//! crates/engine/src/candidate_loop.rs
//!
//! `CandidateLoop`: on its first pass, prefers whichever dataset the
//! prefix-level `current` symlink already points at (C6 step 1's resume
//! path); every subsequent pass selects the newest eligible dataset below
//! a ceiling, attempts to fetch it, and falls back to the next-newest
//! dataset on failure. The ceiling advances to the attempted dataset's id
//! after every attempt, success or failure, so a retry of the whole fetch
//! never reconsiders a dataset newer than the last one tried.

use std::path::Path;

use fetch_core::error::FetchResult;
use fetch_core::index::{CheckpointRecord, FileIndex, Index};
use fetch_core::transport::Transport;

use crate::orchestrator::FetchOrchestrator;

/// Outcome of a full candidate loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A dataset was fetched successfully.
    Fetched {
        /// The dataset id that succeeded.
        dataset_id: u64,
        /// The checkpoint id within that dataset, from its summary
        /// manifest's dataset header.
        checkpoint_id: u64,
    },
    /// Every candidate in the index was attempted and failed, or the
    /// index held no eligible candidate to begin with.
    Exhausted {
        /// Whether at least one candidate was actually attempted, as
        /// opposed to the index holding nothing eligible at all. Invariant
        /// 7 and scenario S5 both key off this, not off `Exhausted` alone.
        fetch_attempted: bool,
    },
}

/// Resolves the dataset the prefix-level `current` pointer names, if any,
/// to the matching record in `index`. Only meaningful on `root` and only
/// on the loop's first pass (C6 step 1); the original reads `current`
/// once per sync attempt, not once per candidate.
fn resume_candidate(
    prefix: &Path,
    index: &FileIndex,
    index_store: &dyn Index,
) -> FetchResult<Option<CheckpointRecord>> {
    let Some(name) = index_store.read_current(prefix)? else {
        return Ok(None);
    };
    let Some(dataset_id) = index.get_id_by_dir(&name) else {
        return Ok(None);
    };
    Ok(index
        .records()
        .iter()
        .find(|record| record.dataset_id == dataset_id)
        .cloned())
}

/// Runs the candidate loop to completion for the given `root`-only
/// `index`. Non-root callers still need to call this (the loop is a
/// collective operation), but only `root`'s `index` is read or mutated
/// meaningfully.
///
/// `index_store`/`index_path` persist the index at the two points the
/// spec calls out: right after a candidate is chosen (`mark_fetched`,
/// "records the attempt even if it later fails") and right after an
/// attempt fails (`mark_failed`). Both persists happen only on `root`.
pub fn run(
    transport: &dyn Transport,
    root: usize,
    orchestrator: &FetchOrchestrator<'_>,
    prefix: &Path,
    index: &mut FileIndex,
    index_store: &dyn Index,
    index_path: &Path,
) -> FetchResult<Outcome> {
    let mut ceiling: Option<u64> = None;
    let mut first_pass = true;
    let mut fetch_attempted = false;

    loop {
        let selection = if transport.rank() == root {
            let resumed = if first_pass {
                resume_candidate(prefix, index, index_store)?
            } else {
                None
            };
            resumed.or_else(|| index.select_candidate(ceiling).cloned())
        } else {
            None
        };
        first_pass = false;

        let Some((dataset_id, name)) =
            orchestrator.broadcast_selection(transport, root, selection.as_ref())?
        else {
            return Ok(Outcome::Exhausted { fetch_attempted });
        };
        fetch_attempted = true;

        if transport.rank() == root {
            index.mark_fetched(dataset_id);
            index_store.store(index_path, index)?;
        }

        let outcome = orchestrator.attempt(transport, root, dataset_id, &name, prefix)?;

        if transport.rank() == root {
            ceiling = Some(dataset_id);
            if !outcome.ok {
                index.mark_failed(dataset_id);
                index_store.store(index_path, index)?;
            }
        }

        if outcome.ok {
            return Ok(Outcome::Fetched {
                dataset_id,
                checkpoint_id: outcome.ckpt_id,
            });
        }
    }
}
