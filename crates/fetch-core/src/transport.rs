//! crates/fetch-core/src/transport.rs
//!
//! Collective-communication seam between the orchestration logic and
//! whatever process/thread/rank topology it runs on. Production code talks
//! MPI; tests and the in-process demo binary talk threads and channels via
//! `test-support::ChannelTransport`. Either way the orchestration crates
//! only ever see this trait.

use crate::error::{FetchError, FetchResult};
use crate::kvtree::KVTree;

/// A pending non-blocking receive of a single boolean status flag.
///
/// `FlowControl` posts one of these per in-flight rank and later blocks on
/// it with [`Transport::wait`], or on a whole set of them with
/// [`Transport::wait_any`].
pub struct RecvHandle {
    /// Rank this receive is associated with.
    pub rank: usize,
    rx: crossbeam_channel::Receiver<bool>,
}

impl RecvHandle {
    /// Wraps a channel receiver together with the rank it was posted
    /// against.
    #[must_use]
    pub fn new(rank: usize, rx: crossbeam_channel::Receiver<bool>) -> Self {
        Self { rank, rx }
    }

    /// Borrows the underlying receiver, for implementations of
    /// [`Transport::wait`]/[`Transport::wait_any`].
    #[must_use]
    pub fn receiver(&self) -> &crossbeam_channel::Receiver<bool> {
        &self.rx
    }
}

/// Collective and point-to-point operations the fetch pipeline needs.
///
/// Every method here has a direct analogue in the original MPI-based
/// implementation: `broadcast_tree` stands in for broadcasting a packed
/// `scr_hash`, `exchange` for the scatter the summary step performs with
/// `MPI_Alltoallv`-like fan-out, and `wait_any`/`isend_bool`/`irecv_bool`
/// for the non-blocking status handshake that drives the sliding window in
/// `engine::flow_control`.
pub trait Transport {
    /// This process's rank, in `0..size()`.
    fn rank(&self) -> usize;

    /// Total number of ranks participating in this fetch.
    fn size(&self) -> usize;

    /// Blocks until every rank has called `barrier`.
    fn barrier(&self);

    /// Broadcasts a tree from `root` to every rank; non-root callers pass
    /// `None` and receive the broadcast value back.
    fn broadcast_tree(&self, root: usize, value: Option<KVTree>) -> FetchResult<KVTree>;

    /// Broadcasts a single boolean flag from `root`, used for the
    /// propagated fetch-attempt outcome.
    fn broadcast_bool(&self, root: usize, value: Option<bool>) -> FetchResult<bool>;

    /// Blocking send of a boolean status flag to `dest`.
    fn send_bool(&self, dest: usize, value: bool) -> FetchResult<()>;

    /// Blocking receive of a boolean status flag from `source`.
    fn recv_bool(&self, source: usize) -> FetchResult<bool>;

    /// Posts a non-blocking send of a boolean status flag to `dest`.
    fn isend_bool(&self, dest: usize, value: bool) -> FetchResult<()>;

    /// Posts a non-blocking receive of a boolean status flag from `source`,
    /// returning a handle that can be waited on individually or folded
    /// into a [`Transport::wait_any`] set.
    fn irecv_bool(&self, source: usize) -> FetchResult<RecvHandle>;

    /// Blocks until one of `handles` completes, returning its index and the
    /// received value. Used by rank 0 to learn which in-flight rank
    /// finished first and should be replaced in the window.
    fn wait_any(&self, handles: &[RecvHandle]) -> FetchResult<(usize, bool)>;

    /// Blocks on a single handle.
    fn wait(&self, handle: RecvHandle) -> FetchResult<bool>;

    /// Exchanges per-rank trees: each rank contributes `send` (or `None`)
    /// and receives whatever `root` addressed to it. Used by
    /// `SummaryScatter` to hand each rank its slice of `rank2file`.
    fn exchange(&self, root: usize, send: Vec<(usize, KVTree)>) -> FetchResult<Option<KVTree>>;

    /// Logical AND-reduction of `value` across all ranks, result visible to
    /// every rank. Used to decide whether every rank in the window
    /// succeeded before the ceiling is allowed to advance.
    fn all_reduce_and(&self, value: bool) -> FetchResult<bool>;

    /// Wall-clock seconds since an arbitrary fixed epoch, used only for
    /// relative duration measurements in transfer-rate logging.
    fn wall_time(&self) -> f64;
}

/// [`Transport`] for a single-process, single-rank run: every collective
/// is a no-op that immediately returns its own input, since there is no
/// one else to communicate with.
///
/// This is what the `scr-fetch` binary uses by default. A real multi-rank
/// deployment supplies its own `Transport` (backed by MPI or an
/// equivalent) and drives `engine` directly as a library; nothing in
/// `engine` assumes single-rank operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleRankTransport {
    start: std::time::Instant,
}

impl SingleRankTransport {
    /// Creates a new single-rank transport, starting its wall-clock epoch
    /// now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Transport for SingleRankTransport {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn broadcast_tree(&self, _root: usize, value: Option<KVTree>) -> FetchResult<KVTree> {
        Ok(value.unwrap_or_default())
    }

    fn broadcast_bool(&self, _root: usize, value: Option<bool>) -> FetchResult<bool> {
        Ok(value.unwrap_or(false))
    }

    fn send_bool(&self, _dest: usize, _value: bool) -> FetchResult<()> {
        Ok(())
    }

    fn recv_bool(&self, _source: usize) -> FetchResult<bool> {
        Ok(true)
    }

    fn isend_bool(&self, _dest: usize, _value: bool) -> FetchResult<()> {
        Ok(())
    }

    fn irecv_bool(&self, _source: usize) -> FetchResult<RecvHandle> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let _ = tx.send(true);
        Ok(RecvHandle::new(0, rx))
    }

    fn wait_any(&self, handles: &[RecvHandle]) -> FetchResult<(usize, bool)> {
        handles
            .first()
            .map(|handle| Ok((0, handle.receiver().recv().unwrap_or(true))))
            .unwrap_or_else(|| Err(FetchError::Transport("wait_any on no handles".into())))
    }

    fn wait(&self, handle: RecvHandle) -> FetchResult<bool> {
        Ok(handle.receiver().recv().unwrap_or(true))
    }

    fn exchange(&self, _root: usize, send: Vec<(usize, KVTree)>) -> FetchResult<Option<KVTree>> {
        Ok(send.into_iter().find(|(rank, _)| *rank == 0).map(|(_, tree)| tree))
    }

    fn all_reduce_and(&self, value: bool) -> FetchResult<bool> {
        Ok(value)
    }

    fn wall_time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_rank_broadcast_returns_its_own_value() {
        let transport = SingleRankTransport::new();
        let mut tree = KVTree::new();
        tree.set_str("k", "v");
        let result = transport.broadcast_tree(0, Some(tree.clone())).unwrap();
        assert_eq!(result, tree);
    }

    #[test]
    fn single_rank_exchange_returns_its_own_slice() {
        let transport = SingleRankTransport::new();
        let mut tree = KVTree::new();
        tree.set_str("k", "v");
        let result = transport.exchange(0, vec![(0, tree.clone())]).unwrap();
        assert_eq!(result, Some(tree));
    }
}
