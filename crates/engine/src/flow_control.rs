//! crates/engine/src/flow_control.rs
//!
//! `FlowControl`: bounds how many non-root ranks read from the parallel
//! filesystem concurrently. Rank 0 drives a sliding window of width
//! `Config::window_width`: it admits that many ranks, waits for any one of
//! them to finish, then admits the next rank not yet admitted, until every
//! non-root rank has run exactly once.
//!
//! Rank 0 itself is never a window participant: it fetches its own files
//! directly, outside the window, before driving the window for everyone
//! else.

use fetch_core::error::FetchResult;
use fetch_core::transport::Transport;

/// Runs rank 0's side of the sliding window across ranks `1..size()`, and
/// returns whether every admitted rank reported success.
///
/// `width` is clamped to at least `1` when there is at least one non-root
/// rank, since a window of width zero would never admit anyone.
pub fn drive_window(transport: &dyn Transport, width: usize) -> FetchResult<bool> {
    let world_size = transport.size();
    let non_root = world_size.saturating_sub(1);
    if non_root == 0 {
        return Ok(true);
    }
    let width = width.clamp(1, non_root);

    let mut next_rank = 1usize;
    let mut pending = Vec::new();
    let mut overall_ok = true;

    for _ in 0..width {
        transport.isend_bool(next_rank, overall_ok)?;
        pending.push(transport.irecv_bool(next_rank)?);
        next_rank += 1;
    }

    let mut remaining_to_launch = non_root - width;
    let mut completed = 0usize;

    while completed < non_root {
        let (idx, ok) = transport.wait_any(&pending)?;
        pending.remove(idx);
        overall_ok &= ok;
        completed += 1;

        if remaining_to_launch > 0 {
            transport.isend_bool(next_rank, overall_ok)?;
            pending.push(transport.irecv_bool(next_rank)?);
            next_rank += 1;
            remaining_to_launch -= 1;
        }
    }

    Ok(overall_ok)
}

/// Runs a non-root rank's side of the window: blocks for rank 0's "go"
/// signal. A "go" of `false` means some earlier rank in this window has
/// already failed, so this rank skips fetching entirely (it has nothing
/// to diagnose and no point reading from the shared filesystem) and
/// reports failure straight back, keeping the propagation going for any
/// rank still behind it. A "go" of `true` runs `fetch` and reports its
/// outcome.
pub fn await_turn_and_report(
    transport: &dyn Transport,
    root: usize,
    fetch: impl FnOnce() -> FetchResult<()>,
) -> FetchResult<()> {
    let go = transport.recv_bool(root)?;
    let ok = go && fetch().is_ok();
    transport.isend_bool(root, ok)
}
