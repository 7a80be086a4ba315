//! crates/fetch-core/src/log.rs
//!
//! Logging seam used by rank 0 to record fetch progress. Kept as a trait
//! here so `engine` does not depend on `tracing` directly; the real
//! implementation lives in `crates/logging` and is gated by
//! `Config::log_enable`.

use std::time::Duration;

/// Rank-0-only event and transfer-rate logging.
pub trait Log {
    /// Records a discrete event, e.g. `"FETCH STARTED"` / `"FETCH SUCCEEDED"`
    /// against `subject` (a checkpoint name). `id` and `duration` are
    /// carried when the event concludes an attempt against a known dataset.
    fn event(&self, kind: &str, subject: &str, id: Option<u64>, duration: Option<Duration>);

    /// Records a completed transfer: total bytes moved from `from` to `to`
    /// and how long it took, for a throughput line in the log.
    fn transfer(&self, kind: &str, from: &str, to: &str, id: u64, duration: Duration, bytes: u64);
}

/// [`Log`] implementation that discards everything, used when
/// `Config::log_enable` is `false` or in tests that don't care about log
/// output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl Log for NullLog {
    fn event(&self, _kind: &str, _subject: &str, _id: Option<u64>, _duration: Option<Duration>) {}
    fn transfer(
        &self,
        _kind: &str,
        _from: &str,
        _to: &str,
        _id: u64,
        _duration: Duration,
        _bytes: u64,
    ) {
    }
}
