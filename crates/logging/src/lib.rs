//! `tracing`-backed [`Log`] implementation and subscriber setup for the
//! `scr-fetch` binary.

use std::time::Duration;

use fetch_core::log::Log;

/// Installs a `tracing-subscriber` `fmt` subscriber reading its filter
/// from `RUST_LOG` (defaulting to `info` when unset), as the process-wide
/// default. Call once, from `main`.
pub fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// [`Log`] implementation that emits `tracing` events at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl Log for TracingLog {
    fn event(&self, kind: &str, subject: &str, id: Option<u64>, duration: Option<Duration>) {
        let elapsed_secs = duration.map(|d| d.as_secs_f64());
        tracing::info!(kind, subject, id, elapsed_secs, "fetch");
    }

    fn transfer(&self, kind: &str, from: &str, to: &str, id: u64, duration: Duration, bytes: u64) {
        let secs = duration.as_secs_f64();
        let rate_mb_s = if secs > 0.0 {
            (bytes as f64 / secs) / (1024.0 * 1024.0)
        } else {
            0.0
        };
        tracing::info!(
            kind,
            from,
            to,
            id,
            bytes,
            elapsed_secs = secs,
            rate_mb_s,
            "transfer complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_rate_is_zero_for_zero_elapsed() {
        let log = TracingLog;
        log.transfer("FETCH", "/pfs/ckpt.1", "/cache/ckpt.1", 1, Duration::from_secs(0), 1024);
    }

    #[test]
    fn event_does_not_panic() {
        TracingLog.event("FETCH STARTED", "ckpt.1", Some(1), None);
    }
}
