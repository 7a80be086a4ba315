//! crates/fetch-core/src/config.rs
//!
//! Process-wide configuration threaded through the fetch call graph.

use std::path::PathBuf;

/// Immutable configuration for a fetch attempt.
///
/// Built once (typically by the CLI front end) and passed by reference
/// through `CandidateLoop`, `SummaryScatter`, `FlowControl` and
/// `FileListFetcher`. None of these fields change for the duration of a
/// `fetch_sync` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Upper bound on the number of non-rank-0 ranks allowed to read from
    /// the parallel filesystem concurrently.
    pub fetch_width: usize,
    /// Size, in bytes, of the transfer buffer used by `FileCopy` and
    /// `ContainerReader`.
    pub file_buf_size: usize,
    /// When `true`, `FileCopy`/`ContainerReader` compute and verify CRC32.
    pub crc_on_flush: bool,
    /// When `true`, rank 0 emits `Log::event`/`Log::transfer` calls.
    pub log_enable: bool,
    /// Prefix directory holding the index, the `current` symlink, and one
    /// subdirectory per dataset.
    pub prefix: PathBuf,
    /// Path where this rank's filemap is persisted.
    pub map_file: PathBuf,
}

impl Config {
    /// Default transfer buffer size (1 MiB), matching the teacher
    /// workspace's own default chunk size for local copies.
    pub const DEFAULT_FILE_BUF_SIZE: usize = 1024 * 1024;

    /// Builds a config with the supplied prefix and map file, and otherwise
    /// reasonable defaults: unlimited-by-width fetch concurrency is not a
    /// valid default (it must be bounded by `world_size - 1` by the
    /// caller), so `fetch_width` defaults to `1`.
    #[must_use]
    pub fn new(prefix: impl Into<PathBuf>, map_file: impl Into<PathBuf>) -> Self {
        Self {
            fetch_width: 1,
            file_buf_size: Self::DEFAULT_FILE_BUF_SIZE,
            crc_on_flush: true,
            log_enable: false,
            prefix: prefix.into(),
            map_file: map_file.into(),
        }
    }

    /// Returns the effective flow-control window width for a run of
    /// `world_size` ranks: `min(fetch_width, world_size - 1)`.
    ///
    /// `world_size - 1` excludes rank 0, which drives the window rather
    /// than occupying a slot in it (see `engine::flow_control`).
    #[must_use]
    pub fn window_width(&self, world_size: usize) -> usize {
        let non_root = world_size.saturating_sub(1);
        self.fetch_width.min(non_root)
    }

    /// Builder-style setter for `fetch_width`.
    #[must_use]
    pub fn with_fetch_width(mut self, fetch_width: usize) -> Self {
        self.fetch_width = fetch_width;
        self
    }

    /// Builder-style setter for `file_buf_size`.
    #[must_use]
    pub fn with_file_buf_size(mut self, file_buf_size: usize) -> Self {
        self.file_buf_size = file_buf_size;
        self
    }

    /// Builder-style setter for `crc_on_flush`.
    #[must_use]
    pub fn with_crc_on_flush(mut self, crc_on_flush: bool) -> Self {
        self.crc_on_flush = crc_on_flush;
        self
    }

    /// Builder-style setter for `log_enable`.
    #[must_use]
    pub fn with_log_enable(mut self, log_enable: bool) -> Self {
        self.log_enable = log_enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_width_excludes_rank_zero() {
        let cfg = Config::new("/prefix", "/map").with_fetch_width(8);
        assert_eq!(cfg.window_width(5), 4);
        assert_eq!(cfg.window_width(1), 0);
    }

    #[test]
    fn window_width_is_capped_by_fetch_width() {
        let cfg = Config::new("/prefix", "/map").with_fetch_width(2);
        assert_eq!(cfg.window_width(100), 2);
    }
}
