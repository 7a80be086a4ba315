//! crates/cli/src/args.rs
//!
//! Command-line surface for `scr-fetch`.

use std::path::PathBuf;

use clap::Parser;

/// Restore the newest usable checkpoint from a prefix directory on the
/// parallel filesystem into a local cache directory.
#[derive(Debug, Parser)]
#[command(name = "scr-fetch", version, about)]
pub struct Args {
    /// Prefix directory holding the index, the `current` symlink, and one
    /// subdirectory per checkpoint dataset.
    #[arg(long)]
    pub prefix: PathBuf,

    /// Local cache directory datasets are fetched into.
    #[arg(long)]
    pub cache: PathBuf,

    /// Maximum number of ranks allowed to read from the parallel
    /// filesystem concurrently.
    #[arg(long, default_value_t = 8)]
    pub fetch_width: usize,

    /// Transfer buffer size in bytes.
    #[arg(long, default_value_t = fetch_core::config::Config::DEFAULT_FILE_BUF_SIZE)]
    pub buf_size: usize,

    /// Skip CRC32 verification during the fetch.
    #[arg(long)]
    pub no_crc: bool,

    /// Quiet rank-0 event and transfer-rate logging.
    #[arg(long)]
    pub quiet: bool,
}
