//! crates/fetch-core/src/error.rs
//!
//! Error types shared by every crate in the fetch pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the fetch pipeline.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors the fetch pipeline can return.
///
/// Every failure in the pipeline is one of these five kinds. The pipeline
/// never panics in non-test code; unrecoverable conditions are surfaced as a
/// `FetchError` and propagated up to the caller per the propagation policy in
/// `engine::candidate_loop`.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Open/read/write/seek/close/symlink/unlink failure on the local or
    /// parallel filesystem.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path the failing operation was performed against.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A CRC32 computed during fetch did not match the value recorded in
    /// the summary manifest.
    #[error("CRC32 mismatch for {path}: expected {expected:#010x}, computed {actual:#010x}")]
    Integrity {
        /// File whose checksum failed to verify.
        path: PathBuf,
        /// CRC32 recorded in the summary manifest.
        expected: u32,
        /// CRC32 computed while copying or reconstructing the file.
        actual: u32,
    },

    /// A summary manifest, index, or filemap entry was missing a required
    /// key, malformed, or referenced a container id that does not exist.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// No checkpoint candidate remains in the index (every record is either
    /// already marked `failed` or none satisfy the ceiling).
    #[error("no checkpoint candidate remains")]
    Selection,

    /// A collective operation failed or was observed to fail on another
    /// rank (e.g. a broadcast status reported non-success).
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Wraps a [`std::io::Error`] together with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`FetchError::Manifest`] from a formatted message.
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::Manifest(message.into())
    }
}
