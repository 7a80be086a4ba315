#![deny(unsafe_code)]
#![deny(missing_docs)]

//! CRC32 accumulation for the fetch pipeline's transfer paths.
//!
//! [`FileCopy`](../transfer/index.html) and
//! [`ContainerReader`](../transfer/index.html) both stream bytes through a
//! caller-sized buffer and optionally want a running CRC32 of everything
//! written to the destination file. [`Crc32Accumulator`] is the single place
//! that rolling checksum lives, so both transfer paths compute it the same
//! way and a file copied by one path produces the same CRC as one
//! reconstructed by the other.
//!
//! The accumulator wraps [`crc32fast::Hasher`], which auto-detects SSE4.2 /
//! PCLMULQDQ and ARMv8 CRC extensions at runtime and falls back to a
//! table-driven implementation otherwise.

use crc32fast::Hasher;

/// Running CRC32 checksum over bytes fed to it in order.
///
/// Feeding the same bytes in two different chunk sizes produces the same
/// final value; CRC32 is not sensitive to how the input is split.
#[derive(Debug, Default)]
pub struct Crc32Accumulator {
    hasher: Hasher,
}

impl Crc32Accumulator {
    /// Starts a new accumulator with the standard zero seed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Folds `bytes` into the running checksum.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Consumes the accumulator and returns the final CRC32 value.
    #[must_use]
    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}
