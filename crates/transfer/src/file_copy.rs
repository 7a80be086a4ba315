//! crates/transfer/src/file_copy.rs
//!
//! `FileCopy`: copies one whole file from the parallel filesystem into a
//! rank's cache directory, optionally verifying its CRC32 against the
//! value recorded in the summary manifest.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use checksums::Crc32Accumulator;
use fetch_core::error::{FetchError, FetchResult};

use crate::advise::advise_sequential_dontneed;

/// Expected properties of the file being copied, as recorded in the
/// summary manifest.
#[derive(Debug, Clone, Copy)]
pub struct ExpectedFile {
    /// Size in bytes.
    pub size: u64,
    /// CRC32, when the manifest recorded one.
    pub crc32: Option<u32>,
}

/// Copies `src` to `dest` in `buf_size`-byte chunks.
///
/// When `crc_on_flush` is `true` and `expected.crc32` is `Some`, the copy
/// fails with [`FetchError::Integrity`] if the computed checksum does not
/// match. The size recorded in the manifest is always checked against the
/// number of bytes actually copied, regardless of `crc_on_flush`.
pub fn copy_file(
    src: &Path,
    dest: &Path,
    expected: ExpectedFile,
    buf_size: usize,
    crc_on_flush: bool,
) -> FetchResult<u64> {
    let source = File::open(src).map_err(|e| FetchError::io(src, e))?;
    advise_sequential_dontneed(&source);

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
    }
    let mut destination = File::create(dest).map_err(|e| FetchError::io(dest, e))?;

    let mut reader = std::io::BufReader::with_capacity(buf_size, source);
    let mut buf = vec![0u8; buf_size];
    let mut accumulator = Crc32Accumulator::new();
    let mut total: u64 = 0;

    loop {
        let read = reader.read(&mut buf).map_err(|e| FetchError::io(src, e))?;
        if read == 0 {
            break;
        }
        let chunk = &buf[..read];
        destination
            .write_all(chunk)
            .map_err(|e| FetchError::io(dest, e))?;
        if crc_on_flush {
            accumulator.update(chunk);
        }
        total += read as u64;
    }
    destination.flush().map_err(|e| FetchError::io(dest, e))?;

    if total != expected.size {
        return Err(FetchError::manifest(format!(
            "{}: copied {} bytes, expected {}",
            dest.display(),
            total,
            expected.size
        )));
    }

    if crc_on_flush {
        if let Some(expected_crc) = expected.crc32 {
            let actual = accumulator.finalize();
            if actual != expected_crc {
                return Err(FetchError::Integrity {
                    path: dest.to_path_buf(),
                    expected: expected_crc,
                    actual,
                });
            }
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crc32_of(bytes: &[u8]) -> u32 {
        let mut acc = Crc32Accumulator::new();
        acc.update(bytes);
        acc.finalize()
    }

    #[test]
    fn copies_bytes_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.dat");
        let dest = dir.path().join("dest.dat");
        let contents = b"some checkpoint payload bytes".to_vec();
        std::fs::write(&src, &contents).unwrap();

        let expected = ExpectedFile {
            size: contents.len() as u64,
            crc32: Some(crc32_of(&contents)),
        };
        let copied = copy_file(&src, &dest, expected, 8, true).unwrap();

        assert_eq!(copied, contents.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), contents);
    }

    #[test]
    fn detects_crc_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.dat");
        let dest = dir.path().join("dest.dat");
        std::fs::write(&src, b"payload").unwrap();

        let expected = ExpectedFile {
            size: 7,
            crc32: Some(0xBAD_0BAD),
        };
        let err = copy_file(&src, &dest, expected, 1024, true).unwrap_err();
        assert!(matches!(err, FetchError::Integrity { .. }));
    }

    #[test]
    fn detects_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.dat");
        let dest = dir.path().join("dest.dat");
        std::fs::write(&src, b"payload").unwrap();

        let expected = ExpectedFile {
            size: 999,
            crc32: None,
        };
        let err = copy_file(&src, &dest, expected, 1024, false).unwrap_err();
        assert!(matches!(err, FetchError::Manifest(_)));
    }

    #[test]
    fn skips_crc_check_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.dat");
        let dest = dir.path().join("dest.dat");
        std::fs::write(&src, b"payload").unwrap();

        let expected = ExpectedFile {
            size: 7,
            crc32: Some(0xBAD_0BAD),
        };
        let copied = copy_file(&src, &dest, expected, 1024, false).unwrap();
        assert_eq!(copied, 7);
    }
}
