//! crates/transfer/src/container.rs
//!
//! `ContainerReader`: reconstructs a single destination file from one or
//! more segments of shared container files, each segment a contiguous
//! run of bytes at some offset inside a container that maps to a
//! contiguous run of bytes at some logical offset inside the destination
//! file.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use checksums::Crc32Accumulator;
use fetch_core::error::{FetchError, FetchResult};

use crate::advise::advise_sequential_dontneed;

/// One segment of a destination file stored inside a container.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Container file this segment's bytes live in.
    pub container_path: PathBuf,
    /// Byte offset inside the container where the segment begins.
    pub container_offset: u64,
    /// Logical byte offset inside the destination file where this
    /// segment's bytes belong.
    pub file_offset: u64,
    /// Length of the segment in bytes.
    pub length: u64,
}

/// Expected properties of the reconstructed file.
#[derive(Debug, Clone, Copy)]
pub struct ExpectedFile {
    /// Total size in bytes.
    pub size: u64,
    /// CRC32 computed over the full, reassembled file, when the manifest
    /// recorded one.
    pub crc32: Option<u32>,
}

/// Reconstructs `dest` from `segments`.
///
/// `segments` need not arrive pre-sorted: this function sorts a local copy
/// ascending by `file_offset` before walking them, since the rolling CRC32
/// is only meaningful when segments are applied in logical order and gaps
/// or overlaps between consecutive segments are a manifest error.
pub fn reconstruct_file(
    dest: &Path,
    segments: &[Segment],
    expected: ExpectedFile,
    buf_size: usize,
    crc_on_flush: bool,
) -> FetchResult<u64> {
    let mut ordered: Vec<&Segment> = segments.iter().collect();
    ordered.sort_by_key(|segment| segment.file_offset);

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
    }
    let mut destination = File::create(dest).map_err(|e| FetchError::io(dest, e))?;

    let mut accumulator = Crc32Accumulator::new();
    let mut buf = vec![0u8; buf_size.max(1)];
    let mut expected_next_offset = 0u64;
    let mut total = 0u64;

    for segment in ordered {
        if segment.file_offset != expected_next_offset {
            return Err(FetchError::manifest(format!(
                "{}: segment at logical offset {} does not continue from {}",
                dest.display(),
                segment.file_offset,
                expected_next_offset
            )));
        }

        let container = File::open(&segment.container_path)
            .map_err(|e| FetchError::io(&segment.container_path, e))?;
        advise_sequential_dontneed(&container);
        let mut reader = std::io::BufReader::with_capacity(buf_size.max(1), container);
        reader
            .seek(SeekFrom::Start(segment.container_offset))
            .map_err(|e| FetchError::io(&segment.container_path, e))?;

        let mut remaining = segment.length;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            reader
                .read_exact(&mut buf[..want])
                .map_err(|e| FetchError::io(&segment.container_path, e))?;
            let chunk = &buf[..want];
            destination
                .write_all(chunk)
                .map_err(|e| FetchError::io(dest, e))?;
            if crc_on_flush {
                accumulator.update(chunk);
            }
            remaining -= want as u64;
            total += want as u64;
        }

        expected_next_offset = segment.file_offset + segment.length;
    }
    destination.flush().map_err(|e| FetchError::io(dest, e))?;

    if total != expected.size {
        return Err(FetchError::manifest(format!(
            "{}: reconstructed {} bytes, expected {}",
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

    fn write_container(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn crc32_of(bytes: &[u8]) -> u32 {
        let mut acc = Crc32Accumulator::new();
        acc.update(bytes);
        acc.finalize()
    }

    #[test]
    fn reassembles_segments_out_of_order_input() {
        let dir = tempfile::tempdir().unwrap();
        let container_a = write_container(dir.path(), "c0.dat", b"HELLO_");
        let container_b = write_container(dir.path(), "c1.dat", b"xxWORLDyy");

        let segments = vec![
            Segment {
                container_path: container_b.clone(),
                container_offset: 2,
                file_offset: 6,
                length: 5,
            },
            Segment {
                container_path: container_a.clone(),
                container_offset: 0,
                file_offset: 0,
                length: 6,
            },
        ];

        let full = b"HELLO_WORLD".to_vec();
        let expected = ExpectedFile {
            size: full.len() as u64,
            crc32: Some(crc32_of(&full)),
        };

        let dest = dir.path().join("rebuilt.dat");
        let total = reconstruct_file(&dest, &segments, expected, 4, true).unwrap();

        assert_eq!(total, full.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), full);
    }

    #[test]
    fn detects_offset_gap() {
        let dir = tempfile::tempdir().unwrap();
        let container = write_container(dir.path(), "c0.dat", b"0123456789");

        let segments = vec![Segment {
            container_path: container,
            container_offset: 0,
            file_offset: 4,
            length: 4,
        }];

        let expected = ExpectedFile {
            size: 4,
            crc32: None,
        };
        let dest = dir.path().join("rebuilt.dat");
        let err = reconstruct_file(&dest, &segments, expected, 16, false).unwrap_err();
        assert!(matches!(err, FetchError::Manifest(_)));
    }
}
