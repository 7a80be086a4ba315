//! Kernel read-ahead hints for sequential, single-pass reads of source
//! files and containers on the parallel filesystem.
//!
//! Every byte `FileCopy`/`ContainerReader` reads from the source side is
//! read exactly once and never revisited, so advising the kernel to drop
//! the pages afterwards keeps a fetch from evicting the node's page cache
//! for no benefit.

use std::fs::File;

/// Advises the kernel that `file` will be read sequentially and that pages
/// already read should not be kept cached.
///
/// A no-op on non-Unix targets, where `posix_fadvise` does not exist; the
/// advisory call can fail silently there just as it can on Unix (the
/// original C code ignores its return value too).
#[cfg(unix)]
pub fn advise_sequential_dontneed(file: &File) {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    for (advice, name) in [
        (libc::POSIX_FADV_SEQUENTIAL, "POSIX_FADV_SEQUENTIAL"),
        (libc::POSIX_FADV_DONTNEED, "POSIX_FADV_DONTNEED"),
    ] {
        let rc = unsafe { libc::posix_fadvise(fd, 0, 0, advice) };
        if rc != 0 {
            tracing::debug!(errno = rc, advice = name, "posix_fadvise failed");
        }
    }
}

#[cfg(not(unix))]
pub fn advise_sequential_dontneed(_file: &File) {}
