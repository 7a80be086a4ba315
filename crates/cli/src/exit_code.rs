//! crates/cli/src/exit_code.rs
//!
//! Process exit codes for `scr-fetch`.

/// Exit status `scr-fetch`'s `main` returns to the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// A checkpoint was fetched and `current` now points at it.
    Success = 0,
    /// Every candidate checkpoint failed, or the index held none.
    NoUsableCheckpoint = 1,
    /// An I/O, manifest, or transport error aborted the run outright.
    Error = 2,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
