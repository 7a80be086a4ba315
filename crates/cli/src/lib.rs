//! clap front end for `scr-fetch`: parses arguments, wires up the
//! filesystem-backed collaborators, and runs the candidate loop to
//! completion.

pub mod args;
pub mod exit_code;

use std::io::Write;

use clap::Parser;
use fetch_core::cache::FsCacheManager;
use fetch_core::filemap::FsFilemap;
use fetch_core::index::{FsIndex, Index};
use fetch_core::log::{Log, NullLog};
use fetch_core::redundancy::IdentityRedundancy;
use fetch_core::transport::SingleRankTransport;
use fetch_core::Config;
use logging::TracingLog;

pub use args::Args;
pub use exit_code::ExitCode;

/// Parses `argv`, runs one fetch, and writes a one-line summary to
/// `stderr`. Returns the process exit code.
pub fn run(argv: impl IntoIterator<Item = String>, stderr: &mut impl Write) -> ExitCode {
    let args = match Args::try_parse_from(argv) {
        Ok(args) => args,
        Err(err) => {
            let _ = write!(stderr, "{err}");
            return if err.exit_code() == 0 {
                ExitCode::Success
            } else {
                ExitCode::Error
            };
        }
    };
    run_with_args(&args, stderr)
}

fn run_with_args(args: &Args, stderr: &mut impl Write) -> ExitCode {
    let map_file = args.cache.join("filemap.scr");
    let config = Config::new(&args.prefix, map_file)
        .with_fetch_width(args.fetch_width)
        .with_file_buf_size(args.buf_size)
        .with_crc_on_flush(!args.no_crc)
        .with_log_enable(!args.quiet);

    let transport = SingleRankTransport::new();
    let cache = FsCacheManager::new(&args.cache);
    let filemap = FsFilemap;
    let redundancy = IdentityRedundancy;

    let tracing_log = TracingLog;
    let null_log = NullLog;
    let log: &dyn Log = if config.log_enable {
        &tracing_log
    } else {
        &null_log
    };

    let orchestrator = engine::FetchOrchestrator::new(
        &config,
        engine::Collaborators {
            cache: &cache,
            filemap: &filemap,
            redundancy: &redundancy,
            log,
        },
    );

    let fs_index = FsIndex;
    let index_path = FsIndex::path_under(&args.prefix);
    let mut index = match fs_index.load(&index_path) {
        Ok(index) => index,
        Err(err) => {
            let _ = writeln!(stderr, "scr-fetch: failed to load index: {err}");
            return ExitCode::Error;
        }
    };

    let result = engine::fetch_sync(
        &transport,
        0,
        &orchestrator,
        &args.prefix,
        &mut index,
        &fs_index,
        &index_path,
    );

    match result {
        Ok(result) if result.success => {
            let _ = writeln!(
                stderr,
                "scr-fetch: fetched dataset {} (checkpoint {})",
                result.dataset_id.unwrap_or_default(),
                result.checkpoint_id.unwrap_or_default()
            );
            ExitCode::Success
        }
        Ok(_) => {
            let _ = writeln!(stderr, "scr-fetch: no usable checkpoint found");
            ExitCode::NoUsableCheckpoint
        }
        Err(err) => {
            let _ = writeln!(stderr, "scr-fetch: {err}");
            ExitCode::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_arguments_return_error_exit_code() {
        let mut stderr = Vec::new();
        let code = run(["scr-fetch".to_string()], &mut stderr);
        assert_eq!(code, ExitCode::Error);
    }

    #[test]
    fn missing_index_reports_no_usable_checkpoint() {
        let prefix = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let mut stderr = Vec::new();
        let code = run(
            [
                "scr-fetch".to_string(),
                "--prefix".to_string(),
                prefix.path().to_string_lossy().into_owned(),
                "--cache".to_string(),
                cache.path().to_string_lossy().into_owned(),
            ],
            &mut stderr,
        );
        assert_eq!(code, ExitCode::NoUsableCheckpoint);
    }
}
