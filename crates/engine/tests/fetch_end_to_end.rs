//! Exercises the full candidate loop, orchestrator, flow control and
//! scatter wiring together across a simulated two-rank cluster.

use fetch_core::cache::{CacheManager, FsCacheManager};
use fetch_core::filemap::FsFilemap;
use fetch_core::index::FsIndex;
use fetch_core::log::NullLog;
use fetch_core::redundancy::IdentityRedundancy;
use fetch_core::Config;
use flist::{FileRecord, FileSource, SummaryManifest};
use engine::{run_candidate_loop, Collaborators, FetchOrchestrator, Outcome};
use test_support::{index_with, ChannelTransport, PrefixFixture};

fn write_summary(prefix: &std::path::Path, name: &str, manifest: &SummaryManifest) {
    let dataset_dir = prefix.join(name);
    std::fs::create_dir_all(&dataset_dir).unwrap();
    let file = std::fs::File::create(dataset_dir.join("summary.scr")).unwrap();
    let mut writer = std::io::BufWriter::new(file);
    manifest.to_tree().write_text(&mut writer).unwrap();
}

fn manifest_with_plain_files(pfs_dir: &std::path::Path) -> SummaryManifest {
    let mut manifest = SummaryManifest::default();
    manifest.dataset.id = 1;
    manifest.dataset.ckpt_id = 1;
    manifest.dataset.size = 10;
    manifest.dataset.files = 2;
    manifest.dataset.complete = true;
    manifest.rank_files.insert(
        0,
        vec![FileRecord {
            name: "rank_0.0".into(),
            size: 5,
            crc32: None,
            complete: true,
            no_fetch: false,
            source: FileSource::Plain {
                dir: pfs_dir.to_path_buf(),
            },
        }],
    );
    manifest.rank_files.insert(
        1,
        vec![FileRecord {
            name: "rank_1.0".into(),
            size: 5,
            crc32: None,
            complete: true,
            no_fetch: false,
            source: FileSource::Plain {
                dir: pfs_dir.to_path_buf(),
            },
        }],
    );
    manifest
}

#[test]
fn two_rank_fetch_succeeds_and_sets_current() {
    let prefix = PrefixFixture::new();
    let pfs = tempfile::tempdir().unwrap();
    std::fs::write(pfs.path().join("rank_0.0"), b"aaaaa").unwrap();
    std::fs::write(pfs.path().join("rank_1.0"), b"bbbbb").unwrap();

    let manifest = manifest_with_plain_files(pfs.path());
    write_summary(prefix.path(), "ckpt.1", &manifest);

    let cache_root_0 = tempfile::tempdir().unwrap();
    let cache_root_1 = tempfile::tempdir().unwrap();

    let transports = ChannelTransport::cluster(2);

    let handle = {
        let transport = transports[1].clone();
        let prefix_path = prefix.path().to_path_buf();
        let cache_dir = cache_root_1.path().to_path_buf();
        std::thread::spawn(move || {
            let config = Config::new(&prefix_path, cache_dir.join("map.scr"))
                .with_fetch_width(1)
                .with_crc_on_flush(false);
            let cache = FsCacheManager::new(&cache_dir);
            let filemap = FsFilemap;
            let redundancy = IdentityRedundancy;
            let log = NullLog;
            let orchestrator = FetchOrchestrator::new(
                &config,
                Collaborators {
                    cache: &cache,
                    filemap: &filemap,
                    redundancy: &redundancy,
                    log: &log,
                },
            );
            let mut index = index_with(&[]);
            let fs_index = FsIndex;
            let index_path = FsIndex::path_under(&prefix_path);
            run_candidate_loop(
                &transport,
                0,
                &orchestrator,
                &prefix_path,
                &mut index,
                &fs_index,
                &index_path,
            )
            .unwrap()
        })
    };

    let root_outcome = {
        let transport = &transports[0];
        let config = Config::new(prefix.path(), cache_root_0.path().join("map.scr"))
            .with_fetch_width(1)
            .with_crc_on_flush(false);
        let cache = FsCacheManager::new(cache_root_0.path());
        let filemap = FsFilemap;
        let redundancy = IdentityRedundancy;
        let log = NullLog;
        let orchestrator = FetchOrchestrator::new(
            &config,
            Collaborators {
                cache: &cache,
                filemap: &filemap,
                redundancy: &redundancy,
                log: &log,
            },
        );
        let mut index = index_with(&[(1, "ckpt.1", Some(true), false)]);
        let fs_index = FsIndex;
        let index_path = prefix.index_path();
        run_candidate_loop(
            transport,
            0,
            &orchestrator,
            prefix.path(),
            &mut index,
            &fs_index,
            &index_path,
        )
        .unwrap()
    };

    let worker_outcome = handle.join().unwrap();

    assert_eq!(
        root_outcome,
        Outcome::Fetched {
            dataset_id: 1,
            checkpoint_id: 1
        }
    );
    assert_eq!(
        worker_outcome,
        Outcome::Fetched {
            dataset_id: 1,
            checkpoint_id: 1
        }
    );

    assert_eq!(
        std::fs::read(cache_root_0.path().join("ckpt.1/rank_0.0")).unwrap(),
        b"aaaaa"
    );
    assert_eq!(
        std::fs::read(cache_root_1.path().join("ckpt.1/rank_1.0")).unwrap(),
        b"bbbbb"
    );

    let current_link = cache_root_0.path().join("current");
    assert_eq!(
        std::fs::read_link(&current_link).unwrap(),
        cache_root_0.path().join("ckpt.1")
    );
}

#[test]
fn missing_source_file_fails_over_to_older_candidate() {
    let prefix = PrefixFixture::new();
    let pfs_good = tempfile::tempdir().unwrap();
    std::fs::write(pfs_good.path().join("rank_0.0"), b"aaaaa").unwrap();
    std::fs::write(pfs_good.path().join("rank_1.0"), b"bbbbb").unwrap();

    let good_manifest = manifest_with_plain_files(pfs_good.path());
    write_summary(prefix.path(), "ckpt.1", &good_manifest);

    // ckpt.2's summary references a source file that was never written,
    // so rank 0's fetch of it will fail and the loop must fall back to
    // ckpt.1.
    let pfs_missing = tempfile::tempdir().unwrap();
    let bad_manifest = manifest_with_plain_files(pfs_missing.path());
    write_summary(prefix.path(), "ckpt.2", &bad_manifest);

    let cache_root_0 = tempfile::tempdir().unwrap();
    let cache_root_1 = tempfile::tempdir().unwrap();
    let transports = ChannelTransport::cluster(2);

    let handle = {
        let transport = transports[1].clone();
        let prefix_path = prefix.path().to_path_buf();
        let cache_dir = cache_root_1.path().to_path_buf();
        std::thread::spawn(move || {
            let config = Config::new(&prefix_path, cache_dir.join("map.scr"))
                .with_fetch_width(1)
                .with_crc_on_flush(false);
            let cache = FsCacheManager::new(&cache_dir);
            let filemap = FsFilemap;
            let redundancy = IdentityRedundancy;
            let log = NullLog;
            let orchestrator = FetchOrchestrator::new(
                &config,
                Collaborators {
                    cache: &cache,
                    filemap: &filemap,
                    redundancy: &redundancy,
                    log: &log,
                },
            );
            let mut index = index_with(&[]);
            let fs_index = FsIndex;
            let index_path = FsIndex::path_under(&prefix_path);
            run_candidate_loop(
                &transport,
                0,
                &orchestrator,
                &prefix_path,
                &mut index,
                &fs_index,
                &index_path,
            )
            .unwrap()
        })
    };

    let root_outcome = {
        let transport = &transports[0];
        let config = Config::new(prefix.path(), cache_root_0.path().join("map.scr"))
            .with_fetch_width(1)
            .with_crc_on_flush(false);
        let cache = FsCacheManager::new(cache_root_0.path());
        let filemap = FsFilemap;
        let redundancy = IdentityRedundancy;
        let log = NullLog;
        let orchestrator = FetchOrchestrator::new(
            &config,
            Collaborators {
                cache: &cache,
                filemap: &filemap,
                redundancy: &redundancy,
                log: &log,
            },
        );
        let mut index = index_with(&[
            (1, "ckpt.1", Some(true), false),
            (2, "ckpt.2", Some(true), false),
        ]);
        let fs_index = FsIndex;
        let index_path = prefix.index_path();
        run_candidate_loop(
            transport,
            0,
            &orchestrator,
            prefix.path(),
            &mut index,
            &fs_index,
            &index_path,
        )
        .unwrap()
    };

    let worker_outcome = handle.join().unwrap();

    assert_eq!(
        root_outcome,
        Outcome::Fetched {
            dataset_id: 1,
            checkpoint_id: 1
        }
    );
    assert_eq!(
        worker_outcome,
        Outcome::Fetched {
            dataset_id: 1,
            checkpoint_id: 1
        }
    );
}

#[test]
fn missing_summary_fails_over_to_older_candidate() {
    // ckpt.2's dataset directory exists but summary.scr was never
    // written (or is corrupt): root's load_summary fails, and every
    // rank must still reach the collective broadcasts below it rather
    // than hang, so the loop can fall back to ckpt.1.
    let prefix = PrefixFixture::new();
    let pfs_good = tempfile::tempdir().unwrap();
    std::fs::write(pfs_good.path().join("rank_0.0"), b"aaaaa").unwrap();
    std::fs::write(pfs_good.path().join("rank_1.0"), b"bbbbb").unwrap();

    let good_manifest = manifest_with_plain_files(pfs_good.path());
    write_summary(prefix.path(), "ckpt.1", &good_manifest);
    std::fs::create_dir_all(prefix.path().join("ckpt.2")).unwrap();

    let cache_root_0 = tempfile::tempdir().unwrap();
    let cache_root_1 = tempfile::tempdir().unwrap();
    let transports = ChannelTransport::cluster(2);

    let handle = {
        let transport = transports[1].clone();
        let prefix_path = prefix.path().to_path_buf();
        let cache_dir = cache_root_1.path().to_path_buf();
        std::thread::spawn(move || {
            let config = Config::new(&prefix_path, cache_dir.join("map.scr"))
                .with_fetch_width(1)
                .with_crc_on_flush(false);
            let cache = FsCacheManager::new(&cache_dir);
            let filemap = FsFilemap;
            let redundancy = IdentityRedundancy;
            let log = NullLog;
            let orchestrator = FetchOrchestrator::new(
                &config,
                Collaborators {
                    cache: &cache,
                    filemap: &filemap,
                    redundancy: &redundancy,
                    log: &log,
                },
            );
            let mut index = index_with(&[]);
            let fs_index = FsIndex;
            let index_path = FsIndex::path_under(&prefix_path);
            run_candidate_loop(
                &transport,
                0,
                &orchestrator,
                &prefix_path,
                &mut index,
                &fs_index,
                &index_path,
            )
            .unwrap()
        })
    };

    let root_outcome = {
        let transport = &transports[0];
        let config = Config::new(prefix.path(), cache_root_0.path().join("map.scr"))
            .with_fetch_width(1)
            .with_crc_on_flush(false);
        let cache = FsCacheManager::new(cache_root_0.path());
        let filemap = FsFilemap;
        let redundancy = IdentityRedundancy;
        let log = NullLog;
        let orchestrator = FetchOrchestrator::new(
            &config,
            Collaborators {
                cache: &cache,
                filemap: &filemap,
                redundancy: &redundancy,
                log: &log,
            },
        );
        let mut index = index_with(&[
            (1, "ckpt.1", Some(true), false),
            (2, "ckpt.2", Some(true), false),
        ]);
        let fs_index = FsIndex;
        let index_path = prefix.index_path();
        run_candidate_loop(
            transport,
            0,
            &orchestrator,
            prefix.path(),
            &mut index,
            &fs_index,
            &index_path,
        )
        .unwrap()
    };

    let worker_outcome = handle.join().unwrap();

    assert_eq!(
        root_outcome,
        Outcome::Fetched {
            dataset_id: 1,
            checkpoint_id: 1
        }
    );
    assert_eq!(
        worker_outcome,
        Outcome::Fetched {
            dataset_id: 1,
            checkpoint_id: 1
        }
    );

    // ckpt.2's half-prepared cache directory must have been purged, not
    // left behind from the failed attempt.
    assert!(!cache_root_0.path().join("ckpt.2").exists());
}
