//! crates/engine/src/file_list_fetcher.rs
//!
//! `FileListFetcher`: fetches every file in this rank's [`RankFileList`]
//! into the dataset's cache directory, recording progress in the
//! [`Filemap`] as it goes.
//!
//! Contract (resolved against `original_source/src/scr_fetch.c`'s
//! `scr_fetch_files` loop): a file carrying `no_fetch` is skipped outright;
//! every other file is registered in the filemap (`add_file`, flushed)
//! *before* its destination is opened, so a crash between the two leaves a
//! filemap entry the surrounding `CacheManager` pass can use to delete the
//! partial. A single file's failure does not abort the run — the
//! optimistic `complete: true` meta is persisted as `complete: false` and
//! the remaining files are still attempted, so one bad file never masks
//! diagnosis of the others. The overall run is reported as a failure if
//! any processed file failed.

use std::path::Path;

use fetch_core::error::FetchResult;
use fetch_core::filemap::{Filemap, FileMeta, FileType};
use flist::{DatasetHeader, FileRecord, FileSource, RankFileList};
use transfer::container::{ExpectedFile as ContainerExpected, Segment};
use transfer::file_copy::ExpectedFile as FileExpected;

/// Resolves a container id (as referenced by a [`FileRecord`]'s segments)
/// to its path on the parallel filesystem.
fn container_path(list: &RankFileList, container_id: u64) -> FetchResult<&std::path::Path> {
    list.containers
        .iter()
        .find(|c| c.id == container_id)
        .map(|c| c.path.as_path())
        .ok_or_else(|| {
            fetch_core::error::FetchError::manifest(format!(
                "no container with id {container_id} in manifest"
            ))
        })
}

/// Fetches every file in `list` into `dataset_dir`, persisting progress to
/// `filemap` at `map_path` under `dataset_id`.
///
/// Returns `Ok(true)` iff every processed file (every file not marked
/// `no_fetch`) fetched successfully. Never returns `Err` for a single
/// file's transfer failure — those are folded into the `false` result and
/// recorded per-file in the filemap — only a filemap I/O failure itself
/// propagates as `Err`, since without a working filemap the
/// write-before-open guarantee cannot be upheld at all.
#[allow(clippy::too_many_arguments)]
pub fn fetch_all(
    dataset_id: u64,
    list: &RankFileList,
    dataset_dir: &Path,
    map_path: &Path,
    filemap: &dyn Filemap,
    buf_size: usize,
    crc_on_flush: bool,
    world_size: usize,
) -> FetchResult<bool> {
    let mut all_ok = true;
    let mut processed = 0usize;

    for record in &list.files {
        if record.no_fetch {
            continue;
        }
        processed += 1;

        let dest = dataset_dir.join(&record.name);
        filemap.add_file(map_path, dataset_id, &dest)?;

        let file_type = match &record.source {
            FileSource::Plain { .. } => FileType::Regular,
            FileSource::Container { .. } => FileType::Segmented,
        };
        let mut meta = FileMeta {
            filename: record.name.clone(),
            file_type,
            size: record.size,
            complete: true,
            crc32: record.crc32,
            ranks: world_size,
        };

        if fetch_one(list, record, &dest, buf_size, crc_on_flush).is_err() {
            meta.complete = false;
            all_ok = false;
        }

        filemap.set_meta(map_path, dataset_id, &dest, meta)?;
    }

    filemap.set_expected_file_count(map_path, dataset_id, processed)?;
    Ok(all_ok)
}

fn fetch_one(
    list: &RankFileList,
    record: &FileRecord,
    dest: &Path,
    buf_size: usize,
    crc_on_flush: bool,
) -> FetchResult<()> {
    match &record.source {
        FileSource::Plain { dir } => {
            let src = dir.join(&record.name);
            let expected = FileExpected {
                size: record.size,
                crc32: record.crc32,
            };
            transfer::file_copy::copy_file(&src, dest, expected, buf_size, crc_on_flush)?;
            Ok(())
        }
        FileSource::Container { segments } => {
            let mut resolved = Vec::with_capacity(segments.len());
            for segment in segments {
                resolved.push(Segment {
                    container_path: container_path(list, segment.container_id)?.to_path_buf(),
                    container_offset: segment.container_offset,
                    file_offset: segment.file_offset,
                    length: segment.length,
                });
            }
            let expected = ContainerExpected {
                size: record.size,
                crc32: record.crc32,
            };
            transfer::container::reconstruct_file(
                dest,
                &resolved,
                expected,
                buf_size,
                crc_on_flush,
            )?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetch_core::filemap::FsFilemap;
    use flist::{ContainerInfo, SegmentRef};

    fn plain_record(name: &str, size: u64, dir: &Path) -> FileRecord {
        FileRecord {
            name: name.to_string(),
            size,
            crc32: None,
            complete: true,
            no_fetch: false,
            source: FileSource::Plain {
                dir: dir.to_path_buf(),
            },
        }
    }

    #[test]
    fn fetches_plain_files_and_records_complete_meta() {
        let pfs_dir = tempfile::tempdir().unwrap();
        std::fs::write(pfs_dir.path().join("rank_0.0"), b"payload").unwrap();

        let list = RankFileList {
            dataset: DatasetHeader::default(),
            containers: Vec::new(),
            files: vec![plain_record("rank_0.0", 7, pfs_dir.path())],
        };

        let cache_dir = tempfile::tempdir().unwrap();
        let map_dir = tempfile::tempdir().unwrap();
        let map_path = map_dir.path().join("filemap.scr");
        let filemap = FsFilemap;

        let ok = fetch_all(1, &list, cache_dir.path(), &map_path, &filemap, 1024, false, 2).unwrap();
        assert!(ok);
        assert_eq!(
            std::fs::read(cache_dir.path().join("rank_0.0")).unwrap(),
            b"payload"
        );

        let entries = filemap.load(&map_path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].expected_file_count, 1);
        let (_, meta) = &entries[0].files[0];
        let meta = meta.as_ref().unwrap();
        assert!(meta.complete);
        assert_eq!(meta.ranks, 2);
        assert_eq!(meta.filename, "rank_0.0");
    }

    #[test]
    fn fetches_segmented_files_from_containers() {
        let container_dir = tempfile::tempdir().unwrap();
        let container_path = container_dir.path().join("ctr_0.dat");
        std::fs::write(&container_path, b"abcdef").unwrap();

        let list = RankFileList {
            dataset: DatasetHeader::default(),
            containers: vec![ContainerInfo {
                id: 0,
                path: container_path.clone(),
                size: 6,
            }],
            files: vec![FileRecord {
                name: "rank_0.0".into(),
                size: 6,
                crc32: None,
                complete: true,
                no_fetch: false,
                source: FileSource::Container {
                    segments: vec![SegmentRef {
                        container_id: 0,
                        container_offset: 0,
                        file_offset: 0,
                        length: 6,
                    }],
                },
            }],
        };

        let cache_dir = tempfile::tempdir().unwrap();
        let map_dir = tempfile::tempdir().unwrap();
        let map_path = map_dir.path().join("filemap.scr");
        let filemap = FsFilemap;

        let ok = fetch_all(2, &list, cache_dir.path(), &map_path, &filemap, 1024, false, 1).unwrap();
        assert!(ok);
        assert_eq!(
            std::fs::read(cache_dir.path().join("rank_0.0")).unwrap(),
            b"abcdef"
        );

        let entries = filemap.load(&map_path).unwrap();
        let meta = entries[0].files[0].1.as_ref().unwrap();
        assert_eq!(meta.file_type, FileType::Segmented);
    }

    #[test]
    fn missing_container_id_marks_file_incomplete_but_does_not_abort_run() {
        let container_dir = tempfile::tempdir().unwrap();
        let ok_container = container_dir.path().join("ctr_0.dat");
        std::fs::write(&ok_container, b"xyz").unwrap();

        let list = RankFileList {
            dataset: DatasetHeader::default(),
            containers: vec![ContainerInfo {
                id: 0,
                path: ok_container,
                size: 3,
            }],
            files: vec![
                FileRecord {
                    name: "bad.bin".into(),
                    size: 6,
                    crc32: None,
                    complete: true,
                    no_fetch: false,
                    source: FileSource::Container {
                        segments: vec![SegmentRef {
                            container_id: 9,
                            container_offset: 0,
                            file_offset: 0,
                            length: 6,
                        }],
                    },
                },
                FileRecord {
                    name: "good.bin".into(),
                    size: 3,
                    crc32: None,
                    complete: true,
                    no_fetch: false,
                    source: FileSource::Container {
                        segments: vec![SegmentRef {
                            container_id: 0,
                            container_offset: 0,
                            file_offset: 0,
                            length: 3,
                        }],
                    },
                },
            ],
        };

        let cache_dir = tempfile::tempdir().unwrap();
        let map_dir = tempfile::tempdir().unwrap();
        let map_path = map_dir.path().join("filemap.scr");
        let filemap = FsFilemap;

        let ok = fetch_all(3, &list, cache_dir.path(), &map_path, &filemap, 1024, false, 1).unwrap();
        assert!(!ok, "one failed file should fail the overall run");

        // The good file after the bad one must still have been fetched:
        // one bad file must not mask the rest.
        assert_eq!(
            std::fs::read(cache_dir.path().join("good.bin")).unwrap(),
            b"xyz"
        );

        let entries = filemap.load(&map_path).unwrap();
        assert_eq!(entries[0].expected_file_count, 2);
        let bad_meta = entries[0]
            .files
            .iter()
            .find(|(p, _)| p.ends_with("bad.bin"))
            .unwrap()
            .1
            .as_ref()
            .unwrap();
        assert!(!bad_meta.complete);
        let good_meta = entries[0]
            .files
            .iter()
            .find(|(p, _)| p.ends_with("good.bin"))
            .unwrap()
            .1
            .as_ref()
            .unwrap();
        assert!(good_meta.complete);
    }

    #[test]
    fn no_fetch_files_are_skipped_entirely() {
        let pfs_dir = tempfile::tempdir().unwrap();
        let list = RankFileList {
            dataset: DatasetHeader::default(),
            containers: Vec::new(),
            files: vec![FileRecord {
                name: "skip.bin".into(),
                size: 4,
                crc32: None,
                complete: true,
                no_fetch: true,
                source: FileSource::Plain {
                    dir: pfs_dir.path().to_path_buf(),
                },
            }],
        };

        let cache_dir = tempfile::tempdir().unwrap();
        let map_dir = tempfile::tempdir().unwrap();
        let map_path = map_dir.path().join("filemap.scr");
        let filemap = FsFilemap;

        let ok = fetch_all(4, &list, cache_dir.path(), &map_path, &filemap, 1024, false, 1).unwrap();
        assert!(ok);
        assert!(!cache_dir.path().join("skip.bin").exists());

        let entries = filemap.load(&map_path).unwrap();
        assert_eq!(entries[0].expected_file_count, 0);
        assert!(entries[0].files.is_empty());
    }

    #[test]
    fn filemap_entry_exists_before_destination_is_created() {
        // Regression for the write-before-open ordering: add_file must be
        // durable before fetch_one ever opens the destination for write.
        let pfs_dir = tempfile::tempdir().unwrap();
        std::fs::write(pfs_dir.path().join("a.bin"), b"1234").unwrap();
        let list = RankFileList {
            dataset: DatasetHeader::default(),
            containers: Vec::new(),
            files: vec![plain_record("a.bin", 4, pfs_dir.path())],
        };

        let cache_dir = tempfile::tempdir().unwrap();
        let map_dir = tempfile::tempdir().unwrap();
        let map_path = map_dir.path().join("filemap.scr");
        let filemap = FsFilemap;

        fetch_all(5, &list, cache_dir.path(), &map_path, &filemap, 1024, false, 1).unwrap();

        // By the time fetch_all returns, both the filemap entry and the
        // destination file exist and agree on size.
        let entries = filemap.load(&map_path).unwrap();
        assert_eq!(entries[0].files.len(), 1);
        assert_eq!(
            std::fs::metadata(cache_dir.path().join("a.bin"))
                .unwrap()
                .len(),
            4
        );
    }
}
