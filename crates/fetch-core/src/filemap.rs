//! crates/fetch-core/src/filemap.rs
//!
//! The per-rank filemap: the durable record of which cache files belong to
//! which dataset, written after a fetch completes so a later rebuild or
//! restart can find them without re-reading the summary manifest.

use std::path::{Path, PathBuf};

use crate::error::{FetchError, FetchResult};
use crate::kvtree::KVTree;

/// Whether a filemap entry names a single regular file or a container
/// segment's logical destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// An ordinary file copied byte-for-byte by `FileCopy`.
    Regular,
    /// A file materialized by `ContainerReader` from one or more container
    /// segments.
    Segmented,
}

impl FileType {
    fn as_str(self) -> &'static str {
        match self {
            FileType::Regular => "regular",
            FileType::Segmented => "segmented",
        }
    }

    fn parse(value: &str) -> FetchResult<Self> {
        match value {
            "regular" => Ok(FileType::Regular),
            "segmented" => Ok(FileType::Segmented),
            other => Err(FetchError::manifest(format!("unknown file type {other:?}"))),
        }
    }
}

/// Metadata recorded for a single destination file in the filemap.
///
/// `complete` starts `true` the moment a file is added (optimistic), and
/// is flipped to `false` in the persisted meta the instant that file's
/// fetch fails — it is never simply omitted, since the filemap is the
/// durable record a restart uses to find partials to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Logical file name (as named in the summary manifest), not the
    /// full destination path.
    pub filename: String,
    /// How this file is reconstructed.
    pub file_type: FileType,
    /// Size in bytes, as recorded in the summary manifest.
    pub size: u64,
    /// Whether this file's fetch completed successfully.
    pub complete: bool,
    /// CRC32 recorded in the summary manifest, when present.
    pub crc32: Option<u32>,
    /// World size at fetch time (the `ranks` field of the original
    /// per-file meta record).
    pub ranks: usize,
}

impl FileMeta {
    fn to_tree(&self) -> KVTree {
        let mut tree = KVTree::new();
        tree.set_str("filename", &self.filename);
        tree.set_str("type", self.file_type.as_str());
        tree.set_u64("size", self.size);
        tree.set_bool("complete", self.complete);
        if let Some(crc) = self.crc32 {
            tree.set_u64("crc32", u64::from(crc));
        }
        tree.set_u64("ranks", self.ranks as u64);
        tree
    }

    fn from_tree(tree: &KVTree) -> FetchResult<Self> {
        let filename = tree
            .get_str("filename")
            .ok_or_else(|| FetchError::manifest("filemap entry missing filename"))?
            .to_string();
        let size = tree
            .get_u64("size")
            .ok_or_else(|| FetchError::manifest(format!("{filename} missing size")))?;
        let crc32 = tree.get_u64("crc32").map(|v| v as u32);
        let file_type = tree
            .get_str("type")
            .map(FileType::parse)
            .transpose()?
            .unwrap_or(FileType::Regular);
        // Absence means the entry was only ever `add_file`'d, never given
        // a `set_meta` call (e.g. a crash mid-fetch) — such a file is not
        // complete.
        let complete = tree.get_bool("complete").unwrap_or(false);
        let ranks = tree.get_u64("ranks").unwrap_or(1) as usize;
        Ok(Self {
            filename,
            file_type,
            size,
            complete,
            crc32,
            ranks,
        })
    }
}

/// One dataset's worth of filemap entries for this rank, keyed by
/// destination path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilemapEntry {
    /// Dataset id these files belong to.
    pub dataset_id: u64,
    /// How many files this rank expects to process for this dataset,
    /// written once at the end of a `FileListFetcher` run
    /// (`set_expected_file_count`).
    pub expected_file_count: usize,
    /// Destination files, keyed by their path. A path present here with
    /// `meta: None` has been `add_file`'d but not yet given a `set_meta`
    /// — it was registered before its bytes were written, so a restart
    /// can tell the file is (at best) partial and remove it.
    pub files: Vec<(PathBuf, Option<FileMeta>)>,
}

/// Filemap collaborator: record and recall which files this rank fetched
/// for a given dataset.
///
/// Every mutator here persists immediately. The contract `FileListFetcher`
/// relies on is that [`Filemap::add_file`] for a destination path is
/// durable on disk *before* that path is opened for writing, so that a
/// crash between the two leaves a filemap entry a later `CacheManager`
/// pass can use to find and delete the half-written file.
pub trait Filemap {
    /// Loads this rank's filemap from `path`, or an empty one if absent.
    fn load(&self, path: &Path) -> FetchResult<Vec<FilemapEntry>>;

    /// Registers `file_path` under `dataset_id` with no meta yet, and
    /// flushes immediately.
    fn add_file(&self, path: &Path, dataset_id: u64, file_path: &Path) -> FetchResult<()>;

    /// Attaches `meta` to a previously `add_file`'d destination path, and
    /// flushes immediately.
    fn set_meta(
        &self,
        path: &Path,
        dataset_id: u64,
        file_path: &Path,
        meta: FileMeta,
    ) -> FetchResult<()>;

    /// Records how many files this rank processed for `dataset_id`, and
    /// flushes immediately.
    fn set_expected_file_count(
        &self,
        path: &Path,
        dataset_id: u64,
        count: usize,
    ) -> FetchResult<()>;
}

/// Filesystem-backed [`Filemap`] implementation. Every call is a full
/// read-modify-write of the filemap file: this rank is the only writer,
/// and flushing eagerly (rather than batching) is what gives the
/// write-before-open guarantee its durability.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsFilemap;

impl FsFilemap {
    fn load_tree(path: &Path) -> FetchResult<KVTree> {
        if !path.exists() {
            return Ok(KVTree::new());
        }
        let file = std::fs::File::open(path).map_err(|e| FetchError::io(path, e))?;
        let mut reader = std::io::BufReader::new(file);
        KVTree::read_text(&mut reader)
    }

    fn write_tree(path: &Path, tree: &KVTree) -> FetchResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
        }
        let file = std::fs::File::create(path).map_err(|e| FetchError::io(path, e))?;
        let mut writer = std::io::BufWriter::new(file);
        tree.write_text(&mut writer).map_err(|e| FetchError::io(path, e))
    }

    fn dataset_tree<'a>(root: &'a mut KVTree, dataset_id: u64) -> &'a mut KVTree {
        if root.get(&dataset_id.to_string()).is_none() {
            root.set(dataset_id.to_string(), KVTree::new());
        }
        root.get_mut(&dataset_id.to_string())
            .expect("just ensured this dataset subtree exists")
    }
}

impl Filemap for FsFilemap {
    fn load(&self, path: &Path) -> FetchResult<Vec<FilemapEntry>> {
        let tree = Self::load_tree(path)?;
        let mut entries = Vec::new();
        for (key, node) in tree.elements() {
            let dataset_id: u64 = key
                .parse()
                .map_err(|_| FetchError::manifest(format!("bad dataset id {key:?}")))?;
            let dataset_tree = node
                .as_tree()
                .ok_or_else(|| FetchError::manifest(format!("dataset {key} is not a tree")))?;
            let expected_file_count = dataset_tree.get_u64("expected_file_count").unwrap_or(0) as usize;
            let mut files = Vec::new();
            if let Some(files_tree) = dataset_tree.get("files") {
                for (file_key, file_node) in files_tree.elements() {
                    let file_tree = file_node.as_tree().ok_or_else(|| {
                        FetchError::manifest(format!("file entry {file_key} is not a tree"))
                    })?;
                    let meta = if file_tree.is_empty() {
                        None
                    } else {
                        Some(FileMeta::from_tree(file_tree)?)
                    };
                    files.push((PathBuf::from(file_key), meta));
                }
            }
            entries.push(FilemapEntry {
                dataset_id,
                expected_file_count,
                files,
            });
        }
        Ok(entries)
    }

    fn add_file(&self, path: &Path, dataset_id: u64, file_path: &Path) -> FetchResult<()> {
        let mut tree = Self::load_tree(path)?;
        let dataset_tree = Self::dataset_tree(&mut tree, dataset_id);
        if dataset_tree.get("files").is_none() {
            dataset_tree.set("files", KVTree::new());
        }
        let files_tree = dataset_tree
            .get_mut("files")
            .expect("just ensured files subtree exists");
        files_tree.set(file_path.to_string_lossy().into_owned(), KVTree::new());
        Self::write_tree(path, &tree)
    }

    fn set_meta(
        &self,
        path: &Path,
        dataset_id: u64,
        file_path: &Path,
        meta: FileMeta,
    ) -> FetchResult<()> {
        let mut tree = Self::load_tree(path)?;
        let dataset_tree = Self::dataset_tree(&mut tree, dataset_id);
        if dataset_tree.get("files").is_none() {
            dataset_tree.set("files", KVTree::new());
        }
        let files_tree = dataset_tree
            .get_mut("files")
            .expect("just ensured files subtree exists");
        files_tree.set(file_path.to_string_lossy().into_owned(), meta.to_tree());
        Self::write_tree(path, &tree)
    }

    fn set_expected_file_count(
        &self,
        path: &Path,
        dataset_id: u64,
        count: usize,
    ) -> FetchResult<()> {
        let mut tree = Self::load_tree(path)?;
        let dataset_tree = Self::dataset_tree(&mut tree, dataset_id);
        dataset_tree.set_u64("expected_file_count", count as u64);
        Self::write_tree(path, &tree)
    }
}
