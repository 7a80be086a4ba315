//! crates/flist/src/manifest.rs
//!
//! Parsed representation of the summary manifest: the single file rank 0
//! reads from the checkpoint directory describing every container and
//! every rank's files.

use std::path::PathBuf;

use fetch_core::error::{FetchError, FetchResult};
use fetch_core::kvtree::KVTree;

/// The summary manifest's dataset header: identifies which dataset and
/// which checkpoint this summary describes, broadcast to every rank
/// alongside the container catalogue (spec C4 step 2) since every rank
/// needs `ckpt_id` for the process-wide checkpoint-id observable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatasetHeader {
    /// Dataset id, matching the index's `checkpoint_id`.
    pub id: u64,
    /// Checkpoint id within the dataset (checkpoints are a subset of
    /// datasets; this pipeline only ever fetches checkpoints).
    pub ckpt_id: u64,
    /// Total size in bytes across every rank's files.
    pub size: u64,
    /// Total file count across every rank.
    pub files: u64,
    /// Whether the flush that produced this summary completed.
    pub complete: bool,
    /// Username that produced the checkpoint, when recorded.
    pub user: Option<String>,
    /// Job identifier that produced the checkpoint, when recorded.
    pub job: Option<String>,
}

impl DatasetHeader {
    fn to_tree(&self) -> KVTree {
        let mut tree = KVTree::new();
        tree.set_u64("id", self.id);
        tree.set_u64("ckpt_id", self.ckpt_id);
        tree.set_u64("size", self.size);
        tree.set_u64("files", self.files);
        tree.set_bool("complete", self.complete);
        if let Some(user) = &self.user {
            tree.set_str("user", user);
        }
        if let Some(job) = &self.job {
            tree.set_str("job", job);
        }
        tree
    }

    fn from_tree(tree: &KVTree) -> FetchResult<Self> {
        Ok(Self {
            id: tree
                .get_u64("id")
                .ok_or_else(|| FetchError::manifest("dataset header missing id"))?,
            ckpt_id: tree
                .get_u64("ckpt_id")
                .ok_or_else(|| FetchError::manifest("dataset header missing ckpt_id"))?,
            size: tree
                .get_u64("size")
                .ok_or_else(|| FetchError::manifest("dataset header missing size"))?,
            files: tree
                .get_u64("files")
                .ok_or_else(|| FetchError::manifest("dataset header missing files"))?,
            complete: tree
                .get_bool("complete")
                .ok_or_else(|| FetchError::manifest("dataset header missing complete"))?,
            user: tree.get_str("user").map(str::to_string),
            job: tree.get_str("job").map(str::to_string),
        })
    }
}

/// A shared container file backing one or more destination files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Container id, as referenced by segment records.
    pub id: u64,
    /// Path to the container file on the parallel filesystem.
    pub path: PathBuf,
    /// Size of the container in bytes.
    pub size: u64,
}

impl ContainerInfo {
    fn to_tree(&self) -> KVTree {
        let mut tree = KVTree::new();
        tree.set_str("name", self.path.to_string_lossy().into_owned());
        tree.set_u64("size", self.size);
        tree
    }

    fn from_tree(id: u64, tree: &KVTree) -> FetchResult<Self> {
        let path = tree
            .get_str("name")
            .ok_or_else(|| FetchError::manifest(format!("container {id} missing name")))?
            .into();
        let size = tree
            .get_u64("size")
            .ok_or_else(|| FetchError::manifest(format!("container {id} missing size")))?;
        Ok(Self { id, path, size })
    }
}

/// One segment of a destination file stored inside a container, in the
/// logical (destination-file) order it must be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    /// Container this segment's bytes live in.
    pub container_id: u64,
    /// Offset inside the container.
    pub container_offset: u64,
    /// Logical offset inside the destination file.
    pub file_offset: u64,
    /// Length in bytes.
    pub length: u64,
}

impl SegmentRef {
    fn to_tree(&self) -> KVTree {
        let mut tree = KVTree::new();
        tree.set_u64("container", self.container_id);
        tree.set_u64("offset", self.container_offset);
        tree.set_u64("logical", self.file_offset);
        tree.set_u64("length", self.length);
        tree
    }

    fn from_tree(tree: &KVTree) -> FetchResult<Self> {
        Ok(Self {
            container_id: tree
                .get_u64("container")
                .ok_or_else(|| FetchError::manifest("segment missing container id"))?,
            container_offset: tree
                .get_u64("offset")
                .ok_or_else(|| FetchError::manifest("segment missing offset"))?,
            file_offset: tree
                .get_u64("logical")
                .ok_or_else(|| FetchError::manifest("segment missing logical offset"))?,
            length: tree
                .get_u64("length")
                .ok_or_else(|| FetchError::manifest("segment missing length"))?,
        })
    }
}

/// Where a destination file's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Copied whole from a directory on the parallel filesystem (the
    /// `path=<dir>` form recorded when containers are not in use).
    Plain {
        /// Source directory on the parallel filesystem.
        dir: PathBuf,
    },
    /// Reconstructed from one or more container segments.
    Container {
        /// Segments making up the file, not necessarily in logical order.
        segments: Vec<SegmentRef>,
    },
}

/// One destination file recorded for some rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Destination file name, relative to the rank's cache directory.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// CRC32, when the manifest recorded one.
    pub crc32: Option<u32>,
    /// Whether the file, as of the flush that wrote this summary, had
    /// completed successfully. Absence of the key means `true` — an older
    /// summary writer that never recorded this key is taken at face value
    /// rather than treated as recording an incomplete file.
    pub complete: bool,
    /// When set, `FileListFetcher` skips this file entirely: it is
    /// excluded from fetch even though the summary still describes it.
    pub no_fetch: bool,
    /// How to obtain this file's bytes.
    pub source: FileSource,
}

impl FileRecord {
    fn to_tree(&self) -> KVTree {
        let mut tree = KVTree::new();
        tree.set_u64("size", self.size);
        if let Some(crc) = self.crc32 {
            tree.set_u64("crc32", u64::from(crc));
        }
        if !self.complete {
            tree.set_bool("complete", false);
        }
        if self.no_fetch {
            tree.set_bool("no_fetch", true);
        }
        match &self.source {
            FileSource::Plain { dir } => {
                tree.set_str("path", dir.to_string_lossy().into_owned());
            }
            FileSource::Container { segments } => {
                let segments_tree = tree.set("segments", KVTree::new());
                for (index, segment) in segments.iter().enumerate() {
                    segments_tree.set(index.to_string(), segment.to_tree());
                }
            }
        }
        tree
    }

    fn from_tree(name: &str, tree: &KVTree) -> FetchResult<Self> {
        let size = tree
            .get_u64("size")
            .ok_or_else(|| FetchError::manifest(format!("file {name} missing size")))?;
        let crc32 = tree.get_u64("crc32").map(|v| v as u32);
        // Absent `complete` means complete: see the open question this
        // resolves in DESIGN.md.
        let complete = tree.get_bool("complete").unwrap_or(true);
        // `no_fetch` is a presence test, not a value test: any process
        // that wrote the key at all meant to exclude this file, even if
        // it (unusually) wrote a falsy value under it.
        let no_fetch = tree.get_str("no_fetch").is_some();

        let source = if let Some(dir) = tree.get_str("path") {
            FileSource::Plain { dir: dir.into() }
        } else if let Some(segments_tree) = tree.get("segments") {
            let mut segments = Vec::new();
            for (_, node) in segments_tree.elements() {
                let segment_tree = node.as_tree().ok_or_else(|| {
                    FetchError::manifest(format!("file {name} has a non-tree segment entry"))
                })?;
                segments.push(SegmentRef::from_tree(segment_tree)?);
            }
            FileSource::Container { segments }
        } else {
            return Err(FetchError::manifest(format!(
                "file {name} has neither path= nor segments"
            )));
        };

        Ok(Self {
            name: name.to_string(),
            size,
            crc32,
            complete,
            no_fetch,
            source,
        })
    }
}

/// The fully parsed summary manifest, as read by rank 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryManifest {
    /// Identifies the dataset/checkpoint this summary describes.
    pub dataset: DatasetHeader,
    /// Every container referenced by any rank's files.
    pub containers: Vec<ContainerInfo>,
    /// Each rank's files, keyed by rank.
    pub rank_files: std::collections::BTreeMap<usize, Vec<FileRecord>>,
}

impl SummaryManifest {
    /// Parses a manifest from its on-disk `KVTree` representation.
    pub fn from_tree(tree: &KVTree) -> FetchResult<Self> {
        let dataset_tree = tree
            .get("dataset")
            .ok_or_else(|| FetchError::manifest("summary missing dataset header"))?;
        let dataset = DatasetHeader::from_tree(dataset_tree)?;

        let mut containers = Vec::new();
        if let Some(containers_tree) = tree.get("containers") {
            for (key, node) in containers_tree.elements() {
                let id: u64 = key
                    .parse()
                    .map_err(|_| FetchError::manifest(format!("bad container id {key:?}")))?;
                let child = node.as_tree().ok_or_else(|| {
                    FetchError::manifest(format!("container {key} is not a tree"))
                })?;
                containers.push(ContainerInfo::from_tree(id, child)?);
            }
        }

        let mut rank_files = std::collections::BTreeMap::new();
        if let Some(rank2file) = tree.get("rank2file") {
            for (rank_key, node) in rank2file.elements() {
                let rank: usize = rank_key
                    .parse()
                    .map_err(|_| FetchError::manifest(format!("bad rank {rank_key:?}")))?;
                let files_tree = node.as_tree().ok_or_else(|| {
                    FetchError::manifest(format!("rank {rank_key} is not a tree"))
                })?;
                let mut files = Vec::new();
                if let Some(files_node) = files_tree.get("files") {
                    for (name, file_node) in files_node.elements() {
                        let file_tree = file_node.as_tree().ok_or_else(|| {
                            FetchError::manifest(format!("file {name} is not a tree"))
                        })?;
                        files.push(FileRecord::from_tree(name, file_tree)?);
                    }
                }
                rank_files.insert(rank, files);
            }
        }

        Ok(Self {
            dataset,
            containers,
            rank_files,
        })
    }

    /// Serializes this manifest back to its `KVTree` representation.
    #[must_use]
    pub fn to_tree(&self) -> KVTree {
        let mut tree = KVTree::new();
        tree.set("dataset", self.dataset.to_tree());
        let containers_tree = tree.set("containers", KVTree::new());
        for container in &self.containers {
            containers_tree.set(container.id.to_string(), container.to_tree());
        }

        let rank2file = tree.set("rank2file", KVTree::new());
        for (rank, files) in &self.rank_files {
            let rank_tree = rank2file.set(rank.to_string(), KVTree::new());
            let files_tree = rank_tree.set("files", KVTree::new());
            for file in files {
                files_tree.set(file.name.clone(), file.to_tree());
            }
        }
        tree
    }

    /// Encodes the dataset header, for the broadcast step (spec C4 step 2).
    #[must_use]
    pub fn dataset_tree(&self) -> KVTree {
        self.dataset.to_tree()
    }

    /// Decodes a dataset header previously produced by
    /// [`SummaryManifest::dataset_tree`].
    pub fn dataset_from_tree(tree: &KVTree) -> FetchResult<DatasetHeader> {
        DatasetHeader::from_tree(tree)
    }

    /// Encodes just the container list, for the broadcast step.
    #[must_use]
    pub fn containers_tree(&self) -> KVTree {
        let mut tree = KVTree::new();
        for container in &self.containers {
            tree.set(container.id.to_string(), container.to_tree());
        }
        tree
    }

    /// Decodes a container list previously produced by
    /// [`SummaryManifest::containers_tree`].
    pub fn containers_from_tree(tree: &KVTree) -> FetchResult<Vec<ContainerInfo>> {
        let mut containers = Vec::new();
        for (key, node) in tree.elements() {
            let id: u64 = key
                .parse()
                .map_err(|_| FetchError::manifest(format!("bad container id {key:?}")))?;
            let child = node
                .as_tree()
                .ok_or_else(|| FetchError::manifest(format!("container {key} is not a tree")))?;
            containers.push(ContainerInfo::from_tree(id, child)?);
        }
        Ok(containers)
    }

    /// Encodes one rank's files, for the scatter step.
    #[must_use]
    pub fn rank_files_tree(files: &[FileRecord]) -> KVTree {
        let mut tree = KVTree::new();
        for file in files {
            tree.set(file.name.clone(), file.to_tree());
        }
        tree
    }

    /// Decodes one rank's files, as produced by
    /// [`SummaryManifest::rank_files_tree`].
    pub fn rank_files_from_tree(tree: &KVTree) -> FetchResult<Vec<FileRecord>> {
        let mut files = Vec::new();
        for (name, node) in tree.elements() {
            let file_tree = node
                .as_tree()
                .ok_or_else(|| FetchError::manifest(format!("file {name} is not a tree")))?;
            files.push(FileRecord::from_tree(name, file_tree)?);
        }
        Ok(files)
    }
}
