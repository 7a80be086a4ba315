//! Parses the summary manifest on rank 0 and distributes each rank's
//! share of it: the container list by broadcast, each rank's file list by
//! a targeted scatter.

pub mod manifest;
pub mod scatter;

pub use manifest::{
    ContainerInfo, DatasetHeader, FileRecord, FileSource, SegmentRef, SummaryManifest,
};
pub use scatter::{scatter, RankFileList};
