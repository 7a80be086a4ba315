//! Shared data model, error types, configuration and collaborator traits
//! for the checkpoint fetch pipeline.
//!
//! This crate has no orchestration logic of its own: `crates/transfer`,
//! `crates/flist` and `crates/engine` all depend on it for the vocabulary
//! they share (`FetchError`, `Config`, `KVTree`, `Transport`, `Index`,
//! `Filemap`, `CacheManager`, `RedundancyApply`, `Log`) but implement their
//! own behavior against it.

pub mod cache;
pub mod config;
pub mod error;
pub mod filemap;
pub mod index;
pub mod kvtree;
pub mod log;
pub mod redundancy;
pub mod transport;

pub use cache::{CacheManager, FsCacheManager};
pub use config::Config;
pub use error::{FetchError, FetchResult};
pub use filemap::{Filemap, FileMeta, FileType, FilemapEntry, FsFilemap};
pub use index::{CheckpointRecord, FileIndex, FsIndex, Index};
pub use kvtree::{KVNode, KVTree};
pub use log::{Log, NullLog};
pub use redundancy::{IdentityRedundancy, RedundancyApply};
pub use transport::{RecvHandle, SingleRankTransport, Transport};
