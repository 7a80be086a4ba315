//! The two byte-moving primitives a fetch attempt is built from:
//! [`file_copy`] for whole-file copies and [`container`] for files
//! reconstructed from shared container segments.

mod advise;
pub mod container;
pub mod file_copy;

pub use container::{reconstruct_file, ExpectedFile as ContainerExpectedFile, Segment};
pub use file_copy::{copy_file, ExpectedFile as FileExpectedFile};
