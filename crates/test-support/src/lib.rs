//! In-process multi-rank transport and checkpoint-directory fixtures
//! shared by the workspace's test suites. Not published; depended on only
//! as a dev-dependency.

pub mod channel_transport;
pub mod fixtures;

pub use channel_transport::ChannelTransport;
pub use fixtures::{index_with, PrefixFixture};
