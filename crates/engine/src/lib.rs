//! Orchestration layer: selects a checkpoint candidate, fetches it under
//! a bounded-concurrency sliding window, and decides whether to try the
//! next-newest candidate on failure.

pub mod candidate_loop;
pub mod fetch_sync;
pub mod file_list_fetcher;
pub mod flow_control;
pub mod orchestrator;

pub use candidate_loop::{run as run_candidate_loop, Outcome};
pub use fetch_sync::{fetch_sync, FetchSyncResult};
pub use orchestrator::{AttemptOutcome, Collaborators, FetchOrchestrator};
