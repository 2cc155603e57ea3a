//! # Download Coordination
//!
//! This module composes the lock file manager with an HTTP download
//! collaborator to guarantee at-most-one-writer-per-destination across
//! independent OS processes, with polling wait semantics for the processes
//! that lose the race.

mod coordinator;
mod fetcher;
mod http;

pub use coordinator::DownloadCoordinator;
pub use fetcher::{Downloaded, FetchOptions, Fetcher, ProgressFn};
pub use http::{HttpFetcher, create_client};
