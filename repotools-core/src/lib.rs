//! Repotools Core Library
//!
//! Shared functionality for the repository tools: configuration, GitHub API
//! access, the per-repository document store, the issue mirror and the
//! traffic report.

pub mod constants;
pub mod context;
pub mod error;
pub mod github;
pub mod mirror;
pub mod repo;
pub mod shutdown;
pub mod store;
pub mod traffic;

// Re-export commonly used items
pub use context::Context;
pub use error::{RepoToolsError, Result};
pub use github::{GitHubClient, IssueTracker};
pub use mirror::IssueMirror;
pub use repo::RepoHandle;
pub use store::MirrorStore;
