//! Shared domain types for the prforge worker.
//!
//! - `job`: the job record, its status graph and update payloads
//! - `store`: contracts for the collaborators the worker consumes
//! - `memory`: an in-process implementation of those contracts

pub mod job;
pub mod memory;
pub mod store;

pub use job::{Job, JobId, JobStatus, JobUpdate, NewJob, ProgressEntry};
pub use memory::MemoryStore;
pub use store::{
    AuthType, CredentialStore, FeedbackPost, FeedbackStore, GithubConfig, JobStore, OAuthTokens,
    RepoConfigStore, StoreError,
};
