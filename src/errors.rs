//! Typed error hierarchy for the prforge worker.
//!
//! One enum per subsystem:
//! - `ToolError`: a tool invocation the model can recover from
//! - `LlmError`: model API round-trips
//! - `ProviderError`: provider lookup and credential resolution
//! - `GitError` / `GithubError`: the git driver and the REST client
//! - `WorkerError`: everything that ends a job as `failed`

use prforge_common::{AuthType, StoreError};
use thiserror::Error;

/// Errors from a single tool call. Rendered back to the model as
/// `Error: <message>` rather than aborting the agent loop.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Path escapes the working checkout: {path}")]
    PathTraversal { path: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("old_string must not be empty")]
    EmptyEditTarget,

    #[error("old_string not found in {path}")]
    EditTargetNotFound { path: String },

    #[error(
        "old_string occurs {count} times in {path}; include more surrounding context so it matches exactly once"
    )]
    AmbiguousEdit { path: String, count: usize },

    #[error("Command exited with code {exit_code}\n{output}")]
    CommandFailed { exit_code: i32, output: String },

    #[error("Command timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid input for {tool}: {message}")]
    InvalidInput { tool: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a language-model API call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("{provider} rejected the credentials")]
    AuthFailed { provider: String },

    #[error("{provider} rate limit exceeded")]
    RateLimited { provider: String },

    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} returned an invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Errors resolving a provider id to a ready model handle.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unknown AI provider: {id}")]
    UnknownProvider { id: String },

    #[error("API key for provider {id} not configured")]
    MissingApiKey { id: String },

    #[error("OAuth credentials for provider {id} not configured")]
    MissingOAuth { id: String },

    #[error("OAuth credentials for provider {id} have expired; reconnect the provider")]
    OAuthExpired { id: String },

    #[error("Provider {id} has no endpoint configured; set [providers.{id}].base_url")]
    MissingEndpoint { id: String },

    #[error("Provider {id} expects {expected} credentials")]
    CredentialMismatch { id: String, expected: AuthType },

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the shell git driver. Messages never carry the access token.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error("git {command} timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("Invalid repository name: {0}")]
    InvalidRepo(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the GitHub REST client.
#[derive(Debug, Error)]
pub enum GithubError {
    #[error("GitHub request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to create pull request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("GitHub returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors that end a job as `failed`. The display string becomes the
/// job's error message verbatim.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0}")]
    Config(String),

    #[error("Agent made no changes to the repository")]
    NoChanges,

    /// The job record was marked `cancelled` while the worker ran.
    #[error("Job was cancelled")]
    Cancelled,

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Github(#[from] GithubError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
