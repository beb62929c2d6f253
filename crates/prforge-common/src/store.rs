//! Contracts for the collaborators the worker consumes.
//!
//! Persistence of organizations, posts, credentials and repository
//! settings belongs to the surrounding product; the worker only sees the
//! narrow fetch/update surface defined here.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{Job, JobId, JobStatus, JobUpdate, NewJob};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {id} not found")]
    JobNotFound { id: JobId },

    #[error("Invalid status transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Store backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

/// Title and description of the feedback post a job implements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackPost {
    pub id: String,
    pub title: String,
    pub description: String,
}

/// Repository an organization has connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubConfig {
    /// `owner/name`
    pub repo_full_name: String,
    pub default_branch: String,
}

/// Decrypted OAuth token pair for providers that authenticate with OAuth.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub account_id: Option<String>,
}

impl OAuthTokens {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Shape of the credential a provider needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    ApiKey,
    #[serde(rename = "oauth")]
    OAuth,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::OAuth => "oauth",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_key" => Ok(Self::ApiKey),
            "oauth" => Ok(Self::OAuth),
            _ => Err(format!("Invalid auth type: {}", s)),
        }
    }
}

/// Job records: the sole externally observable state of a run.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError>;

    async fn get_by_id(&self, id: &JobId) -> Result<Option<Job>, StoreError>;

    /// Write a status (plus optional extra fields). Rejects writes that are
    /// not an edge of the state graph with `StoreError::InvalidTransition`.
    async fn update_status(
        &self,
        id: &JobId,
        status: JobStatus,
        extra: JobUpdate,
    ) -> Result<Job, StoreError>;

    async fn append_progress(&self, id: &JobId, message: &str) -> Result<(), StoreError>;

    /// The external cancel action.
    async fn cancel(&self, id: &JobId) -> Result<Job, StoreError> {
        self.update_status(id, JobStatus::Cancelled, JobUpdate::default())
            .await
    }
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn get_feedback_post(&self, post_id: &str) -> Result<Option<FeedbackPost>, StoreError>;
}

/// Decrypt-and-fetch access to stored credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_github_token(&self, org_id: &str) -> Result<Option<String>, StoreError>;

    async fn get_decrypted_api_key(
        &self,
        org_id: &str,
        provider_id: &str,
    ) -> Result<Option<String>, StoreError>;

    async fn get_decrypted_oauth_tokens(
        &self,
        org_id: &str,
        provider_id: &str,
    ) -> Result<Option<OAuthTokens>, StoreError>;
}

#[async_trait]
pub trait RepoConfigStore: Send + Sync {
    async fn get_github_config(&self, org_id: &str) -> Result<Option<GithubConfig>, StoreError>;
}
