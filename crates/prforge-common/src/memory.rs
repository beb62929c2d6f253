use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::job::{Job, JobId, JobStatus, JobUpdate, NewJob, ProgressEntry};
use crate::store::{
    CredentialStore, FeedbackPost, FeedbackStore, GithubConfig, JobStore, OAuthTokens,
    RepoConfigStore, StoreError,
};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    history: HashMap<JobId, Vec<JobStatus>>,
    posts: HashMap<String, FeedbackPost>,
    repos: HashMap<String, GithubConfig>,
    github_tokens: HashMap<String, String>,
    api_keys: HashMap<(String, String), String>,
    oauth: HashMap<(String, String), OAuthTokens>,
}

/// In-process implementation of every collaborator contract.
///
/// Enforces the job status graph like the persistent stores do and keeps
/// the full status history of each job.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub fn insert_post(&self, post: FeedbackPost) {
        if let Ok(mut inner) = self.lock() {
            inner.posts.insert(post.id.clone(), post);
        }
    }

    pub fn set_github_config(&self, org_id: &str, config: GithubConfig) {
        if let Ok(mut inner) = self.lock() {
            inner.repos.insert(org_id.to_string(), config);
        }
    }

    pub fn set_github_token(&self, org_id: &str, token: &str) {
        if let Ok(mut inner) = self.lock() {
            inner
                .github_tokens
                .insert(org_id.to_string(), token.to_string());
        }
    }

    pub fn set_api_key(&self, org_id: &str, provider_id: &str, key: &str) {
        if let Ok(mut inner) = self.lock() {
            inner.api_keys.insert(
                (org_id.to_string(), provider_id.to_string()),
                key.to_string(),
            );
        }
    }

    pub fn set_oauth_tokens(&self, org_id: &str, provider_id: &str, tokens: OAuthTokens) {
        if let Ok(mut inner) = self.lock() {
            inner
                .oauth
                .insert((org_id.to_string(), provider_id.to_string()), tokens);
        }
    }

    /// Every status the job has held, in order, starting with `pending`.
    pub fn status_history(&self, id: &JobId) -> Vec<JobStatus> {
        self.lock()
            .ok()
            .and_then(|inner| inner.history.get(id).cloned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError> {
        let job = new.into_job();
        let mut inner = self.lock()?;
        inner.history.insert(job.id.clone(), vec![job.status]);
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get_by_id(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.lock()?.jobs.get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &JobId,
        status: JobStatus,
        extra: JobUpdate,
    ) -> Result<Job, StoreError> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::JobNotFound { id: id.clone() })?;
        if !job.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.clone(),
                from: job.status,
                to: status,
            });
        }
        job.status = status;
        extra.apply_to(job);
        job.updated_at = Utc::now();
        let updated = job.clone();
        inner.history.entry(id.clone()).or_default().push(status);
        Ok(updated)
    }

    async fn append_progress(&self, id: &JobId, message: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::JobNotFound { id: id.clone() })?;
        job.progress.push(ProgressEntry {
            at: Utc::now(),
            message: message.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl FeedbackStore for MemoryStore {
    async fn get_feedback_post(&self, post_id: &str) -> Result<Option<FeedbackPost>, StoreError> {
        Ok(self.lock()?.posts.get(post_id).cloned())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_github_token(&self, org_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.github_tokens.get(org_id).cloned())
    }

    async fn get_decrypted_api_key(
        &self,
        org_id: &str,
        provider_id: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()?
            .api_keys
            .get(&(org_id.to_string(), provider_id.to_string()))
            .cloned())
    }

    async fn get_decrypted_oauth_tokens(
        &self,
        org_id: &str,
        provider_id: &str,
    ) -> Result<Option<OAuthTokens>, StoreError> {
        Ok(self
            .lock()?
            .oauth
            .get(&(org_id.to_string(), provider_id.to_string()))
            .cloned())
    }
}

#[async_trait]
impl RepoConfigStore for MemoryStore {
    async fn get_github_config(&self, org_id: &str) -> Result<Option<GithubConfig>, StoreError> {
        Ok(self.lock()?.repos.get(org_id).cloned())
    }
}
