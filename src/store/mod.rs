//! SQLite-backed implementation of the collaborator contracts.
//!
//! The worker itself only depends on the traits in `prforge_common`; this
//! store is what the CLI wires in. Credentials are sealed with
//! [`SecretsCrypto`] before they touch disk.

pub mod crypto;
pub mod db;

pub use crypto::{CryptoError, SecretsCrypto};
pub use db::{DbHandle, WorkerDb};

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use prforge_common::{
    CredentialStore, FeedbackPost, FeedbackStore, GithubConfig, Job, JobId, JobStatus, JobStore,
    JobUpdate, NewJob, OAuthTokens, RepoConfigStore, StoreError,
};

use db::{SealedSecret, StatusWrite};

const KIND_GITHUB_TOKEN: &str = "github_token";
const KIND_API_KEY: &str = "api_key";
const KIND_OAUTH: &str = "oauth";

fn backend(err: anyhow::Error) -> StoreError {
    StoreError::Backend(err)
}

#[derive(Clone)]
pub struct SqliteStore {
    db: DbHandle,
    crypto: Option<Arc<SecretsCrypto>>,
}

impl SqliteStore {
    /// Without `crypto`, credential reads and writes fail; everything else works.
    pub fn new(db: WorkerDb, crypto: Option<SecretsCrypto>) -> Self {
        Self {
            db: DbHandle::new(db),
            crypto: crypto.map(Arc::new),
        }
    }

    pub fn open(path: &Path, crypto: Option<SecretsCrypto>) -> anyhow::Result<Self> {
        Ok(Self::new(WorkerDb::new(path)?, crypto))
    }

    fn crypto(&self) -> Result<Arc<SecretsCrypto>, StoreError> {
        self.crypto.clone().ok_or_else(|| {
            backend(anyhow::anyhow!(
                "PRFORGE_MASTER_KEY is not set; credentials cannot be encrypted or decrypted"
            ))
        })
    }

    pub async fn add_post(&self, org_id: &str, post: FeedbackPost) -> Result<(), StoreError> {
        let org_id = org_id.to_string();
        self.db
            .call(move |db| db.insert_post(&org_id, &post))
            .await
            .map_err(backend)
    }

    pub async fn set_github_config(&self, org_id: &str, config: GithubConfig) -> Result<(), StoreError> {
        let org_id = org_id.to_string();
        self.db
            .call(move |db| db.upsert_github_config(&org_id, &config))
            .await
            .map_err(backend)
    }

    pub async fn set_github_token(&self, org_id: &str, token: &str) -> Result<(), StoreError> {
        self.put_secret(org_id, KIND_GITHUB_TOKEN, "", token.as_bytes())
            .await
    }

    pub async fn set_api_key(&self, org_id: &str, provider_id: &str, key: &str) -> Result<(), StoreError> {
        self.put_secret(org_id, KIND_API_KEY, provider_id, key.as_bytes())
            .await
    }

    pub async fn set_oauth_tokens(
        &self,
        org_id: &str,
        provider_id: &str,
        tokens: &OAuthTokens,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_vec(tokens)
            .context("Failed to serialize OAuth tokens")
            .map_err(backend)?;
        self.put_secret(org_id, KIND_OAUTH, provider_id, &json).await
    }

    async fn put_secret(
        &self,
        org_id: &str,
        kind: &'static str,
        provider_id: &str,
        plaintext: &[u8],
    ) -> Result<(), StoreError> {
        let (value, salt) = self
            .crypto()?
            .encrypt(plaintext)
            .map_err(|e| backend(e.into()))?;
        let sealed = SealedSecret { value, salt };
        let org_id = org_id.to_string();
        let provider_id = provider_id.to_string();
        self.db
            .call(move |db| db.upsert_secret(&org_id, kind, &provider_id, &sealed))
            .await
            .map_err(backend)
    }

    async fn get_secret(
        &self,
        org_id: &str,
        kind: &'static str,
        provider_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let org = org_id.to_string();
        let provider = provider_id.to_string();
        let sealed = self
            .db
            .call(move |db| db.get_secret(&org, kind, &provider))
            .await
            .map_err(backend)?;
        let Some(sealed) = sealed else {
            return Ok(None);
        };
        let plaintext = self
            .crypto()?
            .decrypt(&sealed.value, &sealed.salt)
            .map_err(|e| backend(e.into()))?;
        Ok(Some(plaintext))
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError> {
        let job = new.into_job();
        let row = job.clone();
        self.db
            .call(move |db| db.insert_job(&row))
            .await
            .map_err(backend)?;
        Ok(job)
    }

    async fn get_by_id(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        let id = id.clone();
        self.db
            .call(move |db| db.get_job(id.as_str()))
            .await
            .map_err(backend)
    }

    async fn update_status(
        &self,
        id: &JobId,
        status: JobStatus,
        extra: JobUpdate,
    ) -> Result<Job, StoreError> {
        let key = id.clone();
        let write = self
            .db
            .call(move |db| db.update_job_status(key.as_str(), status, &extra))
            .await
            .map_err(backend)?;
        match write {
            StatusWrite::Applied(job) => Ok(job),
            StatusWrite::NotFound => Err(StoreError::JobNotFound { id: id.clone() }),
            StatusWrite::Rejected { from } => Err(StoreError::InvalidTransition {
                id: id.clone(),
                from,
                to: status,
            }),
        }
    }

    async fn append_progress(&self, id: &JobId, message: &str) -> Result<(), StoreError> {
        let key = id.clone();
        let message = message.to_string();
        let found = self
            .db
            .call(move |db| db.append_progress(key.as_str(), &message))
            .await
            .map_err(backend)?;
        if found {
            Ok(())
        } else {
            Err(StoreError::JobNotFound { id: id.clone() })
        }
    }
}

#[async_trait]
impl FeedbackStore for SqliteStore {
    async fn get_feedback_post(&self, post_id: &str) -> Result<Option<FeedbackPost>, StoreError> {
        let post_id = post_id.to_string();
        self.db
            .call(move |db| db.get_post(&post_id))
            .await
            .map_err(backend)
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn get_github_token(&self, org_id: &str) -> Result<Option<String>, StoreError> {
        self.get_secret(org_id, KIND_GITHUB_TOKEN, "").await
    }

    async fn get_decrypted_api_key(
        &self,
        org_id: &str,
        provider_id: &str,
    ) -> Result<Option<String>, StoreError> {
        self.get_secret(org_id, KIND_API_KEY, provider_id).await
    }

    async fn get_decrypted_oauth_tokens(
        &self,
        org_id: &str,
        provider_id: &str,
    ) -> Result<Option<OAuthTokens>, StoreError> {
        match self.get_secret(org_id, KIND_OAUTH, provider_id).await? {
            Some(json) => serde_json::from_str(&json)
                .context("Stored OAuth tokens are not valid JSON")
                .map(Some)
                .map_err(backend),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RepoConfigStore for SqliteStore {
    async fn get_github_config(&self, org_id: &str) -> Result<Option<GithubConfig>, StoreError> {
        let org_id = org_id.to_string();
        self.db
            .call(move |db| db.get_github_config(&org_id))
            .await
            .map_err(backend)
    }
}
