use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use prforge_common::{
    FeedbackPost, GithubConfig, Job, JobId, JobStatus, JobUpdate, ProgressEntry,
};
use rusqlite::{Connection, OptionalExtension, params};

/// Async-safe handle to the worker database.
///
/// All access runs on tokio's blocking pool so SQLite I/O never stalls the
/// async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<WorkerDb>>,
}

impl DbHandle {
    pub fn new(db: WorkerDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run `f` against the database on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut WorkerDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&mut guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// Outcome of a conditional status write.
#[derive(Debug)]
pub enum StatusWrite {
    Applied(Job),
    NotFound,
    Rejected { from: JobStatus },
}

/// A stored credential row, still encrypted.
pub struct SealedSecret {
    pub value: Vec<u8>,
    pub salt: Vec<u8>,
}

pub struct WorkerDb {
    conn: Connection,
}

impl WorkerDb {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    organization_id TEXT NOT NULL,
                    post_id TEXT NOT NULL,
                    provider_id TEXT NOT NULL,
                    additional_context TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    branch_name TEXT,
                    pr_url TEXT,
                    error_message TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS job_progress (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                    message TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS feedback_posts (
                    id TEXT PRIMARY KEY,
                    organization_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS github_configs (
                    organization_id TEXT PRIMARY KEY,
                    repo_full_name TEXT NOT NULL,
                    default_branch TEXT NOT NULL DEFAULT 'main'
                );

                CREATE TABLE IF NOT EXISTS credentials (
                    organization_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    provider_id TEXT NOT NULL DEFAULT '',
                    value BLOB NOT NULL,
                    salt BLOB NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (organization_id, kind, provider_id)
                );

                CREATE INDEX IF NOT EXISTS idx_job_progress_job ON job_progress(job_id);
                ",
            )
            .context("Failed to run migrations")?;
        Ok(())
    }

    // ── Jobs ──────────────────────────────────────────────────────────

    pub fn insert_job(&self, job: &Job) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO jobs (id, organization_id, post_id, provider_id, additional_context, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    job.id.as_str(),
                    job.organization_id,
                    job.post_id,
                    job.provider_id,
                    job.additional_context,
                    job.status.as_str(),
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to insert job")?;
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, organization_id, post_id, provider_id, additional_context, status,
                        branch_name, pr_url, error_message, created_at, updated_at
                 FROM jobs WHERE id = ?1",
                params![id],
                |row| {
                    Ok(JobRow {
                        id: row.get(0)?,
                        organization_id: row.get(1)?,
                        post_id: row.get(2)?,
                        provider_id: row.get(3)?,
                        additional_context: row.get(4)?,
                        status: row.get(5)?,
                        branch_name: row.get(6)?,
                        pr_url: row.get(7)?,
                        error_message: row.get(8)?,
                        created_at: row.get(9)?,
                        updated_at: row.get(10)?,
                    })
                },
            )
            .optional()
            .context("Failed to query job")?;
        match row {
            Some(row) => {
                let progress = self.list_progress(id)?;
                Ok(Some(row.into_job(progress)?))
            }
            None => Ok(None),
        }
    }

    fn list_progress(&self, job_id: &str) -> Result<Vec<ProgressEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT message, created_at FROM job_progress WHERE job_id = ?1 ORDER BY id")
            .context("Failed to prepare list_progress")?;
        let rows = stmt
            .query_map(params![job_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("Failed to query progress")?;
        let mut entries = Vec::new();
        for row in rows {
            let (message, at) = row.context("Failed to read progress row")?;
            entries.push(ProgressEntry {
                at: parse_time(&at)?,
                message,
            });
        }
        Ok(entries)
    }

    /// Write `status` only if it is an edge from the stored status. The
    /// check and the write happen in one transaction, and the UPDATE is
    /// conditioned on the observed status.
    pub fn update_job_status(
        &mut self,
        id: &str,
        status: JobStatus,
        extra: &JobUpdate,
    ) -> Result<StatusWrite> {
        let tx = self.conn.transaction().context("Failed to begin transaction")?;
        let current: Option<String> = tx
            .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .context("Failed to read job status")?;
        let Some(current) = current else {
            return Ok(StatusWrite::NotFound);
        };
        let from = JobStatus::from_str(&current).map_err(|e| anyhow::anyhow!(e))?;
        if !from.can_transition_to(status) {
            return Ok(StatusWrite::Rejected { from });
        }

        let changed = tx
            .execute(
                "UPDATE jobs SET status = ?1,
                        branch_name = COALESCE(?2, branch_name),
                        pr_url = COALESCE(?3, pr_url),
                        error_message = COALESCE(?4, error_message),
                        updated_at = ?5
                 WHERE id = ?6 AND status = ?7",
                params![
                    status.as_str(),
                    extra.branch_name,
                    extra.pr_url,
                    extra.error_message,
                    Utc::now().to_rfc3339(),
                    id,
                    current,
                ],
            )
            .context("Failed to update job status")?;
        if changed != 1 {
            return Ok(StatusWrite::Rejected { from });
        }
        tx.commit().context("Failed to commit status update")?;

        self.get_job(id)?
            .map(StatusWrite::Applied)
            .context("Job not found after status update")
    }

    /// Returns false when the job does not exist.
    pub fn append_progress(&self, job_id: &str, message: &str) -> Result<bool> {
        let exists: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
                params![job_id],
                |row| row.get(0),
            )
            .context("Failed to check job")?;
        if !exists {
            return Ok(false);
        }
        self.conn
            .execute(
                "INSERT INTO job_progress (job_id, message, created_at) VALUES (?1, ?2, ?3)",
                params![job_id, message, Utc::now().to_rfc3339()],
            )
            .context("Failed to insert progress")?;
        Ok(true)
    }

    // ── Feedback posts ────────────────────────────────────────────────

    pub fn insert_post(&self, org_id: &str, post: &FeedbackPost) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO feedback_posts (id, organization_id, title, description) VALUES (?1, ?2, ?3, ?4)",
                params![post.id, org_id, post.title, post.description],
            )
            .context("Failed to insert feedback post")?;
        Ok(())
    }

    pub fn get_post(&self, id: &str) -> Result<Option<FeedbackPost>> {
        self.conn
            .query_row(
                "SELECT id, title, description FROM feedback_posts WHERE id = ?1",
                params![id],
                |row| {
                    Ok(FeedbackPost {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query feedback post")
    }

    // ── Repository settings ───────────────────────────────────────────

    pub fn upsert_github_config(&self, org_id: &str, config: &GithubConfig) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO github_configs (organization_id, repo_full_name, default_branch) VALUES (?1, ?2, ?3)
                 ON CONFLICT(organization_id) DO UPDATE SET repo_full_name = excluded.repo_full_name, default_branch = excluded.default_branch",
                params![org_id, config.repo_full_name, config.default_branch],
            )
            .context("Failed to save GitHub config")?;
        Ok(())
    }

    pub fn get_github_config(&self, org_id: &str) -> Result<Option<GithubConfig>> {
        self.conn
            .query_row(
                "SELECT repo_full_name, default_branch FROM github_configs WHERE organization_id = ?1",
                params![org_id],
                |row| {
                    Ok(GithubConfig {
                        repo_full_name: row.get(0)?,
                        default_branch: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to query GitHub config")
    }

    // ── Credentials ───────────────────────────────────────────────────

    pub fn upsert_secret(
        &self,
        org_id: &str,
        kind: &str,
        provider_id: &str,
        sealed: &SealedSecret,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO credentials (organization_id, kind, provider_id, value, salt, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(organization_id, kind, provider_id) DO UPDATE SET value = excluded.value, salt = excluded.salt, updated_at = excluded.updated_at",
                params![
                    org_id,
                    kind,
                    provider_id,
                    sealed.value,
                    sealed.salt,
                    Utc::now().to_rfc3339()
                ],
            )
            .context("Failed to save credential")?;
        Ok(())
    }

    pub fn get_secret(&self, org_id: &str, kind: &str, provider_id: &str) -> Result<Option<SealedSecret>> {
        self.conn
            .query_row(
                "SELECT value, salt FROM credentials WHERE organization_id = ?1 AND kind = ?2 AND provider_id = ?3",
                params![org_id, kind, provider_id],
                |row| {
                    Ok(SealedSecret {
                        value: row.get(0)?,
                        salt: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to query credential")
    }
}

struct JobRow {
    id: String,
    organization_id: String,
    post_id: String,
    provider_id: String,
    additional_context: Option<String>,
    status: String,
    branch_name: Option<String>,
    pr_url: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn into_job(self, progress: Vec<ProgressEntry>) -> Result<Job> {
        Ok(Job {
            id: JobId::from(self.id),
            organization_id: self.organization_id,
            post_id: self.post_id,
            provider_id: self.provider_id,
            additional_context: self.additional_context,
            status: JobStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?,
            branch_name: self.branch_name,
            pr_url: self.pr_url,
            error_message: self.error_message,
            progress,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp: {}", value))?
        .with_timezone(&Utc))
}
