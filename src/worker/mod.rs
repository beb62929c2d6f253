//! The job state machine.
//!
//! [`JobExecutor::execute_job`] walks one job through
//! `pending → cloning → analyzing → implementing → creating_pr → completed`,
//! persisting each status before the phase's work starts and appending a
//! progress line for every step. Any error ends the job as `failed`; an
//! external cancel is observed after every tool-call step. The working
//! checkout is removed on every exit path.

mod cancel;
mod checkout;
pub mod prompt;

pub use cancel::CancellationSignal;
pub use checkout::Checkout;

use std::sync::Arc;

use async_trait::async_trait;
use prforge_common::{
    CredentialStore, FeedbackStore, Job, JobId, JobStatus, JobStore, JobUpdate, RepoConfigStore,
    StoreError,
};
use secrecy::SecretString;

use crate::config::WorkerConfig;
use crate::errors::WorkerError;
use crate::git::github::{NewPullRequest, PullRequests};
use crate::git::{GitDriver, GitRemote, branch_name_for};
use crate::llm::{AgentRequest, AgentStep, StepControl, StepObserver, run_tool_loop};
use crate::providers::{CredentialResolver, ProviderRegistry};
use crate::tools::ToolSet;

/// How a call to [`JobExecutor::execute_job`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { pr_url: String, branch_name: String },
    Failed { error: String },
    Cancelled,
    /// The job was not `pending`; nothing was touched.
    Skipped { status: JobStatus },
}

/// The stores the executor reads and writes.
#[derive(Clone)]
pub struct Collaborators {
    pub jobs: Arc<dyn JobStore>,
    pub posts: Arc<dyn FeedbackStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub repos: Arc<dyn RepoConfigStore>,
}

impl Collaborators {
    /// Use one store for every contract.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: JobStore + FeedbackStore + CredentialStore + RepoConfigStore + 'static,
    {
        Self {
            jobs: store.clone(),
            posts: store.clone(),
            credentials: store.clone(),
            repos: store,
        }
    }
}

struct Finished {
    pr_url: String,
    branch_name: String,
}

pub struct JobExecutor {
    stores: Collaborators,
    resolver: CredentialResolver,
    git: Arc<dyn GitDriver>,
    pulls: Arc<dyn PullRequests>,
    config: WorkerConfig,
}

impl JobExecutor {
    pub fn new(
        stores: Collaborators,
        registry: Arc<ProviderRegistry>,
        git: Arc<dyn GitDriver>,
        pulls: Arc<dyn PullRequests>,
        config: WorkerConfig,
    ) -> Self {
        let resolver = CredentialResolver::new(registry, stores.credentials.clone());
        Self {
            stores,
            resolver,
            git,
            pulls,
            config,
        }
    }

    /// Run one job to a terminal state.
    ///
    /// Only a missing job or a store failure before the run starts is an
    /// `Err`; everything after that is folded into the returned outcome
    /// and the job record.
    pub async fn execute_job(&self, job_id: &JobId) -> Result<JobOutcome, StoreError> {
        let job = self
            .stores
            .jobs
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| StoreError::JobNotFound { id: job_id.clone() })?;

        if job.status != JobStatus::Pending {
            tracing::info!(job_id = %job_id, status = %job.status, "job is not pending; skipping");
            return Ok(JobOutcome::Skipped { status: job.status });
        }
        match self
            .stores
            .jobs
            .update_status(job_id, JobStatus::Cloning, JobUpdate::default())
            .await
        {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { from, .. }) => {
                return Ok(JobOutcome::Skipped { status: from });
            }
            Err(e) => return Err(e),
        }

        let checkout = Checkout::for_job(&self.config.work_dir, job_id);
        let result = self.run_phases(&job, &checkout).await;

        if let Err(e) = checkout.remove().await {
            tracing::warn!(job_id = %job_id, error = %e, "failed to remove working checkout");
        }

        let outcome = match result {
            Ok(finished) => self.complete(job_id, finished).await,
            Err(WorkerError::Cancelled) => {
                self.progress(job_id, "Job cancelled").await;
                JobOutcome::Cancelled
            }
            Err(e) => self.fail(job_id, e.to_string()).await,
        };
        Ok(outcome)
    }

    async fn run_phases(&self, job: &Job, checkout: &Checkout) -> Result<Finished, WorkerError> {
        let id = &job.id;
        let org = job.organization_id.as_str();

        // ── cloning ──
        let post = self
            .stores
            .posts
            .get_feedback_post(&job.post_id)
            .await?
            .ok_or_else(|| WorkerError::config(format!("Feedback post {} not found", job.post_id)))?;
        let token = self
            .stores
            .credentials
            .get_github_token(org)
            .await?
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| WorkerError::config("GitHub token not configured"))?;
        let model = self.resolver.resolve(org, &job.provider_id).await?;
        let repo = self
            .stores
            .repos
            .get_github_config(org)
            .await?
            .ok_or_else(|| WorkerError::config("GitHub repository not configured"))?;

        let remote = GitRemote::github(&self.config.git_host, &repo.repo_full_name, token.clone())?;
        self.progress(
            id,
            &format!("Cloning {} ({})", repo.repo_full_name, repo.default_branch),
        )
        .await;
        self.git
            .clone_repo(&remote, &repo.default_branch, checkout.path())
            .await?;
        let branch = branch_name_for(&post.title);
        self.git.create_branch(checkout.path(), &branch).await?;
        self.progress(id, &format!("Created branch {}", branch)).await;

        // ── analyzing ──
        self.advance(id, JobStatus::Analyzing, JobUpdate::branch(&branch))
            .await?;
        self.progress(id, "Analyzing codebase").await;

        // ── implementing ──
        self.advance(id, JobStatus::Implementing, JobUpdate::default())
            .await?;
        self.progress(
            id,
            &format!(
                "Running AI agent ({} / {})",
                model.provider_id,
                model.model.model_name()
            ),
        )
        .await;
        let tools = ToolSet::for_checkout(checkout.path(), &self.config.tools)?;
        let signal = CancellationSignal::new(self.stores.jobs.clone(), id.clone());
        let observer = ProgressObserver {
            executor: self,
            job_id: id,
            signal: &signal,
        };
        let request = AgentRequest {
            system: prompt::SYSTEM_PROMPT.to_string(),
            prompt: prompt::build_task_prompt(&post, job.additional_context.as_deref()),
            max_steps: self.config.max_steps,
            max_tokens: model.max_tokens,
        };
        let transcript = run_tool_loop(model.model.as_ref(), &tools, request, &observer).await?;
        if transcript.stopped || signal.is_cancelled().await {
            return Err(WorkerError::Cancelled);
        }
        self.progress(
            id,
            &format!(
                "Agent finished after {} steps ({} tool calls)",
                transcript.steps.len(),
                transcript.tool_calls()
            ),
        )
        .await;
        if transcript.hit_step_limit {
            self.progress(
                id,
                &format!("Agent stopped at the {}-step limit", self.config.max_steps),
            )
            .await;
        }

        // ── creating_pr ──
        self.advance(id, JobStatus::CreatingPr, JobUpdate::default())
            .await?;
        let dir = checkout.path();
        self.git
            .configure_identity(dir, &self.config.commit_name, &self.config.commit_email)
            .await?;
        if self.git.has_uncommitted_changes(dir).await? {
            self.git
                .commit_all(dir, &prompt::commit_message(&post))
                .await?;
            self.progress(id, "Committed changes").await;
        } else if !self.git.has_diverged(dir, &repo.default_branch).await? {
            return Err(WorkerError::NoChanges);
        }
        self.progress(id, &format!("Pushing branch {}", branch)).await;
        self.git.push(dir, &remote, &branch).await?;

        let pr = self
            .pulls
            .create_pull_request(
                &token,
                &repo.repo_full_name,
                &NewPullRequest {
                    title: prompt::pull_request_title(&post),
                    body: prompt::pull_request_body(
                        &post,
                        job.additional_context.as_deref(),
                        &model.provider_id,
                    ),
                    head: branch.clone(),
                    base: repo.default_branch.clone(),
                },
            )
            .await?;
        self.progress(id, &format!("Pull request created: {}", pr.html_url))
            .await;

        Ok(Finished {
            pr_url: pr.html_url,
            branch_name: branch,
        })
    }

    /// Persist a phase transition. A write rejected because the job was
    /// cancelled meanwhile becomes [`WorkerError::Cancelled`].
    async fn advance(&self, id: &JobId, status: JobStatus, update: JobUpdate) -> Result<(), WorkerError> {
        match self.stores.jobs.update_status(id, status, update).await {
            Ok(_) => Ok(()),
            Err(StoreError::InvalidTransition {
                from: JobStatus::Cancelled,
                ..
            }) => Err(WorkerError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    async fn complete(&self, id: &JobId, finished: Finished) -> JobOutcome {
        let update = JobUpdate::completed(&finished.pr_url, &finished.branch_name);
        match self
            .stores
            .jobs
            .update_status(id, JobStatus::Completed, update)
            .await
        {
            Ok(_) => {
                tracing::info!(job_id = %id, pr_url = %finished.pr_url, "job completed");
                JobOutcome::Completed {
                    pr_url: finished.pr_url,
                    branch_name: finished.branch_name,
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "completed status was not recorded");
                self.progress(
                    id,
                    &format!(
                        "Pull request {} was created after the job was cancelled",
                        finished.pr_url
                    ),
                )
                .await;
                self.terminal_outcome(id).await
            }
        }
    }

    /// The status write goes first: a job cancelled meanwhile keeps its
    /// `cancelled` record and is never logged as failed.
    async fn fail(&self, id: &JobId, error: String) -> JobOutcome {
        match self
            .stores
            .jobs
            .update_status(id, JobStatus::Failed, JobUpdate::error(&error))
            .await
        {
            Ok(_) => {
                tracing::warn!(job_id = %id, error = %error, "job failed");
                self.progress(id, &format!("Job failed: {}", error)).await;
                JobOutcome::Failed { error }
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "failed status was not recorded");
                let outcome = self.terminal_outcome(id).await;
                if matches!(outcome, JobOutcome::Cancelled) {
                    self.progress(id, "Job cancelled").await;
                }
                outcome
            }
        }
    }

    /// Outcome matching whatever terminal status the record already holds.
    async fn terminal_outcome(&self, id: &JobId) -> JobOutcome {
        match self.stores.jobs.get_by_id(id).await {
            Ok(Some(job)) if job.status == JobStatus::Cancelled => JobOutcome::Cancelled,
            Ok(Some(job)) => JobOutcome::Failed {
                error: job
                    .error_message
                    .unwrap_or_else(|| format!("Job ended in status {}", job.status)),
            },
            Ok(None) => JobOutcome::Failed {
                error: format!("Job {} not found", id),
            },
            Err(e) => JobOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    /// Append a progress line and mirror it to the log. Progress is
    /// best-effort: a failed append never fails the job.
    async fn progress(&self, id: &JobId, message: &str) {
        tracing::info!(job_id = %id, "{}", message);
        if let Err(e) = self.stores.jobs.append_progress(id, message).await {
            tracing::warn!(job_id = %id, error = %e, "failed to append progress");
        }
    }
}

/// Logs every tool call and checks for cancellation between steps.
struct ProgressObserver<'a> {
    executor: &'a JobExecutor,
    job_id: &'a JobId,
    signal: &'a CancellationSignal,
}

#[async_trait]
impl StepObserver for ProgressObserver<'_> {
    async fn on_step(&self, step: &AgentStep) -> StepControl {
        for invocation in &step.invocations {
            self.executor
                .progress(self.job_id, &format!("Used tool: {}", invocation.name))
                .await;
        }
        if self.signal.is_cancelled().await {
            tracing::info!(job_id = %self.job_id, step = step.index, "cancellation observed");
            StepControl::Stop
        } else {
            StepControl::Continue
        }
    }
}
