//! End-to-end runs of the job state machine against in-memory stores, a
//! fake git driver, a fake pull-request client and scripted models.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use prforge::config::WorkerConfig;
use prforge::errors::{GitError, GithubError, LlmError, ProviderError};
use prforge::git::github::{NewPullRequest, PullRequest, PullRequests};
use prforge::git::{GitDriver, GitRemote};
use prforge::llm::{
    FinishReason, LanguageModel, ToolCall, ToolCompletionRequest, ToolCompletionResponse,
};
use prforge::providers::{Credential, Provider, ProviderRegistry};
use prforge::worker::{Collaborators, JobExecutor, JobOutcome};
use prforge_common::{
    AuthType, FeedbackPost, GithubConfig, JobId, JobStatus, JobStore, MemoryStore, NewJob,
};
use secrecy::SecretString;
use serde_json::json;

const ORG: &str = "org-1";

// ── fakes ──────────────────────────────────────────────────────────

#[derive(Default)]
struct GitLog {
    cloned: Vec<(String, String)>,
    branches: Vec<String>,
    commits: Vec<String>,
    pushed: Vec<String>,
}

/// Clones by writing a README; "dirty" means the checkout differs from that.
#[derive(Default)]
struct FakeGit {
    log: Mutex<GitLog>,
    /// Pretend the agent committed its own work.
    diverged: bool,
}

const README: &str = "# app\n";

#[async_trait]
impl GitDriver for FakeGit {
    async fn clone_repo(&self, remote: &GitRemote, base_branch: &str, dest: &Path) -> Result<(), GitError> {
        std::fs::create_dir_all(dest)?;
        std::fs::write(dest.join("README.md"), README)?;
        self.log
            .lock()
            .unwrap()
            .cloned
            .push((remote.public_url().to_string(), base_branch.to_string()));
        Ok(())
    }

    async fn create_branch(&self, _repo: &Path, branch: &str) -> Result<(), GitError> {
        self.log.lock().unwrap().branches.push(branch.to_string());
        Ok(())
    }

    async fn configure_identity(&self, _repo: &Path, _name: &str, _email: &str) -> Result<(), GitError> {
        Ok(())
    }

    async fn has_uncommitted_changes(&self, repo: &Path) -> Result<bool, GitError> {
        let entries = std::fs::read_dir(repo)?.count();
        let readme = std::fs::read_to_string(repo.join("README.md")).unwrap_or_default();
        Ok(entries != 1 || readme != README)
    }

    async fn commit_all(&self, _repo: &Path, message: &str) -> Result<(), GitError> {
        self.log.lock().unwrap().commits.push(message.to_string());
        Ok(())
    }

    async fn has_diverged(&self, _repo: &Path, _base_branch: &str) -> Result<bool, GitError> {
        Ok(self.diverged || !self.log.lock().unwrap().commits.is_empty())
    }

    async fn push(&self, _repo: &Path, _remote: &GitRemote, branch: &str) -> Result<(), GitError> {
        self.log.lock().unwrap().pushed.push(branch.to_string());
        Ok(())
    }
}

enum PullBehavior {
    Succeed,
    Reject,
    CancelFirst(Arc<MemoryStore>, JobId),
    CancelThenReject(Arc<MemoryStore>, JobId),
}

struct FakePulls {
    behavior: PullBehavior,
    requests: Mutex<Vec<(String, NewPullRequest)>>,
}

impl FakePulls {
    fn new(behavior: PullBehavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PullRequests for FakePulls {
    async fn create_pull_request(
        &self,
        _token: &SecretString,
        repo_full_name: &str,
        pr: &NewPullRequest,
    ) -> Result<PullRequest, GithubError> {
        self.requests
            .lock()
            .unwrap()
            .push((repo_full_name.to_string(), pr.clone()));
        match &self.behavior {
            PullBehavior::Reject => Err(GithubError::Api {
                status: 422,
                message: "Validation Failed".into(),
            }),
            PullBehavior::CancelFirst(store, id) => {
                store.cancel(id).await.unwrap();
                Ok(pull(repo_full_name))
            }
            PullBehavior::CancelThenReject(store, id) => {
                store.cancel(id).await.unwrap();
                Err(GithubError::Api {
                    status: 422,
                    message: "Validation Failed".into(),
                })
            }
            PullBehavior::Succeed => Ok(pull(repo_full_name)),
        }
    }
}

fn pull(repo_full_name: &str) -> PullRequest {
    PullRequest {
        html_url: format!("https://github.com/{}/pull/1", repo_full_name),
        number: 1,
    }
}

/// Replays canned responses; optionally cancels the job on the n-th request.
struct ScriptedModel {
    responses: Mutex<VecDeque<ToolCompletionResponse>>,
    requests: Mutex<usize>,
    cancel_on: Option<(usize, Arc<MemoryStore>, JobId)>,
}

impl ScriptedModel {
    fn new(responses: Vec<ToolCompletionResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(0),
            cancel_on: None,
        }
    }

    fn request_count(&self) -> usize {
        *self.requests.lock().unwrap()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete_with_tools(
        &self,
        _request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let n = {
            let mut count = self.requests.lock().unwrap();
            *count += 1;
            *count
        };
        if let Some((at, store, id)) = &self.cancel_on {
            if n == *at {
                store.cancel(id).await.unwrap();
            }
        }
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| text("Done.")))
    }
}

struct ScriptedProvider {
    model: Arc<ScriptedModel>,
}

impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn auth_type(&self) -> AuthType {
        AuthType::ApiKey
    }

    fn create_model(&self, credential: Credential) -> Result<Arc<dyn LanguageModel>, ProviderError> {
        assert_eq!(credential.auth_type(), AuthType::ApiKey);
        Ok(self.model.clone())
    }
}

fn tool(name: &str, arguments: serde_json::Value) -> ToolCompletionResponse {
    ToolCompletionResponse {
        content: None,
        tool_calls: vec![ToolCall {
            id: format!("call_{name}"),
            name: name.to_string(),
            arguments,
        }],
        finish_reason: FinishReason::ToolUse,
        input_tokens: 100,
        output_tokens: 20,
    }
}

fn text(content: &str) -> ToolCompletionResponse {
    ToolCompletionResponse {
        content: Some(content.to_string()),
        tool_calls: Vec::new(),
        finish_reason: FinishReason::Stop,
        input_tokens: 100,
        output_tokens: 20,
    }
}

// ── harness ────────────────────────────────────────────────────────

struct Harness {
    store: Arc<MemoryStore>,
    job_id: JobId,
    work_dir: tempfile::TempDir,
}

impl Harness {
    /// Org with a post, a GitHub token, an Anthropic key and a repo config.
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        store.insert_post(FeedbackPost {
            id: "post-1".into(),
            title: "Add dark mode toggle".into(),
            description: "Users want to switch to a dark theme.".into(),
        });
        store.set_github_token(ORG, "ghs_test_token");
        store.set_api_key(ORG, "anthropic", "sk-ant-test");
        store.set_github_config(
            ORG,
            GithubConfig {
                repo_full_name: "acme/app".into(),
                default_branch: "main".into(),
            },
        );
        let job = store
            .create_job(NewJob {
                organization_id: ORG.into(),
                post_id: "post-1".into(),
                provider_id: "anthropic".into(),
                additional_context: Some("Persist the choice in localStorage".into()),
            })
            .await
            .unwrap();
        Self {
            store,
            job_id: job.id,
            work_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn config(&self) -> WorkerConfig {
        WorkerConfig {
            work_dir: self.work_dir.path().to_path_buf(),
            ..WorkerConfig::default()
        }
    }

    fn executor_with_registry(
        &self,
        registry: ProviderRegistry,
        git: Arc<FakeGit>,
        pulls: Arc<FakePulls>,
    ) -> JobExecutor {
        JobExecutor::new(
            Collaborators::from_store(self.store.clone()),
            Arc::new(registry),
            git,
            pulls,
            self.config(),
        )
    }

    fn executor(&self, model: Arc<ScriptedModel>, git: Arc<FakeGit>, pulls: Arc<FakePulls>) -> JobExecutor {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider { model }));
        self.executor_with_registry(registry, git, pulls)
    }

    fn checkout_path(&self) -> PathBuf {
        self.work_dir.path().join(self.job_id.as_str())
    }

    async fn progress(&self) -> Vec<String> {
        self.store
            .get_by_id(&self.job_id)
            .await
            .unwrap()
            .unwrap()
            .progress
            .into_iter()
            .map(|p| p.message)
            .collect()
    }
}

const HAPPY_PATH: [JobStatus; 6] = [
    JobStatus::Pending,
    JobStatus::Cloning,
    JobStatus::Analyzing,
    JobStatus::Implementing,
    JobStatus::CreatingPr,
    JobStatus::Completed,
];

/// A truncated happy-path prefix, optionally followed by `failed` or `cancelled`.
fn is_valid_history(history: &[JobStatus]) -> bool {
    let rest = match history.split_last() {
        Some((last, rest)) if matches!(last, JobStatus::Failed | JobStatus::Cancelled) => rest,
        _ => history,
    };
    !rest.is_empty() && rest.len() <= HAPPY_PATH.len() && rest == &HAPPY_PATH[..rest.len()]
}

// ── scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn feedback_post_becomes_pull_request() {
    let h = Harness::new().await;
    let model = Arc::new(ScriptedModel::new(vec![
        tool("list_directory", json!({})),
        tool(
            "write",
            json!({"path": "src/theme.css", "content": ":root { --bg: #111; }\n"}),
        ),
        text("Added a dark theme stylesheet."),
    ]));
    let git = Arc::new(FakeGit::default());
    let pulls = Arc::new(FakePulls::new(PullBehavior::Succeed));

    let outcome = h
        .executor(model.clone(), git.clone(), pulls.clone())
        .execute_job(&h.job_id)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Completed {
            pr_url: "https://github.com/acme/app/pull/1".into(),
            branch_name: "ai/add-dark-mode-toggle".into(),
        }
    );
    let job = h.store.get_by_id(&h.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.branch_name.as_deref(), Some("ai/add-dark-mode-toggle"));
    assert!(job.pr_url.unwrap().starts_with("https://github.com/acme/app/pull/"));
    assert!(job.error_message.is_none());
    assert_eq!(h.store.status_history(&h.job_id), HAPPY_PATH.to_vec());
    assert!(!h.checkout_path().exists());
    assert_eq!(model.request_count(), 3);

    let progress = h.progress().await;
    assert!(progress.contains(&"Used tool: list_directory".to_string()));
    assert!(progress.contains(&"Used tool: write".to_string()));
    assert!(progress.iter().any(|p| p.contains("Pull request created")));

    let log = git.log.lock().unwrap();
    assert_eq!(
        log.cloned,
        vec![("https://github.com/acme/app.git".to_string(), "main".to_string())]
    );
    assert_eq!(log.branches, vec!["ai/add-dark-mode-toggle".to_string()]);
    assert_eq!(log.commits.len(), 1);
    assert_eq!(log.pushed, vec!["ai/add-dark-mode-toggle".to_string()]);

    let requests = pulls.requests.lock().unwrap();
    let (repo, pr) = &requests[0];
    assert_eq!(repo, "acme/app");
    assert_eq!(pr.head, "ai/add-dark-mode-toggle");
    assert_eq!(pr.base, "main");
    assert!(pr.body.contains("Users want to switch to a dark theme."));
    assert!(pr.body.contains("Persist the choice in localStorage"));
}

#[tokio::test]
async fn missing_github_token_fails_without_leaving_a_checkout() {
    let h = Harness::new().await;
    h.store.set_github_token(ORG, "");
    let git = Arc::new(FakeGit::default());
    let model = Arc::new(ScriptedModel::new(Vec::new()));

    let outcome = h
        .executor(model.clone(), git.clone(), Arc::new(FakePulls::new(PullBehavior::Succeed)))
        .execute_job(&h.job_id)
        .await
        .unwrap();

    match outcome {
        JobOutcome::Failed { error } => assert!(error.contains("GitHub token not configured")),
        other => panic!("expected Failed, got {other:?}"),
    }
    let job = h.store.get_by_id(&h.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("GitHub token not configured"));
    assert_eq!(
        h.store.status_history(&h.job_id),
        vec![JobStatus::Pending, JobStatus::Cloning, JobStatus::Failed]
    );
    assert!(!h.checkout_path().exists());
    assert!(git.log.lock().unwrap().cloned.is_empty());
    assert_eq!(model.request_count(), 0);
    assert!(
        h.progress()
            .await
            .contains(&"Job failed: GitHub token not configured".to_string())
    );
}

#[tokio::test]
async fn missing_provider_key_is_a_labelled_configuration_error() {
    let h = Harness::new().await;
    // Same org setup, but no Anthropic key and the real provider registry.
    let store = Arc::new(MemoryStore::new());
    store.insert_post(FeedbackPost {
        id: "post-1".into(),
        title: "Add dark mode toggle".into(),
        description: String::new(),
    });
    store.set_github_token(ORG, "ghs_test_token");
    let job = store
        .create_job(NewJob {
            organization_id: ORG.into(),
            post_id: "post-1".into(),
            provider_id: "anthropic".into(),
            additional_context: None,
        })
        .await
        .unwrap();

    let executor = JobExecutor::new(
        Collaborators::from_store(store.clone()),
        Arc::new(ProviderRegistry::with_defaults(&h.config())),
        Arc::new(FakeGit::default()),
        Arc::new(FakePulls::new(PullBehavior::Succeed)),
        h.config(),
    );
    let outcome = executor.execute_job(&job.id).await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Failed {
            error: "API key for provider anthropic not configured".into()
        }
    );
}

#[tokio::test]
async fn unknown_provider_fails_the_job() {
    let h = Harness::new().await;
    let job = h
        .store
        .create_job(NewJob {
            organization_id: ORG.into(),
            post_id: "post-1".into(),
            provider_id: "gemini".into(),
            additional_context: None,
        })
        .await
        .unwrap();
    let executor = h.executor(
        Arc::new(ScriptedModel::new(Vec::new())),
        Arc::new(FakeGit::default()),
        Arc::new(FakePulls::new(PullBehavior::Succeed)),
    );
    let outcome = executor.execute_job(&job.id).await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Failed {
            error: "Unknown AI provider: gemini".into()
        }
    );
}

#[tokio::test]
async fn agent_that_changes_nothing_fails() {
    let h = Harness::new().await;
    let model = Arc::new(ScriptedModel::new(vec![
        tool("read", json!({"path": "README.md"})),
        text("Nothing to do."),
    ]));
    let git = Arc::new(FakeGit::default());

    let outcome = h
        .executor(model, git.clone(), Arc::new(FakePulls::new(PullBehavior::Succeed)))
        .execute_job(&h.job_id)
        .await
        .unwrap();

    match outcome {
        JobOutcome::Failed { error } => assert!(error.contains("no changes")),
        other => panic!("expected Failed, got {other:?}"),
    }
    let history = h.store.status_history(&h.job_id);
    assert_eq!(history.last(), Some(&JobStatus::Failed));
    assert!(is_valid_history(&history));
    assert!(git.log.lock().unwrap().pushed.is_empty());
    assert!(!h.checkout_path().exists());
}

#[tokio::test]
async fn agent_commits_are_pushed_without_another_commit() {
    let h = Harness::new().await;
    let git = Arc::new(FakeGit {
        diverged: true,
        ..FakeGit::default()
    });
    let outcome = h
        .executor(
            Arc::new(ScriptedModel::new(vec![text("Committed already.")])),
            git.clone(),
            Arc::new(FakePulls::new(PullBehavior::Succeed)),
        )
        .execute_job(&h.job_id)
        .await
        .unwrap();

    assert!(matches!(outcome, JobOutcome::Completed { .. }));
    let log = git.log.lock().unwrap();
    assert!(log.commits.is_empty());
    assert_eq!(log.pushed.len(), 1);
}

#[tokio::test]
async fn cancel_during_implementing_stops_the_loop() {
    let h = Harness::new().await;
    let mut model = ScriptedModel::new(
        (0..20)
            .map(|_| tool("list_directory", json!({})))
            .collect(),
    );
    model.cancel_on = Some((2, h.store.clone(), h.job_id.clone()));
    let model = Arc::new(model);
    let git = Arc::new(FakeGit::default());
    let pulls = Arc::new(FakePulls::new(PullBehavior::Succeed));

    let outcome = h
        .executor(model.clone(), git.clone(), pulls.clone())
        .execute_job(&h.job_id)
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Cancelled);
    // Cancelled during request 2; observed right after step 2.
    assert_eq!(model.request_count(), 2);
    let job = h.store.get_by_id(&h.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.error_message.is_none());
    assert_eq!(
        h.store.status_history(&h.job_id),
        vec![
            JobStatus::Pending,
            JobStatus::Cloning,
            JobStatus::Analyzing,
            JobStatus::Implementing,
            JobStatus::Cancelled,
        ]
    );
    assert_eq!(h.progress().await.last().map(String::as_str), Some("Job cancelled"));
    assert!(!h.checkout_path().exists());
    assert!(git.log.lock().unwrap().pushed.is_empty());
    assert!(pulls.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn pull_request_rejection_fails_with_github_message() {
    let h = Harness::new().await;
    let git = Arc::new(FakeGit::default());
    let outcome = h
        .executor(
            Arc::new(ScriptedModel::new(vec![
                tool("write", json!({"path": "a.txt", "content": "x\n"})),
                text("ok"),
            ])),
            git.clone(),
            Arc::new(FakePulls::new(PullBehavior::Reject)),
        )
        .execute_job(&h.job_id)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Failed {
            error: "Failed to create pull request (422): Validation Failed".into()
        }
    );
    // The pushed branch is left in place.
    assert_eq!(git.log.lock().unwrap().pushed.len(), 1);
    assert!(is_valid_history(&h.store.status_history(&h.job_id)));
}

#[tokio::test]
async fn cancel_during_pr_creation_keeps_cancelled_status() {
    let h = Harness::new().await;
    let pulls = Arc::new(FakePulls::new(PullBehavior::CancelFirst(
        h.store.clone(),
        h.job_id.clone(),
    )));
    let outcome = h
        .executor(
            Arc::new(ScriptedModel::new(vec![
                tool("write", json!({"path": "a.txt", "content": "x\n"})),
                text("ok"),
            ])),
            Arc::new(FakeGit::default()),
            pulls,
        )
        .execute_job(&h.job_id)
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Cancelled);
    let job = h.store.get_by_id(&h.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.pr_url.is_none());
    assert!(
        h.progress()
            .await
            .iter()
            .any(|p| p.contains("https://github.com/acme/app/pull/1"))
    );
}

#[tokio::test]
async fn error_after_cancel_is_not_logged_as_failure() {
    let h = Harness::new().await;
    let pulls = Arc::new(FakePulls::new(PullBehavior::CancelThenReject(
        h.store.clone(),
        h.job_id.clone(),
    )));
    let outcome = h
        .executor(
            Arc::new(ScriptedModel::new(vec![
                tool("write", json!({"path": "a.txt", "content": "x\n"})),
                text("ok"),
            ])),
            Arc::new(FakeGit::default()),
            pulls,
        )
        .execute_job(&h.job_id)
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Cancelled);
    let job = h.store.get_by_id(&h.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.error_message.is_none());

    let progress = h.progress().await;
    assert!(!progress.iter().any(|p| p.starts_with("Job failed")));
    assert_eq!(progress.last().map(String::as_str), Some("Job cancelled"));
    assert!(!h.checkout_path().exists());
}

#[tokio::test]
async fn job_that_is_not_pending_is_skipped() {
    let h = Harness::new().await;
    let git = Arc::new(FakeGit::default());
    let executor = h.executor(
        Arc::new(ScriptedModel::new(vec![
            tool("write", json!({"path": "a.txt", "content": "x\n"})),
            text("ok"),
        ])),
        git.clone(),
        Arc::new(FakePulls::new(PullBehavior::Succeed)),
    );
    assert!(matches!(
        executor.execute_job(&h.job_id).await.unwrap(),
        JobOutcome::Completed { .. }
    ));
    let before = h.progress().await.len();

    assert_eq!(
        executor.execute_job(&h.job_id).await.unwrap(),
        JobOutcome::Skipped {
            status: JobStatus::Completed
        }
    );
    assert_eq!(h.progress().await.len(), before);
    assert_eq!(git.log.lock().unwrap().cloned.len(), 1);
}

#[tokio::test]
async fn cancelled_before_start_is_skipped() {
    let h = Harness::new().await;
    h.store.cancel(&h.job_id).await.unwrap();
    let outcome = h
        .executor(
            Arc::new(ScriptedModel::new(Vec::new())),
            Arc::new(FakeGit::default()),
            Arc::new(FakePulls::new(PullBehavior::Succeed)),
        )
        .execute_job(&h.job_id)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Skipped {
            status: JobStatus::Cancelled
        }
    );
}

#[tokio::test]
async fn unknown_job_is_an_error() {
    let h = Harness::new().await;
    let executor = h.executor(
        Arc::new(ScriptedModel::new(Vec::new())),
        Arc::new(FakeGit::default()),
        Arc::new(FakePulls::new(PullBehavior::Succeed)),
    );
    assert!(executor.execute_job(&JobId::from("missing")).await.is_err());
}

#[test]
fn history_checker_accepts_only_prefixes() {
    assert!(is_valid_history(&HAPPY_PATH));
    assert!(is_valid_history(&[JobStatus::Pending, JobStatus::Cancelled]));
    assert!(is_valid_history(&[
        JobStatus::Pending,
        JobStatus::Cloning,
        JobStatus::Failed
    ]));
    assert!(!is_valid_history(&[JobStatus::Pending, JobStatus::Analyzing]));
    assert!(!is_valid_history(&[JobStatus::Cloning]));
}
