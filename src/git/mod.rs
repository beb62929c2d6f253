//! Git and GitHub driver.
//!
//! Every git operation runs as a `git` subprocess against one working
//! checkout, behind the [`GitDriver`] trait so the orchestrator can be
//! exercised with a fake. Pull requests are opened with a direct REST call
//! (see [`github`]).

pub mod github;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::WorkerConfig;
use crate::errors::GitError;
use crate::util::{redact, slugify};

const BRANCH_PREFIX: &str = "ai/";
const BRANCH_SLUG_LEN: usize = 40;

/// Deterministic branch name for a feedback post title.
pub fn branch_name_for(title: &str) -> String {
    let slug = slugify(title, BRANCH_SLUG_LEN);
    if slug.is_empty() {
        format!("{BRANCH_PREFIX}feedback")
    } else {
        format!("{BRANCH_PREFIX}{slug}")
    }
}

/// Whether `name` looks like `owner/repo`.
pub fn is_valid_repo_full_name(name: &str) -> bool {
    let mut parts = name.split('/');
    let (Some(owner), Some(repo), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let valid = |s: &str| {
        !s.is_empty()
            && s != "."
            && s != ".."
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    valid(owner) && valid(repo)
}

/// Where to clone from and push to. The token only ever appears in the
/// URLs passed on the command line, never in the checkout's config.
pub struct GitRemote {
    url: String,
    token: Option<SecretString>,
}

impl GitRemote {
    /// `https://{host}/{owner}/{repo}.git`, authenticated with `x-access-token`.
    pub fn github(host: &str, repo_full_name: &str, token: SecretString) -> Result<Self, GitError> {
        if !is_valid_repo_full_name(repo_full_name) {
            return Err(GitError::InvalidRepo(repo_full_name.to_string()));
        }
        Ok(Self {
            url: format!("https://{}/{}.git", host, repo_full_name),
            token: Some(token),
        })
    }

    /// An unauthenticated remote such as a local path.
    pub fn plain(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }

    pub fn public_url(&self) -> &str {
        &self.url
    }

    fn authenticated_url(&self) -> String {
        match (&self.token, self.url.strip_prefix("https://")) {
            (Some(token), Some(rest)) => {
                format!("https://x-access-token:{}@{}", token.expose_secret(), rest)
            }
            _ => self.url.clone(),
        }
    }

    fn secret(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.expose_secret())
    }
}

#[async_trait]
pub trait GitDriver: Send + Sync {
    /// Shallow-clone `base_branch` of `remote` into `dest`.
    async fn clone_repo(&self, remote: &GitRemote, base_branch: &str, dest: &Path) -> Result<(), GitError>;

    async fn create_branch(&self, repo: &Path, branch: &str) -> Result<(), GitError>;

    async fn configure_identity(&self, repo: &Path, name: &str, email: &str) -> Result<(), GitError>;

    async fn has_uncommitted_changes(&self, repo: &Path) -> Result<bool, GitError>;

    /// Stage everything and commit.
    async fn commit_all(&self, repo: &Path, message: &str) -> Result<(), GitError>;

    /// Whether HEAD carries commits that `origin/<base_branch>` does not.
    async fn has_diverged(&self, repo: &Path, base_branch: &str) -> Result<bool, GitError>;

    async fn push(&self, repo: &Path, remote: &GitRemote, branch: &str) -> Result<(), GitError>;
}

/// [`GitDriver`] backed by the `git` binary.
pub struct ShellGit {
    depth: u32,
    clone_timeout: Duration,
    command_timeout: Duration,
}

impl ShellGit {
    pub fn new(depth: u32, clone_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            depth,
            clone_timeout,
            command_timeout,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.clone_depth, config.clone_timeout(), config.git_timeout())
    }

    /// Run `git <args>` and return trimmed stdout. `args[0]` names the
    /// command in errors; `secret` is scrubbed from stderr.
    async fn run(
        &self,
        dir: Option<&Path>,
        args: &[&str],
        limit: Duration,
        secret: Option<&str>,
    ) -> Result<String, GitError> {
        let command = args.first().copied().unwrap_or("").to_string();
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|source| GitError::Spawn {
            command: command.clone(),
            source,
        })?;
        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| GitError::Spawn {
                command: command.clone(),
                source,
            })?,
            Err(_) => {
                return Err(GitError::Timeout {
                    command,
                    seconds: limit.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = match secret {
                Some(secret) => redact(stderr.trim(), secret),
                None => stderr.trim().to_string(),
            };
            return Err(GitError::Failed { command, stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitDriver for ShellGit {
    async fn clone_repo(&self, remote: &GitRemote, base_branch: &str, dest: &Path) -> Result<(), GitError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let url = remote.authenticated_url();
        let depth = self.depth.to_string();
        let dest_str = dest.to_string_lossy();
        self.run(
            None,
            &[
                "clone",
                "--depth",
                &depth,
                "--branch",
                base_branch,
                "--single-branch",
                &url,
                &dest_str,
            ],
            self.clone_timeout,
            remote.secret(),
        )
        .await?;
        // The clone recorded the authenticated URL; keep only the public one.
        self.run(
            Some(dest),
            &["remote", "set-url", "origin", remote.public_url()],
            self.command_timeout,
            remote.secret(),
        )
        .await?;
        Ok(())
    }

    async fn create_branch(&self, repo: &Path, branch: &str) -> Result<(), GitError> {
        self.run(Some(repo), &["checkout", "-b", branch], self.command_timeout, None)
            .await
            .map(|_| ())
    }

    async fn configure_identity(&self, repo: &Path, name: &str, email: &str) -> Result<(), GitError> {
        self.run(Some(repo), &["config", "user.name", name], self.command_timeout, None)
            .await?;
        self.run(Some(repo), &["config", "user.email", email], self.command_timeout, None)
            .await?;
        Ok(())
    }

    async fn has_uncommitted_changes(&self, repo: &Path) -> Result<bool, GitError> {
        let status = self
            .run(Some(repo), &["status", "--porcelain"], self.command_timeout, None)
            .await?;
        Ok(!status.is_empty())
    }

    async fn commit_all(&self, repo: &Path, message: &str) -> Result<(), GitError> {
        self.run(Some(repo), &["add", "-A"], self.command_timeout, None)
            .await?;
        self.run(Some(repo), &["commit", "-m", message], self.command_timeout, None)
            .await?;
        Ok(())
    }

    async fn has_diverged(&self, repo: &Path, base_branch: &str) -> Result<bool, GitError> {
        let range = format!("origin/{}..HEAD", base_branch);
        let count = self
            .run(Some(repo), &["rev-list", "--count", &range], self.command_timeout, None)
            .await?;
        Ok(count.parse::<u64>().unwrap_or(0) > 0)
    }

    async fn push(&self, repo: &Path, remote: &GitRemote, branch: &str) -> Result<(), GitError> {
        let url = remote.authenticated_url();
        let refspec = format!("HEAD:refs/heads/{}", branch);
        self.run(
            Some(repo),
            &["push", &url, &refspec],
            self.command_timeout,
            remote.secret(),
        )
        .await
        .map(|_| ())
    }
}
