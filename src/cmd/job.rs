//! `prforge job`

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use prforge::config::WorkerConfig;
use prforge::git::ShellGit;
use prforge::git::github::GithubClient;
use prforge::providers::ProviderRegistry;
use prforge::store::SqliteStore;
use prforge::worker::{Collaborators, JobExecutor, JobOutcome};
use prforge_common::{JobId, JobStore, NewJob};

use super::super::JobCommands;

pub async fn cmd_job(store: Arc<SqliteStore>, config: WorkerConfig, command: JobCommands) -> Result<()> {
    match command {
        JobCommands::Create {
            org,
            post,
            provider,
            context,
        } => {
            let job = store
                .create_job(NewJob {
                    organization_id: org,
                    post_id: post,
                    provider_id: provider,
                    additional_context: context,
                })
                .await?;
            println!("{}", job.id);
        }
        JobCommands::Run { id } => {
            let registry = Arc::new(ProviderRegistry::with_defaults(&config));
            let git = Arc::new(ShellGit::from_config(&config));
            let pulls = Arc::new(GithubClient::new(config.github_api_base.clone())?);
            let executor = JobExecutor::new(
                Collaborators::from_store(store),
                registry,
                git,
                pulls,
                config,
            );
            match executor.execute_job(&JobId::from(id)).await? {
                JobOutcome::Completed {
                    pr_url,
                    branch_name,
                } => {
                    println!("Pull request: {}", pr_url);
                    println!("Branch: {}", branch_name);
                }
                JobOutcome::Cancelled => println!("Job cancelled"),
                JobOutcome::Skipped { status } => {
                    println!("Job is {}; nothing to run", status);
                }
                JobOutcome::Failed { error } => bail!("Job failed: {}", error),
            }
        }
        JobCommands::Cancel { id } => {
            let job = store.cancel(&JobId::from(id)).await?;
            println!("Job {} cancelled", job.id);
        }
        JobCommands::Show { id } => {
            let id = JobId::from(id);
            let job = store
                .get_by_id(&id)
                .await?
                .with_context(|| format!("Job {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
    }
    Ok(())
}
