//! `prforge repo`

use std::sync::Arc;

use anyhow::{Context, Result};
use prforge::git::github::parse_repo_full_name;
use prforge::store::SqliteStore;
use prforge_common::GithubConfig;

use super::super::RepoCommands;

pub async fn cmd_repo(store: Arc<SqliteStore>, command: RepoCommands) -> Result<()> {
    match command {
        RepoCommands::Set { org, repo, branch } => {
            let repo_full_name = parse_repo_full_name(&repo)
                .with_context(|| format!("Invalid repository: {} (expected owner/name)", repo))?;
            store
                .set_github_config(
                    &org,
                    GithubConfig {
                        repo_full_name: repo_full_name.clone(),
                        default_branch: branch.clone(),
                    },
                )
                .await?;
            println!("Repository for {} set to {} ({})", org, repo_full_name, branch);
        }
    }
    Ok(())
}
