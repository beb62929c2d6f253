//! `prforge secret`: credential values come from stdin so they never
//! appear in shell history or process listings.

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use prforge::git::github::is_valid_github_token;
use prforge::store::SqliteStore;
use prforge_common::OAuthTokens;

use super::super::SecretCommands;

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read secret from stdin")?;
    Ok(input)
}

/// First non-empty line of `input`, trimmed.
fn first_value(input: &str) -> Result<String> {
    input
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .context("No secret value on stdin")
}

fn parse_oauth(input: &str, account_id: Option<String>, expires_at: Option<&str>) -> Result<OAuthTokens> {
    let mut lines = input.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(access_token) = lines.next() else {
        bail!("No access token on stdin");
    };
    let expires_at = expires_at
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("Invalid --expires-at: {}", s))
        })
        .transpose()?;
    Ok(OAuthTokens {
        access_token: access_token.to_string(),
        refresh_token: lines.next().map(str::to_string),
        expires_at,
        account_id,
    })
}

pub async fn cmd_secret(store: Arc<SqliteStore>, command: SecretCommands) -> Result<()> {
    match command {
        SecretCommands::SetGithubToken { org } => {
            let token = first_value(&read_stdin()?)?;
            if !is_valid_github_token(&token) {
                tracing::warn!("token does not have a known GitHub prefix; storing it anyway");
            }
            store.set_github_token(&org, &token).await?;
            println!("GitHub token stored for {}", org);
        }
        SecretCommands::SetApiKey { org, provider } => {
            let key = first_value(&read_stdin()?)?;
            store.set_api_key(&org, &provider, &key).await?;
            println!("API key stored for {} / {}", org, provider);
        }
        SecretCommands::SetOauth {
            org,
            provider,
            account_id,
            expires_at,
        } => {
            let tokens = parse_oauth(&read_stdin()?, account_id, expires_at.as_deref())?;
            store.set_oauth_tokens(&org, &provider, &tokens).await?;
            println!("OAuth tokens stored for {} / {}", org, provider);
        }
    }
    Ok(())
}
