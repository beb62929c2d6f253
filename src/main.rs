use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use prforge::config::{DEFAULT_CONFIG_PATH, WorkerConfig, master_key_from_env};
use prforge::store::{SecretsCrypto, SqliteStore};

mod cmd;

#[derive(Parser)]
#[command(name = "prforge")]
#[command(version, about = "Turn feedback posts into pull requests with an AI coding agent")]
pub struct Cli {
    /// SQLite database holding jobs, posts, repository settings and credentials
    #[arg(long, global = true, env = "PRFORGE_DB", default_value = ".prforge/worker.db")]
    pub db: PathBuf,

    /// Worker configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, run, cancel and inspect jobs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Manage feedback posts
    Post {
        #[command(subcommand)]
        command: PostCommands,
    },
    /// Connect an organization's GitHub repository
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Store encrypted credentials (values are read from stdin)
    Secret {
        #[command(subcommand)]
        command: SecretCommands,
    },
    /// List the registered AI providers
    Providers,
}

#[derive(Subcommand, Clone)]
pub enum JobCommands {
    /// Create a pending job and print its id
    Create {
        #[arg(long)]
        org: String,
        #[arg(long)]
        post: String,
        #[arg(long)]
        provider: String,
        /// Extra instructions for the agent
        #[arg(long)]
        context: Option<String>,
    },
    /// Execute a pending job to completion
    Run { id: String },
    /// Mark a job cancelled; a running worker stops at its next step
    Cancel { id: String },
    /// Print the job record as JSON
    Show { id: String },
}

#[derive(Subcommand, Clone)]
pub enum PostCommands {
    /// Add a feedback post and print its id
    Add {
        #[arg(long)]
        org: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum RepoCommands {
    /// Set the repository pull requests are opened against
    Set {
        #[arg(long)]
        org: String,
        /// `owner/name` or a GitHub URL
        #[arg(long)]
        repo: String,
        #[arg(long, default_value = "main")]
        branch: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum SecretCommands {
    /// GitHub token used to clone, push and open pull requests
    SetGithubToken {
        #[arg(long)]
        org: String,
    },
    /// API key for an `api_key` provider
    SetApiKey {
        #[arg(long)]
        org: String,
        #[arg(long)]
        provider: String,
    },
    /// OAuth tokens for an `oauth` provider: access token on the first
    /// line of stdin, optional refresh token on the second
    SetOauth {
        #[arg(long)]
        org: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        account_id: Option<String>,
        /// RFC 3339 expiry of the access token
        #[arg(long)]
        expires_at: Option<String>,
    },
}

fn open_store(cli: &Cli) -> Result<Arc<SqliteStore>> {
    let crypto = master_key_from_env()
        .map(SecretsCrypto::new)
        .transpose()
        .context("Invalid PRFORGE_MASTER_KEY")?;
    let store = SqliteStore::open(&cli.db, crypto)
        .with_context(|| format!("Failed to open database {}", cli.db.display()))?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    prforge::logging::init(cli.verbose, cli.log_json);

    let config = WorkerConfig::load(&cli.config)?;

    match &cli.command {
        Commands::Providers => cmd::cmd_providers(&config),
        Commands::Job { command } => {
            let store = open_store(&cli)?;
            cmd::cmd_job(store, config, command.clone()).await
        }
        Commands::Post { command } => cmd::cmd_post(open_store(&cli)?, command.clone()).await,
        Commands::Repo { command } => cmd::cmd_repo(open_store(&cli)?, command.clone()).await,
        Commands::Secret { command } => cmd::cmd_secret(open_store(&cli)?, command.clone()).await,
    }
}
