use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = ".prforge/worker.toml";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Operational limits for the tool surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolLimits {
    /// Lines returned by `read` when no limit is given.
    pub read_default_limit: usize,
    /// Characters of command output returned to the model.
    pub output_char_limit: usize,
    /// Bytes of command output captured per stream.
    pub output_byte_cap: u64,
    pub bash_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub glob_max_results: usize,
    pub grep_max_lines: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            read_default_limit: 2000,
            output_char_limit: 30_000,
            output_byte_cap: 10 * 1024 * 1024,
            bash_timeout_secs: 120,
            search_timeout_secs: 30,
            glob_max_results: 200,
            grep_max_lines: 100,
        }
    }
}

impl ToolLimits {
    pub fn bash_timeout(&self) -> Duration {
        Duration::from_secs(self.bash_timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

/// Per-provider overrides from `[providers.<id>]`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProviderSettings {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
}

/// Runtime configuration of the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Per-job checkouts live at `<work_dir>/<job_id>`.
    pub work_dir: PathBuf,
    pub max_steps: usize,
    pub clone_depth: u32,
    pub clone_timeout_secs: u64,
    pub git_timeout_secs: u64,
    pub commit_name: String,
    pub commit_email: String,
    pub git_host: String,
    pub github_api_base: String,
    pub tools: ToolLimits,
    pub providers: HashMap<String, ProviderSettings>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("prforge"),
            max_steps: 50,
            clone_depth: 50,
            clone_timeout_secs: 120,
            git_timeout_secs: 120,
            commit_name: "prforge[bot]".to_string(),
            commit_email: "prforge-bot@users.noreply.github.com".to_string(),
            git_host: "github.com".to_string(),
            github_api_base: DEFAULT_GITHUB_API.to_string(),
            tools: ToolLimits::default(),
            providers: HashMap::new(),
        }
    }
}

/// Raw TOML structure for `.prforge/worker.toml`
#[derive(Debug, Deserialize)]
struct WorkerToml {
    worker: Option<WorkerSection>,
    tools: Option<ToolsSection>,
    github: Option<GithubSection>,
    providers: Option<HashMap<String, ProviderSettings>>,
}

#[derive(Debug, Deserialize)]
struct WorkerSection {
    work_dir: Option<PathBuf>,
    max_steps: Option<usize>,
    clone_depth: Option<u32>,
    clone_timeout_secs: Option<u64>,
    git_timeout_secs: Option<u64>,
    commit_name: Option<String>,
    commit_email: Option<String>,
    git_host: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolsSection {
    read_default_limit: Option<usize>,
    output_char_limit: Option<usize>,
    output_byte_cap: Option<u64>,
    bash_timeout_secs: Option<u64>,
    search_timeout_secs: Option<u64>,
    glob_max_results: Option<usize>,
    grep_max_lines: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GithubSection {
    api_base: Option<String>,
}

impl WorkerConfig {
    /// Load the worker config from `path`, then apply environment overrides.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let toml: WorkerToml = toml::from_str(content)?;

        let mut config = Self::default();
        if let Some(section) = toml.worker {
            if let Some(work_dir) = section.work_dir {
                config.work_dir = work_dir;
            }
            if let Some(max_steps) = section.max_steps {
                config.max_steps = max_steps;
            }
            if let Some(depth) = section.clone_depth {
                config.clone_depth = depth;
            }
            if let Some(secs) = section.clone_timeout_secs {
                config.clone_timeout_secs = secs;
            }
            if let Some(secs) = section.git_timeout_secs {
                config.git_timeout_secs = secs;
            }
            if let Some(name) = section.commit_name {
                config.commit_name = name;
            }
            if let Some(email) = section.commit_email {
                config.commit_email = email;
            }
            if let Some(host) = section.git_host {
                config.git_host = host;
            }
        }
        if let Some(section) = toml.tools {
            let limits = &mut config.tools;
            if let Some(v) = section.read_default_limit {
                limits.read_default_limit = v;
            }
            if let Some(v) = section.output_char_limit {
                limits.output_char_limit = v;
            }
            if let Some(v) = section.output_byte_cap {
                limits.output_byte_cap = v;
            }
            if let Some(v) = section.bash_timeout_secs {
                limits.bash_timeout_secs = v;
            }
            if let Some(v) = section.search_timeout_secs {
                limits.search_timeout_secs = v;
            }
            if let Some(v) = section.glob_max_results {
                limits.glob_max_results = v;
            }
            if let Some(v) = section.grep_max_lines {
                limits.grep_max_lines = v;
            }
        }
        if let Some(api_base) = toml.github.and_then(|g| g.api_base) {
            config.github_api_base = api_base;
        }
        if let Some(providers) = toml.providers {
            config.providers = providers;
        }

        Ok(config)
    }

    /// Apply `PRFORGE_WORK_DIR` and `GITHUB_API_URL` from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("PRFORGE_WORK_DIR").filter(|v| !v.is_empty()) {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(api) = lookup("GITHUB_API_URL").filter(|v| !v.is_empty()) {
            self.github_api_base = api;
        }
    }

    pub fn provider(&self, id: &str) -> ProviderSettings {
        self.providers.get(id).cloned().unwrap_or_default()
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }
}

/// The credential encryption key from `PRFORGE_MASTER_KEY`, if set.
pub fn master_key_from_env() -> Option<SecretString> {
    std::env::var("PRFORGE_MASTER_KEY")
        .ok()
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
}
