use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ::glob::{MatchOptions, Pattern};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use walkdir::WalkDir;

use super::{PathGuard, Tool, is_excluded, parse_input};
use crate::config::ToolLimits;
use crate::errors::ToolError;
use crate::llm::ToolDefinition;

#[derive(Debug, Deserialize)]
pub struct GlobInput {
    pub pattern: String,
    pub path: Option<String>,
}

pub struct GlobTool {
    guard: Arc<PathGuard>,
    max_results: usize,
    timeout: Duration,
}

/// Primary listing through the glob crate. `Err` when the pattern is not
/// a valid glob.
fn glob_files(base: &Path, pattern: &str, root: &Path, max: usize) -> Result<Vec<PathBuf>, String> {
    let full = base.join(pattern);
    let full = full.to_str().ok_or_else(|| "pattern is not valid UTF-8".to_string())?;
    let entries = ::glob::glob(full).map_err(|e| e.to_string())?;

    let mut files = Vec::new();
    for path in entries.flatten() {
        if !path.is_file() {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        if is_excluded(rel) {
            continue;
        }
        files.push(path);
        if files.len() > max {
            break;
        }
    }
    Ok(files)
}

/// Fallback: walk `base` and match each relative path, or its file name,
/// against the pattern. An unparseable pattern degrades to a substring
/// match on the file name.
fn walk_files(base: &Path, pattern: &str, root: &Path, max: usize) -> Vec<PathBuf> {
    let compiled = Pattern::new(pattern).ok();
    let needle: String = pattern
        .chars()
        .filter(|c| !matches!(c, '*' | '?' | '[' | ']'))
        .collect();
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };

    let mut files = Vec::new();
    let walker = WalkDir::new(base).into_iter().filter_entry(|e| {
        e.path()
            .strip_prefix(root)
            .map(|rel| !is_excluded(rel))
            .unwrap_or(false)
    });
    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(base) else {
            continue;
        };
        let name = entry.file_name().to_string_lossy();
        let matched = match &compiled {
            Some(p) => p.matches_path_with(rel, options) || p.matches_with(&name, options),
            None => !needle.is_empty() && name.contains(&needle),
        };
        if matched {
            files.push(entry.into_path());
            if files.len() > max {
                break;
            }
        }
    }
    files
}

impl GlobTool {
    pub fn new(guard: Arc<PathGuard>, limits: &ToolLimits) -> Self {
        Self {
            guard,
            max_results: limits.glob_max_results,
            timeout: limits.search_timeout(),
        }
    }

    pub async fn search(&self, input: GlobInput) -> Result<String, ToolError> {
        let base = self.guard.resolve(input.path.as_deref().unwrap_or("."))?;
        // The pattern itself may not climb out of the checkout.
        self.guard.resolve_from(&base, &input.pattern)?;
        if !base.is_dir() {
            return Ok(format!("No files found matching pattern: {}", input.pattern));
        }

        let root = self.guard.root().to_path_buf();
        let pattern = input.pattern.clone();
        let max = self.max_results;
        let task = tokio::task::spawn_blocking(move || {
            match glob_files(&base, &pattern, &root, max) {
                Ok(files) => files,
                Err(e) => {
                    tracing::debug!(error = %e, "glob failed, falling back to directory walk");
                    walk_files(&base, &pattern, &root, max)
                }
            }
        });

        let mut files = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(files)) => files,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "glob task failed");
                Vec::new()
            }
            Err(_) => {
                return Ok(format!(
                    "Search timed out after {}s: {}",
                    self.timeout.as_secs(),
                    input.pattern
                ));
            }
        };

        if files.is_empty() {
            return Ok(format!("No files found matching pattern: {}", input.pattern));
        }

        let truncated = files.len() > self.max_results;
        files.truncate(self.max_results);
        let mut listing: Vec<String> = files.iter().map(|p| self.guard.relativize(p)).collect();
        listing.sort();
        let mut out = listing.join("\n");
        if truncated {
            out.push_str(&format!(
                "\n\n(results truncated at {} files)",
                self.max_results
            ));
        }
        Ok(out)
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &'static str {
        "glob"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: format!(
                "Find files by glob pattern such as \"src/**/*.ts\". Returns at most {} paths.",
                self.max_results
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Glob pattern"},
                    "path": {"type": "string", "description": "Directory to search from (default: repository root)"}
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError> {
        self.search(parse_input(self.name(), input)?).await
    }
}
