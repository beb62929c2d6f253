use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ::glob::Pattern;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use walkdir::WalkDir;

use super::{PathGuard, Tool, is_excluded, parse_input};
use crate::config::ToolLimits;
use crate::errors::ToolError;
use crate::llm::ToolDefinition;

const NO_MATCHES: &str = "No matches found";

#[derive(Debug, Deserialize)]
pub struct GrepInput {
    pub pattern: String,
    pub path: Option<String>,
    /// File-name glob such as `*.ts` or `*.{ts,tsx}`.
    pub include: Option<String>,
}

pub struct GrepTool {
    guard: Arc<PathGuard>,
    max_lines: usize,
    timeout: Duration,
}

/// Expand one level of `{a,b}` alternation.
fn expand_braces(pattern: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (pattern.find('{'), pattern.find('}')) else {
        return vec![pattern.to_string()];
    };
    if close < open {
        return vec![pattern.to_string()];
    }
    let (prefix, rest) = pattern.split_at(open);
    let alternatives = &rest[1..close - open];
    let suffix = &rest[close - open + 1..];
    alternatives
        .split(',')
        .map(|alt| format!("{prefix}{alt}{suffix}"))
        .collect()
}

fn include_filter(include: Option<&str>) -> Option<Vec<Pattern>> {
    let include = include?.trim();
    if include.is_empty() {
        return None;
    }
    Some(
        expand_braces(include)
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect(),
    )
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8000).any(|b| *b == 0)
}

fn search_files(
    base: &Path,
    root: &Path,
    regex: &Regex,
    include: Option<&[Pattern]>,
    max_lines: usize,
) -> Vec<String> {
    let mut hits = Vec::new();
    let walker = WalkDir::new(base)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.path()
                .strip_prefix(root)
                .map(|rel| !is_excluded(rel))
                .unwrap_or(false)
        });

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(patterns) = include {
            let name = entry.file_name().to_string_lossy();
            if !patterns.iter().any(|p| p.matches(&name)) {
                continue;
            }
        }
        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };
        if is_binary(&bytes) {
            continue;
        }
        let Ok(text) = std::str::from_utf8(&bytes) else {
            continue;
        };
        let rel = entry
            .path()
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        for (i, line) in text.lines().enumerate() {
            if regex.is_match(line) {
                hits.push(format!("{}:{}:{}", rel, i + 1, line));
                if hits.len() > max_lines {
                    return hits;
                }
            }
        }
    }
    hits
}

impl GrepTool {
    pub fn new(guard: Arc<PathGuard>, limits: &ToolLimits) -> Self {
        Self {
            guard,
            max_lines: limits.grep_max_lines,
            timeout: limits.search_timeout(),
        }
    }

    /// Search file contents. Any failure other than a path escape is
    /// reported as "No matches found".
    pub async fn search(&self, input: GrepInput) -> Result<String, ToolError> {
        let base: PathBuf = self.guard.resolve(input.path.as_deref().unwrap_or("."))?;
        let regex = match Regex::new(&input.pattern) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, pattern = %input.pattern, "invalid grep pattern");
                return Ok(NO_MATCHES.to_string());
            }
        };
        if !base.exists() {
            return Ok(NO_MATCHES.to_string());
        }

        let root = self.guard.root().to_path_buf();
        let include = include_filter(input.include.as_deref());
        let max = self.max_lines;
        let task = tokio::task::spawn_blocking(move || {
            search_files(&base, &root, &regex, include.as_deref(), max)
        });

        let mut hits = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "grep task failed");
                Vec::new()
            }
            Err(_) => {
                tracing::debug!(pattern = %input.pattern, "grep timed out");
                Vec::new()
            }
        };

        if hits.is_empty() {
            return Ok(NO_MATCHES.to_string());
        }
        let truncated = hits.len() > self.max_lines;
        hits.truncate(self.max_lines);
        let mut out = hits.join("\n");
        if truncated {
            out.push_str(&format!("\n\n(results truncated at {} lines)", self.max_lines));
        }
        Ok(out)
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &'static str {
        "grep"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: format!(
                "Search file contents with a regular expression. Returns up to {} matching \
                 lines as path:line:text.",
                self.max_lines
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Regular expression"},
                    "path": {"type": "string", "description": "File or directory to search (default: repository root)"},
                    "include": {"type": "string", "description": "File name filter, e.g. \"*.ts\" or \"*.{ts,tsx}\""}
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError> {
        self.search(parse_input(self.name(), input)?).await
    }
}
