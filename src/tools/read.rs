use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{PathGuard, Tool, parse_input};
use crate::errors::ToolError;
use crate::llm::ToolDefinition;

#[derive(Debug, Deserialize)]
pub struct ReadInput {
    pub path: String,
    /// 1-based line to start from.
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

pub struct ReadTool {
    guard: Arc<PathGuard>,
    default_limit: usize,
}

impl ReadTool {
    pub fn new(guard: Arc<PathGuard>, default_limit: usize) -> Self {
        Self {
            guard,
            default_limit,
        }
    }

    pub async fn read(&self, input: ReadInput) -> Result<String, ToolError> {
        let path = self.guard.resolve(&input.path)?;
        if !path.exists() {
            return Err(ToolError::FileNotFound { path: input.path });
        }
        if path.is_dir() {
            return Err(ToolError::InvalidInput {
                tool: "read".to_string(),
                message: format!("{} is a directory; use list_directory", input.path),
            });
        }

        let bytes = tokio::fs::read(&path).await?;
        let content = String::from_utf8_lossy(&bytes);
        let offset = input.offset.unwrap_or(1).max(1);
        let limit = input.limit.unwrap_or(self.default_limit);

        let total = content.lines().count();
        if total == 0 {
            return Ok("(empty file)".to_string());
        }
        if offset > total {
            return Ok(format!(
                "(offset {offset} is past the end of the file, which has {total} lines)"
            ));
        }

        let numbered: Vec<String> = content
            .lines()
            .enumerate()
            .skip(offset - 1)
            .take(limit)
            .map(|(i, line)| format!("{:>6}\t{}", i + 1, line))
            .collect();
        Ok(numbered.join("\n"))
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &'static str {
        "read"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: format!(
                "Read a file from the repository. Returns up to {} lines by default, each \
                 prefixed with its line number.",
                self.default_limit
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the repository root"},
                    "offset": {"type": "integer", "description": "1-based line number to start at"},
                    "limit": {"type": "integer", "description": "Maximum number of lines to return"}
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError> {
        self.read(parse_input(self.name(), input)?).await
    }
}
