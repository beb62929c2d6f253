use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{PathGuard, Tool, parse_input};
use crate::errors::ToolError;
use crate::llm::ToolDefinition;

#[derive(Debug, Default, Deserialize)]
pub struct ListInput {
    pub path: Option<String>,
}

pub struct ListDirectoryTool {
    guard: Arc<PathGuard>,
}

impl ListDirectoryTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }

    pub async fn list(&self, input: ListInput) -> Result<String, ToolError> {
        let display = input.path.unwrap_or_else(|| ".".to_string());
        let dir = self.guard.resolve(&display)?;
        if !dir.exists() {
            return Err(ToolError::FileNotFound { path: display });
        }
        if !dir.is_dir() {
            return Err(ToolError::InvalidInput {
                tool: "list_directory".to_string(),
                message: format!("{display} is not a directory"),
            });
        }

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                name.push('/');
            }
            entries.push(name);
        }

        if entries.is_empty() {
            return Ok("(empty directory)".to_string());
        }
        entries.sort();
        Ok(entries.join("\n"))
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &'static str {
        "list_directory"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "List the entries of a directory. Directories end with '/'.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory relative to the repository root (default: root)"}
                }
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError> {
        let input = if input.is_null() {
            ListInput::default()
        } else {
            parse_input(self.name(), input)?
        };
        self.list(input).await
    }
}
