use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::write::write_atomic;
use super::{PathGuard, Tool, parse_input};
use crate::errors::ToolError;
use crate::llm::ToolDefinition;

#[derive(Debug, Deserialize)]
pub struct EditInput {
    pub path: String,
    #[serde(alias = "oldString")]
    pub old_string: String,
    #[serde(alias = "newString")]
    pub new_string: String,
}

pub struct EditTool {
    guard: Arc<PathGuard>,
}

/// Occurrences of `needle` in `haystack`, overlapping ones included.
fn count_occurrences(haystack: &str, needle: &str) -> usize {
    let mut count = 0;
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        count += 1;
        let at = start + pos;
        start = at + haystack[at..].chars().next().map_or(1, char::len_utf8);
        if start > haystack.len() {
            break;
        }
    }
    count
}

impl EditTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }

    /// Replace `old_string` with `new_string` only when it occurs exactly once.
    pub async fn edit(&self, input: EditInput) -> Result<String, ToolError> {
        let path = self.guard.resolve(&input.path)?;
        if input.old_string.is_empty() {
            return Err(ToolError::EmptyEditTarget);
        }
        if !path.is_file() {
            return Err(ToolError::FileNotFound { path: input.path });
        }

        let content = tokio::fs::read_to_string(&path).await?;
        match count_occurrences(&content, &input.old_string) {
            0 => Err(ToolError::EditTargetNotFound { path: input.path }),
            1 => {
                let updated = content.replacen(&input.old_string, &input.new_string, 1);
                write_atomic(&path, updated.as_bytes()).await?;
                Ok(format!("Edited {}", input.path))
            }
            count => Err(ToolError::AmbiguousEdit {
                path: input.path,
                count,
            }),
        }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &'static str {
        "edit"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Replace old_string with new_string in a file. old_string must occur \
                          exactly once; add surrounding lines to make it unique."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the repository root"},
                    "old_string": {"type": "string", "description": "Exact text to replace"},
                    "new_string": {"type": "string", "description": "Replacement text"}
                },
                "required": ["path", "old_string", "new_string"]
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError> {
        self.edit(parse_input(self.name(), input)?).await
    }
}
