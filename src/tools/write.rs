use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{PathGuard, Tool, parse_input};
use crate::errors::ToolError;
use crate::llm::ToolDefinition;

#[derive(Debug, Deserialize)]
pub struct WriteInput {
    pub path: String,
    pub content: String,
}

pub struct WriteTool {
    guard: Arc<PathGuard>,
}

impl WriteTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }

    pub async fn write(&self, input: WriteInput) -> Result<String, ToolError> {
        let path = self.guard.resolve(&input.path)?;
        if path.is_dir() {
            return Err(ToolError::InvalidInput {
                tool: "write".to_string(),
                message: format!("{} is a directory", input.path),
            });
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&path, input.content.as_bytes()).await?;

        let lines = input.content.lines().count();
        Ok(format!("Wrote {lines} lines to {}", input.path))
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

/// Write through a sibling temp file and rename it over `path`.
pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let tmp = temp_sibling(path);
    if let Err(e) = tokio::fs::write(&tmp, content).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &'static str {
        "write"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Create or overwrite a file with the given content. Parent directories \
                          are created as needed."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the repository root"},
                    "content": {"type": "string", "description": "Full new content of the file"}
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError> {
        self.write(parse_input(self.name(), input)?).await
    }
}
