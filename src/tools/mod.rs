//! The tool surface handed to the coding agent.
//!
//! Every tool is scoped to one working checkout through a shared
//! [`PathGuard`]. Tools return plain text; "nothing found" is a normal
//! result, while a [`ToolError`] is rendered back to the model so it can
//! correct itself.

mod bash;
mod edit;
mod glob;
mod grep;
mod list;
pub mod path_guard;
mod read;
mod write;

pub use bash::BashTool;
pub use edit::EditTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use list::ListDirectoryTool;
pub use path_guard::PathGuard;
pub use read::ReadTool;
pub use write::WriteTool;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::ToolLimits;
use crate::errors::ToolError;
use crate::llm::ToolDefinition;

/// Directories skipped by the search tools.
pub(crate) const EXCLUDED_DIRS: [&str; 3] = [".git", "node_modules", "dist"];

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError>;
}

/// Parse raw model arguments into a tool's typed input.
pub(crate) fn parse_input<T: DeserializeOwned>(
    tool: &str,
    input: serde_json::Value,
) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

/// Whether `rel` passes through an excluded directory.
pub(crate) fn is_excluded(rel: &Path) -> bool {
    rel.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
    })
}

/// The ordered set of tools available during one job.
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// Build the standard tool surface rooted at `root`.
    pub fn for_checkout(root: &Path, limits: &ToolLimits) -> Result<Self, ToolError> {
        let guard = Arc::new(PathGuard::new(root)?);
        Ok(Self::new(vec![
            Arc::new(ReadTool::new(guard.clone(), limits.read_default_limit)),
            Arc::new(WriteTool::new(guard.clone())),
            Arc::new(EditTool::new(guard.clone())),
            Arc::new(BashTool::new(guard.clone(), limits)),
            Arc::new(GlobTool::new(guard.clone(), limits)),
            Arc::new(GrepTool::new(guard.clone(), limits)),
            Arc::new(ListDirectoryTool::new(guard)),
        ]))
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub async fn invoke(&self, name: &str, input: serde_json::Value) -> Result<String, ToolError> {
        let Some(tool) = self.get(name) else {
            return Err(ToolError::UnknownTool {
                name: name.to_string(),
            });
        };
        tool.execute(input).await
    }
}
