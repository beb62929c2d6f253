use std::path::{Component, Path, PathBuf};

use crate::errors::ToolError;

/// Confines tool paths to a checkout root.
///
/// Resolution is lexical: `..` components are folded before the
/// containment check, so a rejected path is never touched on disk.
/// Symlinks inside the checkout are not followed or checked.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Canonicalizes `root`, which must exist.
    pub fn new(root: &Path) -> std::io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied path against the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        self.resolve_from(&self.root, path)
    }

    /// Resolve `path` relative to `base`, which must itself be inside the root.
    pub fn resolve_from(&self, base: &Path, path: &str) -> Result<PathBuf, ToolError> {
        let joined = base.join(path);
        let normalized = normalize(&joined);
        if normalized.starts_with(&self.root) {
            Ok(normalized)
        } else {
            Err(ToolError::PathTraversal {
                path: path.to_string(),
            })
        }
    }

    /// Display form of an absolute path under the root.
    pub fn relativize(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
