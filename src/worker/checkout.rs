use std::path::{Path, PathBuf};

use prforge_common::JobId;

/// The job-scoped working directory, removed when dropped.
///
/// Removal on drop covers every exit path, including panics and early
/// returns; [`Checkout::remove`] does the same eagerly and reports errors.
pub struct Checkout {
    path: PathBuf,
    removed: bool,
}

impl Checkout {
    /// `<work_dir>/<job_id>`. Nothing is created on disk; the clone does that.
    pub fn for_job(work_dir: &Path, job_id: &JobId) -> Self {
        Self {
            path: work_dir.join(job_id.as_str()),
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(mut self) -> std::io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if !self.removed && self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove checkout");
            }
        }
    }
}
