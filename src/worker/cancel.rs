use std::sync::Arc;

use prforge_common::{JobId, JobStatus, JobStore};

/// Cooperative cancellation backed by the persisted job status.
///
/// The external cancel action writes `cancelled` to the job record; the
/// worker polls it here at each checkpoint. A failed read is treated as
/// "not cancelled" so a transient store error does not abort the job.
#[derive(Clone)]
pub struct CancellationSignal {
    jobs: Arc<dyn JobStore>,
    job_id: JobId,
}

impl CancellationSignal {
    pub fn new(jobs: Arc<dyn JobStore>, job_id: JobId) -> Self {
        Self { jobs, job_id }
    }

    pub async fn is_cancelled(&self) -> bool {
        match self.jobs.get_by_id(&self.job_id).await {
            Ok(Some(job)) => job.status == JobStatus::Cancelled,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "failed to read job status for cancellation check");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prforge_common::{MemoryStore, NewJob};

    #[tokio::test]
    async fn observes_external_cancel() {
        let store = Arc::new(MemoryStore::new());
        let job = store
            .create_job(NewJob {
                organization_id: "org".into(),
                post_id: "post".into(),
                provider_id: "anthropic".into(),
                additional_context: None,
            })
            .await
            .unwrap();
        let signal = CancellationSignal::new(store.clone(), job.id.clone());
        assert!(!signal.is_cancelled().await);
        store.cancel(&job.id).await.unwrap();
        assert!(signal.is_cancelled().await);
    }

    #[tokio::test]
    async fn missing_job_is_not_cancelled() {
        let signal = CancellationSignal::new(Arc::new(MemoryStore::new()), JobId::from("gone"));
        assert!(!signal.is_cancelled().await);
    }
}
