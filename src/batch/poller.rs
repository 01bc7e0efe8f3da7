//! Polling of submitted jobs against the provider.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::BatchError;
use crate::provider::{with_flood_wait, BatchProvider, BatchState};
use crate::repository::JobRepository;

pub struct Poller {
    jobs: Arc<JobRepository>,
    provider: Arc<dyn BatchProvider>,
}

impl Poller {
    pub fn new(jobs: Arc<JobRepository>, provider: Arc<dyn BatchProvider>) -> Self {
        Self { jobs, provider }
    }

    /// Read the provider's view of every submitted job and advance it.
    /// Returns the handles whose remote state was read this pass.
    ///
    /// Provider errors here are transient: the job keeps its state and the
    /// next tick retries. A handle the provider does not know yet is also
    /// left alone; the provider may be briefly inconsistent after submit.
    pub async fn poll_submitted(&self) -> Result<Vec<String>, BatchError> {
        let submitted = self.jobs.submitted_jobs()?;
        if submitted.is_empty() {
            debug!("No submitted jobs to poll");
            return Ok(Vec::new());
        }
        info!("Polling {} submitted jobs", submitted.len());

        let mut polled = Vec::new();
        for job in submitted {
            let Some(handle) = job.provider_handle.clone() else {
                continue;
            };

            let state = match with_flood_wait(|| self.provider.batch_state(&handle)).await {
                Ok(Some(state)) => state,
                Ok(None) => {
                    warn!(
                        "Submitted job is unknown to the provider, leaving as is. job: {}, handle: {}",
                        job.id, handle
                    );
                    continue;
                }
                Err(e) => {
                    warn!("Failed to poll job, will retry next tick. job: {}, error: {}", job.id, e);
                    continue;
                }
            };

            polled.push(handle.clone());
            match state {
                BatchState::Succeeded => {
                    info!("Job succeeded at the provider. job: {}, handle: {}", job.id, handle);
                    self.jobs.mark_processed(&job.id)?;
                }
                BatchState::Failed | BatchState::Cancelled | BatchState::Expired => {
                    warn!(
                        "Job ended unsuccessfully at the provider. job: {}, handle: {}, state: {:?}",
                        job.id, handle, state
                    );
                    self.jobs.mark_failed(&job.id)?;
                }
                BatchState::Pending | BatchState::Running => {
                    debug!("Job still in progress at the provider. job: {}", job.id);
                }
                BatchState::Other(state) => {
                    warn!(
                        "Job reports an unknown provider state. job: {}, state: {}",
                        job.id, state
                    );
                }
            }
        }

        Ok(polled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, Post};
    use crate::provider::ProviderError;
    use crate::repository::PostRepository;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Provider stub reporting canned states per handle.
    #[derive(Default)]
    struct StatefulProvider {
        states: Mutex<HashMap<String, BatchState>>,
    }

    impl StatefulProvider {
        fn set_state(&self, handle: &str, state: BatchState) {
            self.states
                .lock()
                .unwrap()
                .insert(handle.to_string(), state);
        }
    }

    #[async_trait]
    impl BatchProvider for StatefulProvider {
        async fn upload_file(&self, _: &Path, _: &str) -> Result<String, ProviderError> {
            unimplemented!()
        }

        async fn create_batch(&self, _: &str, _: &str, _: &str) -> Result<String, ProviderError> {
            unimplemented!()
        }

        async fn batch_state(&self, handle: &str) -> Result<Option<BatchState>, ProviderError> {
            Ok(self.states.lock().unwrap().get(handle).cloned())
        }

        async fn result_file_name(&self, _: &str) -> Result<Option<String>, ProviderError> {
            Ok(None)
        }

        async fn download_file(&self, _: &str) -> Result<Vec<u8>, ProviderError> {
            Ok(Vec::new())
        }
    }

    fn submitted_job(db: &Path, handle: &str) -> (Arc<JobRepository>, String) {
        let timeout = Duration::from_secs(10);
        let posts = PostRepository::new(db, timeout).unwrap();
        let jobs = Arc::new(JobRepository::new(db, timeout).unwrap());

        let mut post = Post::new("P".to_string(), format!("https://example.com/{}", handle), None);
        post.text = Some("content".to_string());
        posts.insert(&post).unwrap();
        jobs.register(&post.id, 100, 1024).unwrap();
        let job_id = jobs.accepting_job().unwrap().unwrap().id;

        let conn = rusqlite::Connection::open(db).unwrap();
        let stale = (chrono::Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
        conn.execute(
            "UPDATE analysis_jobs SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![stale, job_id],
        )
        .unwrap();
        jobs.sweep_idle(Duration::from_secs(120)).unwrap();
        jobs.mark_submitted(&job_id, handle).unwrap();
        (jobs, job_id)
    }

    #[tokio::test]
    async fn test_succeeded_advances_to_processed() {
        let dir = tempdir().unwrap();
        let (jobs, job_id) = submitted_job(&dir.path().join("t.db"), "batches/ok");
        let provider = Arc::new(StatefulProvider::default());
        provider.set_state("batches/ok", BatchState::Succeeded);

        let poller = Poller::new(Arc::clone(&jobs), provider);
        let polled = poller.poll_submitted().await.unwrap();
        assert_eq!(polled, vec!["batches/ok".to_string()]);
        assert_eq!(
            jobs.get(&job_id).unwrap().unwrap().status,
            JobStatus::Processed
        );
    }

    #[tokio::test]
    async fn test_remote_failure_fails_job() {
        let dir = tempdir().unwrap();
        let (jobs, job_id) = submitted_job(&dir.path().join("t.db"), "batches/bad");
        let provider = Arc::new(StatefulProvider::default());
        provider.set_state("batches/bad", BatchState::Expired);

        let poller = Poller::new(Arc::clone(&jobs), provider);
        poller.poll_submitted().await.unwrap();
        assert_eq!(jobs.get(&job_id).unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_handle_leaves_job_submitted() {
        let dir = tempdir().unwrap();
        let (jobs, job_id) = submitted_job(&dir.path().join("t.db"), "batches/missing");
        let provider = Arc::new(StatefulProvider::default());

        let poller = Poller::new(Arc::clone(&jobs), provider);
        let polled = poller.poll_submitted().await.unwrap();
        assert!(polled.is_empty());
        assert_eq!(
            jobs.get(&job_id).unwrap().unwrap().status,
            JobStatus::Submitted
        );
    }

    #[tokio::test]
    async fn test_running_state_is_a_no_op() {
        let dir = tempdir().unwrap();
        let (jobs, job_id) = submitted_job(&dir.path().join("t.db"), "batches/busy");
        let provider = Arc::new(StatefulProvider::default());
        provider.set_state("batches/busy", BatchState::Running);

        let poller = Poller::new(Arc::clone(&jobs), provider);
        let polled = poller.poll_submitted().await.unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(
            jobs.get(&job_id).unwrap().unwrap().status,
            JobStatus::Submitted
        );
    }
}
