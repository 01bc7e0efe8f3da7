//! Submission of pending jobs to the inference provider.

use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{request, BatchError};
use crate::models::{AnalysisJob, Post};
use crate::provider::{with_flood_wait, BatchProvider};
use crate::repository::{JobRepository, PostRepository};

pub struct Submitter {
    posts: Arc<PostRepository>,
    jobs: Arc<JobRepository>,
    provider: Arc<dyn BatchProvider>,
    model: String,
}

impl Submitter {
    pub fn new(
        posts: Arc<PostRepository>,
        jobs: Arc<JobRepository>,
        provider: Arc<dyn BatchProvider>,
        model: String,
    ) -> Self {
        Self {
            posts,
            jobs,
            provider,
            model,
        }
    }

    /// Submit every non-empty pending job. Returns the provider handles of
    /// the jobs submitted this pass.
    ///
    /// A transient provider error leaves the job pending for the next
    /// tick; any other failure before the handle is recorded fails the job
    /// and moves on. Once the handle is recorded the job belongs to the
    /// provider.
    pub async fn submit_pending(&self) -> Result<Vec<String>, BatchError> {
        let pending = self.jobs.pending_jobs()?;
        if pending.is_empty() {
            debug!("No pending jobs to submit");
            return Ok(Vec::new());
        }
        info!("{} pending jobs await submission", pending.len());

        let mut submitted = Vec::new();
        for job in pending {
            let posts = self.posts.posts_for_job(&job.id)?;
            if posts.is_empty() {
                debug!("Pending job has no submittable posts, skipping. job: {}", job.id);
                continue;
            }

            match self.submit_job(&job, &posts).await {
                Ok(handle) => {
                    if self.jobs.mark_submitted(&job.id, &handle)? {
                        info!("Job submitted. job: {}, handle: {}", job.id, handle);
                        submitted.push(handle);
                    } else {
                        warn!(
                            "Job left pending state during submission. job: {}",
                            job.id
                        );
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "Job submission hit a transient provider error, will retry next tick. job: {}, error: {}",
                        job.id, e
                    );
                }
                Err(e) => {
                    error!("Job submission failed. job: {}, error: {}", job.id, e);
                    self.jobs.mark_failed(&job.id)?;
                }
            }
        }

        self.jobs.ensure_accepting()?;
        Ok(submitted)
    }

    async fn submit_job(&self, job: &AnalysisJob, posts: &[Post]) -> Result<String, BatchError> {
        // The staging file is removed on every exit path when it drops.
        let mut file = tempfile::Builder::new()
            .prefix("analysis-batch-")
            .suffix(".jsonl")
            .tempfile()?;
        for post in posts {
            let text = post.text.as_deref().unwrap_or_default();
            let line = request::request_line(&post.id, &post.title, text)?;
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }
        file.flush()?;

        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let upload_name = format!("file-{}-{}", job.short_id(), stamp);
        let batch_name = format!("batch-job-{}-{}", job.short_id(), stamp);
        let path = file.path().to_path_buf();

        let file_name =
            with_flood_wait(|| self.provider.upload_file(&path, &upload_name)).await?;
        let handle = with_flood_wait(|| {
            self.provider
                .create_batch(&self.model, &file_name, &batch_name)
        })
        .await?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use crate::provider::{BatchState, ProviderError};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Provider stub that records uploads and optionally fails them.
    #[derive(Default)]
    struct RecordingProvider {
        uploads: Mutex<Vec<String>>,
        fail_uploads: bool,
        transient_uploads: bool,
    }

    #[async_trait]
    impl BatchProvider for RecordingProvider {
        async fn upload_file(
            &self,
            path: &Path,
            _display_name: &str,
        ) -> Result<String, ProviderError> {
            if self.fail_uploads {
                return Err(ProviderError::Permanent {
                    status: 400,
                    message: "rejected".to_string(),
                });
            }
            if self.transient_uploads {
                return Err(ProviderError::Transient {
                    status: 503,
                    message: "overloaded".to_string(),
                });
            }
            let content = std::fs::read_to_string(path).unwrap();
            self.uploads.lock().unwrap().push(content);
            Ok(format!("files/{}", self.uploads.lock().unwrap().len()))
        }

        async fn create_batch(
            &self,
            _model: &str,
            file_name: &str,
            _display_name: &str,
        ) -> Result<String, ProviderError> {
            Ok(format!("batches/{}", file_name.trim_start_matches("files/")))
        }

        async fn batch_state(&self, _handle: &str) -> Result<Option<BatchState>, ProviderError> {
            Ok(Some(BatchState::Pending))
        }

        async fn result_file_name(&self, _handle: &str) -> Result<Option<String>, ProviderError> {
            Ok(None)
        }

        async fn download_file(&self, _file_name: &str) -> Result<Vec<u8>, ProviderError> {
            Ok(Vec::new())
        }
    }

    fn setup(
        provider: Arc<RecordingProvider>,
    ) -> (tempfile::TempDir, Arc<PostRepository>, Arc<JobRepository>, Submitter) {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        let timeout = Duration::from_secs(10);
        let posts = Arc::new(PostRepository::new(&db, timeout).unwrap());
        let jobs = Arc::new(JobRepository::new(&db, timeout).unwrap());
        let submitter = Submitter::new(
            Arc::clone(&posts),
            Arc::clone(&jobs),
            provider,
            "test-model".to_string(),
        );
        (dir, posts, jobs, submitter)
    }

    #[tokio::test]
    async fn test_submit_pending_uploads_one_line_per_post() {
        let provider = Arc::new(RecordingProvider::default());
        let (dir, posts, jobs, submitter) = setup(Arc::clone(&provider));
        let db = dir.path().join("test.db");

        for n in 0..2 {
            let mut post = Post::new(
                format!("Post {}", n),
                format!("https://example.com/{}", n),
                None,
            );
            post.text = Some(format!("content {}", n));
            posts.insert(&post).unwrap();
            jobs.register(&post.id, 100, 1024 * 1024).unwrap();
        }
        let job_id = jobs.accepting_job().unwrap().unwrap().id;
        let conn = rusqlite::Connection::open(&db).unwrap();
        let stale = (Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
        conn.execute(
            "UPDATE analysis_jobs SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![stale, job_id],
        )
        .unwrap();
        jobs.sweep_idle(Duration::from_secs(120)).unwrap();

        let handles = submitter.submit_pending().await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(
            jobs.get(&job_id).unwrap().unwrap().status,
            JobStatus::Submitted
        );
        assert_eq!(
            jobs.get(&job_id).unwrap().unwrap().provider_handle,
            Some(handles[0].clone())
        );

        let uploads = provider.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        let lines: Vec<&str> = uploads[0].lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value["key"].is_string());
            assert!(value["request"]["contents"].is_array());
        }
    }

    #[tokio::test]
    async fn test_submit_failure_fails_job() {
        let provider = Arc::new(RecordingProvider {
            fail_uploads: true,
            ..Default::default()
        });
        let (dir, posts, jobs, submitter) = setup(provider);
        let db = dir.path().join("test.db");

        let mut post = Post::new("P".to_string(), "https://example.com/x".to_string(), None);
        post.text = Some("content".to_string());
        posts.insert(&post).unwrap();
        jobs.register(&post.id, 100, 1024 * 1024).unwrap();
        let job_id = jobs.accepting_job().unwrap().unwrap().id;

        let conn = rusqlite::Connection::open(&db).unwrap();
        let stale = (Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
        conn.execute(
            "UPDATE analysis_jobs SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![stale, job_id],
        )
        .unwrap();
        jobs.sweep_idle(Duration::from_secs(120)).unwrap();

        let handles = submitter.submit_pending().await.unwrap();
        assert!(handles.is_empty());
        assert_eq!(jobs.get(&job_id).unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_job_pending() {
        let provider = Arc::new(RecordingProvider {
            transient_uploads: true,
            ..Default::default()
        });
        let (dir, posts, jobs, submitter) = setup(provider);
        let db = dir.path().join("test.db");

        let mut post = Post::new("P".to_string(), "https://example.com/y".to_string(), None);
        post.text = Some("content".to_string());
        posts.insert(&post).unwrap();
        jobs.register(&post.id, 100, 1024 * 1024).unwrap();
        let job_id = jobs.accepting_job().unwrap().unwrap().id;

        let conn = rusqlite::Connection::open(&db).unwrap();
        let stale = (Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
        conn.execute(
            "UPDATE analysis_jobs SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![stale, job_id],
        )
        .unwrap();
        jobs.sweep_idle(Duration::from_secs(120)).unwrap();

        let handles = submitter.submit_pending().await.unwrap();
        assert!(handles.is_empty());
        // The job waits for the next tick instead of failing.
        assert_eq!(jobs.get(&job_id).unwrap().unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_empty_pending_job_is_skipped() {
        let provider = Arc::new(RecordingProvider::default());
        let (_dir, _posts, jobs, submitter) = setup(provider);
        jobs.ensure_accepting().unwrap();

        let handles = submitter.submit_pending().await.unwrap();
        assert!(handles.is_empty());
    }
}
