//! Download and application of processed job results.
//!
//! Result files are newline-delimited JSON, one response per registered
//! post. Applying a line is an unconditional set of a pure function of the
//! provider's output, so re-running a partially applied job converges; the
//! final processed → completed flip guarantees the loop runs at most once
//! per completed job.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::BatchError;
use crate::models::PostAnalysis;
use crate::provider::{with_flood_wait, BatchProvider};
use crate::repository::{JobRepository, PostRepository};

/// Why one result line could not be applied.
#[derive(Error, Debug)]
pub enum MalformedLine {
    #[error("line is not JSON: {0}")]
    NotJson(serde_json::Error),
    #[error("line carries no post key")]
    MissingKey,
    #[error("line carries no analysis payload")]
    MissingPayload,
    #[error("analysis payload does not match the schema: {0}")]
    SchemaMismatch(serde_json::Error),
}

/// Parse one result line into the post key and its raw analysis payload.
fn parse_result_line(line: &str) -> Result<(String, String), MalformedLine> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(MalformedLine::NotJson)?;
    let key = value
        .get("key")
        .and_then(serde_json::Value::as_str)
        .ok_or(MalformedLine::MissingKey)?
        .to_string();
    let payload = value
        .pointer("/response/candidates/0/content/parts/0/text")
        .and_then(serde_json::Value::as_str)
        .ok_or(MalformedLine::MissingPayload)?
        .to_string();
    Ok((key, payload))
}

/// Validate a raw payload against the analysis schema.
fn decode_analysis(payload: &str) -> Result<PostAnalysis, MalformedLine> {
    serde_json::from_str(payload).map_err(MalformedLine::SchemaMismatch)
}

/// Counters for one completion pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompletionReport {
    /// Jobs found in processed state.
    pub processed_job_count: u32,
    /// Jobs fully applied and flipped to completed.
    pub completed_job_count: u32,
    /// Result lines successfully applied to posts.
    pub completed_request_count: u32,
}

pub struct Completer {
    posts: Arc<PostRepository>,
    jobs: Arc<JobRepository>,
    provider: Arc<dyn BatchProvider>,
}

impl Completer {
    pub fn new(
        posts: Arc<PostRepository>,
        jobs: Arc<JobRepository>,
        provider: Arc<dyn BatchProvider>,
    ) -> Self {
        Self {
            posts,
            jobs,
            provider,
        }
    }

    /// Download and apply the results of every processed job.
    ///
    /// A job whose result file is not available yet is skipped and retried
    /// next tick. Malformed lines are logged and skipped without blocking
    /// the rest of the job.
    pub async fn complete_processed(&self) -> Result<CompletionReport, BatchError> {
        let mut report = CompletionReport::default();
        let processed = self.jobs.processed_jobs()?;
        if processed.is_empty() {
            debug!("No processed jobs to complete");
            return Ok(report);
        }
        report.processed_job_count = processed.len() as u32;
        info!("{} processed jobs await completion", processed.len());

        for job in processed {
            let Some(handle) = job.provider_handle.clone() else {
                continue;
            };

            let file_name = match with_flood_wait(|| self.provider.result_file_name(&handle)).await
            {
                Ok(Some(name)) => name,
                Ok(None) => {
                    warn!(
                        "Processed job has no result file yet, will retry. job: {}, handle: {}",
                        job.id, handle
                    );
                    continue;
                }
                Err(e) => {
                    warn!("Failed to locate result file, will retry. job: {}, error: {}", job.id, e);
                    continue;
                }
            };

            info!("Downloading result file. job: {}, file: {}", job.id, file_name);
            let bytes = match with_flood_wait(|| self.provider.download_file(&file_name)).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Result download failed, will retry. job: {}, error: {}", job.id, e);
                    continue;
                }
            };
            let Ok(text) = String::from_utf8(bytes) else {
                warn!("Result file is not UTF-8, will retry. job: {}", job.id);
                continue;
            };

            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if self.apply_line(line)? {
                    report.completed_request_count += 1;
                }
            }

            if self.jobs.mark_completed(&job.id)? {
                report.completed_job_count += 1;
            } else {
                warn!("Job left processed state during completion. job: {}", job.id);
            }
        }

        info!(
            "Applied {} of {} processed jobs ({} responses)",
            report.completed_job_count, report.processed_job_count, report.completed_request_count
        );
        Ok(report)
    }

    fn apply_line(&self, line: &str) -> Result<bool, BatchError> {
        let (key, payload) = match parse_result_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Skipping malformed result line: {}. line: {}", e, line);
                return Ok(false);
            }
        };

        self.posts.touch(&key)?;

        let analysis = match decode_analysis(&payload) {
            Ok(analysis) => analysis,
            Err(e) => {
                error!("Skipping invalid analysis payload: {}. post: {}", e, key);
                return Ok(false);
            }
        };

        if !self.posts.set_analysis(&key, &analysis)? {
            warn!("Result line references an unknown post. post: {}", key);
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, Post};
    use crate::provider::{BatchState, ProviderError};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn result_line(key: &str, payload: &str) -> String {
        serde_json::json!({
            "key": key,
            "response": {
                "candidates": [
                    { "content": { "parts": [ { "text": payload } ] } }
                ]
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_result_line() {
        let line = result_line("post-1", r#"{"drugs_related":true,"promotions":[]}"#);
        let (key, payload) = parse_result_line(&line).unwrap();
        assert_eq!(key, "post-1");
        assert!(decode_analysis(&payload).unwrap().drugs_related);
    }

    #[test]
    fn test_parse_rejects_broken_lines() {
        assert!(matches!(
            parse_result_line("not json at all"),
            Err(MalformedLine::NotJson(_))
        ));
        assert!(matches!(
            parse_result_line(r#"{"response":{}}"#),
            Err(MalformedLine::MissingKey)
        ));
        assert!(matches!(
            parse_result_line(r#"{"key":"x","response":{"candidates":[]}}"#),
            Err(MalformedLine::MissingPayload)
        ));
    }

    #[test]
    fn test_decode_rejects_schema_mismatch() {
        assert!(matches!(
            decode_analysis(r#"{"drugs_related":true}"#),
            Err(MalformedLine::SchemaMismatch(_))
        ));
        assert!(matches!(
            decode_analysis("[1,2,3]"),
            Err(MalformedLine::SchemaMismatch(_))
        ));
    }

    /// Provider stub serving one canned result file.
    struct ResultProvider {
        file: String,
        body: Vec<u8>,
    }

    #[async_trait]
    impl BatchProvider for ResultProvider {
        async fn upload_file(&self, _: &Path, _: &str) -> Result<String, ProviderError> {
            unimplemented!()
        }

        async fn create_batch(&self, _: &str, _: &str, _: &str) -> Result<String, ProviderError> {
            unimplemented!()
        }

        async fn batch_state(&self, _: &str) -> Result<Option<BatchState>, ProviderError> {
            Ok(Some(BatchState::Succeeded))
        }

        async fn result_file_name(&self, _: &str) -> Result<Option<String>, ProviderError> {
            Ok(Some(self.file.clone()))
        }

        async fn download_file(&self, _: &str) -> Result<Vec<u8>, ProviderError> {
            Ok(self.body.clone())
        }
    }

    fn processed_job(db: &Path, post_ids: &mut Vec<String>) -> (Arc<PostRepository>, Arc<JobRepository>, String) {
        let timeout = Duration::from_secs(10);
        let posts = Arc::new(PostRepository::new(db, timeout).unwrap());
        let jobs = Arc::new(JobRepository::new(db, timeout).unwrap());

        for n in 0..3 {
            let mut post = Post::new(
                format!("Post {}", n),
                format!("https://example.com/{}", n),
                None,
            );
            post.text = Some(format!("content {}", n));
            posts.insert(&post).unwrap();
            jobs.register(&post.id, 100, 1024 * 1024).unwrap();
            post_ids.push(post.id);
        }
        let job_id = jobs.accepting_job().unwrap().unwrap().id;

        let conn = rusqlite::Connection::open(db).unwrap();
        let stale = (Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
        conn.execute(
            "UPDATE analysis_jobs SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![stale, job_id],
        )
        .unwrap();
        jobs.sweep_idle(Duration::from_secs(120)).unwrap();
        jobs.mark_submitted(&job_id, "batches/r").unwrap();
        jobs.mark_processed(&job_id).unwrap();
        (posts, jobs, job_id)
    }

    #[tokio::test]
    async fn test_complete_applies_results_and_flips_job() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("t.db");
        let mut post_ids = Vec::new();
        let (posts, jobs, job_id) = processed_job(&db, &mut post_ids);

        let payload = r#"{"drugs_related":true,"promotions":[{"content":"dm me","identifiers":[{"identifier":"t.me/chan"}]}]}"#;
        let body = post_ids
            .iter()
            .map(|id| result_line(id, payload))
            .collect::<Vec<_>>()
            .join("\n");
        let provider = Arc::new(ResultProvider {
            file: "files/result".to_string(),
            body: body.into_bytes(),
        });

        let completer = Completer::new(Arc::clone(&posts), Arc::clone(&jobs), provider);
        let report = completer.complete_processed().await.unwrap();
        assert_eq!(report.processed_job_count, 1);
        assert_eq!(report.completed_job_count, 1);
        assert_eq!(report.completed_request_count, 3);
        assert_eq!(
            jobs.get(&job_id).unwrap().unwrap().status,
            JobStatus::Completed
        );

        for id in &post_ids {
            let analysis = posts.get(id).unwrap().unwrap().analysis.unwrap();
            assert!(analysis.drugs_related);
            assert_eq!(
                analysis.promotions[0].identifiers[0].identifier,
                "t.me/chan"
            );
        }
    }

    #[tokio::test]
    async fn test_complete_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("t.db");
        let mut post_ids = Vec::new();
        let (posts, jobs, _job_id) = processed_job(&db, &mut post_ids);

        let payload = r#"{"drugs_related":false,"promotions":[]}"#;
        let body = post_ids
            .iter()
            .map(|id| result_line(id, payload))
            .collect::<Vec<_>>()
            .join("\n");
        let provider = Arc::new(ResultProvider {
            file: "files/result".to_string(),
            body: body.into_bytes(),
        });

        let completer = Completer::new(Arc::clone(&posts), Arc::clone(&jobs), provider);
        completer.complete_processed().await.unwrap();
        let first: Vec<_> = post_ids
            .iter()
            .map(|id| posts.get(id).unwrap().unwrap().analysis)
            .collect();

        // The second pass sees no processed jobs and changes nothing.
        let report = completer.complete_processed().await.unwrap();
        assert_eq!(report.processed_job_count, 0);
        let second: Vec<_> = post_ids
            .iter()
            .map(|id| posts.get(id).unwrap().unwrap().analysis)
            .collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("t.db");
        let mut post_ids = Vec::new();
        let (posts, jobs, job_id) = processed_job(&db, &mut post_ids);

        let good = r#"{"drugs_related":false,"promotions":[]}"#;
        let body = format!(
            "{}\nnot json\n{}\n\n{}",
            result_line(&post_ids[0], good),
            result_line(&post_ids[1], r#"{"promotions":[]}"#),
            result_line(&post_ids[2], good),
        );
        let provider = Arc::new(ResultProvider {
            file: "files/result".to_string(),
            body: body.into_bytes(),
        });

        let completer = Completer::new(Arc::clone(&posts), Arc::clone(&jobs), provider);
        let report = completer.complete_processed().await.unwrap();
        assert_eq!(report.completed_request_count, 2);
        assert_eq!(report.completed_job_count, 1);
        assert_eq!(
            jobs.get(&job_id).unwrap().unwrap().status,
            JobStatus::Completed
        );
        assert!(posts.get(&post_ids[0]).unwrap().unwrap().analysis.is_some());
        assert!(posts.get(&post_ids[1]).unwrap().unwrap().analysis.is_none());
    }
}
