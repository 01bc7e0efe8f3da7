//! Analysis job persistence and atomic state transitions.
//!
//! Two partial unique indexes back the batcher's invariants: at most one
//! job is in `accepting` status, and a post belongs to at most one active
//! (non-terminal) job. Every transition is a conditional update, so a stale
//! caller modifies nothing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use super::{
    connect, immediate_tx, is_unique_violation, parse_datetime, to_option, with_retry,
    RepositoryError, Result,
};
use crate::models::{AnalysisJob, BatchStatistics, JobStatus};

/// Outcome of registering a post into the open job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The post was appended to the returned job.
    Registered { job_id: String },
    /// Another worker already registered this post into an active job.
    AlreadyRegistered,
    /// The request alone exceeds the batch size cap and can never fit.
    RequestTooLarge,
}

impl RegisterOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered { .. })
    }
}

/// Repository for analysis jobs and their post memberships.
pub struct JobRepository {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl JobRepository {
    /// Open the repository and ensure its schema exists.
    pub fn new(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
            busy_timeout,
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        connect(&self.db_path, self.busy_timeout)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_jobs (
                id TEXT PRIMARY KEY,
                provider_handle TEXT,
                status TEXT NOT NULL,
                file_size_bytes INTEGER NOT NULL DEFAULT 0,
                post_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- At most one job accepts registrations at any time.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_single_accepting
                ON analysis_jobs (status) WHERE status = 'accepting';

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON analysis_jobs (status);

            CREATE TABLE IF NOT EXISTS job_posts (
                job_id TEXT NOT NULL,
                post_id TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (job_id, post_id)
            );

            -- A post belongs to at most one non-terminal job.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_job_posts_active
                ON job_posts (post_id) WHERE active = 1;
        "#,
        )?;
        Ok(())
    }

    /// Ensure exactly one accepting job exists, returning its id.
    pub fn ensure_accepting(&self) -> Result<String> {
        let conn = self.connect()?;
        with_retry(|| immediate_tx(&conn, Self::ensure_accepting_on))
    }

    fn ensure_accepting_on(conn: &Connection) -> Result<String> {
        if let Some(id) = to_option(conn.query_row(
            "SELECT id FROM analysis_jobs WHERE status = 'accepting'",
            [],
            |row| row.get(0),
        ))? {
            return Ok(id);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        match conn.execute(
            r#"
            INSERT INTO analysis_jobs (id, status, file_size_bytes, post_count, created_at, updated_at)
            VALUES (?1, 'accepting', 0, 0, ?2, ?2)
            "#,
            params![id, now],
        ) {
            Ok(_) => Ok(id),
            // A concurrent worker won the partial index; read the winner.
            Err(ref e) if is_unique_violation(e) => Ok(conn.query_row(
                "SELECT id FROM analysis_jobs WHERE status = 'accepting'",
                [],
                |row| row.get(0),
            )?),
            Err(e) => Err(e.into()),
        }
    }

    /// Register a post into the open job under the size cap.
    ///
    /// When the open job cannot fit the request, the open job (if non-empty)
    /// is flipped to pending and a fresh accepting job is created within the
    /// same transaction, then placement is retried. The job counters and the
    /// post's back-reference commit atomically.
    pub fn register(
        &self,
        post_id: &str,
        estimated_bytes: u64,
        max_batch_bytes: u64,
    ) -> Result<RegisterOutcome> {
        if estimated_bytes > max_batch_bytes {
            return Ok(RegisterOutcome::RequestTooLarge);
        }

        let conn = self.connect()?;
        let result = with_retry(|| {
            immediate_tx(&conn, |conn| {
                loop {
                    let now = Utc::now().to_rfc3339();
                    let job_id: Option<String> = to_option(conn.query_row(
                        r#"
                        UPDATE analysis_jobs
                        SET file_size_bytes = file_size_bytes + ?1,
                            post_count = post_count + 1,
                            updated_at = ?2
                        WHERE status = 'accepting'
                          AND file_size_bytes + ?1 <= ?3
                        RETURNING id
                        "#,
                        params![estimated_bytes as i64, now, max_batch_bytes as i64],
                        |row| row.get(0),
                    ))?;

                    let Some(job_id) = job_id else {
                        // Rollover: retire the full open job, then retry
                        // against a fresh one.
                        conn.execute(
                            r#"
                            UPDATE analysis_jobs SET status = 'pending', updated_at = ?1
                            WHERE status = 'accepting' AND post_count > 0
                            "#,
                            params![now],
                        )?;
                        Self::ensure_accepting_on(conn)?;
                        continue;
                    };

                    if let Err(e) = conn.execute(
                        "INSERT INTO job_posts (job_id, post_id, active) VALUES (?1, ?2, 1)",
                        params![job_id, post_id],
                    ) {
                        if is_unique_violation(&e) {
                            // The post is already owned by an active job;
                            // roll back the counter bump.
                            return Err(RepositoryError::Duplicate);
                        }
                        return Err(e.into());
                    }

                    conn.execute(
                        "UPDATE posts SET analysis_job_id = ?1, updated_at = ?2 WHERE id = ?3",
                        params![job_id, now, post_id],
                    )?;

                    return Ok(job_id);
                }
            })
        });

        match result {
            Ok(job_id) => Ok(RegisterOutcome::Registered { job_id }),
            Err(RepositoryError::Duplicate) => Ok(RegisterOutcome::AlreadyRegistered),
            Err(e) => Err(e),
        }
    }

    /// Flip the open job to pending after a quiescence window, then ensure a
    /// fresh accepting job exists. Returns the flipped job's id, if any.
    ///
    /// An empty open job is never flipped.
    pub fn sweep_idle(&self, idle: Duration) -> Result<Option<String>> {
        let conn = self.connect()?;
        with_retry(|| {
            immediate_tx(&conn, |conn| {
                let now = Utc::now();
                let cutoff = (now - chrono::Duration::seconds(idle.as_secs() as i64)).to_rfc3339();
                let flipped = to_option(conn.query_row(
                    r#"
                    UPDATE analysis_jobs SET status = 'pending', updated_at = ?1
                    WHERE status = 'accepting' AND post_count > 0 AND updated_at < ?2
                    RETURNING id
                    "#,
                    params![now.to_rfc3339(), cutoff],
                    |row| row.get(0),
                ))?;
                Self::ensure_accepting_on(conn)?;
                Ok(flipped)
            })
        })
    }

    /// Record the provider handle and advance pending → submitted.
    pub fn mark_submitted(&self, job_id: &str, provider_handle: &str) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            r#"
            UPDATE analysis_jobs
            SET provider_handle = ?1, status = 'submitted', updated_at = ?2
            WHERE id = ?3 AND status = 'pending'
            "#,
            params![provider_handle, Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(changed == 1)
    }

    /// Advance submitted → processed.
    pub fn mark_processed(&self, job_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE analysis_jobs SET status = 'processed', updated_at = ?1
             WHERE id = ?2 AND status = 'submitted'",
            params![Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(changed == 1)
    }

    /// Fail a job and release its posts for re-registration.
    ///
    /// Completed jobs are immutable and are never failed.
    pub fn mark_failed(&self, job_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        with_retry(|| {
            immediate_tx(&conn, |conn| {
                let changed = conn.execute(
                    "UPDATE analysis_jobs SET status = 'failed', updated_at = ?1
                     WHERE id = ?2 AND status NOT IN ('completed', 'failed')",
                    params![Utc::now().to_rfc3339(), job_id],
                )?;
                if changed == 1 {
                    conn.execute(
                        "UPDATE job_posts SET active = 0 WHERE job_id = ?1",
                        params![job_id],
                    )?;
                }
                Ok(changed == 1)
            })
        })
    }

    /// Advance processed → completed and release the job's posts.
    pub fn mark_completed(&self, job_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        with_retry(|| {
            immediate_tx(&conn, |conn| {
                let changed = conn.execute(
                    "UPDATE analysis_jobs SET status = 'completed', updated_at = ?1
                     WHERE id = ?2 AND status = 'processed'",
                    params![Utc::now().to_rfc3339(), job_id],
                )?;
                if changed == 1 {
                    conn.execute(
                        "UPDATE job_posts SET active = 0 WHERE job_id = ?1",
                        params![job_id],
                    )?;
                }
                Ok(changed == 1)
            })
        })
    }

    /// Fail every non-completed job and re-ensure the single accepting job.
    /// Returns the number of jobs flipped.
    pub fn reset(&self) -> Result<u32> {
        let conn = self.connect()?;
        with_retry(|| {
            immediate_tx(&conn, |conn| {
                let flipped = conn.execute(
                    "UPDATE analysis_jobs SET status = 'failed', updated_at = ?1
                     WHERE status != 'completed'",
                    params![Utc::now().to_rfc3339()],
                )?;
                conn.execute(
                    "UPDATE job_posts SET active = 0
                     WHERE job_id IN (SELECT id FROM analysis_jobs WHERE status = 'failed')",
                    [],
                )?;
                Self::ensure_accepting_on(conn)?;
                Ok(flipped as u32)
            })
        })
    }

    /// Get a job by id.
    pub fn get(&self, job_id: &str) -> Result<Option<AnalysisJob>> {
        let conn = self.connect()?;
        to_option(conn.query_row(
            "SELECT * FROM analysis_jobs WHERE id = ?1",
            params![job_id],
            row_to_job,
        ))
    }

    /// The currently accepting job, if one exists.
    pub fn accepting_job(&self) -> Result<Option<AnalysisJob>> {
        let conn = self.connect()?;
        to_option(conn.query_row(
            "SELECT * FROM analysis_jobs WHERE status = 'accepting'",
            [],
            row_to_job,
        ))
    }

    /// All jobs in the given status, oldest first.
    pub fn find_by_status(&self, status: JobStatus) -> Result<Vec<AnalysisJob>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM analysis_jobs WHERE status = ?1 ORDER BY created_at ASC",
        )?;
        let jobs = stmt
            .query_map(params![status.as_str()], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Non-empty pending jobs awaiting submission.
    pub fn pending_jobs(&self) -> Result<Vec<AnalysisJob>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM analysis_jobs
             WHERE status = 'pending' AND post_count > 0
             ORDER BY created_at ASC",
        )?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Submitted jobs that carry a provider handle.
    pub fn submitted_jobs(&self) -> Result<Vec<AnalysisJob>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM analysis_jobs
             WHERE status = 'submitted' AND provider_handle IS NOT NULL
             ORDER BY created_at ASC",
        )?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Processed jobs whose results are ready to download.
    pub fn processed_jobs(&self) -> Result<Vec<AnalysisJob>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM analysis_jobs
             WHERE status = 'processed' AND provider_handle IS NOT NULL
             ORDER BY created_at ASC",
        )?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Ids of all posts ever registered into a job.
    pub fn job_post_ids(&self, job_id: &str) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT post_id FROM job_posts WHERE job_id = ?1 ORDER BY post_id")?;
        let ids = stmt
            .query_map(params![job_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Status histogram plus request counts for the operator surface.
    pub fn statistics(&self) -> Result<BatchStatistics> {
        let conn = self.connect()?;
        let mut stats = BatchStatistics::default();
        for status in JobStatus::ALL {
            stats
                .job_status_counts
                .insert(status.as_str().to_string(), 0);
        }

        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM analysis_jobs GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (status, count) in counts {
            stats.job_status_counts.insert(status, count as u32);
        }

        stats.pending_requests = conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM job_posts jp
            JOIN analysis_jobs j ON j.id = jp.job_id
            JOIN posts p ON p.id = jp.post_id
            WHERE jp.active = 1
              AND j.status IN ('accepting', 'pending')
              AND p.analysis IS NULL
            "#,
            [],
            |row| row.get::<_, i64>(0),
        )? as u32;

        stats.processed_requests = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE analysis IS NOT NULL",
            [],
            |row| row.get::<_, i64>(0),
        )? as u32;

        stats.total_requests = stats.pending_requests + stats.processed_requests;
        Ok(stats)
    }
}

fn row_to_job(row: &Row) -> rusqlite::Result<AnalysisJob> {
    let status_str: String = row.get("status")?;
    Ok(AnalysisJob {
        id: row.get("id")?,
        provider_handle: row.get("provider_handle")?,
        status: JobStatus::from_str(&status_str).unwrap_or(JobStatus::Failed),
        file_size_bytes: row.get::<_, i64>("file_size_bytes")? as u64,
        post_count: row.get::<_, i64>("post_count")? as u32,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::super::PostRepository;
    use super::*;
    use crate::models::Post;
    use tempfile::tempdir;

    const MAX: u64 = 1024 * 1024 * 1024;
    const TIMEOUT: Duration = Duration::from_secs(10);

    fn setup() -> (tempfile::TempDir, PostRepository, JobRepository) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let posts = PostRepository::new(&db_path, TIMEOUT).unwrap();
        let jobs = JobRepository::new(&db_path, TIMEOUT).unwrap();
        (dir, posts, jobs)
    }

    fn seed_post(posts: &PostRepository, n: u32) -> String {
        let mut post = Post::new(
            format!("Post {}", n),
            format!("https://example.com/p/{}", n),
            Some("example.com".to_string()),
        );
        post.text = Some(format!("content of post {}", n));
        posts.insert(&post).unwrap();
        post.id
    }

    #[test]
    fn test_ensure_accepting_is_idempotent() {
        let (_dir, _posts, jobs) = setup();
        let first = jobs.ensure_accepting().unwrap();
        let second = jobs.ensure_accepting().unwrap();
        assert_eq!(first, second);

        let accepting = jobs.accepting_job().unwrap().unwrap();
        assert_eq!(accepting.id, first);
        assert_eq!(accepting.post_count, 0);
        assert_eq!(accepting.file_size_bytes, 0);
    }

    #[test]
    fn test_register_accumulates_into_single_job() {
        let (_dir, posts, jobs) = setup();
        let ids: Vec<String> = (0..3).map(|n| seed_post(&posts, n)).collect();

        for id in &ids {
            let outcome = jobs.register(id, 100, MAX).unwrap();
            assert!(outcome.is_registered());
        }

        let job = jobs.accepting_job().unwrap().unwrap();
        assert_eq!(job.post_count, 3);
        assert_eq!(job.file_size_bytes, 300);
        assert_eq!(jobs.job_post_ids(&job.id).unwrap().len(), 3);

        // Back-references point at the open job.
        for id in &ids {
            let post = posts.get(id).unwrap().unwrap();
            assert_eq!(post.analysis_job_id.as_deref(), Some(job.id.as_str()));
        }
    }

    #[test]
    fn test_register_twice_counts_once() {
        let (_dir, posts, jobs) = setup();
        let id = seed_post(&posts, 1);

        assert!(jobs.register(&id, 100, MAX).unwrap().is_registered());
        assert_eq!(
            jobs.register(&id, 100, MAX).unwrap(),
            RegisterOutcome::AlreadyRegistered
        );

        let job = jobs.accepting_job().unwrap().unwrap();
        assert_eq!(job.post_count, 1);
        assert_eq!(job.file_size_bytes, 100);
    }

    #[test]
    fn test_register_rolls_over_at_cap() {
        let (_dir, posts, jobs) = setup();
        let ids: Vec<String> = (0..3).map(|n| seed_post(&posts, n)).collect();

        for id in &ids {
            assert!(jobs.register(id, 100, 250).unwrap().is_registered());
        }

        let pending = jobs.pending_jobs().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].post_count, 2);
        assert_eq!(pending[0].file_size_bytes, 200);

        let accepting = jobs.accepting_job().unwrap().unwrap();
        assert_eq!(accepting.post_count, 1);
        assert_eq!(accepting.file_size_bytes, 100);

        // The two jobs partition the posts disjointly.
        let mut all_ids = jobs.job_post_ids(&pending[0].id).unwrap();
        all_ids.extend(jobs.job_post_ids(&accepting.id).unwrap());
        all_ids.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(all_ids, expected);
    }

    #[test]
    fn test_register_exact_cap_fits_fresh_job() {
        let (_dir, posts, jobs) = setup();
        let first = seed_post(&posts, 1);
        let second = seed_post(&posts, 2);

        assert!(jobs.register(&first, MAX, MAX).unwrap().is_registered());
        let full = jobs.accepting_job().unwrap().unwrap();
        assert_eq!(full.file_size_bytes, MAX);

        // A second cap-sized request triggers rollover into a new open job.
        assert!(jobs.register(&second, MAX, MAX).unwrap().is_registered());
        let accepting = jobs.accepting_job().unwrap().unwrap();
        assert_ne!(accepting.id, full.id);
        assert_eq!(jobs.get(&full.id).unwrap().unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_register_oversized_request() {
        let (_dir, posts, jobs) = setup();
        let id = seed_post(&posts, 1);
        assert_eq!(
            jobs.register(&id, 251, 250).unwrap(),
            RegisterOutcome::RequestTooLarge
        );
    }

    #[test]
    fn test_sweep_idle_skips_empty_and_fresh_jobs() {
        let (_dir, posts, jobs) = setup();
        jobs.ensure_accepting().unwrap();

        // Empty job: never flipped.
        assert!(jobs.sweep_idle(Duration::from_secs(0)).unwrap().is_none());

        let id = seed_post(&posts, 1);
        jobs.register(&id, 100, MAX).unwrap();

        // Non-empty but recently touched: not idle yet.
        assert!(jobs.sweep_idle(Duration::from_secs(120)).unwrap().is_none());
    }

    #[test]
    fn test_sweep_idle_flips_quiescent_job() {
        let (_dir, posts, jobs) = setup();
        let id = seed_post(&posts, 1);
        jobs.register(&id, 100, MAX).unwrap();
        let open = jobs.accepting_job().unwrap().unwrap();

        // Backdate the open job past the idle window.
        let conn = jobs.connect().unwrap();
        let stale = (Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
        conn.execute(
            "UPDATE analysis_jobs SET updated_at = ?1 WHERE id = ?2",
            params![stale, open.id],
        )
        .unwrap();

        let flipped = jobs.sweep_idle(Duration::from_secs(120)).unwrap();
        assert_eq!(flipped.as_deref(), Some(open.id.as_str()));
        assert_eq!(jobs.get(&open.id).unwrap().unwrap().status, JobStatus::Pending);

        // A fresh accepting job took its place.
        let accepting = jobs.accepting_job().unwrap().unwrap();
        assert_ne!(accepting.id, open.id);
        assert_eq!(accepting.post_count, 0);
    }

    #[test]
    fn test_lifecycle_transitions_are_conditional() {
        let (_dir, posts, jobs) = setup();
        let id = seed_post(&posts, 1);
        jobs.register(&id, 100, MAX).unwrap();
        let job_id = jobs.accepting_job().unwrap().unwrap().id;

        // Submitting an accepting job is a no-op.
        assert!(!jobs.mark_submitted(&job_id, "batches/x").unwrap());

        let conn = jobs.connect().unwrap();
        let stale = (Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
        conn.execute(
            "UPDATE analysis_jobs SET updated_at = ?1 WHERE id = ?2",
            params![stale, job_id],
        )
        .unwrap();
        jobs.sweep_idle(Duration::from_secs(120)).unwrap();

        assert!(jobs.mark_submitted(&job_id, "batches/x").unwrap());
        assert!(jobs.mark_processed(&job_id).unwrap());
        assert!(jobs.mark_completed(&job_id).unwrap());

        // Completed is stable: no further transitions apply.
        assert!(!jobs.mark_processed(&job_id).unwrap());
        assert!(!jobs.mark_failed(&job_id).unwrap());
        assert_eq!(
            jobs.get(&job_id).unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[test]
    fn test_failed_job_releases_posts() {
        let (_dir, posts, jobs) = setup();
        let id = seed_post(&posts, 1);
        jobs.register(&id, 100, MAX).unwrap();
        let job_id = jobs.accepting_job().unwrap().unwrap().id;

        assert!(jobs.mark_failed(&job_id).unwrap());
        jobs.ensure_accepting().unwrap();

        // The post can be registered again into the new open job.
        let outcome = jobs.register(&id, 100, MAX).unwrap();
        assert!(outcome.is_registered());
        let RegisterOutcome::Registered { job_id: new_job } = outcome else {
            unreachable!()
        };
        assert_ne!(new_job, job_id);
    }

    #[test]
    fn test_reset_fails_everything_but_completed() {
        let (_dir, posts, jobs) = setup();
        let first = seed_post(&posts, 1);
        jobs.register(&first, 100, 150).unwrap();
        let second = seed_post(&posts, 2);
        jobs.register(&second, 100, 150).unwrap();

        let flipped = jobs.reset().unwrap();
        assert!(flipped >= 2);

        assert!(jobs.pending_jobs().unwrap().is_empty());
        let accepting = jobs.accepting_job().unwrap().unwrap();
        assert_eq!(accepting.post_count, 0);
        assert_eq!(
            *jobs
                .statistics()
                .unwrap()
                .job_status_counts
                .get("accepting")
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_statistics_counts() {
        let (_dir, posts, jobs) = setup();
        let id = seed_post(&posts, 1);
        jobs.register(&id, 100, MAX).unwrap();

        let stats = jobs.statistics().unwrap();
        assert_eq!(*stats.job_status_counts.get("accepting").unwrap(), 1);
        assert_eq!(stats.pending_requests, 1);
        assert_eq!(stats.processed_requests, 0);
        assert_eq!(stats.total_requests, 1);
    }
}
