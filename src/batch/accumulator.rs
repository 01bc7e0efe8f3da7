//! Registration of crawled posts into the open analysis job.
//!
//! The accumulator is the only writer of the accepting job. Correctness
//! does not depend on running a single instance, but deployments should,
//! to keep transaction conflicts low.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::{request, BatchError};
use crate::models::Post;
use crate::repository::{JobRepository, PostRepository, RegisterOutcome};

pub struct Accumulator {
    posts: Arc<PostRepository>,
    jobs: Arc<JobRepository>,
    max_batch_bytes: u64,
    idle: Duration,
}

impl Accumulator {
    pub fn new(
        posts: Arc<PostRepository>,
        jobs: Arc<JobRepository>,
        max_batch_bytes: u64,
        idle: Duration,
    ) -> Self {
        Self {
            posts,
            jobs,
            max_batch_bytes,
            idle,
        }
    }

    /// Ensure the open job exists. Runs before the first registration.
    pub fn start(&self) -> Result<(), BatchError> {
        self.jobs.ensure_accepting()?;
        Ok(())
    }

    /// Register a post by id with a precomputed size estimate.
    ///
    /// Returns false when another worker already registered the post; that
    /// is the normal duplicate-suppression path, not an error.
    pub fn register(&self, post_id: &str, estimated_bytes: u64) -> Result<bool, BatchError> {
        match self
            .jobs
            .register(post_id, estimated_bytes, self.max_batch_bytes)?
        {
            RegisterOutcome::Registered { job_id } => {
                info!("Registered post into job. post: {}, job: {}", post_id, job_id);
                Ok(true)
            }
            RegisterOutcome::AlreadyRegistered => {
                warn!(
                    "Post is already registered in another active job. post: {}",
                    post_id
                );
                Ok(false)
            }
            RegisterOutcome::RequestTooLarge => {
                warn!(
                    "Post request exceeds the batch size cap and was skipped. post: {}",
                    post_id
                );
                Ok(false)
            }
        }
    }

    /// Register a loaded post, computing its request size.
    ///
    /// Posts without crawled text, or with an analysis already applied, are
    /// skipped.
    pub fn register_post(&self, post: &Post) -> Result<bool, BatchError> {
        if !post.is_analyzable() {
            warn!("Post is not eligible for analysis. post: {}", post.id);
            return Ok(false);
        }
        self.register(&post.id, request::estimate_request_size(post))
    }

    /// Register every eligible post that is not held by an active job.
    /// Posts whose previous job failed are picked up again here.
    pub fn register_all(&self) -> Result<u32, BatchError> {
        let mut registered = 0;
        for post in self.posts.registrable_posts()? {
            if self.register_post(&post)? {
                registered += 1;
            }
        }
        info!("Re-registration pass registered {} posts", registered);
        Ok(registered)
    }

    /// Flip the open job to pending once it has been quiet for the idle
    /// window, and replace it with a fresh one.
    pub fn sweep_idle(&self) -> Result<Option<String>, BatchError> {
        let flipped = self.jobs.sweep_idle(self.idle)?;
        match &flipped {
            Some(job_id) => info!("Idle open job flipped to pending. job: {}", job_id),
            None => tracing::debug!("No idle open job to flip"),
        }
        Ok(flipped)
    }
}
