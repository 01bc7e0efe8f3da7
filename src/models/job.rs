//! Analysis job models.
//!
//! A job is a size-bounded batch of posts submitted together to the
//! inference provider. Exactly one job accepts registrations at a time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an analysis job.
///
/// Transitions are totally ordered per job: accepting → pending → submitted
/// → processed → completed, with failed reachable from any non-completed
/// state. Completed is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Open for registration; the single write target for the accumulator.
    Accepting,
    /// Full or idle-flipped; waiting to be submitted.
    Pending,
    /// Handed to the provider; identified by `provider_handle`.
    Submitted,
    /// The provider succeeded; results not yet downloaded and applied.
    Processed,
    /// Results applied to all posts.
    Completed,
    /// Submission or remote execution failed.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepting => "accepting",
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Processed => "processed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "accepting" => Some(Self::Accepting),
            "pending" => Some(Self::Pending),
            "submitted" => Some(Self::Submitted),
            "processed" => Some(Self::Processed),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states release their posts for re-registration.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub const ALL: [JobStatus; 6] = [
        Self::Accepting,
        Self::Pending,
        Self::Submitted,
        Self::Processed,
        Self::Completed,
        Self::Failed,
    ];
}

/// A batch of posts destined for one provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    /// Unique identifier for this job.
    pub id: String,
    /// Opaque handle assigned by the provider on submit.
    pub provider_handle: Option<String>,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Running sum of per-post request size estimates.
    pub file_size_bytes: u64,
    /// Number of posts registered into this job.
    pub post_count: u32,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last modified.
    pub updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    /// Short id prefix used in provider display names.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }
}

/// Snapshot of batch state for the operator surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStatistics {
    /// Job count per status.
    pub job_status_counts: BTreeMap<String, u32>,
    /// Posts registered in open or pending jobs, not yet analyzed.
    pub pending_requests: u32,
    /// Posts with an applied analysis.
    pub processed_requests: u32,
    /// Sum of the above.
    pub total_requests: u32,
}
