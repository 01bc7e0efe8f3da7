//! Batch inference provider capability.
//!
//! The batcher only depends on this contract; the SDK-specific mapping
//! lives in the adapter. Jobs on the remote side may take hours, so every
//! call is a snapshot, never a wait.

mod gemini;

pub use gemini::GeminiBatchClient;

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Remote state of a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Expired,
    /// A state this adapter does not recognise; reported verbatim.
    Other(String),
}

impl BatchState {
    /// Map the provider's job-state string.
    pub fn from_provider(state: &str) -> Self {
        match state {
            "JOB_STATE_PENDING" => Self::Pending,
            "JOB_STATE_RUNNING" => Self::Running,
            "JOB_STATE_SUCCEEDED" => Self::Succeeded,
            "JOB_STATE_FAILED" => Self::Failed,
            "JOB_STATE_CANCELLED" => Self::Cancelled,
            "JOB_STATE_EXPIRED" => Self::Expired,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rate limit, retry after {0:?}")]
    FloodWait(Duration),
    #[error("transient provider error ({status}): {message}")]
    Transient { status: u16, message: String },
    #[error("permanent provider error ({status}): {message}")]
    Permanent { status: u16, message: String },
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("request file error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Transient errors leave job state untouched; the next tick retries.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::FloodWait(_) | Self::Transient { .. } => true,
            Self::Permanent { .. } | Self::Malformed(_) | Self::Io(_) => false,
        }
    }
}

/// Capability contract for the batch inference provider.
#[async_trait]
pub trait BatchProvider: Send + Sync {
    /// Upload a request file; returns the provider-side file name.
    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
    ) -> Result<String, ProviderError>;

    /// Create a batch over an uploaded file; returns the batch handle.
    async fn create_batch(
        &self,
        model: &str,
        file_name: &str,
        display_name: &str,
    ) -> Result<String, ProviderError>;

    /// Remote state of a batch, or None when the provider does not know the
    /// handle (it may be briefly inconsistent; never treat as failure).
    async fn batch_state(&self, handle: &str) -> Result<Option<BatchState>, ProviderError>;

    /// Name of the batch's result file, or None while it is not available.
    async fn result_file_name(&self, handle: &str) -> Result<Option<String>, ProviderError>;

    /// Download a provider file.
    async fn download_file(&self, file_name: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Run a provider call, honouring a flood-wait signal once by sleeping the
/// requested duration before the retry.
pub async fn with_flood_wait<T, F, Fut>(op: F) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    match op().await {
        Err(ProviderError::FloodWait(wait)) => {
            tracing::warn!("Provider flood-wait, sleeping {:?} before retry", wait);
            tokio::time::sleep(wait).await;
            op().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            BatchState::from_provider("JOB_STATE_SUCCEEDED"),
            BatchState::Succeeded
        );
        assert_eq!(
            BatchState::from_provider("JOB_STATE_CANCELLED"),
            BatchState::Cancelled
        );
        assert_eq!(
            BatchState::from_provider("JOB_STATE_SOMETHING_NEW"),
            BatchState::Other("JOB_STATE_SOMETHING_NEW".to_string())
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Transient {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(ProviderError::FloodWait(Duration::from_secs(1)).is_transient());
        assert!(!ProviderError::Permanent {
            status: 400,
            message: String::new()
        }
        .is_transient());
    }

    #[tokio::test]
    async fn test_with_flood_wait_retries_once() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = AtomicU32::new(0);

        let result = with_flood_wait(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ProviderError::FloodWait(Duration::from_millis(1)))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
