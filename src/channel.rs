//! Channel ingestion capability.
//!
//! The messaging-platform client lives in an external ingestion service;
//! this module only carries the capability contract, the HTTP adapter, and
//! the write-back of ingestion outcomes onto posts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::queue::ChannelTask;
use crate::repository::PostRepository;

#[derive(Error, Debug)]
pub enum ChannelError {
    /// The channel cannot be ingested (gone, private, banned). These are
    /// expected outcomes: the identifier is marked processed with the error
    /// recorded.
    #[error("channel unavailable: {0}")]
    Unavailable(String),
    #[error("channel service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("channel service is not configured")]
    NotConfigured,
    #[error("malformed channel service response: {0}")]
    Malformed(String),
}

impl ChannelError {
    /// Expected failures settle the identifier; everything else leaves the
    /// task for redelivery.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Resolved channel metadata.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub channel_id: i64,
}

/// Capability contract for channel ingestion.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Join and ingest a channel by identifier, returning its resolved id.
    async fn ingest(&self, identifier: &str) -> Result<ChannelInfo, ChannelError>;
}

/// HTTP adapter to the external channel-ingestion service.
pub struct HttpChannelClient {
    http: Client,
    base_url: String,
}

impl HttpChannelClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChannelClient for HttpChannelClient {
    async fn ingest(&self, identifier: &str) -> Result<ChannelInfo, ChannelError> {
        let response = self
            .http
            .post(format!(
                "{}/channels/{}/ingest",
                self.base_url,
                urlencode(identifier)
            ))
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ChannelError::Unavailable(format!(
                "{}: {}",
                status, message
            )));
        }
        let response = response.error_for_status()?;

        let value: serde_json::Value = response.json().await?;
        let channel_id = value
            .get("channel_id")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| {
                ChannelError::Malformed("ingest response carries no channel_id".to_string())
            })?;
        Ok(ChannelInfo { channel_id })
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Handle one channel task: ingest the channel, then write the outcome back
/// onto the post at the task's identifier path.
///
/// Unexpected errors propagate so the broker redelivers the task.
pub async fn handle_channel_task(
    task: &ChannelTask,
    posts: &PostRepository,
    client: &dyn ChannelClient,
) -> Result<(), ChannelError> {
    info!("Collecting channel. identifier: {}", task.identifier);

    let outcome = client.ingest(&task.identifier).await;
    let (Some(post_id), Some(path)) = (task.post_id.as_deref(), task.path.as_deref()) else {
        // Direct search hits carry no back-reference; only the ingestion
        // side effect matters.
        return outcome.map(|_| ());
    };

    match outcome {
        Ok(info) => {
            write_back(posts, post_id, path, Some(info.channel_id), None);
            info!(
                "Channel ingested. identifier: {}, channel_id: {}",
                task.identifier, info.channel_id
            );
            Ok(())
        }
        Err(e) if e.is_expected() => {
            warn!(
                "Channel could not be ingested, recording the error. identifier: {}, error: {}",
                task.identifier, e
            );
            write_back(posts, post_id, path, None, Some(&e.to_string()));
            Ok(())
        }
        Err(e) => {
            error!(
                "Channel ingestion failed unexpectedly. identifier: {}, error: {}",
                task.identifier, e
            );
            Err(e)
        }
    }
}

fn write_back(
    posts: &PostRepository,
    post_id: &str,
    path: &str,
    channel_id: Option<i64>,
    error: Option<&str>,
) {
    if let Some(channel_id) = channel_id {
        match posts.set_identifier_channel(post_id, path, channel_id) {
            Ok(true) => {}
            Ok(false) => warn!(
                "Channel id write-back matched no post. post: {}, path: {}",
                post_id, path
            ),
            Err(e) => error!("Channel id write-back failed. post: {}, error: {}", post_id, e),
        }
    }
    match posts.mark_identifier_processed(post_id, path, error) {
        Ok(true) => {}
        Ok(false) => warn!(
            "Processed-flag write-back matched no post. post: {}, path: {}",
            post_id, path
        ),
        Err(e) => error!(
            "Processed-flag write-back failed. post: {}, error: {}",
            post_id, e
        ),
    }
}
