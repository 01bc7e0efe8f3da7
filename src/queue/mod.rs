//! Work-queue routing for the pipeline stages.
//!
//! Five durable named queues couple the stages: search → crawl → analyze,
//! a periodic poll task drives the batch scheduler, and completed analyses
//! fan out onto the telegram queue. Message bodies are JSON; each carries
//! an idempotency key equal to its target post id. Delivery is
//! at-least-once; every sink is idempotent.

mod amqp;
mod memory;

pub use amqp::AmqpBroker;
pub use memory::MemoryBroker;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The named queues of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Search,
    Crawl,
    Analyze,
    Poll,
    Telegram,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        Self::Search,
        Self::Crawl,
        Self::Analyze,
        Self::Poll,
        Self::Telegram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Crawl => "crawl",
            Self::Analyze => "analyze",
            Self::Poll => "poll",
            Self::Telegram => "telegram",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "search" => Some(Self::Search),
            "crawl" => Some(Self::Crawl),
            "analyze" => Some(Self::Analyze),
            "poll" => Some(Self::Poll),
            "telegram" => Some(Self::Telegram),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kick off searches for a set of keywords.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchTask {
    pub keywords: Vec<String>,
    pub limit: u32,
}

/// Fetch one post's page and extract its text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlTask {
    pub post_id: String,
}

/// Register one crawled post into the open batch job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzeTask {
    pub post_id: String,
}

/// Ingest a messenger channel and report back onto the post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelTask {
    pub identifier: String,
    /// Post the identifier was detected in, if any.
    pub post_id: Option<String>,
    /// Dotted path of the identifier inside the post document.
    pub path: Option<String>,
}

/// A message on one of the pipeline queues.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskMessage {
    Search(SearchTask),
    Crawl(CrawlTask),
    Analyze(AnalyzeTask),
    Poll,
    Channel(ChannelTask),
}

impl TaskMessage {
    /// The queue this message is routed to.
    pub fn queue(&self) -> QueueName {
        match self {
            Self::Search(_) => QueueName::Search,
            Self::Crawl(_) => QueueName::Crawl,
            Self::Analyze(_) => QueueName::Analyze,
            Self::Poll => QueueName::Poll,
            Self::Channel(_) => QueueName::Telegram,
        }
    }

    /// Idempotency key: the id of the post the task targets.
    pub fn idempotency_key(&self) -> Option<&str> {
        match self {
            Self::Crawl(t) => Some(&t.post_id),
            Self::Analyze(t) => Some(&t.post_id),
            Self::Channel(t) => t.post_id.as_deref(),
            Self::Search(_) | Self::Poll => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("Message encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A received task plus its acknowledgement handle.
pub struct TaskDelivery {
    pub task: TaskMessage,
    acker: Option<lapin::acker::Acker>,
}

impl TaskDelivery {
    pub fn unacked(task: TaskMessage) -> Self {
        Self { task, acker: None }
    }

    pub fn with_acker(task: TaskMessage, acker: lapin::acker::Acker) -> Self {
        Self {
            task,
            acker: Some(acker),
        }
    }

    /// Acknowledge the message so the broker will not redeliver it.
    pub async fn ack(self) -> Result<(), BrokerError> {
        if let Some(acker) = self.acker {
            acker.ack(lapin::options::BasicAckOptions::default()).await?;
        }
        Ok(())
    }

    /// Reject the message, optionally returning it to the queue.
    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        if let Some(acker) = self.acker {
            acker
                .nack(lapin::options::BasicNackOptions {
                    requeue,
                    ..Default::default()
                })
                .await?;
        }
        Ok(())
    }
}

/// Capability contract for the external work-queue broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a task onto its queue.
    async fn publish(&self, task: &TaskMessage) -> Result<(), BrokerError>;

    /// Take the next task from a queue, or None when it is empty.
    async fn receive(&self, queue: QueueName) -> Result<Option<TaskDelivery>, BrokerError>;
}

/// Connect the configured broker: AMQP when a `broker_url` is set, the
/// in-process queue otherwise.
pub async fn connect_broker(broker_url: Option<&str>) -> Result<Arc<dyn Broker>, BrokerError> {
    match broker_url {
        Some(url) => {
            tracing::info!("Connecting AMQP broker at {}", url);
            Ok(Arc::new(AmqpBroker::connect(url).await?))
        }
        None => {
            tracing::info!("No broker configured, using in-process queues");
            Ok(Arc::new(MemoryBroker::new()))
        }
    }
}
