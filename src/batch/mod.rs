//! Batch accumulation and lifecycle control.
//!
//! Crawled posts are accumulated into size-bounded analysis jobs, which move
//! through a fixed state machine: accepting → pending → submitted →
//! processed → completed, with failed reachable from every non-completed
//! state. Coordination happens entirely through the job store; no component
//! holds cross-tick state in memory.

mod accumulator;
mod completer;
mod poller;
pub mod request;
mod scheduler;
mod submitter;

pub use accumulator::Accumulator;
pub use completer::{Completer, CompletionReport};
pub use poller::Poller;
pub use scheduler::{Scheduler, TickReport};
pub use submitter::Submitter;

use std::sync::Arc;

use thiserror::Error;

use crate::config::BatchSettings;
use crate::provider::{BatchProvider, ProviderError};
use crate::queue::{Broker, BrokerError};
use crate::repository::{JobRepository, PostRepository, RepositoryError};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("Request file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Request encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BatchError {
    /// Whether the error is a transient provider condition that should
    /// leave job state untouched for the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Provider(e) if e.is_transient())
    }
}

/// The assembled batch components sharing one store, provider and broker.
pub struct Batcher {
    pub accumulator: Arc<Accumulator>,
    pub submitter: Arc<Submitter>,
    pub poller: Arc<Poller>,
    pub completer: Arc<Completer>,
    pub scheduler: Arc<Scheduler>,
}

impl Batcher {
    pub fn new(
        posts: Arc<PostRepository>,
        jobs: Arc<JobRepository>,
        provider: Arc<dyn BatchProvider>,
        broker: Arc<dyn Broker>,
        settings: &BatchSettings,
    ) -> Self {
        let accumulator = Arc::new(Accumulator::new(
            Arc::clone(&posts),
            Arc::clone(&jobs),
            settings.max_batch_bytes,
            settings.idle(),
        ));
        let submitter = Arc::new(Submitter::new(
            Arc::clone(&posts),
            Arc::clone(&jobs),
            Arc::clone(&provider),
            settings.provider_model.clone(),
        ));
        let poller = Arc::new(Poller::new(Arc::clone(&jobs), Arc::clone(&provider)));
        let completer = Arc::new(Completer::new(
            Arc::clone(&posts),
            Arc::clone(&jobs),
            Arc::clone(&provider),
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&accumulator),
            Arc::clone(&submitter),
            Arc::clone(&poller),
            Arc::clone(&completer),
            posts,
            broker,
            settings.tick(),
        ));

        Self {
            accumulator,
            submitter,
            poller,
            completer,
            scheduler,
        }
    }
}
