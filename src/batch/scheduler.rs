//! The periodic batch tick.
//!
//! One tick runs strictly in order: idle sweep → submit pending → poll
//! submitted → complete processed → fan out channel tasks. Ticks must not
//! overlap; deployments enforce this by running a single scheduling worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{Accumulator, BatchError, Completer, CompletionReport, Poller, Submitter};
use crate::queue::{Broker, ChannelTask, TaskMessage};
use crate::repository::PostRepository;

/// Head-room subtracted from the tick period for the tick deadline.
const TICK_GUARD: Duration = Duration::from_secs(5);

/// What one tick accomplished.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Open job flipped by the idle sweep, if any.
    pub swept: Option<String>,
    /// Provider handles submitted this tick.
    pub submitted: Vec<String>,
    /// Provider handles whose state was read this tick.
    pub polled: Vec<String>,
    /// Completion counters.
    pub completion: CompletionReport,
    /// Channel tasks published this tick.
    pub fanned_out: u32,
}

pub struct Scheduler {
    accumulator: Arc<Accumulator>,
    submitter: Arc<Submitter>,
    poller: Arc<Poller>,
    completer: Arc<Completer>,
    posts: Arc<PostRepository>,
    broker: Arc<dyn Broker>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(
        accumulator: Arc<Accumulator>,
        submitter: Arc<Submitter>,
        poller: Arc<Poller>,
        completer: Arc<Completer>,
        posts: Arc<PostRepository>,
        broker: Arc<dyn Broker>,
        tick: Duration,
    ) -> Self {
        Self {
            accumulator,
            submitter,
            poller,
            completer,
            posts,
            broker,
            tick,
        }
    }

    /// Run one full tick.
    pub async fn run_tick(&self) -> Result<TickReport, BatchError> {
        let swept = self.accumulator.sweep_idle()?;
        let submitted = self.submitter.submit_pending().await?;
        let polled = self.poller.poll_submitted().await?;
        let completion = self.completer.complete_processed().await?;
        let fanned_out = self.fan_out().await?;
        Ok(TickReport {
            swept,
            submitted,
            polled,
            completion,
            fanned_out,
        })
    }

    /// Publish a channel task for every identifier no downstream task has
    /// handled yet. Delivery is at-least-once; the ingestion sink is
    /// idempotent.
    pub async fn fan_out(&self) -> Result<u32, BatchError> {
        let mut published = 0;
        for pending in self.posts.unprocessed_identifiers()? {
            self.broker
                .publish(&TaskMessage::Channel(ChannelTask {
                    identifier: pending.identifier,
                    post_id: Some(pending.post_id),
                    path: Some(pending.path),
                }))
                .await?;
            published += 1;
        }
        if published > 0 {
            info!("Fanned out {} channel tasks", published);
        }
        Ok(published)
    }

    /// Run the periodic loop.
    ///
    /// With `publish_beat` the loop only enqueues a poll task per period and
    /// a worker on the poll queue executes the tick; otherwise the tick runs
    /// inline under a deadline of one period minus a small guard, returning
    /// partial progress to the next tick on expiry.
    pub async fn run(&self, publish_beat: bool) -> Result<(), BatchError> {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Batch scheduler running every {:?} ({})",
            self.tick,
            if publish_beat { "publishing poll tasks" } else { "inline ticks" }
        );

        loop {
            interval.tick().await;
            if publish_beat {
                self.broker.publish(&TaskMessage::Poll).await?;
                continue;
            }

            let deadline = self
                .tick
                .saturating_sub(TICK_GUARD)
                .max(Duration::from_secs(1));
            match tokio::time::timeout(deadline, self.run_tick()).await {
                Ok(Ok(report)) => debug!("Tick finished: {:?}", report),
                Ok(Err(e)) => error!("Tick failed: {}", e),
                Err(_) => warn!("Tick deadline exceeded; resuming next tick"),
            }
        }
    }
}
