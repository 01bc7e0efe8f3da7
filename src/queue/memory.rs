//! In-process queue backend.
//!
//! Used for single-process deployments without a broker, and by tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Broker, BrokerError, QueueName, TaskDelivery, TaskMessage};

/// Broker backed by in-memory queues.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<QueueName, VecDeque<TaskMessage>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages waiting on a queue.
    pub fn len(&self, queue: QueueName) -> usize {
        self.queues
            .lock()
            .expect("queue lock poisoned")
            .get(&queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, queue: QueueName) -> bool {
        self.len(queue) == 0
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, task: &TaskMessage) -> Result<(), BrokerError> {
        self.queues
            .lock()
            .expect("queue lock poisoned")
            .entry(task.queue())
            .or_default()
            .push_back(task.clone());
        Ok(())
    }

    async fn receive(&self, queue: QueueName) -> Result<Option<TaskDelivery>, BrokerError> {
        let task = self
            .queues
            .lock()
            .expect("queue lock poisoned")
            .get_mut(&queue)
            .and_then(VecDeque::pop_front);
        Ok(task.map(TaskDelivery::unacked))
    }
}
