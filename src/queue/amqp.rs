//! RabbitMQ broker backend.

use async_trait::async_trait;
use lapin::options::{
    BasicGetOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use super::{Broker, BrokerError, QueueName, TaskDelivery, TaskMessage};

/// AMQP-backed broker publishing to the five durable pipeline queues.
pub struct AmqpBroker {
    channel: Channel,
}

impl AmqpBroker {
    /// Connect and declare all pipeline queues.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        // One unacked message at a time per consumer.
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        for queue in QueueName::ALL {
            channel
                .queue_declare(
                    queue.as_str(),
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        Ok(Self { channel })
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn publish(&self, task: &TaskMessage) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(task)?;
        let mut properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2);
        if let Some(key) = task.idempotency_key() {
            properties = properties.with_message_id(key.into());
        }

        self.channel
            .basic_publish(
                "",
                task.queue().as_str(),
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }

    async fn receive(&self, queue: QueueName) -> Result<Option<TaskDelivery>, BrokerError> {
        let Some(message) = self
            .channel
            .basic_get(queue.as_str(), BasicGetOptions::default())
            .await?
        else {
            return Ok(None);
        };

        let delivery = message.delivery;
        match serde_json::from_slice::<TaskMessage>(&delivery.data) {
            Ok(task) => Ok(Some(TaskDelivery::with_acker(task, delivery.acker))),
            Err(e) => {
                // Drop undecodable messages instead of looping on them.
                tracing::warn!("Dropping undecodable message on {}: {}", queue, e);
                delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await?;
                Ok(None)
            }
        }
    }
}
