//! AMQP publishing.
//!
//! The long-lived connection is shared; each publish opens its own channel,
//! declares the topic exchange, publishes once and closes the channel again,
//! whatever the outcome. Failures are returned to the caller without retry.
//!
//! The channel factory sits behind [`QueueConnection`] so the publish logic is
//! independent of `lapin`.

use super::{AdapterError, LogSink};
use crate::envelope::LogRecord;
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, ExchangeKind};
use std::sync::Arc;
use tracing::{debug, warn};

/// Exchange the logger service consumes from
pub const DEFAULT_EXCHANGE: &str = "logs_topic";

/// Routing key used for broker log entries
pub const DEFAULT_ROUTING_KEY: &str = "log.INFO";

/// Something that can hand out publishing channels.
#[async_trait]
pub trait QueueConnection: Send + Sync {
    async fn open_channel(&self) -> Result<Box<dyn QueueChannel>, AdapterError>;

    /// Whether the underlying connection is still usable
    fn is_connected(&self) -> bool;
}

/// A short-lived publishing channel.
#[async_trait]
pub trait QueueChannel: Send + Sync {
    /// Declare a durable topic exchange (idempotent on the broker)
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), AdapterError>;

    /// Publish and wait for the broker to take the message
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), AdapterError>;

    async fn close(&self) -> Result<(), AdapterError>;
}

#[async_trait]
impl QueueConnection for lapin::Connection {
    async fn open_channel(&self) -> Result<Box<dyn QueueChannel>, AdapterError> {
        let channel = self.create_channel().await?;
        Ok(Box::new(channel))
    }

    fn is_connected(&self) -> bool {
        self.status().connected()
    }
}

#[async_trait]
impl QueueChannel for lapin::Channel {
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), AdapterError> {
        let options = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };
        self.exchange_declare(exchange, ExchangeKind::Topic, options, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), AdapterError> {
        let properties = BasicProperties::default().with_content_type("text/plain".into());
        self.basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions::default(),
            body,
            properties,
        )
        .await?
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        lapin::Channel::close(self, 200, "publish done").await?;
        Ok(())
    }
}

/// Publishes log records to a topic exchange.
#[derive(Clone)]
pub struct Publisher {
    connection: Arc<dyn QueueConnection>,
    exchange: String,
}

impl Publisher {
    pub fn new(connection: Arc<dyn QueueConnection>) -> Self {
        Self {
            connection,
            exchange: DEFAULT_EXCHANGE.to_string(),
        }
    }

    /// Publish to a different exchange
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Publish one record under `routing_key`.
    pub async fn publish(&self, routing_key: &str, record: &LogRecord) -> Result<(), AdapterError> {
        let body = serde_json::to_vec(record)?;
        let channel = self.connection.open_channel().await?;

        let result = self.publish_on(channel.as_ref(), routing_key, &body).await;

        if let Err(e) = channel.close().await {
            warn!(error = %e, exchange = %self.exchange, "Failed to close publishing channel");
        }

        result
    }

    async fn publish_on(
        &self,
        channel: &dyn QueueChannel,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), AdapterError> {
        channel.declare_topic_exchange(&self.exchange).await?;
        channel.publish(&self.exchange, routing_key, body).await?;

        debug!(exchange = %self.exchange, routing_key = %routing_key, "Published log record");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }
}

/// Log sink that publishes to the message broker.
#[derive(Clone)]
pub struct QueueSink {
    publisher: Publisher,
    routing_key: String,
}

impl QueueSink {
    pub fn new(publisher: Publisher) -> Self {
        Self {
            publisher,
            routing_key: DEFAULT_ROUTING_KEY.to_string(),
        }
    }

    /// Set custom routing key
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }
}

#[async_trait]
impl LogSink for QueueSink {
    fn name(&self) -> &str {
        "queue"
    }

    async fn write(&self, record: &LogRecord) -> Result<String, AdapterError> {
        self.publisher.publish(&self.routing_key, record).await?;
        Ok("logged via RabbitMQ".to_string())
    }
}
