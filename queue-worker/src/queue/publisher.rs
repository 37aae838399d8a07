//! Async RabbitMQ publisher with cached connection management.
//!
//! The publisher maintains a persistent connection and channel to the
//! broker, reconnecting lazily on first use or after a drop. It never
//! retries a publish itself: a retried publish risks duplicate production,
//! so the decision is left to the caller.

use std::sync::Arc;

use lapin::{
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::QueueError;

/// Shared handle for publishing envelopes to named queues.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    dsn: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl Publisher {
    /// Create a new publisher with the given broker URL. No I/O happens
    /// until the first publish.
    pub fn new(dsn: String) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                dsn,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel, lapin::Error> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write locks
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_publisher_connecting");

        let conn = Connection::connect(&self.inner.dsn, ConnectionProperties::default()).await?;
        let ch = conn.create_channel().await?;

        info!("rabbitmq_publisher_connected");

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Publish an encoded envelope to a queue.
    ///
    /// Declares the target queue durable (idempotent) and publishes with
    /// persistent delivery mode so the message survives a broker restart.
    pub async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), QueueError> {
        let wrap = |source: lapin::Error| QueueError::Publish {
            queue: queue.to_string(),
            source,
        };

        let channel = self.ensure_connected().await.map_err(wrap)?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(wrap)?;

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(wrap)?
            .await
            .map_err(wrap)?;

        info!(queue = queue, body_length = body.len(), "rabbitmq_published");

        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_publisher_closed");
    }
}
