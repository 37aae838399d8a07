//! RabbitMQ consumer module using lapin.
//!
//! One consumer task per registered queue. Each task runs an unbounded
//! reconnect loop: connect, open a channel, declare the queue, then handle
//! deliveries strictly sequentially (prefetch 1) so ordering stays simple
//! and one struggling entity is never hammered concurrently from the same
//! queue. Transport failure tears the loop down and reconnects after a
//! short fixed backoff; it never terminates the process.
//!
//! Acknowledgment discipline: exactly one ack or nack per delivery. A
//! panicking processor is caught at the invocation boundary and treated as
//! a Retry, so no message is ever abandoned without a decision.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{FutureExt, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::delay;
use crate::jobs::{self, Outcome, WorkerContext};
use crate::queue::{Envelope, JobKind, QueueDescriptor};

/// Run one queue's consumer forever, reconnecting on transport failure.
pub async fn run(ctx: Arc<WorkerContext>, descriptor: QueueDescriptor) {
    let backoff = Duration::from_millis(ctx.config.reconnect_backoff_ms);
    loop {
        match consume(&ctx, &descriptor).await {
            Ok(()) => warn!(queue = %descriptor.consume_queue, "rabbitmq_consumer_closed"),
            Err(e) => {
                error!(queue = %descriptor.consume_queue, error = %e, "rabbitmq_consumer_error")
            }
        }
        sleep(backoff).await;
        info!(queue = %descriptor.consume_queue, "rabbitmq_consumer_reconnecting");
    }
}

/// One connect-consume cycle. Returns when the delivery stream closes or a
/// transport error surfaces.
async fn consume(ctx: &WorkerContext, descriptor: &QueueDescriptor) -> Result<()> {
    let conn = Connection::connect(&ctx.config.rabbit_dsn, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;

    let channel = conn.create_channel().await.context("Failed to create channel")?;

    // Strictly sequential processing within one queue.
    channel
        .basic_qos(1, BasicQosOptions::default())
        .await
        .context("Failed to set QoS")?;

    channel
        .queue_declare(
            &descriptor.consume_queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare queue")?;

    let mut consumer = channel
        .basic_consume(
            &descriptor.consume_queue,
            &format!("gamedb-{}", descriptor.name),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start consumer")?;

    info!(queue = %descriptor.consume_queue, "rabbitmq_consumer_started");

    while let Some(delivery) = consumer.next().await {
        let delivery = delivery.context("Delivery failed")?;
        handle_delivery(ctx, descriptor, &channel, delivery).await?;

        if ctx.config.api_rate_limit_ms > 0 && descriptor.kind != JobKind::Delay {
            sleep(Duration::from_millis(ctx.config.api_rate_limit_ms)).await;
        }
    }

    Ok(())
}

/// Decode, process and settle one delivery.
///
/// Only ack/nack transport failures propagate; every processing failure is
/// resolved into an acknowledgment decision here.
async fn handle_delivery(
    ctx: &WorkerContext,
    descriptor: &QueueDescriptor,
    channel: &Channel,
    delivery: Delivery,
) -> Result<()> {
    let tag = delivery.delivery_tag;

    let envelope = match Envelope::from_bytes(&delivery.data) {
        Ok(envelope) => envelope,
        Err(e) => {
            // Redelivering unparseable bytes cannot succeed: ack it away.
            error!(
                queue = %descriptor.consume_queue,
                error = %e,
                body_preview = %String::from_utf8_lossy(
                    &delivery.data[..delivery.data.len().min(500)]
                ),
                "queue_message_malformed"
            );
            return ack(channel, tag).await;
        }
    };

    if descriptor.kind == JobKind::Delay {
        return handle_delay_delivery(ctx, descriptor, channel, tag, &envelope).await;
    }

    info!(
        queue = %descriptor.consume_queue,
        attempt = envelope.attempt,
        "queue_job_received"
    );

    let outcome = match AssertUnwindSafe(jobs::process(ctx, descriptor.kind, &envelope))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            // Cause unknown: give the job another chance, bounded by the
            // envelope's attempt/time budgets.
            error!(queue = %descriptor.consume_queue, "queue_job_panicked");
            Outcome::Retry
        }
    };

    match outcome {
        Outcome::Success => {
            info!(queue = %descriptor.consume_queue, "queue_job_completed");
            ack(channel, tag).await
        }
        Outcome::Fail => {
            warn!(
                queue = %descriptor.consume_queue,
                attempt = envelope.attempt,
                payload = %envelope.message,
                "queue_job_failed_permanently"
            );
            ack(channel, tag).await
        }
        Outcome::Retry => retry(ctx, channel, tag, envelope).await,
    }
}

/// Route a failed job to the delay queue with its attempt bumped, then ack
/// the original delivery. If the delay publish fails the delivery is
/// nacked back to the broker instead, so the message is never lost.
async fn retry(
    ctx: &WorkerContext,
    channel: &Channel,
    tag: u64,
    mut envelope: Envelope<Value>,
) -> Result<()> {
    envelope.attempt += 1;

    let publish = async {
        let delay_queue = ctx.registry.resolve("delay")?;
        ctx.publisher
            .publish(&delay_queue.produce_queue, &envelope.to_bytes()?)
            .await
    };

    match publish.await {
        Ok(()) => {
            info!(
                queue = %envelope.original_queue,
                attempt = envelope.attempt,
                "queue_job_delayed"
            );
            ack(channel, tag).await
        }
        Err(e) => {
            error!(queue = %envelope.original_queue, error = %e, "queue_delay_publish_failed");
            nack_requeue(channel, tag).await
        }
    }
}

/// Evaluate one parked envelope against its budgets, then settle it.
async fn handle_delay_delivery(
    ctx: &WorkerContext,
    descriptor: &QueueDescriptor,
    channel: &Channel,
    tag: u64,
    envelope: &Envelope<Value>,
) -> Result<()> {
    let routed =
        delay::process_delivery(descriptor, &ctx.publisher, &ctx.backoff, envelope).await;

    let result = match routed {
        Ok(()) => ack(channel, tag).await,
        Err(e) => {
            error!(queue = %descriptor.consume_queue, error = %e, "queue_delay_route_failed");
            nack_requeue(channel, tag).await
        }
    };

    // Throttle the self-requeue loop so waiting messages do not busy-spin
    // the broker.
    sleep(Duration::from_millis(ctx.config.delay_poll_ms)).await;

    result
}

async fn ack(channel: &Channel, tag: u64) -> Result<()> {
    channel
        .basic_ack(tag, BasicAckOptions::default())
        .await
        .context("Failed to ack delivery")
}

async fn nack_requeue(channel: &Channel, tag: u64) -> Result<()> {
    channel
        .basic_nack(
            tag,
            BasicNackOptions {
                requeue: true,
                ..Default::default()
            },
        )
        .await
        .context("Failed to nack delivery")
}
