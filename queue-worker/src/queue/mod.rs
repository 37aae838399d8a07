//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - The envelope and per-kind payload types (wire contract)
//! - The static queue registry
//! - An async publisher and the producer-facing `submit` entry point
//!
//! ## Architecture
//!
//! ```text
//! Producers → submit() → {env}-apps / -packages / -bundles / -changes /
//!                        -players / -profiles → Consumers
//!                                   ↑                  │ Retry
//!                                   └── {env}-delay ←──┘
//! ```

pub mod message;
pub mod publisher;
pub mod registry;

pub use message::{
    AppPayload, BundlePayload, ChangeItem, ChangesPayload, Envelope, JobPayload, PackagePayload,
    PlayerPayload, ProfilePayload,
};
pub use publisher::Publisher;
pub use registry::{build_registry, JobKind, QueueDescriptor, Registry};

use crate::error::QueueError;

/// Encode a payload into a fresh envelope and publish it to the named queue.
///
/// The queue is resolved before any broker I/O, so an unregistered name
/// fails with [`QueueError::UnknownQueue`] without touching the transport.
pub async fn submit(
    registry: &Registry,
    publisher: &Publisher,
    queue_name: &str,
    payload: JobPayload,
) -> Result<(), QueueError> {
    let descriptor = registry.resolve(queue_name)?;

    let envelope = Envelope::new(
        payload,
        &descriptor.produce_queue,
        descriptor.max_attempts,
        descriptor.max_time.as_millis() as u64,
    );

    publisher
        .publish(&descriptor.produce_queue, &envelope.to_bytes()?)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_submit_unknown_queue_does_no_broker_io() {
        let registry = build_registry(&Config::default());
        // A DSN that could never connect: if submit touched the transport
        // this test would hang or fail on connection instead.
        let publisher = Publisher::new("amqp://255.255.255.255:1/".to_string());

        let payload = JobPayload::Bundle(BundlePayload { bundle_id: 1 });
        match submit(&registry, &publisher, "no-such-queue", payload).await {
            Err(QueueError::UnknownQueue(name)) => assert_eq!(name, "no-such-queue"),
            other => panic!("expected UnknownQueue, got {other:?}"),
        }
    }
}
