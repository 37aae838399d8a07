//! Per-job processors and the dispatch boundary.
//!
//! Each queue's payload shape is decoded here and routed to its processor
//! through an exhaustive match over [`JobKind`], so adding a job kind
//! without wiring its processor fails at compile time.
//!
//! Processors are idempotent under at-least-once delivery: everything is
//! upserted under a stable key (app id, player id, change number), and the
//! one append-only path (price history) dedupes before inserting.

pub mod apps;
pub mod bundles;
pub mod changes;
pub mod packages;
pub mod players;
pub mod profiles;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::error;

use crate::config::Config;
use crate::delay::BackoffPolicy;
use crate::notify::NotificationSink;
use crate::queue::{Envelope, JobKind, Publisher, Registry};
use crate::steam::SteamApi;
use crate::storage::Storage;

/// Tri-state verdict a processor returns for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Acknowledge and discard.
    Success,
    /// Acknowledge and discard; retrying cannot help (bad payload,
    /// resource gone upstream).
    Fail,
    /// Route through the delay queue for another attempt.
    Retry,
}

/// Everything a consumer task needs, built once by the composition root.
pub struct WorkerContext {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub publisher: Publisher,
    pub backoff: BackoffPolicy,
    pub storage: Arc<dyn Storage>,
    pub steam: Arc<dyn SteamApi>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl WorkerContext {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<Registry>,
        publisher: Publisher,
        storage: Arc<dyn Storage>,
        steam: Arc<dyn SteamApi>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let backoff = BackoffPolicy::from_config(&config);
        WorkerContext {
            config,
            registry,
            publisher,
            backoff,
            storage,
            steam,
            notifier,
        }
    }
}

/// Decode the payload for one job kind and run its processor.
///
/// A payload that does not match the queue's expected shape is a permanent
/// failure: redelivery of unparseable data cannot succeed.
pub async fn process(ctx: &WorkerContext, kind: JobKind, envelope: &Envelope<Value>) -> Outcome {
    match kind {
        JobKind::Apps => match decode(envelope) {
            Some(payload) => apps::process(ctx, payload).await,
            None => Outcome::Fail,
        },
        JobKind::Packages => match decode(envelope) {
            Some(payload) => packages::process(ctx, payload).await,
            None => Outcome::Fail,
        },
        JobKind::Bundles => match decode(envelope) {
            Some(payload) => bundles::process(ctx, payload).await,
            None => Outcome::Fail,
        },
        JobKind::Changes => match decode(envelope) {
            Some(payload) => changes::process(ctx, payload).await,
            None => Outcome::Fail,
        },
        JobKind::Players => match decode(envelope) {
            Some(payload) => players::process(ctx, payload).await,
            None => Outcome::Fail,
        },
        JobKind::Profiles => match decode(envelope) {
            Some(payload) => profiles::process(ctx, payload).await,
            None => Outcome::Fail,
        },
        JobKind::Delay => {
            // Delay deliveries are routed to the delay engine before
            // dispatch; reaching here is a wiring bug.
            error!("delay_delivery_reached_job_dispatch");
            Outcome::Fail
        }
    }
}

fn decode<P: DeserializeOwned>(envelope: &Envelope<Value>) -> Option<P> {
    match envelope.payload::<P>() {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!(
                queue = %envelope.original_queue,
                error = %e,
                payload = %envelope.message,
                "queue_payload_shape_mismatch"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::jobs::testutil::harness;

    #[tokio::test]
    async fn test_payload_shape_mismatch_fails_permanently() {
        let h = harness();
        // A player-shaped payload delivered on the apps queue: the decode
        // boundary resolves it to a permanent failure, not a retry.
        let envelope = Envelope::new(json!({"player_id": 76561197968626192u64}), "local-apps", 0, 0);
        let envelope = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();

        let outcome = process(&h.ctx, JobKind::Apps, &envelope).await;
        assert_eq!(outcome, Outcome::Fail);
        assert!(h.storage.dump().is_empty());
        assert!(h.sink.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_matching_payload_dispatches_to_processor() {
        let h = harness();
        let payload = crate::queue::BundlePayload { bundle_id: 842 };
        let envelope = Envelope::new(serde_json::to_value(&payload).unwrap(), "local-bundles", 0, 0);

        let outcome = process(&h.ctx, JobKind::Bundles, &envelope).await;
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(h.storage.dump().len(), 1);
    }
}
