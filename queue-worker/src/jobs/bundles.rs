//! Bundle refresh processor.
//!
//! The payload carries only the bundle id; current state is loaded from
//! storage, refreshed from upstream store details and persisted back.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::notify::notify_best_effort;
use crate::queue::BundlePayload;
use crate::storage::EntityKind;

use super::{Outcome, WorkerContext};

pub async fn process(ctx: &WorkerContext, payload: BundlePayload) -> Outcome {
    let id = payload.bundle_id as u64;

    let existing = match ctx.storage.get(EntityKind::Bundle, id).await {
        Ok(existing) => existing,
        Err(e) => {
            warn!(bundle_id = payload.bundle_id, error = %e, "bundle_storage_read_failed");
            return Outcome::Retry;
        }
    };

    let details = match ctx.steam.bundle_details(payload.bundle_id).await {
        Ok(details) => details,
        Err(ApiError::NotFound(_)) => {
            info!(bundle_id = payload.bundle_id, "bundle_not_found_upstream");
            return Outcome::Fail;
        }
        Err(e) => {
            warn!(bundle_id = payload.bundle_id, error = %e, "bundle_fetch_failed");
            return Outcome::Retry;
        }
    };

    let mut record = existing.unwrap_or_else(|| json!({}));
    record["id"] = json!(payload.bundle_id);
    if let Some(name) = details.get("name").and_then(Value::as_str) {
        record["name"] = json!(name);
    }
    record["details"] = details;
    record["updated_at"] = json!(Utc::now());

    if let Err(e) = ctx.storage.upsert(EntityKind::Bundle, id, record).await {
        warn!(bundle_id = payload.bundle_id, error = %e, "bundle_storage_write_failed");
        return Outcome::Retry;
    }

    notify_best_effort(
        ctx.notifier.as_ref(),
        "bundle",
        json!({"id": payload.bundle_id}),
    )
    .await;

    info!(bundle_id = payload.bundle_id, "bundle_updated");
    Outcome::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testutil::{harness, FakeSteamApi};
    use crate::storage::Storage;

    #[tokio::test]
    async fn test_bundle_load_mutate_persist() {
        let h = harness();
        h.storage
            .upsert(EntityKind::Bundle, 842, json!({"id": 842, "first_seen": "2020-01-01"}))
            .await
            .unwrap();
        FakeSteamApi::script(
            &h.steam.bundle_details,
            vec![Ok(json!({"name": "Valve Complete Pack", "discount": 25}))],
        );

        let outcome = process(&h.ctx, BundlePayload { bundle_id: 842 }).await;
        assert_eq!(outcome, Outcome::Success);

        let record = h.storage.get(EntityKind::Bundle, 842).await.unwrap().unwrap();
        assert_eq!(record["name"], "Valve Complete Pack");
        assert_eq!(record["details"]["discount"], 25);
        // Fields not owned by the refresh survive.
        assert_eq!(record["first_seen"], "2020-01-01");
    }

    #[tokio::test]
    async fn test_bundle_not_found_fails() {
        let h = harness();
        FakeSteamApi::script(&h.steam.bundle_details, vec![Err(ApiError::NotFound(842))]);
        let outcome = process(&h.ctx, BundlePayload { bundle_id: 842 }).await;
        assert_eq!(outcome, Outcome::Fail);
    }
}
