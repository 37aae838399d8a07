//! Profile refresh processor: summary-only update of an existing player
//! record, cheaper than the full player job.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::notify::notify_best_effort;
use crate::queue::ProfilePayload;
use crate::storage::EntityKind;

use super::{Outcome, WorkerContext};

pub async fn process(ctx: &WorkerContext, payload: ProfilePayload) -> Outcome {
    let id = payload.player_id;

    let summary = match ctx.steam.player_summary(id).await {
        Ok(summary) => summary,
        Err(ApiError::NotFound(_)) => {
            info!(player_id = id, "profile_not_found_upstream");
            return Outcome::Fail;
        }
        Err(e) => {
            warn!(player_id = id, error = %e, "profile_fetch_failed");
            return Outcome::Retry;
        }
    };

    let mut record = match ctx.storage.get(EntityKind::Player, id).await {
        Ok(existing) => existing.unwrap_or_else(|| json!({})),
        Err(e) => {
            warn!(player_id = id, error = %e, "profile_storage_read_failed");
            return Outcome::Retry;
        }
    };

    record["id"] = json!(id);
    record["summary"] = summary;
    record["updated_at"] = json!(Utc::now());

    if let Err(e) = ctx.storage.upsert(EntityKind::Player, id, record).await {
        warn!(player_id = id, error = %e, "profile_storage_write_failed");
        return Outcome::Retry;
    }

    notify_best_effort(ctx.notifier.as_ref(), "player", json!({"id": id})).await;

    info!(player_id = id, "profile_updated");
    Outcome::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testutil::{harness, FakeSteamApi};
    use crate::storage::Storage;

    #[tokio::test]
    async fn test_profile_refresh_keeps_other_sections() {
        let h = harness();
        h.storage
            .upsert(
                EntityKind::Player,
                42,
                json!({"id": 42, "games": {"count": 10}}),
            )
            .await
            .unwrap();
        FakeSteamApi::script(&h.steam.player_summary, vec![Ok(json!({"persona_name": "bob"}))]);

        let outcome = process(&h.ctx, ProfilePayload { player_id: 42 }).await;
        assert_eq!(outcome, Outcome::Success);

        let record = h.storage.get(EntityKind::Player, 42).await.unwrap().unwrap();
        assert_eq!(record["summary"]["persona_name"], "bob");
        // A summary-only refresh must not clobber the games section.
        assert_eq!(record["games"]["count"], 10);
    }

    #[tokio::test]
    async fn test_profile_transient_error_retries() {
        let h = harness();
        FakeSteamApi::script(
            &h.steam.player_summary,
            vec![Err(ApiError::Transient("429".into()))],
        );
        let outcome = process(&h.ctx, ProfilePayload { player_id: 42 }).await;
        assert_eq!(outcome, Outcome::Retry);
    }
}
