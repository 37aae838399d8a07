//! Player update processor.
//!
//! The summary is the gate: a player that does not exist upstream is a
//! permanent failure, a struggling upstream is a retry. The remaining
//! profile sections (games, badges, optionally groups) are fetched as a
//! fixed set of concurrent tasks joined together; each is best-effort, the
//! errors are aggregated into one log line, and the record is upserted
//! with whatever sections succeeded.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::notify::notify_best_effort;
use crate::queue::PlayerPayload;
use crate::storage::EntityKind;

use super::{Outcome, WorkerContext};

/// Lowest valid 64-bit SteamID (universe 1, individual account 0).
const MIN_PLAYER_ID: u64 = 76561197960265728;

pub async fn process(ctx: &WorkerContext, payload: PlayerPayload) -> Outcome {
    let id = payload.player_id;

    if id < MIN_PLAYER_ID {
        warn!(player_id = id, "player_id_out_of_range");
        return Outcome::Fail;
    }

    let summary = match ctx.steam.player_summary(id).await {
        Ok(summary) => summary,
        Err(ApiError::NotFound(_)) => {
            info!(player_id = id, "player_not_found_upstream");
            return Outcome::Fail;
        }
        Err(e) => {
            warn!(player_id = id, error = %e, "player_summary_fetch_failed");
            return Outcome::Retry;
        }
    };

    // Fixed fan-out over the independent profile sections.
    let groups_fetch = async {
        if payload.skip_groups {
            None
        } else {
            Some(ctx.steam.player_groups(id).await)
        }
    };
    let (games, badges, groups) =
        tokio::join!(ctx.steam.player_games(id), ctx.steam.player_badges(id), groups_fetch);

    let mut record = match ctx.storage.get(EntityKind::Player, id).await {
        Ok(existing) => existing.unwrap_or_else(|| json!({})),
        Err(e) => {
            warn!(player_id = id, error = %e, "player_storage_read_failed");
            return Outcome::Retry;
        }
    };

    record["id"] = json!(id);
    record["summary"] = summary;

    let mut section_errors: Vec<String> = Vec::new();
    match games {
        Ok(games) => record["games"] = games,
        Err(e) => section_errors.push(format!("games: {e}")),
    }
    match badges {
        Ok(badges) => record["badges"] = badges,
        Err(e) => section_errors.push(format!("badges: {e}")),
    }
    if let Some(groups) = groups {
        match groups {
            Ok(groups) => record["groups"] = groups,
            Err(e) => section_errors.push(format!("groups: {e}")),
        }
    }
    if !section_errors.is_empty() {
        // Proceed with partial data; the next update fills the gaps.
        warn!(
            player_id = id,
            errors = %section_errors.join("; "),
            "player_sections_partial"
        );
    }

    record["updated_at"] = json!(Utc::now());

    if let Err(e) = ctx.storage.upsert(EntityKind::Player, id, record).await {
        warn!(player_id = id, error = %e, "player_storage_write_failed");
        return Outcome::Retry;
    }

    notify_best_effort(ctx.notifier.as_ref(), "player", json!({"id": id})).await;

    info!(player_id = id, "player_updated");
    Outcome::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testutil::{harness, FakeSteamApi};
    use crate::storage::Storage;

    fn payload(player_id: u64) -> PlayerPayload {
        PlayerPayload {
            player_id,
            user_agent: None,
            skip_groups: false,
        }
    }

    const VALID_ID: u64 = 76561197968626192;

    #[tokio::test]
    async fn test_invalid_id_fails_without_api_calls() {
        let h = harness();
        assert_eq!(process(&h.ctx, payload(123)).await, Outcome::Fail);
        assert!(h.storage.dump().is_empty());
    }

    #[tokio::test]
    async fn test_transient_twice_then_success() {
        let h = harness();
        FakeSteamApi::script(
            &h.steam.player_summary,
            vec![
                Err(ApiError::Transient("503".into())),
                Err(ApiError::Transient("timeout".into())),
                Ok(json!({"persona_name": "bob"})),
            ],
        );

        // Attempts 1 and 2 route to the retry engine, attempt 3 lands.
        assert_eq!(process(&h.ctx, payload(VALID_ID)).await, Outcome::Retry);
        assert_eq!(process(&h.ctx, payload(VALID_ID)).await, Outcome::Retry);
        assert_eq!(process(&h.ctx, payload(VALID_ID)).await, Outcome::Success);

        let record = h.storage.get(EntityKind::Player, VALID_ID).await.unwrap().unwrap();
        assert_eq!(record["summary"]["persona_name"], "bob");
    }

    #[tokio::test]
    async fn test_partial_sections_still_persist() {
        let h = harness();
        FakeSteamApi::script(&h.steam.player_summary, vec![Ok(json!({"persona_name": "bob"}))]);
        FakeSteamApi::script(
            &h.steam.player_games,
            vec![Err(ApiError::Transient("games down".into()))],
        );
        FakeSteamApi::script(&h.steam.player_badges, vec![Ok(json!({"count": 3}))]);

        assert_eq!(process(&h.ctx, payload(VALID_ID)).await, Outcome::Success);

        let record = h.storage.get(EntityKind::Player, VALID_ID).await.unwrap().unwrap();
        assert!(record.get("games").is_none());
        assert_eq!(record["badges"]["count"], 3);
    }

    #[tokio::test]
    async fn test_skip_groups_hint() {
        let h = harness();
        let mut p = payload(VALID_ID);
        p.skip_groups = true;
        assert_eq!(process(&h.ctx, p).await, Outcome::Success);

        let record = h.storage.get(EntityKind::Player, VALID_ID).await.unwrap().unwrap();
        assert!(record.get("groups").is_none());
        // The groups script was never consumed.
        assert!(h.steam.player_groups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_player_not_found_fails() {
        let h = harness();
        FakeSteamApi::script(
            &h.steam.player_summary,
            vec![Err(ApiError::NotFound(VALID_ID))],
        );
        assert_eq!(process(&h.ctx, payload(VALID_ID)).await, Outcome::Fail);
    }
}
