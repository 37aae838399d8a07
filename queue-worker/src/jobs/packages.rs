//! Package update processor. Same shape as the app processor without the
//! price history path.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::notify::notify_best_effort;
use crate::queue::PackagePayload;
use crate::storage::EntityKind;

use super::{Outcome, WorkerContext};

pub async fn process(ctx: &WorkerContext, payload: PackagePayload) -> Outcome {
    let id = payload.id as u64;

    let product = match ctx.steam.product_info(payload.id).await {
        Ok(product) => product,
        Err(ApiError::NotFound(_)) => {
            info!(package_id = payload.id, "package_not_found_upstream");
            return Outcome::Fail;
        }
        Err(e) => {
            warn!(package_id = payload.id, error = %e, "package_fetch_failed");
            return Outcome::Retry;
        }
    };

    let mut record = match ctx.storage.get(EntityKind::Package, id).await {
        Ok(existing) => existing.unwrap_or_else(|| json!({})),
        Err(e) => {
            warn!(package_id = payload.id, error = %e, "package_storage_read_failed");
            return Outcome::Retry;
        }
    };

    record["id"] = json!(payload.id);
    record["change_number"] = json!(payload.change_number);
    if let Some(name) = product.get("name").and_then(Value::as_str) {
        record["name"] = json!(name);
    }
    record["product_info"] = product;
    if !payload.vdf.is_null() {
        record["vdf"] = payload.vdf.clone();
    }
    record["updated_at"] = json!(Utc::now());

    if let Err(e) = ctx.storage.upsert(EntityKind::Package, id, record).await {
        warn!(package_id = payload.id, error = %e, "package_storage_write_failed");
        return Outcome::Retry;
    }

    notify_best_effort(
        ctx.notifier.as_ref(),
        "package",
        json!({"id": payload.id, "change_number": payload.change_number}),
    )
    .await;

    info!(
        package_id = payload.id,
        change_number = payload.change_number,
        "package_updated"
    );
    Outcome::Success
}
