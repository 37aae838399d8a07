//! App update processor.
//!
//! Fetches current product metadata upstream, merges it with the raw
//! key-value blob carried by the change event, and upserts the app record.
//! Price changes are appended to an append-only history, deduped on the
//! derived price so reprocessing cannot double-log.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::notify::notify_best_effort;
use crate::queue::AppPayload;
use crate::storage::EntityKind;

use super::{Outcome, WorkerContext};

pub async fn process(ctx: &WorkerContext, payload: AppPayload) -> Outcome {
    let id = payload.id as u64;

    let product = match ctx.steam.product_info(payload.id).await {
        Ok(product) => product,
        Err(ApiError::NotFound(_)) => {
            info!(app_id = payload.id, "app_not_found_upstream");
            return Outcome::Fail;
        }
        Err(e) => {
            warn!(app_id = payload.id, error = %e, "app_fetch_failed");
            return Outcome::Retry;
        }
    };

    let mut record = match ctx.storage.get(EntityKind::App, id).await {
        Ok(existing) => existing.unwrap_or_else(|| json!({})),
        Err(e) => {
            warn!(app_id = payload.id, error = %e, "app_storage_read_failed");
            return Outcome::Retry;
        }
    };

    record["id"] = json!(payload.id);
    record["change_number"] = json!(payload.change_number);
    if let Some(name) = product.get("name").and_then(Value::as_str) {
        record["name"] = json!(name);
    }
    record["product_info"] = product.clone();
    if !payload.vdf.is_null() {
        record["vdf"] = payload.vdf.clone();
    }

    if let Some(price) = product.get("price").and_then(Value::as_i64) {
        append_price(&mut record, price);
    }

    record["updated_at"] = json!(Utc::now());

    if let Err(e) = ctx.storage.upsert(EntityKind::App, id, record).await {
        warn!(app_id = payload.id, error = %e, "app_storage_write_failed");
        return Outcome::Retry;
    }

    notify_best_effort(
        ctx.notifier.as_ref(),
        "app",
        json!({"id": payload.id, "change_number": payload.change_number}),
    )
    .await;

    info!(
        app_id = payload.id,
        change_number = payload.change_number,
        "app_updated"
    );
    Outcome::Success
}

/// Append a price point unless it matches the latest recorded one.
fn append_price(record: &mut Value, price: i64) {
    let Some(obj) = record.as_object_mut() else {
        return;
    };
    let history = obj.entry("price_history").or_insert_with(|| json!([]));

    if let Some(entries) = history.as_array_mut() {
        let latest = entries.last().and_then(|e| e.get("price")).and_then(Value::as_i64);
        if latest != Some(price) {
            entries.push(json!({"price": price, "recorded_at": Utc::now()}));
        }
    }
}
