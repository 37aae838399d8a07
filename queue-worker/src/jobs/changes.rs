//! Change-batch processor.
//!
//! A PICS change batch lists app and package ids per change number. The
//! processor groups the items by change number, resolves display names via
//! a batch lookup against storage (misses resolve to an empty name), and
//! upserts one grouped change record per change number.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::notify::notify_best_effort;
use crate::queue::ChangesPayload;
use crate::storage::EntityKind;

use super::{Outcome, WorkerContext};

pub async fn process(ctx: &WorkerContext, payload: ChangesPayload) -> Outcome {
    // Group by change number, preserving numeric order.
    let mut groups: BTreeMap<u64, (Vec<u32>, Vec<u32>)> = BTreeMap::new();
    for item in &payload.apps {
        groups.entry(item.change_number).or_default().0.push(item.id);
    }
    for item in &payload.packages {
        groups.entry(item.change_number).or_default().1.push(item.id);
    }

    let app_ids: Vec<u64> = payload.apps.iter().map(|i| i.id as u64).collect();
    let package_ids: Vec<u64> = payload.packages.iter().map(|i| i.id as u64).collect();

    let app_names = match ctx.storage.batch_get(EntityKind::App, &app_ids).await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "changes_app_lookup_failed");
            return Outcome::Retry;
        }
    };
    let package_names = match ctx.storage.batch_get(EntityKind::Package, &package_ids).await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "changes_package_lookup_failed");
            return Outcome::Retry;
        }
    };

    let name_of = |records: &std::collections::HashMap<u64, Value>, id: u32| -> String {
        records
            .get(&(id as u64))
            .and_then(|r| r.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };

    for (change_number, (apps, packages)) in &groups {
        let record = json!({
            "change_number": change_number,
            "apps": apps
                .iter()
                .map(|id| json!({"id": id, "name": name_of(&app_names, *id)}))
                .collect::<Vec<_>>(),
            "packages": packages
                .iter()
                .map(|id| json!({"id": id, "name": name_of(&package_names, *id)}))
                .collect::<Vec<_>>(),
            "created_at": Utc::now(),
        });

        if let Err(e) = ctx.storage.upsert(EntityKind::Change, *change_number, record.clone()).await {
            warn!(change_number = change_number, error = %e, "change_storage_write_failed");
            return Outcome::Retry;
        }

        notify_best_effort(ctx.notifier.as_ref(), "changes", record).await;
    }

    info!(
        change_count = groups.len(),
        app_count = payload.apps.len(),
        package_count = payload.packages.len(),
        "changes_processed"
    );
    Outcome::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testutil::harness;
    use crate::queue::ChangeItem;
    use crate::storage::Storage;

    #[tokio::test]
    async fn test_grouped_change_record_with_name_resolution() {
        let h = harness();
        // Only the app has a stored name; the package lookup misses.
        h.storage
            .upsert(EntityKind::App, 730, json!({"name": "Counter-Strike 2"}))
            .await
            .unwrap();

        let payload = ChangesPayload {
            apps: vec![ChangeItem { id: 730, change_number: 100 }],
            packages: vec![ChangeItem { id: 17906, change_number: 100 }],
        };
        assert_eq!(process(&h.ctx, payload).await, Outcome::Success);

        let record = h.storage.get(EntityKind::Change, 100).await.unwrap().unwrap();
        assert_eq!(record["change_number"], 100);
        assert_eq!(record["apps"], json!([{"id": 730, "name": "Counter-Strike 2"}]));
        assert_eq!(record["packages"], json!([{"id": 17906, "name": ""}]));

        // Exactly one grouped record for the single change number.
        let changes: Vec<_> = h
            .storage
            .dump()
            .into_keys()
            .filter(|(kind, _)| *kind == EntityKind::Change)
            .collect();
        assert_eq!(changes.len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_change_numbers_fan_out() {
        let h = harness();
        let payload = ChangesPayload {
            apps: vec![
                ChangeItem { id: 10, change_number: 1 },
                ChangeItem { id: 20, change_number: 2 },
            ],
            packages: vec![ChangeItem { id: 30, change_number: 2 }],
        };
        assert_eq!(process(&h.ctx, payload).await, Outcome::Success);

        assert!(h.storage.get(EntityKind::Change, 1).await.unwrap().is_some());
        let second = h.storage.get(EntityKind::Change, 2).await.unwrap().unwrap();
        assert_eq!(second["apps"].as_array().unwrap().len(), 1);
        assert_eq!(second["packages"].as_array().unwrap().len(), 1);

        // One notification per change number.
        assert_eq!(h.sink.updates.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reprocessing_same_batch_is_idempotent() {
        let h = harness();
        let payload = ChangesPayload {
            apps: vec![ChangeItem { id: 730, change_number: 100 }],
            packages: vec![],
        };
        assert_eq!(process(&h.ctx, payload.clone()).await, Outcome::Success);
        assert_eq!(process(&h.ctx, payload).await, Outcome::Success);

        let changes: Vec<_> = h
            .storage
            .dump()
            .into_keys()
            .filter(|(kind, _)| *kind == EntityKind::Change)
            .collect();
        assert_eq!(changes.len(), 1);
    }
}
