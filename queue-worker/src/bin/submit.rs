//! Operator CLI for injecting a single job into a queue.
//!
//! Usage: `gamedb-submit <queue> <id>` where queue is one of
//! apps, packages, bundles, players, profiles.

use anyhow::{bail, Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gamedb::{
    build_registry, submit, AppPayload, BundlePayload, Config, JobPayload, PackagePayload,
    PlayerPayload, ProfilePayload, Publisher,
};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let (queue, id) = match args.as_slice() {
        [_, queue, id] => (queue.clone(), id.clone()),
        _ => bail!("usage: gamedb-submit <queue> <id>"),
    };
    let id: u64 = id.parse().context("id must be numeric")?;

    let payload = match queue.as_str() {
        "apps" => JobPayload::App(AppPayload {
            id: id as u32,
            change_number: 0,
            vdf: serde_json::Value::Null,
            fetch_store_page: false,
        }),
        "packages" => JobPayload::Package(PackagePayload {
            id: id as u32,
            change_number: 0,
            vdf: serde_json::Value::Null,
            fetch_store_page: false,
        }),
        "bundles" => JobPayload::Bundle(BundlePayload { bundle_id: id as u32 }),
        "players" => JobPayload::Player(PlayerPayload {
            player_id: id,
            user_agent: None,
            skip_groups: false,
        }),
        "profiles" => JobPayload::Profile(ProfilePayload { player_id: id }),
        other => bail!("no payload shape for queue {other}"),
    };

    let config = Config::from_env();
    let registry = build_registry(&config);
    let publisher = Publisher::new(config.rabbit_dsn.clone());

    submit(&registry, &publisher, &queue, payload).await?;
    tracing::info!(queue = %queue, id = id, "job_submitted");

    publisher.close().await;
    Ok(())
}
